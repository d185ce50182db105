// Media Stream Core - remote media download-and-stream engine
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! One owner for the client, coordinator, proxy and cache manager

use crate::cache::CacheManager;
use crate::client::{RemoteClient, Transport};
use crate::config::StreamConfig;
use crate::download::DownloadCoordinator;
use crate::error::Result;
use crate::proxy::StreamingProxy;
use log::info;
use std::sync::Arc;

/// Fully wired media subsystem
pub struct MediaStack {
    pub client: Arc<RemoteClient>,
    pub coordinator: Arc<DownloadCoordinator>,
    pub proxy: Arc<StreamingProxy>,
    pub cache: Arc<CacheManager>,
}

impl MediaStack {
    /// Connect the client over `transport` and start the proxy
    pub async fn start(config: StreamConfig, transport: Transport) -> Result<Self> {
        config.validate()?;

        let client = RemoteClient::connect(transport, &config.client);
        let coordinator = Arc::new(DownloadCoordinator::new(
            Arc::clone(&client),
            config.coordinator.clone(),
        ));
        let proxy = StreamingProxy::new(Arc::clone(&coordinator), config.proxy.clone());
        let cache = Arc::new(CacheManager::new(
            Arc::clone(&coordinator),
            config.cache.clone(),
        ));

        let port = proxy.start().await?;
        info!("Media stack started, proxy on port {}", port);

        Ok(Self {
            client,
            coordinator,
            proxy,
            cache,
        })
    }

    /// Stop the proxy, abort downloads and close the client
    pub async fn stop(&self) {
        self.proxy.stop().await;
        self.coordinator.shutdown();
        self.client.close();
        info!("Media stack stopped");
    }
}
