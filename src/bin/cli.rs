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


use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use media_stream_core::client::{FileId, SimulatedRemote, SimulatedRemoteOptions};
use media_stream_core::{MediaStack, StreamConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "stream-proxy-cli")]
#[command(about = "Media stream core - desktop testing tool", long_about = None)]
struct Cli {
    /// JSON configuration file (defaults when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve every file of a directory through the streaming proxy
    Serve {
        /// Directory whose files act as the remote content
        #[arg(short, long)]
        source: PathBuf,

        /// Where "downloaded" files are written
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Simulated download rate in KiB per second
        #[arg(long, default_value_t = 512)]
        rate_kib: usize,
    },
    /// Download one file of a directory completely and print its local path
    Resolve {
        /// Directory whose files act as the remote content
        #[arg(short, long)]
        source: PathBuf,

        /// 1-based index of the file, in name order
        id: u64,
    },
    /// Print the default configuration as JSON
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => StreamConfig::load(path)
            .await
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => StreamConfig::default(),
    };

    match cli.command {
        Commands::Serve {
            source,
            cache_dir,
            rate_kib,
        } => serve(config, &source, cache_dir, rate_kib).await,
        Commands::Resolve { source, id } => resolve(config, &source, FileId(id)).await,
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&StreamConfig::default())?);
            Ok(())
        }
    }
}

async fn serve(
    config: StreamConfig,
    source: &Path,
    cache_dir: Option<PathBuf>,
    rate_kib: usize,
) -> Result<()> {
    let cache_dir = cache_dir.unwrap_or_else(|| std::env::temp_dir().join("media-stream-cache"));
    tokio::fs::create_dir_all(&cache_dir).await?;

    // 20 ticks per second
    let mut options = SimulatedRemoteOptions::new(&cache_dir);
    options.tick = Duration::from_millis(50);
    options.bytes_per_tick = (rate_kib.max(1) * 1024) / 20;

    let (remote, transport) = SimulatedRemote::start(options);
    let files = register_source(&remote, source).await?;
    let stack = MediaStack::start(config, transport).await?;

    println!("Serving {} files from {}", files.len(), source.display());
    for (id, name, size) in &files {
        println!("{}\t{}\t{}", id, name, stack.proxy.proxy_url(*id, Some(*size)));
    }
    println!("Press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    stack.stop().await;
    Ok(())
}

async fn resolve(config: StreamConfig, source: &Path, file_id: FileId) -> Result<()> {
    let cache_dir = std::env::temp_dir().join("media-stream-cache");
    tokio::fs::create_dir_all(&cache_dir).await?;

    let (remote, transport) = SimulatedRemote::start(SimulatedRemoteOptions::new(&cache_dir));
    let files = register_source(&remote, source).await?;
    if !files.iter().any(|(id, _, _)| *id == file_id) {
        bail!("No file with id {} (found {})", file_id, files.len());
    }

    let stack = MediaStack::start(config, transport).await?;
    let result = stack.coordinator.resolve(file_id, 1).await;
    stack.stop().await;

    let path = result?;
    println!("{}", path.display());
    Ok(())
}

/// Register the files of `source` in name order as ids 1, 2, ...
async fn register_source(
    remote: &Arc<SimulatedRemote>,
    source: &Path,
) -> Result<Vec<(FileId, String, u64)>> {
    let mut entries = tokio::fs::read_dir(source)
        .await
        .with_context(|| format!("Failed to read {}", source.display()))?;

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            paths.push(entry.path());
        }
    }
    paths.sort();

    let mut files = Vec::new();
    for (index, path) in paths.iter().enumerate() {
        let id = FileId(index as u64 + 1);
        remote.add_file_from_path(id, path).await?;
        let size = tokio::fs::metadata(path).await?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        files.push((id, name, size));
    }
    Ok(files)
}
