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


//! Values exchanged with the remote content client

use crate::error::{Result, StreamError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Opaque handle of a remote-downloadable file.
///
/// Stable for the lifetime of a download, not necessarily across remote
/// sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub u64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FileId {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        let id = s
            .trim()
            .parse::<u64>()
            .map_err(|e| StreamError::invalid_input(format!("Invalid file id '{}': {}", s, e)))?;
        Ok(FileId(id))
    }
}

/// Download status of a remote file, as reported by the remote client.
/// Never mutated here, only read.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileStatus {
    pub id: FileId,

    /// Local path of the backing file, present once any bytes exist
    pub local_path: Option<String>,

    /// Bytes written to the local file so far
    pub bytes_available: u64,

    /// Total size (0 if unknown)
    pub expected_size: u64,

    pub is_downloading_completed: bool,

    pub can_be_downloaded: bool,
}

impl FileStatus {
    /// Local path if the remote reported a non-empty one
    pub fn path(&self) -> Option<PathBuf> {
        self.local_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }

    pub fn has_local_path(&self) -> bool {
        self.path().is_some()
    }

    /// Fully downloaded and locally addressable
    pub fn is_ready(&self) -> bool {
        self.is_downloading_completed && self.has_local_path()
    }

    /// Not complete and never will be
    pub fn is_dead(&self) -> bool {
        !self.is_downloading_completed && !self.can_be_downloaded
    }
}

/// Requests understood by the remote content client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum Request {
    /// Current status of a file
    GetFile { file_id: FileId },

    /// Start (or raise the priority of) a download. With `synchronous` the
    /// response is only sent once the download finished.
    DownloadFile {
        file_id: FileId,
        priority: u8,
        synchronous: bool,
    },

    CancelDownloadFile { file_id: FileId },

    /// Delete the local copy of a file
    DeleteFile { file_id: FileId },

    /// Shrink remote-managed storage to `max_size` bytes
    OptimizeStorage { max_size: u64 },
}

impl Request {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Request::GetFile { .. } => "getFile",
            Request::DownloadFile { .. } => "downloadFile",
            Request::CancelDownloadFile { .. } => "cancelDownloadFile",
            Request::DeleteFile { .. } => "deleteFile",
            Request::OptimizeStorage { .. } => "optimizeStorage",
        }
    }
}

/// Responses of the remote content client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum Response {
    File(FileStatus),
    Ok,
}

impl Response {
    /// Expect a file status
    pub fn into_file(self) -> Result<FileStatus> {
        match self {
            Response::File(status) => Ok(status),
            other => Err(StreamError::remote(format!(
                "Expected file status, got {:?}",
                other
            ))),
        }
    }
}

/// Authorization/connection state of the remote session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Connecting or authorizing
    Connecting,
    /// Requests can be served
    Ready,
    /// Transport gone; no further requests are possible
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file_id() {
        assert_eq!("42".parse::<FileId>().unwrap(), FileId(42));
        assert_eq!(" 7 ".parse::<FileId>().unwrap(), FileId(7));
        assert!("abc".parse::<FileId>().is_err());
        assert!("-1".parse::<FileId>().is_err());
        assert!("".parse::<FileId>().is_err());
    }

    #[test]
    fn test_status_predicates() {
        let mut status = FileStatus {
            id: FileId(1),
            local_path: Some(String::new()),
            can_be_downloaded: true,
            ..Default::default()
        };
        assert!(!status.has_local_path());
        assert!(!status.is_ready());
        assert!(!status.is_dead());

        status.local_path = Some("/tmp/a.mp3".to_string());
        status.is_downloading_completed = true;
        assert!(status.is_ready());

        status.is_downloading_completed = false;
        status.can_be_downloaded = false;
        assert!(status.is_dead());
    }

    #[test]
    fn test_request_wire_tag() {
        let json = serde_json::to_value(Request::DownloadFile {
            file_id: FileId(9),
            priority: 32,
            synchronous: true,
        })
        .unwrap();
        assert_eq!(json["@type"], "downloadFile");
        assert_eq!(json["file_id"], 9);
    }
}
