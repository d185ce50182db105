//! Media stream core
//!
//! Turns files of a remote, chunk-downloading content source into seekable
//! HTTP streams for a local media player, while bounding the disk space the
//! downloads and extracted art take up.
//!
//! - [`client`] - request/response client for the remote content source
//! - [`download`] - deduplicated, concurrency-bounded download coordination
//! - [`proxy`] - loopback HTTP server streaming files while they download
//! - [`cache`] - playback history eviction, art cache, failure backoff
//! - [`stack`] - wires everything together with explicit start/stop

pub mod cache;
pub mod client;
pub mod config;
pub mod download;
pub mod error;
pub mod file;
pub mod proxy;
pub mod stack;

pub use config::StreamConfig;
pub use error::{Result, StreamError};
pub use stack::MediaStack;
