//! Remote side of the snaplift snapshot transfer engine.
//!
//! This crate provides the remote filesystem capability consumed by the
//! transfer orchestrators (`fs`), the checksum-indexed remote naming scheme
//! (`checksum`), a blocking HTTP client for pulling snapshot files from a
//! peer backend node (`peer`), and tuning configuration for peer transfers
//! (`config`).

pub mod checksum;
pub mod config;
pub mod fs;
pub mod peer;

pub use checksum::{list_with_checksum, upload_with_checksum, FileStat};
pub use config::PeerTransferConfig;
pub use fs::{RemoteFileInfo, RemoteFileSystem, RemoteFsFactory, RemoteFsKind};
pub use peer::{PeerClient, PeerFileStat};

use thiserror::Error;

/// Host/port pair for a broker endpoint or a peer backend node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAddress {
    pub host: String,
    pub port: u16,
}

impl NetworkAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("invalid remote location: {0}")]
    InvalidLocation(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("downloaded file size is not equal for {path}: expected {expected}, got {actual}")]
    SizeMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },
    #[error("downloaded file md5 is not equal for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },
    #[error("config error: {0}")]
    Config(String),
    #[error(transparent)]
    Store(#[from] snaplift_store::StoreError),
}
