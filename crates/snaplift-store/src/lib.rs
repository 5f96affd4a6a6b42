//! Local snapshot storage layout for the snaplift transfer engine.
//!
//! This crate provides the path codec for tablet snapshot directories
//! (`layout`) and a thin local filesystem adapter (`localfs`) used by the
//! transfer orchestrators: listing, hashing, permissions, hardlinks.

pub mod layout;
pub mod localfs;

pub use layout::{rewrite_tablet_id, tablet_id_and_schema_hash_from_path, tablet_id_from_remote_path};
pub use localfs::LocalFileStat;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("local I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to get tablet id from path: {0}")]
    PathParse(String),
    #[error("invalid tablet file name: {0}")]
    InvalidFileName(String),
    #[error("snapshot path is not directory or does not exist: {0}")]
    NotADirectory(String),
}
