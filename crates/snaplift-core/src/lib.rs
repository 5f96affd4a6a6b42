//! Tablet snapshot transfer orchestration for a columnar database backend.
//!
//! This crate ties the local snapshot layout and the remote transfer
//! capabilities into the `SnapshotLoader`: the per-task engine that uploads
//! snapshots to remote storage, downloads them back, pulls them from peer
//! nodes over HTTP, and atomically promotes a completed snapshot into a live
//! tablet directory. It also provides the process-wide local snapshot lock
//! registry and the coordinator progress/cancellation protocol.

pub mod engine;
pub mod loader;
pub mod locks;
pub mod promote;
pub mod pull;
pub mod report;

pub use engine::{
    DataDir, EngineError, SnapshotManager, StorageEngine, Tablet, TabletLockGuard, TabletLockKind,
    TabletManager,
};
pub use loader::{LoaderEnv, SnapshotLoader};
pub use locks::{LocalSnapshotLocks, SnapshotPathGuard};
pub use pull::RemoteTabletSnapshot;
pub use report::{CoordinatorClient, ReportError, ReportStatus, SnapshotLoaderReport, TaskKind};

use snaplift_remote::RemoteError;
use snaplift_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("storage backend not initialized")]
    BackendUninitialized,
    #[error("reach the capacity limit of path {path}, file_size={file_size}")]
    CapacityExceeded { path: String, file_size: u64 },
    #[error("invalid md5 of downloaded file {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },
    #[error("get nothing from remote path: {0}")]
    EmptyRemote(String),
    #[error("failed to get local tablet: {0}")]
    TabletNotFound(u64),
    #[error("failed to get store by path: {0}")]
    StoreNotFound(String),
    #[error("path does not match. snapshot: {snapshot_path}, tablet path: {tablet_path}")]
    PathMismatch {
        snapshot_path: String,
        tablet_path: String,
    },
    #[error("path does not exist: {0}")]
    PathMissing(String),
    #[error("only support overwrite now")]
    OverwriteOnly,
    #[error("failed to convert rowset ids in snapshot {snapshot_path}: {message}")]
    RowsetConvert {
        snapshot_path: String,
        message: String,
    },
    #[error("failed to get tablet locks, tablet: {0}")]
    ObtainLockFailed(u64),
    #[error("failed to reload header of tablet {tablet_id}: {message}")]
    TabletReload { tablet_id: u64, message: String },
    #[error("move tablet failed: {0}")]
    MoveFailed(String),
    #[error("job is cancelled")]
    Cancelled,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("storage engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("local I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Lock-contention during promotion is the one error the coordinator is
    /// expected to resolve by re-issuing the task.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::ObtainLockFailed(_))
    }
}
