//! Capability traits over the storage engine.
//!
//! The snapshot loader never owns tablets, data directories, or tablet-level
//! locks; it borrows them through these seams. Production wires the real
//! storage engine in; tests substitute in-memory implementations.

use std::path::{Path, PathBuf};
use std::sync::{Arc, MutexGuard};
use thiserror::Error;

/// Error surfaced by a storage-engine operation.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct EngineError(pub String);

/// Guard for one tablet-level lock; releasing is dropping.
pub type TabletLockGuard<'a> = MutexGuard<'a, ()>;

/// The tablet-level locks that must all be held while a snapshot is moved
/// into the live tablet directory. Compaction, migration, index builds, and
/// meta-store writers may otherwise change or check the files underneath.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabletLockKind {
    Migration,
    BaseCompaction,
    CumulativeCompaction,
    ColdCompaction,
    BuildInvertedIndex,
    MetaStore,
}

impl TabletLockKind {
    pub const ALL: [TabletLockKind; 6] = [
        TabletLockKind::Migration,
        TabletLockKind::BaseCompaction,
        TabletLockKind::CumulativeCompaction,
        TabletLockKind::ColdCompaction,
        TabletLockKind::BuildInvertedIndex,
        TabletLockKind::MetaStore,
    ];
}

/// A mounted storage volume with capacity accounting.
pub trait DataDir: Send + Sync {
    fn path(&self) -> &Path;

    /// Whether admitting `incoming_bytes` more would cross the volume's
    /// capacity limit.
    fn reach_capacity_limit(&self, incoming_bytes: u64) -> bool;
}

/// A live tablet as exposed by the storage engine.
pub trait Tablet: Send + Sync {
    fn tablet_id(&self) -> u64;
    fn replica_id(&self) -> u64;
    fn table_id(&self) -> u64;
    fn partition_id(&self) -> u64;

    /// The live tablet directory, ending in `.../<tablet_id>/<schema_hash>`.
    fn tablet_path(&self) -> PathBuf;

    fn data_dir(&self) -> Arc<dyn DataDir>;

    /// Non-blocking acquisition of one tablet-level lock.
    fn try_lock(&self, kind: TabletLockKind) -> Option<TabletLockGuard<'_>>;
}

pub trait TabletManager: Send + Sync {
    fn get_tablet(&self, tablet_id: u64) -> Option<Arc<dyn Tablet>>;

    /// Reload a tablet from its on-disk directory after promotion.
    fn load_tablet_from_dir(
        &self,
        store: &dyn DataDir,
        tablet_id: u64,
        schema_hash: u32,
        tablet_path: &Path,
        restore: bool,
    ) -> Result<(), EngineError>;
}

pub trait SnapshotManager: Send + Sync {
    /// Rewrite rowset ids and tablet identity inside the snapshot's rowset
    /// metadata so the files can be adopted by the target tablet.
    fn convert_rowset_ids(
        &self,
        snapshot_path: &Path,
        tablet_id: u64,
        replica_id: u64,
        table_id: u64,
        partition_id: u64,
        schema_hash: u32,
    ) -> Result<(), EngineError>;
}

pub trait StorageEngine: Send + Sync {
    fn tablet_manager(&self) -> &dyn TabletManager;
    fn snapshot_manager(&self) -> &dyn SnapshotManager;

    /// Resolve the data directory mounted at `path`.
    fn get_store(&self, path: &Path) -> Option<Arc<dyn DataDir>>;
}
