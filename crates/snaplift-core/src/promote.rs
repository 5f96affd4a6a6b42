//! Promotion of a completed snapshot directory into the live tablet
//! directory.

use crate::engine::{Tablet, TabletLockKind};
use crate::loader::SnapshotLoader;
use crate::CoreError;
use snaplift_store::{layout, localfs};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

impl SnapshotLoader {
    /// Replace the live tablet directory with hardlinks to the snapshot's
    /// files and reload the tablet from disk.
    ///
    /// Every tablet-level lock is taken non-blocking; contention returns a
    /// retryable [`CoreError::ObtainLockFailed`] without touching anything.
    /// Once the locks are held, the sequence is remove-recreate-link: it is
    /// not crash-atomic, and an interruption can leave the tablet directory
    /// empty or partially populated until the coordinator re-issues the
    /// restore.
    pub fn move_snapshot(
        &self,
        snapshot_path: &str,
        tablet: &Arc<dyn Tablet>,
        overwrite: bool,
    ) -> Result<(), CoreError> {
        let _path_guard = self.env.snapshot_locks.acquire(snapshot_path);

        let tablet_path = tablet.tablet_path();
        let data_dir = tablet.data_dir();
        let store_path = data_dir.path();
        info!(
            "begin to move snapshot files. from: {snapshot_path}, to: {}, store: {}, job: {}, \
             task id: {}",
            tablet_path.display(),
            store_path.display(),
            self.job_id,
            self.task_id
        );

        let (snapshot_tablet_id, snapshot_schema_hash) =
            layout::tablet_id_and_schema_hash_from_path(snapshot_path)?;

        let tablet_path_str = tablet_path.to_string_lossy().into_owned();
        let (tablet_id, schema_hash) =
            layout::tablet_id_and_schema_hash_from_path(&tablet_path_str)?;

        if tablet_id != snapshot_tablet_id || schema_hash != snapshot_schema_hash {
            warn!(
                "path does not match. snapshot: {snapshot_path}, tablet path: {tablet_path_str}"
            );
            return Err(CoreError::PathMismatch {
                snapshot_path: snapshot_path.to_owned(),
                tablet_path: tablet_path_str,
            });
        }

        let store = self
            .env
            .engine
            .get_store(store_path)
            .ok_or_else(|| CoreError::StoreNotFound(store_path.display().to_string()))?;

        if !tablet_path.exists() {
            warn!("tablet path does not exist: {}", tablet_path.display());
            return Err(CoreError::PathMissing(tablet_path_str));
        }
        if !Path::new(snapshot_path).exists() {
            warn!("snapshot path does not exist: {snapshot_path}");
            return Err(CoreError::PathMissing(snapshot_path.to_owned()));
        }

        // Rewrite the rowset ids and tablet identity inside the snapshot's
        // rowset metadata before the files go live.
        self.env
            .engine
            .snapshot_manager()
            .convert_rowset_ids(
                Path::new(snapshot_path),
                tablet_id,
                tablet.replica_id(),
                tablet.table_id(),
                tablet.partition_id(),
                schema_hash,
            )
            .map_err(|e| {
                warn!(
                    "failed to convert rowset ids in snapshot: {snapshot_path}, tablet path: {}, \
                     err: {e}",
                    tablet_path.display()
                );
                CoreError::RowsetConvert {
                    snapshot_path: snapshot_path.to_owned(),
                    message: e.to_string(),
                }
            })?;

        if !overwrite {
            return Err(CoreError::OverwriteOnly);
        }

        // Migration, compaction, index builds, and meta-store writers may
        // change or check the files and tablet meta underneath us.
        let mut lock_guards = Vec::with_capacity(TabletLockKind::ALL.len());
        for kind in TabletLockKind::ALL {
            match tablet.try_lock(kind) {
                Some(guard) => lock_guards.push(guard),
                None => {
                    let status = CoreError::ObtainLockFailed(tablet_id);
                    warn!(
                        "{status}, snapshot path: {snapshot_path}, tablet path: {}",
                        tablet_path.display()
                    );
                    return Err(status);
                }
            }
        }

        let snapshot_files = localfs::list_file_names(Path::new(snapshot_path))?;

        localfs::remove_dir_all_and_recreate(&tablet_path).map_err(|e| {
            warn!(
                "failed to move tablet path: {}. err: {e}",
                tablet_path.display()
            );
            CoreError::MoveFailed(e.to_string())
        })?;
        debug!("re-created dir: {}", tablet_path.display());

        // Files in the snapshot dir are released later by snapshot cleanup.
        let mut linked_files: Vec<PathBuf> = Vec::with_capacity(snapshot_files.len());
        for file in &snapshot_files {
            let full_src_path = Path::new(snapshot_path).join(file);
            let full_dest_path = tablet_path.join(file);
            if let Err(e) = localfs::hard_link(&full_src_path, &full_dest_path) {
                warn!(
                    "failed to link file from {} to {}, err: {e}",
                    full_src_path.display(),
                    full_dest_path.display()
                );
                for linked_file in &linked_files {
                    let _ = localfs::remove_file(linked_file);
                }
                return Err(CoreError::MoveFailed(e.to_string()));
            }
            linked_files.push(full_dest_path.clone());
            debug!(
                "link file from {} to {}",
                full_src_path.display(),
                full_dest_path.display()
            );
        }

        self.env
            .engine
            .tablet_manager()
            .load_tablet_from_dir(store.as_ref(), tablet_id, schema_hash, &tablet_path, true)
            .map_err(|e| {
                warn!("failed to reload header of tablet: {tablet_id}");
                CoreError::TabletReload {
                    tablet_id,
                    message: e.to_string(),
                }
            })?;
        info!("finished to reload header of tablet: {tablet_id}");

        Ok(())
    }
}
