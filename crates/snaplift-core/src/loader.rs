//! The per-task snapshot loader and its remote-filesystem orchestrators.

use crate::engine::StorageEngine;
use crate::locks::LocalSnapshotLocks;
use crate::report::{CoordinatorClient, ReportStatus, SnapshotLoaderReport, TaskKind};
use crate::CoreError;
use snaplift_remote::{
    list_with_checksum, upload_with_checksum, NetworkAddress, PeerTransferConfig, RemoteFileSystem,
    RemoteFsFactory, RemoteFsKind,
};
use snaplift_store::{layout, localfs, StoreError};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Services a loader borrows from the host process.
#[derive(Clone)]
pub struct LoaderEnv {
    pub engine: Arc<dyn StorageEngine>,
    pub coordinator: Arc<dyn CoordinatorClient>,
    pub snapshot_locks: Arc<LocalSnapshotLocks>,
    pub remote_fs_factory: Arc<dyn RemoteFsFactory>,
    pub peer_config: PeerTransferConfig,
}

/// Job-scoped engine for moving tablet snapshots between the local storage
/// layout, a remote repository, and peer nodes.
///
/// A loader lives for one coordinator-assigned task. It is driven by a
/// single caller; concurrency across loaders is mediated by the snapshot
/// path lock registry.
pub struct SnapshotLoader {
    pub(crate) env: LoaderEnv,
    pub(crate) job_id: i64,
    pub(crate) task_id: i64,
    pub(crate) broker_addr: NetworkAddress,
    pub(crate) props: HashMap<String, String>,
    pub(crate) remote_fs: Option<Arc<dyn RemoteFileSystem>>,
}

impl SnapshotLoader {
    pub fn new(
        env: LoaderEnv,
        job_id: i64,
        task_id: i64,
        broker_addr: NetworkAddress,
        props: HashMap<String, String>,
    ) -> Self {
        Self {
            env,
            job_id,
            task_id,
            broker_addr,
            props,
            remote_fs: None,
        }
    }

    /// Select and configure the remote filesystem backend.
    ///
    /// Must run before [`upload`](Self::upload) and
    /// [`download`](Self::download); the peer-pull and move operations do not
    /// need it.
    pub fn init(&mut self, kind: RemoteFsKind, location: &str) -> Result<(), CoreError> {
        let fs = self
            .env
            .remote_fs_factory
            .create(kind, location, &self.broker_addr, &self.props)?;
        self.remote_fs = Some(fs);
        Ok(())
    }

    /// Upload each `src` snapshot directory to its remote `dest`.
    ///
    /// Returns, per local tablet id, the checksummed manifest
    /// (`<file>.<md5>` for every local file, uploaded or skipped). Files
    /// already present remotely under the same checksummed name are not
    /// re-sent, which makes interrupted uploads resumable.
    pub fn upload(
        &self,
        src_to_dest_path: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<u64, Vec<String>>, CoreError> {
        let remote_fs = self.remote_fs()?;
        info!(
            "begin to upload snapshot files. num: {}, broker addr: {}, job: {}, task: {}",
            src_to_dest_path.len(),
            self.broker_addr,
            self.job_id,
            self.task_id
        );

        // Probe for cancellation before doing any work.
        let mut probe_counter = 0;
        self.report_every(0, &mut probe_counter, 0, 0, TaskKind::Upload)?;

        self.check_local_snapshot_paths(src_to_dest_path, true)?;

        let mut tablet_files = BTreeMap::new();
        let mut report_counter = 0;
        let total_num = src_to_dest_path.len() as u32;
        let mut finished_num = 0;
        for (src_path, dest_path) in src_to_dest_path {
            let _path_guard = self.env.snapshot_locks.acquire(src_path);

            let (tablet_id, _schema_hash) = layout::tablet_id_and_schema_hash_from_path(src_path)?;

            let remote_files = list_with_checksum(remote_fs.as_ref(), dest_path)?;
            for stat in remote_files.values() {
                debug!("get remote file: {}, checksum: {}", stat.name, stat.md5);
            }

            let local_files = localfs::list_file_names(Path::new(src_path))?;

            let mut files_with_checksum = Vec::with_capacity(local_files.len());
            for local_file in &local_files {
                self.report_every(10, &mut report_counter, finished_num, total_num, TaskKind::Upload)?;

                let local_file_path = Path::new(src_path).join(local_file);
                let md5 = localfs::md5sum(&local_file_path)?;
                debug!("get file checksum: {local_file}: {md5}");
                files_with_checksum.push(format!("{local_file}.{md5}"));

                let need_upload = match remote_files.get(local_file) {
                    Some(remote) if remote.md5 == md5 => false,
                    Some(remote) => {
                        // The remote object will be rewritten under the new
                        // checksummed name; the stale one is left behind.
                        warn!(
                            "remote file checksum is invalid. remote: {}.{}, local: {md5}",
                            remote.name, remote.md5
                        );
                        true
                    }
                    None => true,
                };
                if !need_upload {
                    debug!("file exists in remote path, no need to upload: {local_file}");
                    continue;
                }

                let remote_path = format!("{dest_path}/{local_file}");
                upload_with_checksum(remote_fs.as_ref(), &local_file_path, &remote_path, &md5)?;
            }

            tablet_files.insert(tablet_id, files_with_checksum);
            finished_num += 1;
            info!(
                "finished to write tablet to remote. local path: {src_path}, remote path: {dest_path}"
            );
        }

        info!(
            "finished to upload snapshots. job: {}, task id: {}",
            self.job_id, self.task_id
        );
        Ok(tablet_files)
    }

    /// Download each remote snapshot directory into its local `dest`.
    ///
    /// After a successful download the local directory holds exactly the
    /// remote file set (names rewritten to the local tablet id); local
    /// strays are pruned. Returns the local tablet ids touched.
    pub fn download(
        &self,
        src_to_dest_path: &BTreeMap<String, String>,
    ) -> Result<Vec<u64>, CoreError> {
        let remote_fs = self.remote_fs()?;
        info!(
            "begin to download snapshot files. num: {}, broker addr: {}, job: {}, task id: {}",
            src_to_dest_path.len(),
            self.broker_addr,
            self.job_id,
            self.task_id
        );

        let mut probe_counter = 0;
        self.report_every(0, &mut probe_counter, 0, 0, TaskKind::Download)?;

        self.check_local_snapshot_paths(src_to_dest_path, false)?;

        let mut downloaded_tablet_ids = Vec::new();
        let mut report_counter = 0;
        let total_num = src_to_dest_path.len() as u32;
        let mut finished_num = 0;
        for (remote_path, local_path) in src_to_dest_path {
            let _path_guard = self.env.snapshot_locks.acquire(local_path);

            let (local_tablet_id, schema_hash) =
                layout::tablet_id_and_schema_hash_from_path(local_path)?;
            downloaded_tablet_ids.push(local_tablet_id);

            let remote_tablet_id = layout::tablet_id_from_remote_path(remote_path)?;
            debug!(
                "get local tablet id: {local_tablet_id}, schema hash: {schema_hash}, \
                 remote tablet id: {remote_tablet_id}"
            );

            let mut local_files = localfs::list_file_names(Path::new(local_path))?;

            let remote_files = list_with_checksum(remote_fs.as_ref(), remote_path)?;
            if remote_files.is_empty() {
                warn!("get nothing from remote path: {remote_path}");
                return Err(CoreError::EmptyRemote(remote_path.clone()));
            }

            let tablet = self
                .env
                .engine
                .tablet_manager()
                .get_tablet(local_tablet_id)
                .ok_or(CoreError::TabletNotFound(local_tablet_id))?;
            let data_dir = tablet.data_dir();

            for (remote_file, file_stat) in &remote_files {
                self.report_every(
                    10,
                    &mut report_counter,
                    finished_num,
                    total_num,
                    TaskKind::Download,
                )?;

                let existing = local_files.iter().position(|f| f == remote_file);
                let need_download = if existing.is_none() {
                    true
                } else if remote_file.ends_with(".hdr") {
                    // Headers are authoritative and cheap; always refresh.
                    true
                } else {
                    match localfs::md5sum(&Path::new(local_path).join(remote_file)) {
                        Ok(local_md5) => {
                            debug!("get local file checksum: {remote_file}: {local_md5}");
                            local_md5 != file_stat.md5
                        }
                        Err(e) => {
                            warn!(
                                "failed to get md5sum of local file: {remote_file}. msg: {e}. \
                                 download it"
                            );
                            true
                        }
                    }
                };
                if !need_download {
                    info!("remote file already exists in local, no need to download. file: {remote_file}");
                    continue;
                }

                let full_remote_file = format!("{remote_path}/{remote_file}.{}", file_stat.md5);
                let local_file_name = layout::rewrite_tablet_id(remote_file, local_tablet_id)?;
                let full_local_file = Path::new(local_path).join(&local_file_name);
                info!(
                    "begin to download from {full_remote_file} to {}",
                    full_local_file.display()
                );
                let file_len = file_stat.size;

                if data_dir.reach_capacity_limit(file_len) {
                    return Err(CoreError::CapacityExceeded {
                        path: data_dir.path().display().to_string(),
                        file_size: file_len,
                    });
                }

                // The file is about to be overwritten; only re-add it to the
                // tracked set once it downloads and verifies.
                if let Some(idx) = existing {
                    local_files.remove(idx);
                }
                remote_fs.download(&full_remote_file, &full_local_file)?;

                let downloaded_md5 = localfs::md5sum(&full_local_file)?;
                debug!(
                    "get downloaded file checksum: {}: {downloaded_md5}",
                    full_local_file.display()
                );
                if downloaded_md5 != file_stat.md5 {
                    warn!(
                        "invalid md5 of downloaded file: {}, expected: {}, get: {downloaded_md5}",
                        full_local_file.display(),
                        file_stat.md5
                    );
                    return Err(CoreError::ChecksumMismatch {
                        path: full_local_file.display().to_string(),
                        expected: file_stat.md5.clone(),
                        actual: downloaded_md5,
                    });
                }

                local_files.push(local_file_name);
                info!(
                    "finished to download file. file: {}, length: {file_len}",
                    full_local_file.display()
                );
            }

            // Delete local files which are not in the remote set. Their names
            // are compared under the remote tablet id.
            for local_file in &local_files {
                let new_name = match layout::rewrite_tablet_id(local_file, remote_tablet_id) {
                    Ok(name) => name,
                    Err(e) => {
                        warn!("failed to replace tablet id. unknown local file: {e}. ignore it");
                        continue;
                    }
                };
                debug!("new file name after replace tablet id: {new_name}");
                if remote_files.contains_key(&new_name) {
                    continue;
                }

                let full_local_file = Path::new(local_path).join(local_file);
                debug!(
                    "begin to delete local snapshot file: {}, it does not exist in remote",
                    full_local_file.display()
                );
                if let Err(e) = localfs::remove_file(&full_local_file) {
                    warn!(
                        "failed to delete unknown local file: {}, error: {e}, ignore it",
                        full_local_file.display()
                    );
                }
            }

            finished_num += 1;
        }

        info!(
            "finished to download snapshots. job: {}, task id: {}",
            self.job_id, self.task_id
        );
        Ok(downloaded_tablet_ids)
    }

    pub(crate) fn remote_fs(&self) -> Result<&Arc<dyn RemoteFileSystem>, CoreError> {
        self.remote_fs
            .as_ref()
            .ok_or(CoreError::BackendUninitialized)
    }

    /// Coalesced progress report, and the only cancellation check point.
    ///
    /// Increments `counter`; nothing happens until it exceeds `threshold`,
    /// so `threshold = 0` forces a report and serves as the cancellation
    /// probe before work starts. A transport failure is swallowed and leaves
    /// the counter un-reset, so the next file retries the report. Only a
    /// successful round-trip carrying the cancelled status stops the task.
    pub(crate) fn report_every(
        &self,
        threshold: u32,
        counter: &mut u32,
        finished_num: u32,
        total_num: u32,
        task_kind: TaskKind,
    ) -> Result<(), CoreError> {
        *counter += 1;
        if *counter <= threshold {
            return Ok(());
        }

        info!(
            "report to coordinator. job id: {}, task id: {}, finished num: {finished_num}, \
             total num: {total_num}",
            self.job_id, self.task_id
        );

        let report = SnapshotLoaderReport {
            job_id: self.job_id,
            task_id: self.task_id,
            task_kind,
            finished_num,
            total_num,
        };
        let status = match self.env.coordinator.snapshot_loader_report(&report) {
            Ok(status) => status,
            Err(e) => {
                debug!("coordinator report failed, ignore: {e}");
                return Ok(());
            }
        };

        *counter = 0;
        if status == ReportStatus::Cancelled {
            info!(
                "job is cancelled. job id: {}, task id: {}",
                self.job_id, self.task_id
            );
            return Err(CoreError::Cancelled);
        }
        Ok(())
    }

    /// Every path on the local side of the mapping must be an existing
    /// directory before any transfer starts.
    pub(crate) fn check_local_snapshot_paths(
        &self,
        src_to_dest_path: &BTreeMap<String, String>,
        check_src: bool,
    ) -> Result<(), CoreError> {
        for (src, dest) in src_to_dest_path {
            let path = if check_src { src } else { dest };
            if !localfs::is_directory(Path::new(path)) {
                warn!("snapshot path is not directory or does not exist: {path}");
                return Err(StoreError::NotADirectory(path.clone()).into());
            }
        }
        info!(
            "all local snapshot paths are existing. num: {}",
            src_to_dest_path.len()
        );
        Ok(())
    }
}
