//! Pulling tablet snapshots from a peer node's HTTP download endpoint.

use crate::loader::SnapshotLoader;
use crate::report::TaskKind;
use crate::CoreError;
use snaplift_remote::{NetworkAddress, PeerClient, PeerFileStat};
use snaplift_store::localfs::LocalFileStat;
use snaplift_store::{layout, localfs, StoreError};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Coordinates for pulling one tablet snapshot from a peer node.
#[derive(Debug, Clone)]
pub struct RemoteTabletSnapshot {
    pub remote_be_addr: NetworkAddress,
    pub remote_token: String,
    pub remote_snapshot_path: String,
    pub remote_tablet_id: u64,
    pub local_snapshot_path: String,
    pub local_tablet_id: u64,
}

impl SnapshotLoader {
    /// Download tablet snapshots from peer nodes over HTTP.
    ///
    /// Same shape as [`download`](Self::download), but the source is another
    /// backend's file server: the diff predicate is `(size, md5)` so large
    /// unchanged files are skipped without hashing the remote side, and a
    /// peer that reports no md5 is compared by size alone.
    pub fn remote_http_download(
        &self,
        remote_tablet_snapshots: &[RemoteTabletSnapshot],
    ) -> Result<Vec<u64>, CoreError> {
        let mut probe_counter = 0;
        self.report_every(0, &mut probe_counter, 0, 0, TaskKind::Download)?;

        let mut downloaded_tablet_ids = Vec::new();
        let mut report_counter = 0;
        let total_num = remote_tablet_snapshots.len() as u32;
        let mut finished_num = 0;
        for snapshot in remote_tablet_snapshots {
            let local_path = &snapshot.local_snapshot_path;
            let remote_path = &snapshot.remote_snapshot_path;
            info!(
                "download snapshots via http. job: {}, task id: {}, local dir: {local_path}, \
                 remote dir: {remote_path}",
                self.job_id, self.task_id
            );

            let _path_guard = self.env.snapshot_locks.acquire(local_path);

            if !localfs::is_directory(Path::new(local_path)) {
                warn!("snapshot path is not directory or does not exist: {local_path}");
                return Err(StoreError::NotADirectory(local_path.clone()).into());
            }

            // Size and checksum of everything already present locally.
            let mut local_files: HashMap<String, LocalFileStat> = HashMap::new();
            for name in localfs::list_file_names(Path::new(local_path))? {
                let stat = localfs::md5_and_size(&Path::new(local_path).join(&name))?;
                local_files.insert(name, stat);
            }

            let client = PeerClient::new(
                &snapshot.remote_be_addr,
                &snapshot.remote_token,
                self.env.peer_config.clone(),
            );
            info!(
                "list remote files in {remote_path}, job: {}, task id: {}, remote be: {}",
                self.job_id, self.task_id, snapshot.remote_be_addr
            );
            let mut remote_files: BTreeMap<String, PeerFileStat> = BTreeMap::new();
            for file_name in client.list_dir(remote_path)? {
                let file_url = client.file_url(remote_path, &file_name);
                let stat = client.stat_file(&file_url)?;
                remote_files.insert(file_name, stat);
            }

            self.report_every(
                10,
                &mut report_counter,
                finished_num,
                total_num,
                TaskKind::Download,
            )?;

            let mut need_download_files = Vec::new();
            for (remote_file, remote_stat) in &remote_files {
                debug!(
                    "remote file: {remote_file}, size: {}, md5: {}",
                    remote_stat.size, remote_stat.md5
                );
                let Some(local_stat) = local_files.get(remote_file) else {
                    need_download_files.push(remote_file.clone());
                    continue;
                };
                if remote_file.ends_with(".hdr") {
                    need_download_files.push(remote_file.clone());
                    continue;
                }
                if local_stat.size != remote_stat.size {
                    need_download_files.push(remote_file.clone());
                    continue;
                }
                // A peer that predates checksum support reports no md5;
                // matching sizes are then taken as identity.
                if !remote_stat.md5.is_empty() && local_stat.md5 != remote_stat.md5 {
                    need_download_files.push(remote_file.clone());
                    continue;
                }
                debug!("file {remote_file} already exists, skip download");
            }

            let local_tablet_id = snapshot.local_tablet_id;
            let tablet = self
                .env
                .engine
                .tablet_manager()
                .get_tablet(local_tablet_id)
                .ok_or(CoreError::TabletNotFound(local_tablet_id))?;
            let data_dir = tablet.data_dir();

            let mut total_file_size = 0u64;
            let started = Instant::now();
            for file_name in &need_download_files {
                let remote_stat = &remote_files[file_name];

                if data_dir.reach_capacity_limit(remote_stat.size) {
                    return Err(CoreError::CapacityExceeded {
                        path: data_dir.path().display().to_string(),
                        file_size: remote_stat.size,
                    });
                }
                total_file_size += remote_stat.size;

                let local_file_name = layout::rewrite_tablet_id(file_name, local_tablet_id)?;
                let local_file_path = Path::new(local_path).join(&local_file_name);
                client.download_file(remote_stat, &local_file_path)?;

                local_files.insert(
                    file_name.clone(),
                    LocalFileStat {
                        size: remote_stat.size,
                        md5: remote_stat.md5.clone(),
                    },
                );
            }

            let elapsed_ms = started.elapsed().as_millis() as u64;
            let copy_rate = if elapsed_ms > 0 {
                total_file_size as f64 / elapsed_ms as f64 / 1000.0
            } else {
                0.0
            };
            info!(
                "succeed to copy remote tablet {} to local tablet {local_tablet_id}, \
                 total file size: {total_file_size} B, cost: {elapsed_ms} ms, rate: {copy_rate:.2} MB/s",
                snapshot.remote_tablet_id
            );

            // Delete local files which are not in the remote set, compared
            // under the remote tablet id.
            for local_file in local_files.keys() {
                let new_name = match layout::rewrite_tablet_id(local_file, snapshot.remote_tablet_id)
                {
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
                info!(
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

            downloaded_tablet_ids.push(local_tablet_id);
            finished_num += 1;
        }

        info!(
            "finished to download snapshots. job: {}, task id: {}",
            self.job_id, self.task_id
        );
        Ok(downloaded_tablet_ids)
    }
}
