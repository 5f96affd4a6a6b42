//! In-memory doubles for the loader's injected services.
#![allow(dead_code)]

use snaplift_core::{
    CoordinatorClient, DataDir, EngineError, LoaderEnv, LocalSnapshotLocks, ReportError,
    ReportStatus, SnapshotLoader, SnapshotLoaderReport, SnapshotManager, StorageEngine, Tablet,
    TabletLockGuard, TabletLockKind, TabletManager,
};
use snaplift_remote::{
    NetworkAddress, PeerTransferConfig, RemoteError, RemoteFileInfo, RemoteFileSystem,
    RemoteFsFactory, RemoteFsKind,
};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct TestDataDir {
    path: PathBuf,
    full: AtomicBool,
}

impl TestDataDir {
    pub fn new(path: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            path: path.into(),
            full: AtomicBool::new(false),
        })
    }

    pub fn set_full(&self, full: bool) {
        self.full.store(full, Ordering::SeqCst);
    }
}

impl DataDir for TestDataDir {
    fn path(&self) -> &Path {
        &self.path
    }

    fn reach_capacity_limit(&self, _incoming_bytes: u64) -> bool {
        self.full.load(Ordering::SeqCst)
    }
}

pub struct TestTablet {
    tablet_id: u64,
    tablet_path: PathBuf,
    data_dir: Arc<TestDataDir>,
    migration: Mutex<()>,
    base_compaction: Mutex<()>,
    cumulative_compaction: Mutex<()>,
    cold_compaction: Mutex<()>,
    build_inverted_index: Mutex<()>,
    meta_store: Mutex<()>,
}

impl TestTablet {
    pub fn new(
        tablet_id: u64,
        tablet_path: impl Into<PathBuf>,
        data_dir: Arc<TestDataDir>,
    ) -> Arc<Self> {
        Arc::new(Self {
            tablet_id,
            tablet_path: tablet_path.into(),
            data_dir,
            migration: Mutex::new(()),
            base_compaction: Mutex::new(()),
            cumulative_compaction: Mutex::new(()),
            cold_compaction: Mutex::new(()),
            build_inverted_index: Mutex::new(()),
            meta_store: Mutex::new(()),
        })
    }

    /// Direct access to one lock, for simulating contention from another
    /// actor (a compaction, a migration).
    pub fn lock_ref(&self, kind: TabletLockKind) -> &Mutex<()> {
        match kind {
            TabletLockKind::Migration => &self.migration,
            TabletLockKind::BaseCompaction => &self.base_compaction,
            TabletLockKind::CumulativeCompaction => &self.cumulative_compaction,
            TabletLockKind::ColdCompaction => &self.cold_compaction,
            TabletLockKind::BuildInvertedIndex => &self.build_inverted_index,
            TabletLockKind::MetaStore => &self.meta_store,
        }
    }
}

impl Tablet for TestTablet {
    fn tablet_id(&self) -> u64 {
        self.tablet_id
    }

    fn replica_id(&self) -> u64 {
        self.tablet_id + 100
    }

    fn table_id(&self) -> u64 {
        self.tablet_id + 200
    }

    fn partition_id(&self) -> u64 {
        self.tablet_id + 300
    }

    fn tablet_path(&self) -> PathBuf {
        self.tablet_path.clone()
    }

    fn data_dir(&self) -> Arc<dyn DataDir> {
        Arc::clone(&self.data_dir) as Arc<dyn DataDir>
    }

    fn try_lock(&self, kind: TabletLockKind) -> Option<TabletLockGuard<'_>> {
        self.lock_ref(kind).try_lock().ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadCall {
    pub tablet_id: u64,
    pub schema_hash: u32,
    pub tablet_path: PathBuf,
    pub restore: bool,
}

#[derive(Default)]
pub struct TestEngine {
    tablets: Mutex<HashMap<u64, Arc<TestTablet>>>,
    stores: Mutex<HashMap<PathBuf, Arc<TestDataDir>>>,
    pub convert_calls: Mutex<Vec<PathBuf>>,
    pub load_calls: Mutex<Vec<LoadCall>>,
    pub fail_convert: AtomicBool,
}

impl TestEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_tablet(&self, tablet: Arc<TestTablet>) {
        self.tablets
            .lock()
            .unwrap()
            .insert(tablet.tablet_id, tablet);
    }

    pub fn add_store(&self, store: Arc<TestDataDir>) {
        self.stores
            .lock()
            .unwrap()
            .insert(store.path().to_path_buf(), store);
    }
}

impl TabletManager for TestEngine {
    fn get_tablet(&self, tablet_id: u64) -> Option<Arc<dyn Tablet>> {
        self.tablets
            .lock()
            .unwrap()
            .get(&tablet_id)
            .cloned()
            .map(|t| t as Arc<dyn Tablet>)
    }

    fn load_tablet_from_dir(
        &self,
        _store: &dyn DataDir,
        tablet_id: u64,
        schema_hash: u32,
        tablet_path: &Path,
        restore: bool,
    ) -> Result<(), EngineError> {
        self.load_calls.lock().unwrap().push(LoadCall {
            tablet_id,
            schema_hash,
            tablet_path: tablet_path.to_path_buf(),
            restore,
        });
        Ok(())
    }
}

impl SnapshotManager for TestEngine {
    fn convert_rowset_ids(
        &self,
        snapshot_path: &Path,
        _tablet_id: u64,
        _replica_id: u64,
        _table_id: u64,
        _partition_id: u64,
        _schema_hash: u32,
    ) -> Result<(), EngineError> {
        if self.fail_convert.load(Ordering::SeqCst) {
            return Err(EngineError("rowset id rewrite failed".to_owned()));
        }
        self.convert_calls
            .lock()
            .unwrap()
            .push(snapshot_path.to_path_buf());
        Ok(())
    }
}

impl StorageEngine for TestEngine {
    fn tablet_manager(&self) -> &dyn TabletManager {
        self
    }

    fn snapshot_manager(&self) -> &dyn SnapshotManager {
        self
    }

    fn get_store(&self, path: &Path) -> Option<Arc<dyn DataDir>> {
        self.stores
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .map(|s| s as Arc<dyn DataDir>)
    }
}

/// Coordinator double: records every report, optionally failing transport or
/// answering `Cancelled` from the n-th report on.
#[derive(Default)]
pub struct ScriptedCoordinator {
    pub reports: Mutex<Vec<SnapshotLoaderReport>>,
    pub cancel_at: AtomicU32,
    pub fail_transport: AtomicBool,
}

impl ScriptedCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer `Cancelled` from the `n`-th report on (1-based).
    pub fn cancel_at_report(&self, n: u32) {
        self.cancel_at.store(n, Ordering::SeqCst);
    }

    pub fn report_count(&self) -> usize {
        self.reports.lock().unwrap().len()
    }
}

impl CoordinatorClient for ScriptedCoordinator {
    fn snapshot_loader_report(
        &self,
        report: &SnapshotLoaderReport,
    ) -> Result<ReportStatus, ReportError> {
        if self.fail_transport.load(Ordering::SeqCst) {
            return Err(ReportError("coordinator unreachable".to_owned()));
        }
        let mut reports = self.reports.lock().unwrap();
        reports.push(report.clone());
        let n = reports.len() as u32;
        let cancel_at = self.cancel_at.load(Ordering::SeqCst);
        if cancel_at != 0 && n >= cancel_at {
            Ok(ReportStatus::Cancelled)
        } else {
            Ok(ReportStatus::Ok)
        }
    }
}

/// In-memory remote filesystem with transfer accounting.
pub struct InMemoryRemoteFs {
    kind: RemoteFsKind,
    pub objects: Mutex<BTreeMap<String, Vec<u8>>>,
    pub upload_count: AtomicU32,
    pub download_count: AtomicU32,
    in_flight: AtomicU32,
    pub max_in_flight: AtomicU32,
}

impl InMemoryRemoteFs {
    pub fn new(kind: RemoteFsKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            objects: Mutex::new(BTreeMap::new()),
            upload_count: AtomicU32::new(0),
            download_count: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
        })
    }

    pub fn insert_object(&self, key: &str, bytes: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_owned(), bytes.to_vec());
    }

    pub fn object_names(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn uploads(&self) -> u32 {
        self.upload_count.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> u32 {
        self.download_count.load(Ordering::SeqCst)
    }
}

impl RemoteFileSystem for InMemoryRemoteFs {
    fn kind(&self) -> RemoteFsKind {
        self.kind
    }

    fn list(&self, dir: &str) -> Result<Vec<RemoteFileInfo>, RemoteError> {
        let prefix = format!("{dir}/");
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| {
                key.strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.contains('/'))
            })
            .map(|(key, bytes)| RemoteFileInfo {
                file_name: key.clone(),
                file_size: bytes.len() as u64,
            })
            .collect())
    }

    fn upload(&self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(2));

        let bytes = std::fs::read(local)?;
        self.objects.lock().unwrap().insert(remote.to_owned(), bytes);
        self.upload_count.fetch_add(1, Ordering::SeqCst);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn download(&self, remote: &str, local: &Path) -> Result<(), RemoteError> {
        let bytes = self
            .objects
            .lock()
            .unwrap()
            .get(remote)
            .cloned()
            .ok_or_else(|| RemoteError::Backend(format!("no such remote file: {remote}")))?;
        std::fs::write(local, bytes)?;
        self.download_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), RemoteError> {
        let mut objects = self.objects.lock().unwrap();
        let bytes = objects
            .remove(from)
            .ok_or_else(|| RemoteError::Backend(format!("rename source missing: {from}")))?;
        objects.insert(to.to_owned(), bytes);
        Ok(())
    }
}

pub struct FixedFsFactory(pub Arc<InMemoryRemoteFs>);

impl RemoteFsFactory for FixedFsFactory {
    fn create(
        &self,
        _kind: RemoteFsKind,
        _location: &str,
        _broker_addr: &NetworkAddress,
        _props: &HashMap<String, String>,
    ) -> Result<Arc<dyn RemoteFileSystem>, RemoteError> {
        Ok(Arc::clone(&self.0) as Arc<dyn RemoteFileSystem>)
    }
}

/// All loader services wired to in-memory doubles.
pub struct TestBed {
    pub engine: Arc<TestEngine>,
    pub coordinator: Arc<ScriptedCoordinator>,
    pub remote: Arc<InMemoryRemoteFs>,
    pub locks: Arc<LocalSnapshotLocks>,
}

impl TestBed {
    pub fn new(kind: RemoteFsKind) -> Self {
        Self {
            engine: TestEngine::new(),
            coordinator: ScriptedCoordinator::new(),
            remote: InMemoryRemoteFs::new(kind),
            locks: LocalSnapshotLocks::new(),
        }
    }

    pub fn env(&self) -> LoaderEnv {
        LoaderEnv {
            engine: Arc::clone(&self.engine) as Arc<dyn StorageEngine>,
            coordinator: Arc::clone(&self.coordinator) as Arc<dyn CoordinatorClient>,
            snapshot_locks: Arc::clone(&self.locks),
            remote_fs_factory: Arc::new(FixedFsFactory(Arc::clone(&self.remote))),
            peer_config: PeerTransferConfig {
                retry_backoff_secs: 0,
                ..PeerTransferConfig::default()
            },
        }
    }

    /// A loader with its remote backend initialized.
    pub fn loader(&self) -> SnapshotLoader {
        let mut loader = self.loader_uninit();
        loader
            .init(self.remote.kind(), "s3://bucket/backup-repo")
            .unwrap();
        loader
    }

    pub fn loader_uninit(&self) -> SnapshotLoader {
        SnapshotLoader::new(
            self.env(),
            7001,
            9001,
            NetworkAddress::new("broker.local", 8000),
            HashMap::new(),
        )
    }
}

/// Create `<root>/<tablet_id>/<schema_hash>/` holding `files`, returning the
/// directory as a string path.
pub fn write_snapshot_dir(
    root: &Path,
    tablet_id: u64,
    schema_hash: u32,
    files: &[(&str, &[u8])],
) -> String {
    let dir = root.join(tablet_id.to_string()).join(schema_hash.to_string());
    std::fs::create_dir_all(&dir).unwrap();
    for (name, content) in files {
        std::fs::write(dir.join(name), content).unwrap();
    }
    dir.to_string_lossy().into_owned()
}

pub fn md5_of(bytes: &[u8]) -> String {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hash-input");
    std::fs::write(&path, bytes).unwrap();
    snaplift_store::localfs::md5sum(&path).unwrap()
}
