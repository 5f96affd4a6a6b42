use crate::{NetworkAddress, RemoteError};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Storage backend family behind a [`RemoteFileSystem`].
///
/// The upload commit protocol differs per kind: object stores treat a single
/// PUT as atomic, while broker and distributed-fs backends need a staging
/// name plus rename. Only these three kinds are ever constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteFsKind {
    ObjectStore,
    Broker,
    Dfs,
}

/// One entry of a remote directory listing.
#[derive(Debug, Clone)]
pub struct RemoteFileInfo {
    pub file_name: String,
    pub file_size: u64,
}

/// Capability interface over a remote snapshot repository.
///
/// Concrete drivers (object-store client, broker proxy, distributed-fs
/// binding) live outside this engine and are injected through
/// [`RemoteFsFactory`]. Whole files are the transfer granularity.
pub trait RemoteFileSystem: Send + Sync {
    fn kind(&self) -> RemoteFsKind;

    /// List the files directly under `dir`.
    fn list(&self, dir: &str) -> Result<Vec<RemoteFileInfo>, RemoteError>;

    /// Upload a local file to `remote`, overwriting any existing object.
    fn upload(&self, local: &Path, remote: &str) -> Result<(), RemoteError>;

    /// Download `remote` into the local file at `local`.
    fn download(&self, remote: &str, local: &Path) -> Result<(), RemoteError>;

    /// Rename `from` to `to` on the remote side.
    fn rename(&self, from: &str, to: &str) -> Result<(), RemoteError>;
}

/// Builds a [`RemoteFileSystem`] for a backend kind and location.
///
/// `location` is the repository root URI or path; broker backends also need
/// the broker endpoint; `props` carries backend-specific credentials and
/// options. Location-parse and configuration failures surface as
/// [`RemoteError`].
pub trait RemoteFsFactory: Send + Sync {
    fn create(
        &self,
        kind: RemoteFsKind,
        location: &str,
        broker_addr: &NetworkAddress,
        props: &HashMap<String, String>,
    ) -> Result<Arc<dyn RemoteFileSystem>, RemoteError>;
}
