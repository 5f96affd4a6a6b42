use crate::fs::{RemoteFileSystem, RemoteFsKind};
use crate::RemoteError;
use std::collections::BTreeMap;
use std::path::Path;

/// A remote file whose stored name carries a `.<md5>` suffix, indexed here
/// by the stripped name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub name: String,
    pub md5: String,
    pub size: u64,
}

/// Upload `local` to `<remote>.<md5>`, committing atomically per backend kind.
///
/// Broker and distributed-fs backends stage the bytes at `<remote>.part` and
/// rename into place; the rename is the commit point. Object stores upload
/// straight to the final name, relying on single-shot PUT atomicity.
pub fn upload_with_checksum(
    fs: &dyn RemoteFileSystem,
    local: &Path,
    remote: &str,
    md5: &str,
) -> Result<(), RemoteError> {
    let full_remote = format!("{remote}.{md5}");
    match fs.kind() {
        RemoteFsKind::Dfs | RemoteFsKind::Broker => {
            let staging = format!("{remote}.part");
            fs.upload(local, &staging)?;
            fs.rename(&staging, &full_remote)?;
        }
        RemoteFsKind::ObjectStore => {
            fs.upload(local, &full_remote)?;
        }
    }
    Ok(())
}

/// List `dir` and index the result by checksum-stripped file name.
///
/// The segment after the final `.` is taken as the hex md5. Names with no
/// `.`, or with a trailing `.`, cannot belong to a checksummed manifest and
/// are skipped.
pub fn list_with_checksum(
    fs: &dyn RemoteFileSystem,
    dir: &str,
) -> Result<BTreeMap<String, FileStat>, RemoteError> {
    let mut indexed = BTreeMap::new();
    for info in fs.list(dir)? {
        let file_name = info
            .file_name
            .rsplit('/')
            .next()
            .unwrap_or(info.file_name.as_str());
        let Some((name, md5)) = file_name.rsplit_once('.') else {
            continue;
        };
        if md5.is_empty() {
            continue;
        }
        indexed.insert(
            name.to_owned(),
            FileStat {
                name: name.to_owned(),
                md5: md5.to_owned(),
                size: info.file_size,
            },
        );
    }
    Ok(indexed)
}
