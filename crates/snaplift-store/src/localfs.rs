use crate::StoreError;
use md5::{Digest, Md5};
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

/// Size and MD5 of a local file, as used by the transfer diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileStat {
    pub size: u64,
    pub md5: String,
}

const HASH_BUF_SIZE: usize = 64 * 1024;

pub fn is_directory(path: &Path) -> bool {
    path.is_dir()
}

/// List the regular files directly inside `dir`, by file name.
///
/// Subdirectories are skipped: a snapshot directory is a flat set of header
/// and rowset files.
pub fn list_file_names(dir: &Path) -> Result<Vec<String>, StoreError> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_owned());
        }
    }
    names.sort();
    tracing::debug!("listed {} files in {}", names.len(), dir.display());
    Ok(names)
}

pub fn file_size(path: &Path) -> Result<u64, StoreError> {
    Ok(fs::metadata(path)?.len())
}

/// Hex MD5 of a file's bytes, computed streaming.
///
/// Snapshot files can run to many gigabytes, so the file is never read into
/// memory whole. This call blocks for as long as the hashing takes.
pub fn md5sum(path: &Path) -> Result<String, StoreError> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; HASH_BUF_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn md5_and_size(path: &Path) -> Result<LocalFileStat, StoreError> {
    Ok(LocalFileStat {
        size: file_size(path)?,
        md5: md5sum(path)?,
    })
}

/// Restrict a downloaded file to owner read/write.
#[cfg(unix)]
pub fn set_owner_rw(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
pub fn set_owner_rw(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

pub fn remove_file(path: &Path) -> Result<(), StoreError> {
    fs::remove_file(path)?;
    Ok(())
}

pub fn rename(from: &Path, to: &Path) -> Result<(), StoreError> {
    fs::rename(from, to)?;
    Ok(())
}

pub fn hard_link(src: &Path, dest: &Path) -> Result<(), StoreError> {
    fs::hard_link(src, dest)?;
    Ok(())
}

/// Delete a directory tree and recreate it empty.
pub fn remove_dir_all_and_recreate(dir: &Path) -> Result<(), StoreError> {
    fs::remove_dir_all(dir)?;
    fs::create_dir(dir)?;
    Ok(())
}
