use crate::{NetworkAddress, PeerTransferConfig, RemoteError};
use snaplift_store::localfs;
use std::io;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Stat of one file on a peer node, resolved through its download endpoint.
///
/// `md5` is empty when the peer predates checksum support; callers fall back
/// to size-only comparison in that case.
#[derive(Debug, Clone)]
pub struct PeerFileStat {
    pub url: String,
    pub size: u64,
    pub md5: String,
}

/// Blocking HTTP client for a peer backend node's tablet download endpoint.
///
/// All operations run inside a bounded retry loop with linear backoff, so a
/// transient peer hiccup does not fail a multi-hour clone.
pub struct PeerClient {
    agent: ureq::Agent,
    base_url: String,
    config: PeerTransferConfig,
}

impl PeerClient {
    pub fn new(addr: &NetworkAddress, token: &str, config: PeerTransferConfig) -> Self {
        let base_url = format!(
            "http://{}:{}/api/_tablet/_download?token={}",
            addr.host, addr.port, token
        );
        Self {
            agent: ureq::Agent::new_with_defaults(),
            base_url,
            config,
        }
    }

    /// List the file names under `remote_dir` on the peer.
    ///
    /// The endpoint returns a newline-separated body; whitespace-only
    /// entries are skipped.
    pub fn list_dir(&self, remote_dir: &str) -> Result<Vec<String>, RemoteError> {
        let url = format!("{}&file={}/", self.base_url, remote_dir);
        let timeout = Duration::from_secs(self.config.list_timeout_secs);
        let body = self.with_retry("list", || self.get_string(&url, timeout))?;
        Ok(body
            .split('\n')
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect())
    }

    /// Download URL for one file under a remote snapshot directory.
    pub fn file_url(&self, remote_dir: &str, file_name: &str) -> String {
        format!(
            "{}&file={}/{}&channel=ingest_binlog",
            self.base_url, remote_dir, file_name
        )
    }

    /// HEAD a file URL and read its declared length and md5.
    pub fn stat_file(&self, file_url: &str) -> Result<PeerFileStat, RemoteError> {
        let url = format!("{file_url}&acquire_md5=true");
        let timeout = Duration::from_secs(self.config.stat_timeout_secs);
        let (size, md5) = self.with_retry("stat", || self.head_stat(&url, timeout))?;
        Ok(PeerFileStat {
            url: file_url.to_owned(),
            size,
            md5,
        })
    }

    /// Download `stat.url` into `local_path`, verifying the result.
    ///
    /// The timeout scales with the declared size against the configured
    /// low-speed limit. Size and checksum verification runs inside the retry
    /// loop, so a corrupt transfer is retried rather than surfaced
    /// immediately. The peer's md5 is only checked when it declared one.
    pub fn download_file(&self, stat: &PeerFileStat, local_path: &Path) -> Result<(), RemoteError> {
        let kbps = self.config.download_low_speed_limit_kbps.max(1);
        let mut timeout_secs = stat.size / kbps / 1024;
        if timeout_secs < self.config.download_low_speed_time_secs {
            timeout_secs = self.config.download_low_speed_time_secs;
        }
        let timeout = Duration::from_secs(timeout_secs);
        info!(
            "begin to download file from: {} to: {}, size(B): {}, timeout(s): {}",
            stat.url,
            local_path.display(),
            stat.size,
            timeout_secs
        );

        self.with_retry("download", || {
            self.get_to_file(&stat.url, local_path, timeout)?;

            let local_size = localfs::file_size(local_path)?;
            if local_size != stat.size {
                return Err(RemoteError::SizeMismatch {
                    path: local_path.display().to_string(),
                    expected: stat.size,
                    actual: local_size,
                });
            }

            if !stat.md5.is_empty() {
                let local_md5 = localfs::md5sum(local_path)?;
                if local_md5 != stat.md5 {
                    return Err(RemoteError::ChecksumMismatch {
                        path: local_path.display().to_string(),
                        expected: stat.md5.clone(),
                        actual: local_md5,
                    });
                }
            }

            localfs::set_owner_rw(local_path)?;
            Ok(())
        })
    }

    fn with_retry<T>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T, RemoteError>,
    ) -> Result<T, RemoteError> {
        let mut attempt: u32 = 1;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if attempt < self.config.max_retry => {
                    warn!("peer {what} failed (attempt {attempt}): {e}, retrying");
                    std::thread::sleep(Duration::from_secs(
                        self.config.retry_backoff_secs * u64::from(attempt),
                    ));
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn get_string(&self, url: &str, timeout: Duration) -> Result<String, RemoteError> {
        let resp = self
            .agent
            .get(url)
            .config()
            .timeout_global(Some(timeout))
            .build()
            .call()
            .map_err(map_ureq_err)?;
        let mut reader = resp.into_body().into_reader();
        let mut body = String::new();
        io::Read::read_to_string(&mut reader, &mut body)
            .map_err(|e| RemoteError::Http(e.to_string()))?;
        Ok(body)
    }

    fn head_stat(&self, url: &str, timeout: Duration) -> Result<(u64, String), RemoteError> {
        let resp = self
            .agent
            .head(url)
            .config()
            .timeout_global(Some(timeout))
            .build()
            .call()
            .map_err(map_ureq_err)?;

        let size = header_str(&resp, "Content-Length")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| RemoteError::Http(format!("missing Content-Length for {url}")))?;
        let md5 = header_str(&resp, "Content-MD5").unwrap_or_default();
        Ok((size, md5))
    }

    fn get_to_file(
        &self,
        url: &str,
        local_path: &Path,
        timeout: Duration,
    ) -> Result<(), RemoteError> {
        let resp = self
            .agent
            .get(url)
            .config()
            .timeout_global(Some(timeout))
            .build()
            .call()
            .map_err(map_ureq_err)?;

        let mut reader = resp.into_body().into_reader();
        let mut file = std::fs::File::create(local_path)?;
        io::copy(&mut reader, &mut file).map_err(|e| RemoteError::Http(e.to_string()))?;
        file.sync_all()?;
        Ok(())
    }
}

fn header_str(resp: &ureq::http::Response<ureq::Body>, name: &str) -> Option<String> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

fn map_ureq_err(e: ureq::Error) -> RemoteError {
    match e {
        ureq::Error::StatusCode(code) => RemoteError::Http(format!("HTTP {code}")),
        other => RemoteError::Http(other.to_string()),
    }
}
