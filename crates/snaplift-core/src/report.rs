//! Progress reporting and cancellation protocol with the coordinator.
//!
//! Long-running transfers report coalesced progress; the coordinator's
//! response is also the cancellation channel. The transport is external and
//! injected through [`CoordinatorClient`].

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Upload,
    Download,
}

/// One progress report for a coordinator-assigned task.
#[derive(Debug, Clone)]
pub struct SnapshotLoaderReport {
    pub job_id: i64,
    pub task_id: i64,
    pub task_kind: TaskKind,
    pub finished_num: u32,
    pub total_num: u32,
}

/// Coordinator verdict carried back on a successful report round-trip.
///
/// Status codes other than cancellation are treated as acknowledgement; a
/// coordinator that is confused about a job must not kill a transfer that is
/// otherwise making progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportStatus {
    Ok,
    Cancelled,
}

/// Transport-level report failure. Swallowed by the loader: losing the
/// coordinator for a moment must not abort hours of transfer work.
#[derive(Debug, Error)]
#[error("coordinator report failed: {0}")]
pub struct ReportError(pub String);

pub trait CoordinatorClient: Send + Sync {
    fn snapshot_loader_report(
        &self,
        report: &SnapshotLoaderReport,
    ) -> Result<ReportStatus, ReportError>;
}
