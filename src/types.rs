use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Opaque job handle assigned by the remote service.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Remote job state, normalized from the service's status vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Deleted,
}

impl JobStatus {
    /// Map the service's status string; unknown values are a service error.
    pub fn parse(raw: &str) -> Result<Self, ClientError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" | "processing" => Ok(Self::Pending),
            "running" | "resuming" => Ok(Self::Running),
            "completed" | "imported" => Ok(Self::Completed),
            "canceled" | "cancelled" | "aborted" | "stopped" | "stopping" | "paused" | "empty" => {
                Ok(Self::Failed)
            }
            "deleted" => Ok(Self::Deleted),
            other => Err(ClientError::service(format!("unrecognized job status: {other:?}"))),
        }
    }

    pub fn is_in_progress(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

/// Findings per severity. Display only; nothing branches on these.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeverityCounts {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
    pub info: u32,
}

impl fmt::Display for SeverityCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Critical: {}][High: {}][Medium: {}][Low: {}][Info: {}]",
            self.critical, self.high, self.medium, self.low, self.info
        )
    }
}

/// One decoded status fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanStatus {
    pub counts: SeverityCounts,
    pub progress_percent: u32,
    pub progress_label: String,
    pub status: JobStatus,
}

/// The single remote job this process owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanJob {
    pub id: JobId,
    pub status: JobStatus,
    pub counts: SeverityCounts,
    pub progress: String,
}

impl ScanJob {
    pub fn created(id: JobId) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            counts: SeverityCounts::default(),
            progress: String::new(),
        }
    }

    pub fn observe(&mut self, status: &ScanStatus) {
        self.status = status.status;
        self.counts = status.counts;
        self.progress = status.progress_label.clone();
    }
}

/// A materialized tunnel executable and the scratch directory holding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelHandle {
    pub binary_path: PathBuf,
    pub work_dir: PathBuf,
    pub installed: bool,
}

/// Body of `create_scan`.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub operating_system: String,
}

#[derive(Deserialize, Debug)]
pub(crate) struct ScanCreated {
    pub scan_id: u64,
}

#[derive(Serialize, Debug)]
pub(crate) struct ExportRequest<'a> {
    pub scan_id: u64,
    pub email: &'a str,
}

#[derive(Deserialize, Debug)]
pub(crate) struct StatusResponse {
    pub hosts: Vec<HostEntry>,
    pub info: StatusInfo,
}

#[derive(Deserialize, Debug)]
pub(crate) struct HostEntry {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
    pub info: u32,
    pub scanprogresscurrent: u32,
    pub progress: String,
}

#[derive(Deserialize, Debug)]
pub(crate) struct StatusInfo {
    pub status: String,
}

impl StatusResponse {
    /// First host entry plus the overall job status.
    pub(crate) fn into_status(self) -> Result<ScanStatus, ClientError> {
        let status = JobStatus::parse(&self.info.status)?;
        let host = self
            .hosts
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::service("status response has no host entry"))?;
        Ok(ScanStatus {
            counts: SeverityCounts {
                critical: host.critical,
                high: host.high,
                medium: host.medium,
                low: host.low,
                info: host.info,
            },
            progress_percent: host.scanprogresscurrent,
            progress_label: host.progress,
            status,
        })
    }
}
