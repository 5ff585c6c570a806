//! Sync job vocabulary: kinds, statuses, the bounded error log and the
//! context handed to adapters.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error strings kept per job. Older entries are dropped first.
pub const MAX_JOB_ERRORS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncKind {
    Full,
    Incremental,
}

impl SyncKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncKind::Full => "full",
            SyncKind::Incremental => "incremental",
        }
    }
}

impl fmt::Display for SyncKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "full" => Ok(SyncKind::Full),
            "incremental" | "delta" => Ok(SyncKind::Incremental),
            other => Err(format!("Unknown sync kind '{}' (expected full or incremental)", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Running,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

/// Ordered error strings capped at [`MAX_JOB_ERRORS`].
#[derive(Debug, Clone, Default)]
pub struct ErrorLog {
    entries: VecDeque<String>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: impl Into<String>) {
        if self.entries.len() == MAX_JOB_ERRORS {
            self.entries.pop_front();
        }
        self.entries.push_back(error.into());
    }

    pub fn extend<I: IntoIterator<Item = String>>(&mut self, errors: I) {
        for error in errors {
            self.push(error);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }
}

/// What an adapter knows about the run it is serving.
#[derive(Debug, Clone)]
pub struct SyncContext {
    pub job_id: String,
    pub provider: String,
    pub data_kind: String,
    pub sync_kind: SyncKind,
    pub triggered_by: String,
    /// Lower bound for incremental runs: the start time of the last
    /// completed run of the same provider and data kind.
    pub since: Option<DateTime<Utc>>,
}
