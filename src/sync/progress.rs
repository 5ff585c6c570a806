//! Live progress of running sync jobs.
//!
//! The registry is owned by one [`super::SyncEngine`] and lives in process
//! memory only. A poll served by another process, or one that arrives after
//! a restart, will not find the entry and must fall back to the persisted job
//! row. Running several instances behind a load balancer therefore needs a
//! shared store in place of this map.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use super::job::JobStatus;
use crate::db::JobCounters;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub job_id: String,
    pub status: JobStatus,
    pub records_found: u64,
    pub records_synced: u64,
    pub records_failed: u64,
    pub current_step: String,
    pub errors: Vec<String>,
    #[serde(skip)]
    finished_at: Option<Instant>,
}

impl SyncProgress {
    fn new(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: JobStatus::Running,
            records_found: 0,
            records_synced: 0,
            records_failed: 0,
            current_step: "Starting...".to_string(),
            errors: Vec::new(),
            finished_at: None,
        }
    }

    pub fn counters(&self) -> JobCounters {
        JobCounters {
            found: self.records_found,
            synced: self.records_synced,
            failed: self.records_failed,
        }
    }

    /// Counters only ever grow within a run.
    fn raise_counters(&mut self, counters: JobCounters) {
        self.records_found = self.records_found.max(counters.found);
        self.records_synced = self.records_synced.max(counters.synced);
        self.records_failed = self.records_failed.max(counters.failed);
    }
}

#[derive(Clone)]
pub struct ProgressRegistry {
    entries: Arc<DashMap<String, SyncProgress>>,
    ttl: Duration,
}

impl ProgressRegistry {
    /// `ttl` is how long a finished entry stays visible.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    pub fn start(&self, job_id: &str) {
        self.entries.insert(job_id.to_string(), SyncProgress::new(job_id));
    }

    /// Record running totals and the current step.
    pub fn update(&self, job_id: &str, counters: JobCounters, step: String, errors: Option<Vec<String>>) {
        if let Some(mut entry) = self.entries.get_mut(job_id) {
            if entry.status.is_terminal() {
                return;
            }
            entry.raise_counters(counters);
            entry.current_step = step;
            if let Some(errors) = errors {
                entry.errors = errors;
            }
        }
    }

    /// Mark a job terminal and schedule its eviction after the TTL.
    pub fn finish(
        &self,
        job_id: &str,
        status: JobStatus,
        counters: JobCounters,
        step: String,
        errors: Vec<String>,
    ) {
        {
            let mut entry = self
                .entries
                .entry(job_id.to_string())
                .or_insert_with(|| SyncProgress::new(job_id));
            entry.raise_counters(counters);
            entry.status = status;
            entry.current_step = step;
            entry.errors = errors;
            entry.finished_at = Some(Instant::now());
        }

        let entries = Arc::clone(&self.entries);
        let ttl = self.ttl;
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            entries.remove_if(&job_id, |_, p| p.finished_at.is_some());
        });
    }

    /// Snapshot of a job's progress. Finished entries past their TTL are
    /// treated as gone even if the eviction task has not run yet.
    pub fn get(&self, job_id: &str) -> Option<SyncProgress> {
        let expired = {
            let entry = self.entries.get(job_id)?;
            match entry.finished_at {
                Some(at) if at.elapsed() >= self.ttl => true,
                _ => return Some(entry.clone()),
            }
        };
        if expired {
            self.entries.remove(job_id);
        }
        None
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(found: u64, synced: u64, failed: u64) -> JobCounters {
        JobCounters { found, synced, failed }
    }

    #[tokio::test]
    async fn test_start_update_get() {
        let registry = ProgressRegistry::new(Duration::from_secs(300));
        registry.start("j1");
        assert_eq!(registry.get("j1").unwrap().current_step, "Starting...");

        registry.update("j1", counters(3, 0, 0), "Fetched 3 records".into(), None);
        let p = registry.get("j1").unwrap();
        assert_eq!(p.records_found, 3);
        assert_eq!(p.status, JobStatus::Running);
        assert!(registry.get("other").is_none());
    }

    #[tokio::test]
    async fn test_counters_never_decrease() {
        let registry = ProgressRegistry::new(Duration::from_secs(300));
        registry.start("j1");
        registry.update("j1", counters(5, 4, 1), "Synced 4 of 5".into(), None);
        registry.update("j1", counters(2, 1, 0), "stale".into(), None);
        let p = registry.get("j1").unwrap();
        assert_eq!(p.counters(), counters(5, 4, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_entry_evicted_after_ttl() {
        let registry = ProgressRegistry::new(Duration::from_secs(300));
        registry.start("j1");
        registry.finish("j1", JobStatus::Completed, counters(1, 1, 0), "Done".into(), vec![]);
        assert_eq!(registry.get("j1").unwrap().status, JobStatus::Completed);

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(registry.get("j1").is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(registry.get("j1").is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_updates_after_finish_are_ignored() {
        let registry = ProgressRegistry::new(Duration::from_secs(300));
        registry.start("j1");
        registry.finish("j1", JobStatus::Failed, counters(2, 1, 0), "Failed".into(), vec!["boom".into()]);
        registry.update("j1", counters(9, 9, 9), "late".into(), None);
        let p = registry.get("j1").unwrap();
        assert_eq!(p.current_step, "Failed");
        assert_eq!(p.records_found, 2);
    }
}
