//! The contract every (provider, data kind) adapter implements.
//!
//! An adapter reads one page at a time through [`SyncAdapter::fetch_page`];
//! the engine drives pagination through [`Batches`], which follows the
//! provider cursor until the provider reports no further page.

use async_trait::async_trait;

use super::job::SyncContext;
use crate::error::SyncError;

/// One page of native records plus the cursor for the next page.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub records: Vec<T>,
    /// `None` when this was the last page.
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn last(records: Vec<T>) -> Self {
        Self { records, next_cursor: None }
    }
}

/// Result of mapping and upserting one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub synced: u64,
    pub failed: u64,
    pub errors: Vec<String>,
}

impl BatchOutcome {
    pub fn record_success(&mut self) {
        self.synced += 1;
    }

    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.failed += 1;
        self.errors.push(error.into());
    }
}

#[async_trait]
pub trait SyncAdapter: Send + Sync + 'static {
    /// Provider-native record.
    type Record: Send + 'static;

    fn provider(&self) -> &'static str;

    fn data_kind(&self) -> &'static str;

    /// Fetch one page. `cursor` is `None` for the first page.
    async fn fetch_page(
        &self,
        ctx: &SyncContext,
        cursor: Option<String>,
    ) -> Result<Page<Self::Record>, SyncError>;

    /// Translate and upsert each record independently. A record that fails
    /// is counted and described in the outcome; it never aborts the batch.
    async fn map_and_upsert(&self, batch: Vec<Self::Record>, ctx: &SyncContext) -> BatchOutcome;

    /// Every page of this run, in provider order.
    fn fetch_all<'a>(&'a self, ctx: &'a SyncContext) -> Batches<'a, Self>
    where
        Self: Sized,
    {
        Batches::new(self, ctx)
    }
}

/// Finite, non-restartable sequence of batches.
///
/// ```ignore
/// let mut batches = adapter.fetch_all(&ctx);
/// while let Some(batch) = batches.next().await {
///     let records = batch?;
/// }
/// ```
///
/// After the last page or after an error, `next` returns `None`. Empty pages
/// are skipped.
pub struct Batches<'a, A: SyncAdapter> {
    adapter: &'a A,
    ctx: &'a SyncContext,
    cursor: Option<String>,
    done: bool,
}

impl<'a, A: SyncAdapter> Batches<'a, A> {
    pub fn new(adapter: &'a A, ctx: &'a SyncContext) -> Self {
        Self {
            adapter,
            ctx,
            cursor: None,
            done: false,
        }
    }

    pub async fn next(&mut self) -> Option<Result<Vec<A::Record>, SyncError>> {
        while !self.done {
            let cursor = self.cursor.take();
            let page = match self.adapter.fetch_page(self.ctx, cursor.clone()).await {
                Ok(page) => page,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };

            match page.next_cursor {
                // A cursor that does not advance would loop forever.
                Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                    log::warn!(
                        "{} {}: provider repeated cursor '{}', stopping pagination",
                        self.adapter.provider(),
                        self.adapter.data_kind(),
                        next
                    );
                    self.done = true;
                }
                Some(next) => self.cursor = Some(next),
                None => self.done = true,
            }

            if !page.records.is_empty() {
                return Some(Ok(page.records));
            }
        }
        None
    }
}


#[cfg(test)]
mod tests {
    use super::scripted::ScriptedAdapter;
    use super::*;
    use crate::sync::job::SyncKind;

    fn ctx() -> SyncContext {
        SyncContext {
            job_id: "j".into(),
            provider: "scripted".into(),
            data_kind: "numbers".into(),
            sync_kind: SyncKind::Full,
            triggered_by: "test".into(),
            since: None,
        }
    }

    #[tokio::test]
    async fn test_batches_follow_cursor_and_skip_empty_pages() {
        let adapter = ScriptedAdapter::new(vec![vec![1, 2], vec![], vec![3]]);
        let ctx = ctx();
        let mut batches = adapter.fetch_all(&ctx);

        assert_eq!(batches.next().await.unwrap().unwrap(), vec![1, 2]);
        assert_eq!(batches.next().await.unwrap().unwrap(), vec![3]);
        assert!(batches.next().await.is_none());
        assert!(batches.next().await.is_none(), "sequence is not restartable");
    }

    #[tokio::test]
    async fn test_error_ends_sequence() {
        let mut adapter = ScriptedAdapter::new(vec![vec![1], vec![2], vec![3]]);
        adapter.error_at_page = Some(1);
        let ctx = ctx();
        let mut batches = adapter.fetch_all(&ctx);

        assert!(batches.next().await.unwrap().is_ok());
        assert!(batches.next().await.unwrap().is_err());
        assert!(batches.next().await.is_none());
    }

    #[test]
    fn test_batch_outcome_counts() {
        let mut outcome = BatchOutcome::default();
        outcome.record_success();
        outcome.record_failure("bad");
        assert_eq!(outcome.synced, 1);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.errors, vec!["bad".to_string()]);
    }
}
