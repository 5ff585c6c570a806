//! Pull-and-merge sync pipeline.
//!
//! - [`adapter`]: the per (provider, data kind) contract and batch cursor
//! - [`engine`]: job bookkeeping and the background pipeline
//! - [`progress`]: live progress registry for pollers
//! - [`oauth`]: access-token refresh for OAuth providers
//! - [`job`]: job vocabulary shared by the above

pub mod adapter;
pub mod engine;
pub mod job;
pub mod oauth;
pub mod progress;

pub use adapter::{BatchOutcome, Batches, Page, SyncAdapter};
pub use engine::{SyncEngine, SyncStatus};
pub use job::{ErrorLog, JobStatus, SyncContext, SyncKind, MAX_JOB_ERRORS};
pub use progress::{ProgressRegistry, SyncProgress};
