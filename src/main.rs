use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;

use opsdash_lib::audit::DEFAULT_AUDIT_LIMIT;
use opsdash_lib::crypto::ConfigCipher;
use opsdash_lib::entity::EntityKind;
use opsdash_lib::error::ErrorView;
use opsdash_lib::services::entities::{Decision, MergeDecision};
use opsdash_lib::services::{entities, integrations, sync};
use opsdash_lib::state::AppState;
use opsdash_lib::sync::SyncKind;
use opsdash_lib::types::load_config;

#[derive(Parser)]
#[command(name = "opsdash", version, about = "Sync agency SaaS data and reconcile duplicates")]
struct Cli {
    /// Name recorded in the audit log.
    #[arg(long, global = true, default_value = "cli")]
    actor: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a sync and follow its progress until it finishes.
    Sync {
        provider: String,
        data_kind: String,
        /// `full` or `incremental`.
        #[arg(long, default_value = "full")]
        kind: SyncKind,
    },
    /// Show the status of a sync job.
    Status { job_id: String },
    /// List duplicate suggestions for `client` or `staff`.
    Suggestions { kind: EntityKind },
    /// Merge `merge_id` into `keep_id`.
    Merge { kind: EntityKind, keep_id: String, merge_id: String },
    /// Mark two entities as distinct so they stop being suggested.
    Reject { kind: EntityKind, a: String, b: String },
    /// Store settings (JSON) for a provider and enable it.
    Connect {
        provider: String,
        settings: String,
        #[arg(long)]
        disabled: bool,
    },
    /// List integrations.
    Integrations,
    /// Show recent audit entries.
    Audit {
        #[arg(long, default_value_t = DEFAULT_AUDIT_LIMIT)]
        limit: usize,
    },
    /// Print a fresh master key for OPSDASH_MASTER_KEY.
    GenerateKey,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Startup(#[from] opsdash_lib::state::StartupError),
    #[error(transparent)]
    Config(#[from] opsdash_lib::types::ConfigError),
    #[error(transparent)]
    Sync(#[from] opsdash_lib::error::SyncError),
    #[error(transparent)]
    Resolver(#[from] opsdash_lib::resolver::ResolverError),
    #[error(transparent)]
    Db(#[from] opsdash_lib::db::DbError),
    #[error("Invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}


async fn dispatch(cli: Cli) -> Result<(), CliError> {
    if let Command::GenerateKey = cli.command {
        println!("{}", ConfigCipher::generate_key());
        return Ok(());
    }

    let state = AppState::from_config(load_config()?)?;
    let actor = cli.actor.as_str();

    match cli.command {
        Command::Sync { provider, data_kind, kind } => {
            // The pipeline lives on this process's runtime; returning before
            // it is terminal would strand the job in `running`.
            let job_id = sync::trigger_sync(&state, &provider, &data_kind, kind, actor)?;
            let status = sync::wait_for_sync(&state, &job_id, Duration::from_millis(250), |step| {
                eprintln!("{}", step)
            })
            .await?;
            print_json(&status)
        }
        Command::Status { job_id } => print_json(&sync::poll_sync_status(&state, &job_id)?),
        Command::Suggestions { kind } => print_json(&entities::list_suggestions(&state, kind)?),
        Command::Merge { kind, keep_id, merge_id } => {
            let decision = MergeDecision { keep_id, merge_id, entity_kind: kind, decision: Decision::Confirm };
            print_json(&entities::resolve_suggestion(&state, &decision, actor)?)
        }
        Command::Reject { kind, a, b } => {
            let decision = MergeDecision { keep_id: a, merge_id: b, entity_kind: kind, decision: Decision::Reject };
            print_json(&entities::resolve_suggestion(&state, &decision, actor)?)
        }
        Command::Connect { provider, settings, disabled } => {
            let settings: serde_json::Value = serde_json::from_str(&settings)?;
            integrations::connect(&state, &provider, settings, !disabled, actor)?;
            print_json(&integrations::list(&state)?)
        }
        Command::Integrations => print_json(&integrations::list(&state)?),
        Command::Audit { limit } => print_json(&state.db.lock().list_audit_entries(limit)?),
        Command::GenerateKey => Ok(()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match dispatch(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Sync(e)) => {
            let view = ErrorView::from(&e);
            eprintln!("{}", serde_json::to_string_pretty(&view).unwrap_or_else(|_| e.to_string()));
            ExitCode::FAILURE
        }
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
