//! tipsync CLI
//!
//! Operator tooling for a persisted mutation queue: inspect pending
//! entries, queue intents by hand, and clear entries that exhausted retries.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tipsync::error::{Result, SyncError};
use tipsync::queue::{Mutation, MutationQueue};
use tipsync::storage::SqliteBlobStore;
use tipsync::types::*;

#[derive(Parser)]
#[command(name = "tipsync")]
#[command(about = "Offline mutation queue CLI")]
#[command(version)]
struct Cli {
    /// Database path
    #[arg(
        long,
        env = "TIPSYNC_DB_PATH",
        default_value = "~/.local/share/tipsync/queue.db"
    )]
    db_path: String,

    /// Key of the queue blob inside the database
    #[arg(long, env = "TIPSYNC_STORAGE_KEY", default_value = "mutation_queue")]
    storage_key: String,

    /// Retry ceiling used to decide which entries are exhausted
    #[arg(long, env = "TIPSYNC_MAX_RETRIES", default_value = "5")]
    max_retries: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show queue counts and last sync time
    Status,
    /// List pending entries as JSON
    List {
        /// Only one kind (create, edit, delete)
        #[arg(short, long)]
        kind: Option<String>,
    },
    /// Queue a create
    Create {
        /// Record payload as a JSON object
        json: String,
    },
    /// Queue an edit (local-... ids amend a pending create)
    Edit {
        /// Record id
        id: String,
        /// Patch as a JSON object
        json: String,
    },
    /// Queue a delete (local-... ids cancel a pending create)
    Delete {
        /// Record id
        id: String,
    },
    /// Permanently drop entries that exhausted their retries
    ClearFailed {
        /// Confirm the data loss
        #[arg(long)]
        yes: bool,
    },
    /// Give exhausted entries a fresh set of retries
    ResetRetries,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // Expand ~ in path
    let db_path = shellexpand::tilde(&cli.db_path).to_string();
    let store = Arc::new(SqliteBlobStore::open(StorageConfig {
        db_path,
        storage_key: cli.storage_key,
    })?);
    let mut queue = MutationQueue::load(store.clone())?;

    match cli.command {
        Commands::Status => {
            let exhausted = queue.failed_entries(cli.max_retries).len();
            let status = serde_json::json!({
                "db_path": store.db_path(),
                "storage_key": store.storage_key(),
                "saved_at": store.updated_at()?,
                "creates": queue.creates().len(),
                "edits": queue.edits().len(),
                "deletes": queue.deletes().len(),
                "exhausted": exhausted,
                "last_sync_at": queue.last_sync_at(),
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }

        Commands::List { kind } => {
            let kind = kind.as_deref().map(parse_kind).transpose()?;
            if kind.is_none() || kind == Some(MutationKind::Create) {
                for entry in queue.creates() {
                    println!("{}", serde_json::to_string(entry)?);
                }
            }
            if kind.is_none() || kind == Some(MutationKind::Edit) {
                for entry in queue.edits() {
                    println!("{}", serde_json::to_string(entry)?);
                }
            }
            if kind.is_none() || kind == Some(MutationKind::Delete) {
                for entry in queue.deletes() {
                    println!("{}", serde_json::to_string(entry)?);
                }
            }
        }

        Commands::Create { json } => {
            let payload = RecordPayload::from_value(serde_json::from_str(&json)?)?;
            let outcome = queue.apply_mutation(Mutation::Create { payload })?;
            println!("{}", serde_json::to_string(&outcome)?);
        }

        Commands::Edit { id, json } => {
            let patch = PartialRecordPayload::from_value(serde_json::from_str(&json)?)?;
            let outcome = queue.apply_mutation(Mutation::Edit {
                target: RecordRef::parse(&id),
                patch,
            })?;
            println!("{}", serde_json::to_string(&outcome)?);
        }

        Commands::Delete { id } => {
            let outcome = queue.apply_mutation(Mutation::Delete {
                target: RecordRef::parse(&id),
            })?;
            println!("{}", serde_json::to_string(&outcome)?);
        }

        Commands::ClearFailed { yes } => {
            let failed = queue.failed_entries(cli.max_retries);
            if failed.is_empty() {
                println!("No exhausted entries");
                return Ok(());
            }
            if !yes {
                for key in &failed {
                    println!("would drop {}", key);
                }
                println!("Re-run with --yes to permanently drop {} entries", failed.len());
                return Ok(());
            }
            let cleared = queue.clear_failed(cli.max_retries)?;
            println!("Dropped {} entries", cleared);
        }

        Commands::ResetRetries => {
            let reset = queue.reset_retries(cli.max_retries)?;
            println!("Reset {} entries", reset);
        }
    }

    Ok(())
}

fn parse_kind(s: &str) -> Result<MutationKind> {
    match s {
        "create" => Ok(MutationKind::Create),
        "edit" => Ok(MutationKind::Edit),
        "delete" => Ok(MutationKind::Delete),
        other => Err(SyncError::InvalidInput(format!(
            "unknown kind '{}', expected create, edit or delete",
            other
        ))),
    }
}
