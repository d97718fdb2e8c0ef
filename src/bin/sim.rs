//! tipsync simulator
//!
//! Drives the full engine against an in-process remote store with a
//! flapping network and random request failures, then heals the network
//! and checks that every surviving intent reached the remote store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tipsync::connectivity::{ReachabilityProbe, StaticProbe};
use tipsync::error::{Result, SyncError};
use tipsync::storage::{BlobStore, FileBlobStore, MemoryBlobStore, SqliteBlobStore};
use tipsync::sync::{Principal, RemoteStore, StaticPrincipal, SyncEventType};
use tipsync::types::*;
use tipsync::{SyncEngine, WriteOutcome};

#[derive(Parser)]
#[command(name = "tipsync-sim")]
#[command(about = "Simulate offline edits against a flaky remote store")]
struct Args {
    /// Number of simulated user writes
    #[arg(long, default_value = "200")]
    ops: usize,

    /// Probability that a remote call fails while the network is up
    #[arg(long, default_value = "0.2")]
    failure_rate: f64,

    /// Probability of a connectivity flip before each write
    #[arg(long, default_value = "0.1")]
    flap_rate: f64,

    /// RNG seed
    #[arg(long, default_value = "7")]
    seed: u64,

    /// Persist the queue to this SQLite file instead of memory
    #[arg(long, env = "TIPSYNC_DB_PATH", conflicts_with = "queue_file")]
    db_path: Option<String>,

    /// Persist the queue as a single JSON file instead of memory
    #[arg(long)]
    queue_file: Option<String>,

    /// Retry ceiling
    #[arg(long, env = "TIPSYNC_MAX_RETRIES", default_value = "5")]
    max_retries: u8,
}

/// Remote store living in this process
struct SimulatedRemote {
    records: Mutex<HashMap<RemoteId, RecordPayload>>,
    next_id: AtomicU64,
    failure_rate: Mutex<f64>,
    probe: StaticProbe,
    rng: Mutex<StdRng>,
}

impl SimulatedRemote {
    fn new(failure_rate: f64, probe: StaticProbe, seed: u64) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            failure_rate: Mutex::new(failure_rate),
            probe,
            rng: Mutex::new(StdRng::seed_from_u64(seed ^ 0x5eed)),
        }
    }

    /// Simulate latency, then decide whether this call fails
    async fn roundtrip(&self) -> Result<()> {
        let (delay, roll) = {
            let mut rng = self.rng.lock();
            (rng.gen_range(1..5), rng.gen::<f64>())
        };
        tokio::time::sleep(Duration::from_millis(delay)).await;

        if !self.probe.is_reachable().await {
            return Err(SyncError::Unreachable);
        }
        if roll < *self.failure_rate.lock() {
            return Err(SyncError::Remote("simulated 503".to_string()));
        }
        Ok(())
    }

    fn heal(&self) {
        *self.failure_rate.lock() = 0.0;
    }
}

#[async_trait]
impl RemoteStore for SimulatedRemote {
    async fn remote_create(&self, _: &Principal, payload: &RecordPayload) -> Result<RemoteId> {
        self.roundtrip().await?;
        let id = RemoteId::new(format!("tip-{}", self.next_id.fetch_add(1, Ordering::SeqCst)));
        self.records.lock().insert(id.clone(), payload.clone());
        Ok(id)
    }

    async fn remote_update(
        &self,
        _: &Principal,
        id: &RemoteId,
        patch: &PartialRecordPayload,
    ) -> Result<()> {
        self.roundtrip().await?;
        let mut records = self.records.lock();
        let record = records
            .get_mut(id)
            .ok_or_else(|| SyncError::NotFound(id.to_string()))?;
        record.apply(patch);
        Ok(())
    }

    async fn remote_delete(&self, _: &Principal, id: &RemoteId) -> Result<()> {
        self.roundtrip().await?;
        // Deleting an absent record is not an error
        self.records.lock().remove(id);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = SyncConfig {
        max_retries: args.max_retries,
        ..Default::default()
    };

    let store: Arc<dyn BlobStore> = match (&args.db_path, &args.queue_file) {
        (Some(path), _) => Arc::new(SqliteBlobStore::open(StorageConfig {
            db_path: shellexpand::tilde(path).to_string(),
            ..Default::default()
        })?),
        (None, Some(path)) => Arc::new(FileBlobStore::new(shellexpand::tilde(path).to_string())),
        (None, None) => Arc::new(MemoryBlobStore::new()),
    };

    let probe = StaticProbe::new(true);
    let remote = Arc::new(SimulatedRemote::new(args.failure_rate, probe.clone(), args.seed));
    let engine = SyncEngine::open(
        config,
        store,
        remote.clone(),
        Arc::new(StaticPrincipal::signed_in(Principal::new("sim-user"))),
        Arc::new(probe.clone()),
    )?;

    let mut events = engine.coordinator().subscribe();
    let pass_counter = tokio::spawn(async move {
        let mut passes = 0u32;
        while let Ok(event) = events.recv().await {
            if event.event_type == SyncEventType::SyncCompleted {
                passes += 1;
            }
        }
        passes
    });

    let worker = engine.start_worker();
    engine.monitor().report(true);

    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut known: Vec<RecordRef> = Vec::new();
    let mut online = true;

    for n in 0..args.ops {
        if rng.gen_bool(args.flap_rate.clamp(0.0, 1.0)) {
            online = !online;
            probe.set(online);
            engine.monitor().report(online);
        }
        if rng.gen_bool(0.05) {
            worker.foreground().await?;
        }

        let amount = rng.gen_range(1..200);
        let choice = if known.is_empty() { 0 } else { rng.gen_range(0..10) };
        let outcome = match choice {
            0..=4 => {
                let payload = RecordPayload::new()
                    .with("amount", amount)
                    .with("shift", format!("shift-{}", n));
                engine.writer().create(payload).await
            }
            5..=7 => {
                let target = known[rng.gen_range(0..known.len())].clone();
                let patch = PartialRecordPayload::new().with("amount", amount);
                engine.writer().edit(target, patch).await
            }
            _ => {
                let idx = rng.gen_range(0..known.len());
                let target = known.swap_remove(idx);
                engine.writer().delete(target).await
            }
        };

        match outcome {
            Ok(WriteOutcome::Created { remote_id }) => known.push(RecordRef::Remote(remote_id)),
            Ok(WriteOutcome::Queued {
                outcome: tipsync::MutationOutcome::Queued(local_id),
            }) => known.push(RecordRef::Local(local_id)),
            Ok(_) => {}
            Err(e) => tracing::warn!("Write {} rejected: {}", n, e),
        }
    }

    // Heal the network and drain
    remote.heal();
    probe.set(true);
    engine.monitor().report(true);
    engine.reset_retries()?;
    for _ in 0..10 {
        if !engine.reader().has_pending() {
            break;
        }
        worker.sync_now().await?;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    worker.stop().await?;
    let status = engine.status();
    drop(engine);
    let passes = pass_counter.await.unwrap_or_default();

    let report = serde_json::json!({
        "ops": args.ops,
        "remote_records": remote.records.lock().len(),
        "pending_after_drain": status.pending,
        "last_error": status.last_error,
        "sync_passes": passes,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    if status.pending > 0 {
        return Err(SyncError::Internal(format!(
            "{} entries still pending after drain",
            status.pending
        )));
    }
    Ok(())
}
