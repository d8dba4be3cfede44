//! Merge Runtime - buffers per-leg alerts and reconciles them per transaction
//!
//! Reads alert legs as JSON lines on stdin, admits each through the signer
//! rate limiter, appends it to the merge window and drains the window on a
//! fixed tick. Reconciled transactions are written as one merged record,
//! unreconcilable ones as their original legs.
//!
//! Environment variables:
//!   MERGE_INTERVAL_MS - drain interval (default: 10000)
//!   RATE_LIMIT_WINDOW_SECS / RATE_LIMIT_MAX_EVENTS - signer admission (default: 3600 / 200)
//!   OUTPUT_PATH - JSONL output (default: streams/recon/events.jsonl)

use dotenv::dotenv;
use log::{debug, info, warn};
use serde::Serialize;
use solrecon::gate::AddressRateLimiter;
use solrecon::merge::{run_merge_drain, AlertLeg, MergeEmission, MergeWindow, MergedAlert};
use solrecon::sink::JsonlSink;
use solrecon::ReconstructConfig;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

/// Rate limiter windows are pruned after this many admitted lines
const CLEANUP_EVERY: u64 = 1_000;

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MergeOutput {
    Merged(MergedAlert),
    Raw(AlertLeg),
}

fn render(emission: MergeEmission<AlertLeg>) -> MergeOutput {
    match emission {
        MergeEmission::Reconciled { event, sources } => MergeOutput::Merged(MergedAlert::new(event, &sources)),
        MergeEmission::Fallback { leg, .. } => MergeOutput::Raw(leg),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let config = ReconstructConfig::from_env()?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.rust_log))
        .target(env_logger::Target::Stderr)
        .init();

    info!("🚀 Merge Runtime");
    info!("   ├─ Drain interval: {}ms", config.merge_interval_ms);
    info!(
        "   ├─ Rate limit: {} events / {}s",
        config.rate_limit_max_events, config.rate_limit_window_secs
    );
    info!("   └─ Output: {}", config.output_path);

    let window: Arc<MergeWindow<AlertLeg>> = Arc::new(MergeWindow::new());
    let limiter = AddressRateLimiter::new(config.rate_limit_window_secs, config.rate_limit_max_events);
    let sink = JsonlSink::new(&config.output_path, config.output_max_size_mb, config.output_max_rotations)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let drain = tokio::spawn(run_merge_drain(
        window.clone(),
        sink,
        config.merge_interval_ms,
        shutdown_rx,
        render,
    ));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut admitted = 0u64;
    let mut rejected = 0u64;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 Received Ctrl+C");
                break;
            }
        };
        let Some(line) = line else {
            info!("📭 Input closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let leg: AlertLeg = match serde_json::from_str(&line) {
            Ok(leg) => leg,
            Err(e) => {
                warn!("⚠️  Unparseable alert leg: {}", e);
                continue;
            }
        };
        if leg.tx_hash.is_empty() {
            warn!("⚠️  Alert leg without hash, skipping");
            continue;
        }

        if let Err(e) = limiter.check_now(&leg.signer, &leg.tx_hash) {
            debug!("Rejected {}: {}", leg.tx_hash, e);
            rejected += 1;
            continue;
        }

        let tx_hash = leg.tx_hash.clone();
        window.append(&tx_hash, leg);
        admitted += 1;

        if admitted % CLEANUP_EVERY == 0 {
            limiter.cleanup_now();
            info!(
                "📊 Admitted {} legs ({} rejected), {} pending buckets, {} tracked signers",
                admitted,
                rejected,
                window.pending_buckets(),
                limiter.tracked_addresses()
            );
        }
    }

    // receiver may already be gone if the drain task ended early
    let _ = shutdown_tx.send(true);
    let published = drain.await?;

    info!(
        "✅ Merge runtime stopped: {} legs admitted, {} rejected, {} records published",
        admitted, rejected, published
    );
    Ok(())
}
