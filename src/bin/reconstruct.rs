//! Reconstruct - replays provider records through the event builder
//!
//! Reads enhanced-transaction records (a JSON array, or one JSON document per
//! line) from a file or stdin and writes one canonical event per line to the
//! configured JSONL output.
//!
//! Usage:
//!   reconstruct [INPUT] [--output PATH]
//!
//! Environment variables:
//!   OUTPUT_PATH - JSONL output (default: streams/recon/events.jsonl)
//!   PERMISSION_DB_PATH - SQLite monitor list (default: allow all)
//!   FAN_GROUP_MIN_SIZE - fan collapse threshold (default: 4)
//!   DCA_PROGRAM_ID / DEX_PROGRAMS - program routing

use dotenv::dotenv;
use log::{info, warn};
use solrecon::gate::open_permission_gate;
use solrecon::sink::{EventSink, JsonlSink};
use solrecon::{CanonicalEventBuilder, ProviderRecord, ReconstructConfig};
use std::env;
use std::io::Read;

fn parse_records(input: &str) -> Result<Vec<ProviderRecord>, serde_json::Error> {
    let trimmed = input.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed);
    }

    let mut records = Vec::new();
    for (line_no, line) in input.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            Err(e) => warn!("⚠️  Skipping line {}: {}", line_no + 1, e),
        }
    }
    Ok(records)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let mut config = ReconstructConfig::from_env()?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.rust_log))
        .target(env_logger::Target::Stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    if let Some(idx) = args.iter().position(|a| a == "--output") {
        if let Some(path) = args.get(idx + 1) {
            config.output_path = path.clone();
        }
    }
    let input_path = args
        .iter()
        .enumerate()
        .find(|(i, a)| !a.starts_with("--") && (*i == 0 || args[i - 1] != "--output"))
        .map(|(_, a)| a.clone());

    info!("🚀 Reconstruct");
    info!("   ├─ Input: {}", input_path.as_deref().unwrap_or("<stdin>"));
    info!("   ├─ Output: {}", config.output_path);
    info!("   ├─ Fan group min size: {}", config.fan_group_min_size);
    info!("   └─ DCA program: {}", config.dca_program_id);

    let raw = match &input_path {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let records = parse_records(&raw)?;
    info!("📥 Loaded {} provider records", records.len());

    let gate = open_permission_gate(config.permission_db_path.as_deref())?;
    let builder = CanonicalEventBuilder::new(&config, gate);
    let events = builder.build_batch(&records);

    let mut sink = JsonlSink::new(&config.output_path, config.output_max_size_mb, config.output_max_rotations)?;
    for event in &events {
        sink.publish(event).await?;
    }
    EventSink::<solrecon::CanonicalTradeEvent>::flush(&mut sink).await?;

    info!("✅ Wrote {} events to {}", events.len(), config.output_path);
    Ok(())
}
