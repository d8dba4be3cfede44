//! Periodic drain task for a shared [`MergeWindow`]
//!
//! The window lock is held only inside `drain_once`; emissions are rendered
//! and published after it has been released, so a slow sink never stalls
//! `append` callers.

use super::alert_leg::MergeLeg;
use super::window::{MergeEmission, MergeWindow};
use crate::sink::EventSink;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Drain `window` every `interval_ms` until `shutdown` flips to true or its
/// sender is dropped, then drain one last time.
///
/// `render` maps each emission to the record published on `sink`. Sink
/// failures are logged and do not stop the loop. Returns the number of
/// records published.
pub async fn run_merge_drain<L, T, S, F>(
    window: Arc<MergeWindow<L>>,
    mut sink: S,
    interval_ms: u64,
    mut shutdown: watch::Receiver<bool>,
    render: F,
) -> u64
where
    L: MergeLeg + 'static,
    T: Serialize + Send + Sync,
    S: EventSink<T>,
    F: Fn(MergeEmission<L>) -> T + Send + Sync,
{
    log::info!("🚀 Starting merge drain loop");
    log::info!("   ├─ Drain interval: {}ms", interval_ms);
    log::info!("   └─ Sink: {}", sink.sink_type());

    let mut ticker = interval(Duration::from_millis(interval_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut published = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                published += publish_drain(&window, &mut sink, &render).await;
            }
            changed = shutdown.changed() => {
                let stop = changed.is_err() || *shutdown.borrow();
                if !stop {
                    continue;
                }
                log::info!("🔄 Shutdown requested, performing final drain...");
                published += publish_drain(&window, &mut sink, &render).await;
                break;
            }
        }
    }

    log::info!("✅ Merge drain loop stopped ({} records published)", published);
    published
}

async fn publish_drain<L, T, S, F>(window: &MergeWindow<L>, sink: &mut S, render: &F) -> u64
where
    L: MergeLeg,
    T: Serialize + Send + Sync,
    S: EventSink<T>,
    F: Fn(MergeEmission<L>) -> T,
{
    let emissions = window.drain_once();
    if emissions.is_empty() {
        return 0;
    }

    let mut published = 0u64;
    for emission in emissions {
        let record = render(emission);
        match sink.publish(&record).await {
            Ok(()) => published += 1,
            Err(e) => log::error!("❌ Failed to publish merge emission: {}", e),
        }
    }

    if let Err(e) = sink.flush().await {
        log::error!("❌ Failed to flush {} sink: {}", sink.sink_type(), e);
    }

    log::debug!("📤 Published {} merge records", published);
    published
}
