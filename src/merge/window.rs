//! Time-boxed merge buffer for legs that share a transaction hash
//!
//! One mutex guards the `tx_hash → MergeBucket` map. `append` takes the lock
//! briefly; `drain_once` takes it for the whole pass, so no leg can join a
//! bucket while that bucket is being reconciled. Appends stall for the
//! duration of a drain.
//!
//! Every bucket present when a drain starts is closed by it: a successful
//! reconciliation emits one event, a failure emits each buffered leg as is.
//! Buckets are never requeued.

use super::alert_leg::MergeLeg;
use crate::error::ReconstructError;
use crate::reconcile::NettingReconciler;
use crate::types::{CanonicalTradeEvent, RawLeg};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketState {
    Open,
    Draining,
    Closed,
}

#[derive(Debug, Clone)]
pub struct MergeBucket<L> {
    pub tx_hash: String,
    /// Arrival order
    pub legs: Vec<L>,
    pub state: BucketState,
    opened_seq: u64,
}

impl<L> MergeBucket<L> {
    fn new(tx_hash: &str, opened_seq: u64) -> Self {
        Self {
            tx_hash: tx_hash.to_string(),
            legs: Vec::new(),
            state: BucketState::Open,
            opened_seq,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergeEmission<L> {
    /// The bucket netted into one event; `sources` are the buffered legs
    Reconciled {
        event: CanonicalTradeEvent,
        sources: Vec<L>,
    },
    /// Reconciliation failed; one emission per buffered leg
    Fallback {
        tx_hash: String,
        leg: L,
        reason: String,
    },
}

impl<L> MergeEmission<L> {
    pub fn tx_hash(&self) -> &str {
        match self {
            MergeEmission::Reconciled { event, .. } => &event.tx_hash,
            MergeEmission::Fallback { tx_hash, .. } => tx_hash,
        }
    }

    pub fn is_reconciled(&self) -> bool {
        matches!(self, MergeEmission::Reconciled { .. })
    }
}

#[derive(Debug)]
struct WindowState<L> {
    buckets: HashMap<String, MergeBucket<L>>,
    next_seq: u64,
}

pub struct MergeWindow<L> {
    state: Mutex<WindowState<L>>,
    reconciler: NettingReconciler,
}

impl<L: MergeLeg> MergeWindow<L> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(WindowState {
                buckets: HashMap::new(),
                next_seq: 0,
            }),
            reconciler: NettingReconciler::new(),
        }
    }

    // Bucket state stays consistent across a panicking holder, so poisoning is ignored
    fn lock(&self) -> std::sync::MutexGuard<'_, WindowState<L>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Buffer `leg` under `tx_hash`, opening a bucket on first arrival.
    ///
    /// Blocks while a drain holds the lock.
    pub fn append(&self, tx_hash: &str, leg: L) {
        let mut guard = self.lock();
        let WindowState { buckets, next_seq } = &mut *guard;
        let bucket = buckets.entry(tx_hash.to_string()).or_insert_with(|| {
            let bucket = MergeBucket::new(tx_hash, *next_seq);
            *next_seq += 1;
            bucket
        });
        bucket.legs.push(leg);
    }

    /// Reconcile and close every bucket, holding the lock for the whole pass.
    ///
    /// Emissions are ordered by bucket creation.
    pub fn drain_once(&self) -> Vec<MergeEmission<L>> {
        let started = Instant::now();
        let mut state = self.lock();

        let mut order: Vec<(u64, String)> = state
            .buckets
            .values()
            .map(|b| (b.opened_seq, b.tx_hash.clone()))
            .collect();
        order.sort_unstable();

        let bucket_count = order.len();
        let mut emissions = Vec::with_capacity(bucket_count);
        let mut reconciled = 0usize;

        for (_, tx_hash) in order {
            let Some(bucket) = state.buckets.get_mut(&tx_hash) else {
                continue;
            };
            bucket.state = BucketState::Draining;

            let outcome = bucket_raw_legs(bucket).and_then(|legs| {
                let mut event = self.reconciler.reconcile(&tx_hash, &legs)?;
                event.child_legs = legs;
                Ok(event)
            });

            match outcome {
                Ok(event) => {
                    reconciled += 1;
                    emissions.push(MergeEmission::Reconciled {
                        event,
                        sources: bucket.legs.clone(),
                    });
                }
                Err(e) => {
                    log::warn!(
                        "⚠️  Merge fallback for {} ({} legs): {}",
                        tx_hash,
                        bucket.legs.len(),
                        e
                    );
                    let reason = e.to_string();
                    emissions.extend(bucket.legs.iter().cloned().map(|leg| MergeEmission::Fallback {
                        tx_hash: tx_hash.clone(),
                        leg,
                        reason: reason.clone(),
                    }));
                }
            }

            bucket.state = BucketState::Closed;
            state.buckets.remove(&tx_hash);
        }

        drop(state);

        if bucket_count > 0 {
            log::info!(
                "🔀 Drained {} buckets: {} reconciled, {} fell back, {} emissions in {:?}",
                bucket_count,
                reconciled,
                bucket_count - reconciled,
                emissions.len(),
                started.elapsed()
            );
        }

        emissions
    }

    pub fn pending_buckets(&self) -> usize {
        self.lock().buckets.len()
    }

    pub fn pending_legs(&self) -> usize {
        self.lock().buckets.values().map(|b| b.legs.len()).sum()
    }
}

impl<L: MergeLeg> Default for MergeWindow<L> {
    fn default() -> Self {
        Self::new()
    }
}

fn bucket_raw_legs<L: MergeLeg>(bucket: &MergeBucket<L>) -> Result<Vec<RawLeg>, ReconstructError> {
    let mut legs = Vec::with_capacity(bucket.legs.len() * 2);
    for leg in &bucket.legs {
        legs.extend(leg.raw_legs()?);
    }
    Ok(legs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::alert_leg::tests::alert;
    use crate::merge::alert_leg::AlertLeg;
    use crate::types::EventKind;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn raw(tx: &str, mint: &str, from: &str, to: &str, amount: &str) -> RawLeg {
        RawLeg {
            tx_hash: tx.to_string(),
            actor: "actor".to_string(),
            mint: mint.to_string(),
            from_account: from.to_string(),
            to_account: to.to_string(),
            amount: Decimal::from_str(amount).unwrap(),
            timestamp: 1_700_000_000,
            source: "dex".to_string(),
        }
    }

    #[test]
    fn test_reconciles_balanced_bucket() {
        let window = MergeWindow::new();
        window.append("tx1", raw("tx1", "A", "actor", "X", "10"));
        window.append("tx1", raw("tx1", "B", "Y", "actor", "3"));
        assert_eq!(window.pending_buckets(), 1);
        assert_eq!(window.pending_legs(), 2);

        let emissions = window.drain_once();
        assert_eq!(emissions.len(), 1);
        match &emissions[0] {
            MergeEmission::Reconciled { event, sources } => {
                assert_eq!(event.kind, EventKind::Swap);
                assert_eq!(event.from_amount, Decimal::from(10));
                assert_eq!(event.to_amount, Decimal::from(3));
                assert_eq!(sources.len(), 2);
                assert_eq!(event.child_legs.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(window.pending_buckets(), 0);
    }

    #[test]
    fn test_unbalanced_bucket_falls_back() {
        let window = MergeWindow::new();
        window.append("tx1", raw("tx1", "A", "actor", "X", "1"));
        window.append("tx1", raw("tx1", "B", "actor", "X", "2"));
        window.append("tx1", raw("tx1", "C", "Y", "actor", "3"));

        let emissions = window.drain_once();
        assert_eq!(emissions.len(), 3);
        assert!(emissions.iter().all(|e| !e.is_reconciled() && e.tx_hash() == "tx1"));
        // closed on first failure, never requeued
        assert!(window.drain_once().is_empty());
    }

    #[test]
    fn test_single_leg_bucket_passthrough() {
        let window = MergeWindow::new();
        window.append("tx1", raw("tx1", "A", "actor", "X", "1"));
        let emissions = window.drain_once();
        match &emissions[0] {
            MergeEmission::Reconciled { event, .. } => assert_eq!(event.kind, EventKind::Transfer),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_emission_order_follows_bucket_creation() {
        let window = MergeWindow::new();
        for tx in ["c", "a", "b"] {
            window.append(tx, raw(tx, "A", "actor", "X", "1"));
        }
        window.append("a", raw("a", "B", "Y", "actor", "1"));
        let hashes: Vec<String> = window.drain_once().iter().map(|e| e.tx_hash().to_string()).collect();
        assert_eq!(hashes, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_reopened_bucket_after_close() {
        let window = MergeWindow::new();
        window.append("tx1", raw("tx1", "A", "actor", "X", "1"));
        window.drain_once();
        window.append("tx1", raw("tx1", "A", "actor", "X", "2"));
        let emissions = window.drain_once();
        assert_eq!(emissions.len(), 1);
        match &emissions[0] {
            MergeEmission::Reconciled { event, .. } => assert_eq!(event.from_amount, Decimal::from(2)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_alert_legs_multi_hop() {
        let window: MergeWindow<AlertLeg> = MergeWindow::new();
        // A -> M -> B routed through an intermediate token
        window.append("0x1", alert("0x1", "A", "1", "M", "5"));
        window.append("0x1", alert("0x1", "M", "5", "B", "2"));
        let emissions = window.drain_once();
        assert_eq!(emissions.len(), 1);
        match &emissions[0] {
            MergeEmission::Reconciled { event, sources } => {
                assert_eq!(event.from_token, "A");
                assert_eq!(event.to_token, "B");
                assert_eq!(event.to_amount, Decimal::from(2));
                assert_eq!(sources.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_tx_hash_mismatch_falls_back() {
        let window: MergeWindow<AlertLeg> = MergeWindow::new();
        window.append("0x1", alert("0x1", "A", "1", "M", "5"));
        window.append("0x1", alert("0x2", "M", "5", "B", "2"));
        let emissions = window.drain_once();
        assert_eq!(emissions.len(), 2);
        match &emissions[1] {
            MergeEmission::Fallback { leg, reason, .. } => {
                assert_eq!(leg.tx_hash, "0x2");
                assert!(reason.contains("mismatch"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unparseable_leg_falls_back() {
        let window: MergeWindow<AlertLeg> = MergeWindow::new();
        window.append("0x1", alert("0x1", "A", "not-a-number", "B", "5"));
        let emissions = window.drain_once();
        assert_eq!(emissions.len(), 1);
        assert!(!emissions[0].is_reconciled());
    }
}
