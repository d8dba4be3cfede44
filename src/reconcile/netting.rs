//! Netting reconciler
//!
//! Collapses the legs of one actor in one transaction into a two-sided trade.
//! Per mint, `net = received - sent` from the actor's perspective; exactly two
//! mints with nonzero net of opposite sign make a valid SWAP, anything else is
//! `UnbalancedLegs`. Summation is order-independent and uses `Decimal`.

use crate::error::ReconstructError;
use crate::types::{CanonicalTradeEvent, EventKind, RawLeg};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

#[derive(Debug, Default, Clone, Copy)]
struct MintFlow {
    sent: Decimal,
    received: Decimal,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NettingReconciler;

impl NettingReconciler {
    pub fn new() -> Self {
        Self
    }

    pub fn reconcile(&self, tx_hash: &str, legs: &[RawLeg]) -> Result<CanonicalTradeEvent, ReconstructError> {
        let first = match legs {
            [] => return Err(ReconstructError::EmptyLegSet),
            [only] => return Ok(CanonicalTradeEvent::from_leg(only)),
            [first, ..] => first,
        };

        let actor = first.actor.as_str();
        for leg in legs {
            if leg.actor != actor {
                return Err(ReconstructError::ActorMismatch {
                    expected: actor.to_string(),
                    found: leg.actor.clone(),
                });
            }
            if leg.tx_hash != tx_hash {
                return Err(ReconstructError::TxHashMismatch {
                    expected: tx_hash.to_string(),
                    found: leg.tx_hash.clone(),
                });
            }
        }

        // BTreeMap keeps tie-breaking deterministic regardless of leg order
        let mut flows: BTreeMap<&str, MintFlow> = BTreeMap::new();
        for leg in legs {
            let flow = flows.entry(leg.mint.as_str()).or_default();
            let overflow = || ReconstructError::AmountOverflow { mint: leg.mint.clone() };
            if leg.from_account == actor {
                flow.sent = flow.sent.checked_add(leg.amount).ok_or_else(overflow)?;
            }
            if leg.to_account == actor {
                flow.received = flow.received.checked_add(leg.amount).ok_or_else(overflow)?;
            }
        }

        let mut nets = Vec::with_capacity(2);
        for (mint, flow) in &flows {
            let net = flow
                .received
                .checked_sub(flow.sent)
                .ok_or_else(|| ReconstructError::AmountOverflow { mint: mint.to_string() })?;
            if !net.is_zero() {
                nets.push((*mint, net));
            }
        }

        let unbalanced = || ReconstructError::UnbalancedLegs {
            tx_hash: tx_hash.to_string(),
            nonzero_mints: nets.len(),
        };

        let (from, to) = match nets.as_slice() {
            [a, b] if a.1.is_sign_negative() && b.1.is_sign_positive() => (*a, *b),
            [a, b] if a.1.is_sign_positive() && b.1.is_sign_negative() => (*b, *a),
            _ => return Err(unbalanced()),
        };

        let anchor = legs
            .iter()
            .find(|l| l.from_account == actor || l.to_account == actor)
            .unwrap_or(first);
        let source = if anchor.source.is_empty() {
            legs.iter()
                .map(|l| l.source.as_str())
                .find(|s| !s.is_empty())
                .unwrap_or_default()
                .to_string()
        } else {
            anchor.source.clone()
        };

        log::debug!(
            "🧮 Netted {} legs in {}: {} {} -> {} {}",
            legs.len(),
            tx_hash,
            -from.1,
            from.0,
            to.1,
            to.0
        );

        Ok(CanonicalTradeEvent {
            tx_hash: tx_hash.to_string(),
            source,
            kind: EventKind::Swap,
            timestamp: anchor.timestamp,
            from_token: from.0.to_string(),
            from_account: Some(actor.to_string()),
            from_amount: -from.1,
            to_token: to.0.to_string(),
            to_account: Some(actor.to_string()),
            to_amount: to.1,
            actor_account: Some(actor.to_string()),
            wallet_count: 1,
            child_legs: Vec::new(),
            is_dca_trade: false,
            dca_open: None,
        })
    }
}
