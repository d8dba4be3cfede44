//! Fan-in / fan-out collapsing for single-actor transfers
//!
//! Legs are grouped by mint and by the actor's direction. A one-direction
//! group with at least `min_group_size` legs and more than one counterparty is
//! a fan: it collapses into one aggregate TRANSFER carrying the original legs
//! as children, provided the totals are consistent and the permission gate
//! accepts the actor. Otherwise the legs are emitted one by one, each kept
//! only if the gate accepts its counterparty.

use crate::gate::PermissionGate;
use crate::types::{CanonicalTradeEvent, RawLeg};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub const DEFAULT_MIN_GROUP_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FanSide {
    /// Actor is the sender: one-to-many
    Out,
    /// Actor is the receiver: many-to-one
    In,
}

struct FanGroup<'a> {
    mint: &'a str,
    side: FanSide,
    legs: Vec<&'a RawLeg>,
}

impl FanGroup<'_> {
    fn counterparty<'l>(&self, leg: &'l RawLeg) -> &'l str {
        match self.side {
            FanSide::Out => &leg.to_account,
            FanSide::In => &leg.from_account,
        }
    }

    fn leg_total(&self) -> Option<Decimal> {
        self.legs
            .iter()
            .try_fold(Decimal::ZERO, |acc, leg| acc.checked_add(leg.amount))
    }

    /// Σ of the per-counterparty totals on the non-actor side
    fn counterpart_total(&self) -> Option<Decimal> {
        let mut per_counterparty: HashMap<&str, Decimal> = HashMap::new();
        for leg in &self.legs {
            let entry = per_counterparty.entry(self.counterparty(leg)).or_default();
            *entry = entry.checked_add(leg.amount)?;
        }
        per_counterparty
            .values()
            .try_fold(Decimal::ZERO, |acc, v| acc.checked_add(*v))
    }

    fn distinct_counterparties(&self) -> usize {
        self.legs
            .iter()
            .map(|leg| self.counterparty(leg))
            .collect::<HashSet<_>>()
            .len()
    }
}

pub struct FanGroupCollapser {
    min_group_size: usize,
    gate: Arc<dyn PermissionGate>,
}

impl FanGroupCollapser {
    pub fn new(min_group_size: usize, gate: Arc<dyn PermissionGate>) -> Self {
        Self { min_group_size, gate }
    }

    pub fn min_group_size(&self) -> usize {
        self.min_group_size
    }

    pub fn collapse(&self, legs: &[RawLeg], actor: &str) -> Vec<CanonicalTradeEvent> {
        self.collapse_declared(legs, actor, &HashMap::new())
    }

    /// Like [`collapse`](Self::collapse), with the provider's declared net
    /// change of the actor per mint used as the aggregate amount.
    ///
    /// A declared value only stands in for a group when the actor has no legs
    /// in the opposite direction for that mint; otherwise the group's own sum
    /// is the aggregate.
    pub fn collapse_declared(
        &self,
        legs: &[RawLeg],
        actor: &str,
        declared: &HashMap<String, Decimal>,
    ) -> Vec<CanonicalTradeEvent> {
        let groups = partition(legs, actor);
        let mut events = Vec::with_capacity(legs.len());

        for group in &groups {
            if group.legs.len() < self.min_group_size || group.distinct_counterparties() < 2 {
                events.extend(group.legs.iter().map(|leg| CanonicalTradeEvent::from_leg(leg)));
                continue;
            }

            let has_opposite = groups
                .iter()
                .any(|other| other.mint == group.mint && other.side != group.side);
            let aggregate = match declared.get(group.mint) {
                Some(net) if !has_opposite => Some(net.abs()),
                _ => group.leg_total(),
            };
            let consistent = matches!(
                (aggregate, group.counterpart_total()),
                (Some(a), Some(c)) if a == c
            );

            match aggregate {
                Some(amount) if consistent && self.gate.is_permitted(actor) => {
                    log::debug!(
                        "🪭 Collapsed {} legs of {} into one {:?} transfer for {}",
                        group.legs.len(),
                        group.mint,
                        group.side,
                        actor
                    );
                    events.push(aggregate_event(group, actor, amount));
                }
                _ => {
                    if !consistent {
                        log::debug!(
                            "Fan group {} for {} failed consistency check (aggregate {:?})",
                            group.mint,
                            actor,
                            aggregate
                        );
                    }
                    let before = events.len();
                    events.extend(
                        group
                            .legs
                            .iter()
                            .filter(|leg| self.gate.is_permitted(group.counterparty(leg)))
                            .map(|leg| CanonicalTradeEvent::from_leg(leg)),
                    );
                    let dropped = group.legs.len() - (events.len() - before);
                    if dropped > 0 {
                        log::debug!("Dropped {} unpermitted legs of {} for {}", dropped, group.mint, actor);
                    }
                }
            }
        }

        events
    }
}

/// Groups in first-appearance order: all actor-as-sender groups, then actor-as-receiver
fn partition<'a>(legs: &'a [RawLeg], actor: &str) -> Vec<FanGroup<'a>> {
    let mut groups: Vec<FanGroup<'a>> = Vec::new();
    for side in [FanSide::Out, FanSide::In] {
        for leg in legs {
            let on_side = match side {
                FanSide::Out => leg.from_account == actor,
                FanSide::In => leg.to_account == actor && leg.from_account != actor,
            };
            if !on_side {
                continue;
            }
            match groups.iter_mut().find(|g| g.side == side && g.mint == leg.mint) {
                Some(group) => group.legs.push(leg),
                None => groups.push(FanGroup {
                    mint: &leg.mint,
                    side,
                    legs: vec![leg],
                }),
            }
        }
    }
    groups
}

fn aggregate_event(group: &FanGroup<'_>, actor: &str, amount: Decimal) -> CanonicalTradeEvent {
    let first = group.legs[0];
    let mut event = CanonicalTradeEvent::from_leg(first);
    event.from_amount = amount;
    event.to_amount = amount;
    event.actor_account = Some(actor.to_string());
    match group.side {
        FanSide::Out => {
            event.from_account = Some(actor.to_string());
            event.to_account = None;
        }
        FanSide::In => {
            event.from_account = None;
            event.to_account = Some(actor.to_string());
        }
    }
    event.wallet_count = group.legs.len();
    event.child_legs = group.legs.iter().map(|leg| (*leg).clone()).collect();
    event
}
