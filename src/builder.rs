//! Producer-side entry point: provider record → canonical events
//!
//! The record is classified once by [`LegExtractor::extract`], then:
//! 1. A decodable DCA open instruction short-circuits into one OPEN_DCA event.
//! 2. A coherent swap annotation is emitted directly without netting.
//! 3. Otherwise raw transfer legs are used. Token-launch (CREATE) records pair
//!    the launched token with the native payment, swap-like records are netted,
//!    plain transfers go through the fan-group collapser.
//! 4. Nothing valid → `NoReconstructableEvent`; the caller drops the record.

use crate::config::ReconstructConfig;
use crate::error::ReconstructError;
use crate::extract::{DcaOpenOrder, DcaTrade, ExtractedRecord, LegExtractor};
use crate::gate::PermissionGate;
use crate::provider::{ProgramRegistry, ProviderRecord};
use crate::reconcile::{FanGroupCollapser, NettingReconciler};
use crate::types::{CanonicalTradeEvent, EventKind, RawLeg, NATIVE_MINT};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

pub struct CanonicalEventBuilder {
    extractor: LegExtractor,
    registry: ProgramRegistry,
    reconciler: NettingReconciler,
    collapser: FanGroupCollapser,
    gate: Arc<dyn PermissionGate>,
}

impl CanonicalEventBuilder {
    pub fn new(config: &ReconstructConfig, gate: Arc<dyn PermissionGate>) -> Self {
        Self {
            extractor: LegExtractor::new(config.dca_program_id.clone()),
            registry: ProgramRegistry::from_config(config),
            reconciler: NettingReconciler::new(),
            collapser: FanGroupCollapser::new(config.fan_group_min_size, Arc::clone(&gate)),
            gate,
        }
    }

    pub fn build(&self, record: &ProviderRecord) -> Result<Vec<CanonicalTradeEvent>, ReconstructError> {
        if record.failed() {
            log::debug!("Skipping failed transaction {}", record.signature);
            return Err(ReconstructError::NoReconstructableEvent(record.signature.clone()));
        }

        let extracted = match self.extractor.extract(record) {
            Ok(extracted) => extracted,
            Err(ReconstructError::UnsupportedRecord(reason)) => {
                log::debug!("Nothing to extract: {}", reason);
                return Err(ReconstructError::NoReconstructableEvent(record.signature.clone()));
            }
            Err(e) => return Err(e),
        };

        let (mut events, dca) = match extracted {
            ExtractedRecord::OpenDca(order) => return Ok(vec![self.open_dca_event(record, order)]),
            ExtractedRecord::SwapAnnotated { legs, dca } => {
                let fast = if record.is_create_typed() {
                    None
                } else {
                    self.swap_fast_path(record, &legs, dca.as_ref())
                };
                let events = match fast {
                    Some(event) => vec![event],
                    None => self.leg_events(record, self.extractor.extract_transfer_legs(record)?)?,
                };
                (events, dca)
            }
            ExtractedRecord::RawTransfers { legs, dca } => (self.leg_events(record, legs)?, dca),
        };
        let is_dca_trade = dca.is_some();

        if events.is_empty() {
            return Err(ReconstructError::NoReconstructableEvent(record.signature.clone()));
        }
        for event in &mut events {
            event.is_dca_trade |= is_dca_trade;
        }
        Ok(events)
    }

    /// Build every record, logging and skipping the ones that fail
    pub fn build_batch(&self, records: &[ProviderRecord]) -> Vec<CanonicalTradeEvent> {
        let mut events = Vec::new();
        let mut dropped = 0usize;
        for record in records {
            match self.build(record) {
                Ok(built) => events.extend(built),
                Err(e) => {
                    dropped += 1;
                    log::debug!("⚠️  Dropped record {}: {}", record.signature, e);
                }
            }
        }
        log::info!(
            "🧱 Built {} events from {} records ({} dropped)",
            events.len(),
            records.len(),
            dropped
        );
        events
    }

    fn source_label(&self, record: &ProviderRecord) -> String {
        self.registry
            .scan(record)
            .map(|m| m.label)
            .unwrap_or_else(|| record.source.clone())
    }

    fn open_dca_event(&self, record: &ProviderRecord, order: DcaOpenOrder) -> CanonicalTradeEvent {
        log::debug!("🔁 OPEN_DCA {} by {}", record.signature, order.user);
        let source = self
            .registry
            .label(self.extractor.dca_program_id())
            .unwrap_or("DCA")
            .to_string();
        CanonicalTradeEvent {
            tx_hash: record.signature.clone(),
            source,
            kind: EventKind::OpenDca,
            timestamp: record.timestamp,
            from_token: order.input_mint.clone(),
            from_account: Some(order.user.clone()),
            from_amount: Decimal::ZERO,
            to_token: order.output_mint.clone(),
            to_account: Some(order.user.clone()),
            to_amount: Decimal::ZERO,
            actor_account: Some(order.user.clone()),
            wallet_count: 1,
            child_legs: Vec::new(),
            is_dca_trade: true,
            dca_open: Some(order),
        }
    }

    /// A swap annotation with one input paid and one output received by the same user
    fn swap_fast_path(
        &self,
        record: &ProviderRecord,
        legs: &[RawLeg],
        dca: Option<&DcaTrade>,
    ) -> Option<CanonicalTradeEvent> {
        let [input, output] = legs else {
            return None;
        };
        let user = input.from_account.as_str();
        let coherent = !user.is_empty()
            && user == output.to_account
            && input.mint != output.mint
            && input.amount > Decimal::ZERO
            && output.amount > Decimal::ZERO;
        if !coherent {
            log::debug!("Swap annotation of {} is incoherent", record.signature);
            return None;
        }

        // keeper-executed DCA fills report the DCA vault as user
        let user = dca.and_then(DcaTrade::fill_user).unwrap_or(user).to_string();

        Some(CanonicalTradeEvent {
            tx_hash: record.signature.clone(),
            source: self.source_label(record),
            kind: EventKind::Swap,
            timestamp: record.timestamp,
            from_token: input.mint.clone(),
            from_account: Some(user.clone()),
            from_amount: input.amount,
            to_token: output.mint.clone(),
            to_account: Some(user.clone()),
            to_amount: output.amount,
            actor_account: Some(user),
            wallet_count: 1,
            child_legs: Vec::new(),
            is_dca_trade: dca.is_some(),
            dca_open: None,
        })
    }

    fn leg_events(&self, record: &ProviderRecord, legs: Vec<RawLeg>) -> Result<Vec<CanonicalTradeEvent>, ReconstructError> {
        if record.is_create_typed() {
            self.create_events(record, &legs)
        } else {
            self.transfer_events(record, legs)
        }
    }

    /// Token launches: each token leg to a buyer paired with the native amount that buyer paid the sender
    fn create_events(&self, record: &ProviderRecord, legs: &[RawLeg]) -> Result<Vec<CanonicalTradeEvent>, ReconstructError> {
        let actor = record.fee_payer.as_str();
        let native = sum_native_pairs(legs.iter().filter(|l| l.is_native() && l.counterparty().is_some()))?;
        let source = self.source_label(record);

        let events = legs
            .iter()
            .filter(|l| !l.is_native() && (l.from_account == actor || l.to_account == actor))
            .filter_map(|token| {
                let paid = native.get(&(token.to_account.as_str(), token.from_account.as_str()))?;
                Some(CanonicalTradeEvent {
                    tx_hash: record.signature.clone(),
                    source: source.clone(),
                    kind: EventKind::Create,
                    timestamp: record.timestamp,
                    from_token: NATIVE_MINT.to_string(),
                    from_account: Some(token.to_account.clone()),
                    from_amount: *paid,
                    to_token: token.mint.clone(),
                    to_account: Some(token.to_account.clone()),
                    to_amount: token.amount,
                    actor_account: Some(actor.to_string()),
                    wallet_count: 1,
                    child_legs: Vec::new(),
                    is_dca_trade: false,
                    dca_open: None,
                })
            })
            .collect();
        Ok(events)
    }

    fn transfer_events(&self, record: &ProviderRecord, legs: Vec<RawLeg>) -> Result<Vec<CanonicalTradeEvent>, ReconstructError> {
        let actor = record.fee_payer.as_str();
        let venue = self.registry.scan(record);

        if record.is_swap_typed() || venue.is_some() {
            match self.net_swap(record, &legs) {
                Ok(mut event) => {
                    event.source = venue.map(|m| m.label).unwrap_or_else(|| record.source.clone());
                    return Ok(vec![event]);
                }
                Err(e) if record.is_swap_typed() => {
                    log::debug!("Netting failed for swap {}: {}", record.signature, e);
                    return Err(ReconstructError::NoReconstructableEvent(record.signature.clone()));
                }
                Err(e) => log::debug!("{} not a venue swap ({}), treating as transfers", record.signature, e),
            }
        }

        let (native, tokens): (Vec<RawLeg>, Vec<RawLeg>) = legs
            .into_iter()
            .filter(|l| l.from_account == actor || l.to_account == actor)
            .partition(RawLeg::is_native);

        let mut admitted = merge_native_pairs(native)?;
        admitted.extend(tokens);
        admitted.retain(|leg| {
            let permitted = self.gate.is_permitted(&leg.from_account) || self.gate.is_permitted(&leg.to_account);
            if !permitted {
                log::debug!("Transfer leg {} -> {} not permitted", leg.from_account, leg.to_account);
            }
            permitted
        });

        let declared: HashMap<String, Decimal> = admitted
            .iter()
            .map(|l| l.mint.as_str())
            .collect::<HashSet<_>>()
            .into_iter()
            .filter_map(|mint| Some((mint.to_string(), record.declared_change(actor, mint)?)))
            .collect();

        Ok(self.collapser.collapse_declared(&admitted, actor, &declared))
    }

    /// Net the actor's token legs plus native legs exchanged with a token counterparty
    fn net_swap(&self, record: &ProviderRecord, legs: &[RawLeg]) -> Result<CanonicalTradeEvent, ReconstructError> {
        let token_parties: HashSet<&str> = legs
            .iter()
            .filter(|l| !l.is_native())
            .filter_map(RawLeg::counterparty)
            .collect();
        if token_parties.is_empty() {
            return Err(ReconstructError::UnbalancedLegs {
                tx_hash: record.signature.clone(),
                nonzero_mints: 0,
            });
        }

        let mut selected: Vec<RawLeg> = legs
            .iter()
            .filter(|l| match l.counterparty() {
                Some(party) => !l.is_native() || token_parties.contains(party),
                None => false,
            })
            .cloned()
            .collect();

        if let Some(payout) = curve_payout(record, &selected) {
            selected.push(payout);
        }

        // a single leg would pass through as a transfer; a swap needs both sides
        if selected.len() < 2 {
            return Err(ReconstructError::UnbalancedLegs {
                tx_hash: record.signature.clone(),
                nonzero_mints: selected.len(),
            });
        }
        self.reconciler.reconcile(&record.signature, &selected)
    }
}

/// Native leg paid back to a seller from the token receiver's declared balance change.
///
/// Bonding-curve sells move lamports directly out of the curve account, so
/// the payout never appears among the native transfers. Applies only when the
/// actor sends exactly one token leg and no native leg already comes back.
fn curve_payout(record: &ProviderRecord, selected: &[RawLeg]) -> Option<RawLeg> {
    let mut tokens = selected.iter().filter(|l| !l.is_native());
    let sold = match (tokens.next(), tokens.next()) {
        (Some(sold), None) if sold.from_account == sold.actor => sold,
        _ => return None,
    };
    let paid_back = selected
        .iter()
        .any(|l| l.is_native() && l.from_account == sold.to_account && l.to_account == sold.actor);
    if paid_back {
        return None;
    }

    let amount = record.declared_change(&sold.to_account, NATIVE_MINT)?.abs();
    if amount.is_zero() {
        return None;
    }
    log::debug!("💰 {} sell payout {} SOL from {}", record.signature, amount, sold.to_account);
    Some(RawLeg {
        tx_hash: sold.tx_hash.clone(),
        actor: sold.actor.clone(),
        mint: NATIVE_MINT.to_string(),
        from_account: sold.to_account.clone(),
        to_account: sold.actor.clone(),
        amount,
        timestamp: sold.timestamp,
        source: sold.source.clone(),
    })
}

/// Native amounts per `(from, to)` pair
fn sum_native_pairs<'a>(
    legs: impl Iterator<Item = &'a RawLeg>,
) -> Result<BTreeMap<(&'a str, &'a str), Decimal>, ReconstructError> {
    let mut pairs: BTreeMap<(&str, &str), Decimal> = BTreeMap::new();
    for leg in legs {
        let total = pairs
            .entry((leg.from_account.as_str(), leg.to_account.as_str()))
            .or_default();
        *total = total
            .checked_add(leg.amount)
            .ok_or_else(|| ReconstructError::AmountOverflow { mint: leg.mint.clone() })?;
    }
    Ok(pairs)
}

/// Collapse native legs between the same pair of accounts into one leg
fn merge_native_pairs(legs: Vec<RawLeg>) -> Result<Vec<RawLeg>, ReconstructError> {
    let mut merged: Vec<RawLeg> = Vec::with_capacity(legs.len());
    for leg in legs {
        match merged
            .iter_mut()
            .find(|m| m.from_account == leg.from_account && m.to_account == leg.to_account)
        {
            Some(existing) => {
                existing.amount = existing
                    .amount
                    .checked_add(leg.amount)
                    .ok_or_else(|| ReconstructError::AmountOverflow { mint: leg.mint.clone() })?;
            }
            None => merged.push(leg),
        }
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_DCA_PROGRAM_ID;
    use crate::extract::dca::tests::{open_accounts, open_payload};
    use crate::gate::{AllowAll, StaticAllowList};
    use crate::types::TradeDirection;
    use serde_json::json;
    use std::str::FromStr;

    fn builder() -> CanonicalEventBuilder {
        CanonicalEventBuilder::new(&ReconstructConfig::default(), Arc::new(AllowAll))
    }

    fn record(value: serde_json::Value) -> ProviderRecord {
        serde_json::from_value(value).unwrap()
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_open_dca_short_circuit() {
        let r = record(json!({
            "signature": "dcaopen",
            "feePayer": "User1",
            "type": "UNKNOWN",
            "instructions": [{
                "programId": DEFAULT_DCA_PROGRAM_ID,
                "accounts": open_accounts(),
                "data": bs58::encode(open_payload(Some(10), None, None)).into_string(),
                "innerInstructions": []
            }],
            "nativeTransfers": [{"fromUserAccount": "User1", "toUserAccount": "Vault", "amount": 5}]
        }));
        let events = builder().build(&r).unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.kind, EventKind::OpenDca);
        assert_eq!(event.source, "JUPITER_DCA");
        assert_eq!(event.from_token, "Account3");
        assert_eq!(event.to_token, "Account4");
        assert_eq!(event.dca_open.as_ref().unwrap().min_out_amount, Some(10));
        assert_eq!(event.direction(), TradeDirection::OpenDca);
    }

    #[test]
    fn test_swap_fast_path() {
        let r = record(json!({
            "signature": "swap1",
            "feePayer": "User1",
            "type": "SWAP",
            "source": "RAYDIUM",
            "events": {"swap": {
                "nativeInput": {"account": "User1", "amount": "2000000000"},
                "tokenInputs": [],
                "tokenOutputs": [{"mint": "MintB", "userAccount": "User1", "tokenAccount": "Ata",
                    "rawTokenAmount": {"decimals": 2, "tokenAmount": "12345"}}]
            }}
        }));
        let events = builder().build(&r).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Swap);
        assert_eq!(events[0].from_token, NATIVE_MINT);
        assert_eq!(events[0].from_amount, dec("2"));
        assert_eq!(events[0].to_amount, dec("123.45"));
        assert_eq!(events[0].direction(), TradeDirection::Buy);
        assert!(!events[0].is_dca_trade);
    }

    #[test]
    fn test_dca_fill_remaps_user() {
        let fill_accounts: Vec<String> = (0..12).map(|i| format!("F{}", i)).collect();
        let r = record(json!({
            "signature": "fill",
            "feePayer": "Keeper",
            "type": "SWAP",
            "source": "JUPITER",
            "instructions": [{"programId": DEFAULT_DCA_PROGRAM_ID, "accounts": fill_accounts, "data": "1"}],
            "events": {"swap": {
                "tokenInputs": [{"mint": "MintA", "userAccount": "DcaVault",
                    "rawTokenAmount": {"decimals": 0, "tokenAmount": "-5"}}],
                "tokenOutputs": [{"mint": "MintB", "userAccount": "DcaVault",
                    "rawTokenAmount": {"decimals": 0, "tokenAmount": "9"}}]
            }}
        }));
        let events = builder().build(&r).unwrap();
        assert_eq!(events[0].actor_account.as_deref(), Some("F2"));
        assert_eq!(events[0].from_amount, dec("5"));
        assert!(events[0].is_dca_trade);
    }

    #[test]
    fn test_incoherent_annotation_falls_back_to_netting() {
        let r = record(json!({
            "signature": "bc1",
            "feePayer": "Trader",
            "type": "SWAP",
            "source": "PUMP_FUN",
            "events": {"swap": {"tokenInputs": [], "tokenOutputs": [], "innerSwaps": []}},
            "nativeTransfers": [
                {"fromUserAccount": "Trader", "toUserAccount": "Curve", "amount": 1000000000u64},
                {"fromUserAccount": "Trader", "toUserAccount": "FeeRecipient", "amount": 10000000u64}
            ],
            "tokenTransfers": [
                {"fromUserAccount": "Curve", "toUserAccount": "Trader", "mint": "Meme", "tokenAmount": 35000.5}
            ]
        }));
        let events = builder().build(&r).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Swap);
        assert_eq!(events[0].from_amount, dec("1"));
        assert_eq!(events[0].to_token, "Meme");
        assert_eq!(events[0].to_amount, dec("35000.5"));
    }

    #[test]
    fn test_curve_sell_paid_from_account_data() {
        let r = record(json!({
            "signature": "sell1",
            "feePayer": "Trader",
            "type": "SWAP",
            "source": "PUMP_FUN",
            "nativeTransfers": [
                {"fromUserAccount": "Trader", "toUserAccount": "FeeRecipient", "amount": 10000000u64}
            ],
            "tokenTransfers": [
                {"fromUserAccount": "Trader", "toUserAccount": "Curve", "mint": "Meme", "tokenAmount": 5000}
            ],
            "accountData": [
                {"account": "Curve", "nativeBalanceChange": -1000000000i64},
                {"account": "Trader", "nativeBalanceChange": 985000000i64}
            ]
        }));
        let events = builder().build(&r).unwrap();
        assert_eq!(events.len(), 1);
        let sell = &events[0];
        assert_eq!(sell.kind, EventKind::Swap);
        assert_eq!(sell.from_token, "Meme");
        assert_eq!(sell.from_amount, dec("5000"));
        assert_eq!(sell.to_token, NATIVE_MINT);
        assert_eq!(sell.to_amount, dec("1"));
        assert_eq!(sell.actor_account.as_deref(), Some("Trader"));
        assert_eq!(sell.direction(), TradeDirection::Sell);
    }

    #[test]
    fn test_curve_sell_prefers_native_transfer() {
        let r = record(json!({
            "signature": "sell2",
            "feePayer": "Trader",
            "type": "SWAP",
            "nativeTransfers": [
                {"fromUserAccount": "Curve", "toUserAccount": "Trader", "amount": 400000000u64}
            ],
            "tokenTransfers": [
                {"fromUserAccount": "Trader", "toUserAccount": "Curve", "mint": "Meme", "tokenAmount": 5000}
            ],
            "accountData": [{"account": "Curve", "nativeBalanceChange": -999000000i64}]
        }));
        let events = builder().build(&r).unwrap();
        assert_eq!(events[0].to_amount, dec("0.4"));
    }

    #[test]
    fn test_swap_typed_unbalanced_dropped() {
        let r = record(json!({
            "signature": "bad",
            "feePayer": "Trader",
            "type": "SWAP",
            "tokenTransfers": [
                {"fromUserAccount": "Trader", "toUserAccount": "Pool", "mint": "A", "tokenAmount": 1},
                {"fromUserAccount": "Trader", "toUserAccount": "Pool", "mint": "B", "tokenAmount": 1}
            ]
        }));
        assert_eq!(
            builder().build(&r).unwrap_err(),
            ReconstructError::NoReconstructableEvent("bad".into())
        );
    }

    #[test]
    fn test_transfer_fan_out_with_declared_total() {
        let transfers: Vec<_> = (0..4)
            .map(|i| json!({"fromUserAccount": "Payer", "toUserAccount": format!("W{}", i), "amount": 250000000u64}))
            .collect();
        let r = record(json!({
            "signature": "airdrop",
            "feePayer": "Payer",
            "fee": 5000,
            "type": "TRANSFER",
            "source": "SYSTEM_PROGRAM",
            "nativeTransfers": transfers,
            "accountData": [{"account": "Payer", "nativeBalanceChange": -1000005000i64}]
        }));
        let events = builder().build(&r).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].wallet_count, 4);
        assert_eq!(events[0].from_amount, dec("1"));
        assert_eq!(events[0].to_account, None);
    }

    #[test]
    fn test_native_pairs_summed() {
        let r = record(json!({
            "signature": "pair",
            "feePayer": "Payer",
            "type": "TRANSFER",
            "nativeTransfers": [
                {"fromUserAccount": "Payer", "toUserAccount": "B", "amount": 100000000u64},
                {"fromUserAccount": "Payer", "toUserAccount": "B", "amount": 200000000u64},
                {"fromUserAccount": "X", "toUserAccount": "Y", "amount": 1}
            ]
        }));
        let events = builder().build(&r).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].from_amount, dec("0.3"));
    }

    #[test]
    fn test_gate_prefilter_drops_unmonitored() {
        let config = ReconstructConfig::default();
        let builder = CanonicalEventBuilder::new(&config, Arc::new(StaticAllowList::new(["Watched"])));
        let r = record(json!({
            "signature": "quiet",
            "feePayer": "Payer",
            "type": "TRANSFER",
            "nativeTransfers": [{"fromUserAccount": "Payer", "toUserAccount": "B", "amount": 1000}]
        }));
        assert!(matches!(builder.build(&r), Err(ReconstructError::NoReconstructableEvent(_))));
    }

    #[test]
    fn test_create_event() {
        let r = record(json!({
            "signature": "launch",
            "feePayer": "Creator",
            "type": "CREATE",
            "source": "PUMP_FUN",
            "nativeTransfers": [
                {"fromUserAccount": "Creator", "toUserAccount": "Curve", "amount": 500000000u64},
                {"fromUserAccount": "Creator", "toUserAccount": "Rent", "amount": 2039280u64}
            ],
            "tokenTransfers": [
                {"fromUserAccount": "Curve", "toUserAccount": "Creator", "mint": "NewMint", "tokenAmount": 1000000}
            ]
        }));
        let events = builder().build(&r).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Create);
        assert_eq!(events[0].from_amount, dec("0.5"));
        assert_eq!(events[0].to_token, "NewMint");
    }

    #[test]
    fn test_failed_transaction_dropped() {
        let r = record(json!({"signature": "err", "transactionError": {"InstructionError": [0, "Custom"]}}));
        assert!(builder().build(&r).is_err());
    }

    #[test]
    fn test_build_batch_skips_failures() {
        let good = record(json!({
            "signature": "ok",
            "feePayer": "Payer",
            "type": "TRANSFER",
            "nativeTransfers": [{"fromUserAccount": "Payer", "toUserAccount": "B", "amount": 1000}]
        }));
        let bad = record(json!({"signature": "empty", "type": "TRANSFER"}));
        let events = builder().build_batch(&[good, bad]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tx_hash, "ok");
    }
}
