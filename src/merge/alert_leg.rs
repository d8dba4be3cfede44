//! Per-leg alert records delivered by the second ingestion path
//!
//! Each record describes one hop of a trade: `from_address` paid
//! `from_token_amount` of `from_token_address` into `dex`, and `to_address`
//! received `to_token_amount` of `to_token_address` from it. Several records
//! with the same `hash` make up one transaction.

use crate::error::ReconstructError;
use crate::provider::record::parse_decimal;
use crate::types::{CanonicalTradeEvent, RawLeg};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A leg type the merge window can buffer and reconcile
pub trait MergeLeg: Clone + Send {
    fn raw_legs(&self) -> Result<Vec<RawLeg>, ReconstructError>;
}

impl MergeLeg for RawLeg {
    fn raw_legs(&self) -> Result<Vec<RawLeg>, ReconstructError> {
        Ok(vec![self.clone()])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertLeg {
    pub dex: String,
    pub chain: String,
    #[serde(rename = "hash")]
    pub tx_hash: String,
    /// RFC 3339
    pub timestamp: String,

    pub from_address: String,
    #[serde(rename = "from_token_address")]
    pub from_token: String,
    pub from_token_symbol: String,
    pub from_token_amount: String,

    pub to_address: String,
    #[serde(rename = "to_token_address")]
    pub to_token: String,
    pub to_token_symbol: String,
    pub to_token_amount: String,

    pub value: String,
    pub signer: String,
}

impl AlertLeg {
    pub fn involves_signer(&self) -> bool {
        !self.signer.is_empty() && (self.from_address == self.signer || self.to_address == self.signer)
    }

    pub fn unix_timestamp(&self) -> Result<i64, ReconstructError> {
        chrono::DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|dt| dt.timestamp())
            .map_err(|e| {
                ReconstructError::UnsupportedRecord(format!("timestamp '{}': {}", self.timestamp, e))
            })
    }
}

fn parse_amount(raw: &str) -> Result<Decimal, ReconstructError> {
    let amount = parse_decimal(raw)?;
    if amount.is_sign_negative() {
        return Err(ReconstructError::InvalidAmount(raw.to_string()));
    }
    Ok(amount)
}

impl MergeLeg for AlertLeg {
    /// The paid side and the received side, both attributed to the signer
    fn raw_legs(&self) -> Result<Vec<RawLeg>, ReconstructError> {
        let timestamp = self.unix_timestamp()?;
        let paid = RawLeg {
            tx_hash: self.tx_hash.clone(),
            actor: self.signer.clone(),
            mint: self.from_token.clone(),
            from_account: self.from_address.clone(),
            to_account: self.dex.clone(),
            amount: parse_amount(&self.from_token_amount)?,
            timestamp,
            source: self.dex.clone(),
        };
        let received = RawLeg {
            tx_hash: self.tx_hash.clone(),
            actor: self.signer.clone(),
            mint: self.to_token.clone(),
            from_account: self.dex.clone(),
            to_account: self.to_address.clone(),
            amount: parse_amount(&self.to_token_amount)?,
            timestamp,
            source: self.dex.clone(),
        };
        Ok(vec![paid, received])
    }
}

/// Reconciled record enriched with the alert context the event itself lacks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedAlert {
    #[serde(flatten)]
    pub event: CanonicalTradeEvent,
    pub chain: String,
    pub from_token_symbol: String,
    pub to_token_symbol: String,
    pub value: String,
    pub merged_records: usize,
}

impl MergedAlert {
    /// Context comes from the first record that involves the signer
    pub fn new(event: CanonicalTradeEvent, sources: &[AlertLeg]) -> Self {
        let anchor = sources.iter().find(|s| s.involves_signer()).or(sources.first());

        let symbol_of = |token: &str| {
            sources
                .iter()
                .find_map(|s| {
                    if s.from_token == token && !s.from_token_symbol.is_empty() {
                        Some(s.from_token_symbol.clone())
                    } else if s.to_token == token && !s.to_token_symbol.is_empty() {
                        Some(s.to_token_symbol.clone())
                    } else {
                        None
                    }
                })
                .unwrap_or_default()
        };

        Self {
            from_token_symbol: symbol_of(&event.from_token),
            to_token_symbol: symbol_of(&event.to_token),
            chain: anchor.map(|a| a.chain.clone()).unwrap_or_default(),
            value: anchor.map(|a| a.value.clone()).unwrap_or_default(),
            merged_records: sources.len(),
            event,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::EventKind;
    use std::str::FromStr;

    pub(crate) fn alert(hash: &str, from: &str, from_amt: &str, to: &str, to_amt: &str) -> AlertLeg {
        AlertLeg {
            dex: "uniswap".into(),
            chain: "eth".into(),
            tx_hash: hash.into(),
            timestamp: "2024-05-01T12:00:00Z".into(),
            from_address: "signer".into(),
            from_token: from.into(),
            from_token_symbol: format!("{}SYM", from),
            from_token_amount: from_amt.into(),
            to_address: "signer".into(),
            to_token: to.into(),
            to_token_symbol: format!("{}SYM", to),
            to_token_amount: to_amt.into(),
            value: "100".into(),
            signer: "signer".into(),
        }
    }

    #[test]
    fn test_deserialize_wire_names() {
        let json = r#"{"dex":"uniswap","chain":"eth","hash":"0xabc","timestamp":"2024-05-01T12:00:00Z",
            "from_address":"s","from_token_address":"WETH","from_token_symbol":"WETH","from_token_amount":"1.5",
            "to_address":"s","to_token_address":"PEPE","to_token_symbol":"PEPE","to_token_amount":"1000",
            "value":"3000","signer":"s"}"#;
        let leg: AlertLeg = serde_json::from_str(json).unwrap();
        assert_eq!(leg.tx_hash, "0xabc");
        assert_eq!(leg.from_token, "WETH");
        assert!(leg.involves_signer());
        assert_eq!(leg.unix_timestamp().unwrap(), 1_714_564_800);
    }

    #[test]
    fn test_raw_legs() {
        let legs = alert("0x1", "A", "2.5", "B", "7").raw_legs().unwrap();
        assert_eq!(legs.len(), 2);
        assert_eq!(legs[0].from_account, "signer");
        assert_eq!(legs[0].to_account, "uniswap");
        assert_eq!(legs[0].amount, Decimal::from_str("2.5").unwrap());
        assert_eq!(legs[1].to_account, "signer");
        assert_eq!(legs[1].timestamp, 1_714_564_800);
    }

    #[test]
    fn test_invalid_fields() {
        let mut bad = alert("0x1", "A", "abc", "B", "7");
        assert!(matches!(bad.raw_legs(), Err(ReconstructError::InvalidAmount(_))));
        bad.from_token_amount = "-1".into();
        assert!(bad.raw_legs().is_err());
        let mut bad_time = alert("0x1", "A", "1", "B", "7");
        bad_time.timestamp = "yesterday".into();
        assert!(bad_time.raw_legs().is_err());
    }

    #[test]
    fn test_merged_alert_context() {
        let sources = vec![alert("0x1", "A", "1", "M", "5"), alert("0x1", "M", "5", "B", "2")];
        let event = CanonicalTradeEvent {
            kind: EventKind::Swap,
            from_token: "A".into(),
            to_token: "B".into(),
            ..CanonicalTradeEvent::from_leg(&sources[0].raw_legs().unwrap()[0])
        };
        let merged = MergedAlert::new(event, &sources);
        assert_eq!(merged.from_token_symbol, "ASYM");
        assert_eq!(merged.to_token_symbol, "BSYM");
        assert_eq!(merged.chain, "eth");
        assert_eq!(merged.merged_records, 2);
    }
}
