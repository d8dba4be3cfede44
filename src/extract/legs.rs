//! Turns one provider record into `RawLeg`s
//!
//! Three record families are recognised, resolved once by [`LegExtractor::extract`]:
//! swap-annotated records, raw native/token transfer lists, and DCA program
//! instructions decoded positionally.

use super::dca::{decode_open_dca, DcaFill, DcaOpenOrder};
use crate::error::ReconstructError;
use crate::provider::record::{lamports_to_sol, NativeAmount, ProviderRecord, TokenBalanceChange, TokenTransfer};
use crate::types::{RawLeg, NATIVE_MINT};
use rust_decimal::Decimal;

/// Result of classifying a provider record
///
/// `dca` is set when the record carries a DCA program instruction that is not
/// an open; its events are flagged as DCA trades.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractedRecord {
    OpenDca(DcaOpenOrder),
    SwapAnnotated { legs: Vec<RawLeg>, dca: Option<DcaTrade> },
    RawTransfers { legs: Vec<RawLeg>, dca: Option<DcaTrade> },
}

/// A DCA instruction that is not a decodable open
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DcaTrade {
    /// Set for keeper fills with the 12-account layout
    pub fill: Option<DcaFill>,
}

impl DcaTrade {
    pub fn fill_user(&self) -> Option<&str> {
        self.fill.as_ref().map(|f| f.user.as_str())
    }
}

/// DCA program involvement detected in a record's outer instructions
#[derive(Debug, Clone, PartialEq)]
pub enum DcaInstruction {
    Open(DcaOpenOrder),
    Trade(DcaTrade),
}

/// Stateless extractor; the DCA program id is the only configuration it carries
#[derive(Debug, Clone)]
pub struct LegExtractor {
    dca_program_id: String,
}

impl LegExtractor {
    pub fn new(dca_program_id: impl Into<String>) -> Self {
        Self {
            dca_program_id: dca_program_id.into(),
        }
    }

    pub fn dca_program_id(&self) -> &str {
        &self.dca_program_id
    }

    /// Classify the record and extract its legs
    ///
    /// Fails with `UnsupportedRecord` when no family matches, letting the
    /// caller try the next fallback parser.
    pub fn extract(&self, record: &ProviderRecord) -> Result<ExtractedRecord, ReconstructError> {
        let dca = match self.find_dca_instruction(record) {
            Some(DcaInstruction::Open(order)) => return Ok(ExtractedRecord::OpenDca(order)),
            Some(DcaInstruction::Trade(trade)) => Some(trade),
            None => None,
        };

        if record.swap_event().is_some() {
            match self.extract_swap_legs(record) {
                Ok(legs) => return Ok(ExtractedRecord::SwapAnnotated { legs, dca }),
                Err(e) => log::debug!("Swap annotation of {} unusable: {}", record.signature, e),
            }
        }

        let legs = self.extract_transfer_legs(record)?;
        if legs.is_empty() {
            return Err(ReconstructError::UnsupportedRecord(format!(
                "{}: no swap annotation, transfers or DCA instruction",
                record.signature
            )));
        }
        Ok(ExtractedRecord::RawTransfers { legs, dca })
    }

    /// Looks for the DCA program among outer instructions.
    ///
    /// The first instruction that decodes as an open wins; otherwise the record
    /// is flagged as a DCA trade and the 12-account fill layout, if any, is kept.
    pub fn find_dca_instruction(&self, record: &ProviderRecord) -> Option<DcaInstruction> {
        let mut fill = None;
        let mut seen = false;

        for ix in record.instructions.iter().filter(|ix| ix.program_id == self.dca_program_id) {
            seen = true;
            match decode_open_dca(&ix.accounts, &ix.data) {
                Ok(order) => return Some(DcaInstruction::Open(order)),
                Err(e) => {
                    log::debug!("DCA instruction in {} is not an open: {}", record.signature, e);
                    if fill.is_none() {
                        fill = DcaFill::from_accounts(&ix.accounts);
                    }
                }
            }
        }

        seen.then_some(DcaInstruction::Trade(DcaTrade { fill }))
    }

    /// Legs described by the swap annotation: the input paid by the user, the output received.
    ///
    /// The venue has no account in the annotation, so the record's source label
    /// stands in as the counterparty. Each side must resolve to exactly one
    /// token entry, the native entry when no token entries exist, or, when the
    /// top level is empty, the single inner swap with one input and one output.
    pub fn extract_swap_legs(&self, record: &ProviderRecord) -> Result<Vec<RawLeg>, ReconstructError> {
        let swap = record.swap_event().ok_or_else(|| {
            ReconstructError::UnsupportedRecord(format!("{}: no swap annotation", record.signature))
        })?;

        if swap.token_inputs.is_empty() && swap.token_outputs.is_empty() {
            let inner = match swap.inner_swaps.as_slice() {
                [only] if only.token_inputs.len() == 1 && only.token_outputs.len() == 1 => only,
                _ => {
                    return Err(ReconstructError::UnsupportedRecord(format!(
                        "{}: swap annotation has no single resolvable inner swap",
                        record.signature
                    )));
                }
            };
            let input = &inner.token_inputs[0];
            let output = &inner.token_outputs[0];
            let actor = input.from_user_account.clone();
            return Ok(vec![
                self.transfer_leg(record, &actor, input)?,
                self.transfer_leg(record, &actor, output)?,
            ]);
        }

        let venue = record.source.clone();
        let (in_mint, in_user, in_amount) =
            resolve_side(&swap.token_inputs, swap.native_input.as_ref(), &record.signature, "input")?;
        let (out_mint, out_user, out_amount) =
            resolve_side(&swap.token_outputs, swap.native_output.as_ref(), &record.signature, "output")?;

        Ok(vec![
            RawLeg {
                tx_hash: record.signature.clone(),
                actor: in_user.clone(),
                mint: in_mint,
                from_account: in_user.clone(),
                to_account: venue.clone(),
                amount: in_amount,
                timestamp: record.timestamp,
                source: record.source.clone(),
            },
            RawLeg {
                tx_hash: record.signature.clone(),
                actor: in_user,
                mint: out_mint,
                from_account: venue,
                to_account: out_user,
                amount: out_amount,
                timestamp: record.timestamp,
                source: record.source.clone(),
            },
        ])
    }

    /// Native and token transfers as legs with the fee payer as actor.
    ///
    /// Zero-amount transfers are economically inert and skipped.
    pub fn extract_transfer_legs(&self, record: &ProviderRecord) -> Result<Vec<RawLeg>, ReconstructError> {
        let actor = record.fee_payer.clone();
        let mut legs = Vec::with_capacity(record.native_transfers.len() + record.token_transfers.len());

        for native in &record.native_transfers {
            let amount = lamports_to_sol(native.amount);
            if amount.is_zero() {
                continue;
            }
            legs.push(RawLeg {
                tx_hash: record.signature.clone(),
                actor: actor.clone(),
                mint: NATIVE_MINT.to_string(),
                from_account: native.from_user_account.clone(),
                to_account: native.to_user_account.clone(),
                amount,
                timestamp: record.timestamp,
                source: record.source.clone(),
            });
        }

        for transfer in &record.token_transfers {
            if transfer.token_amount.is_zero() {
                continue;
            }
            legs.push(self.transfer_leg(record, &actor, transfer)?);
        }

        Ok(legs)
    }

    fn transfer_leg(
        &self,
        record: &ProviderRecord,
        actor: &str,
        transfer: &TokenTransfer,
    ) -> Result<RawLeg, ReconstructError> {
        if transfer.token_amount.is_sign_negative() {
            return Err(ReconstructError::InvalidAmount(transfer.token_amount.to_string()));
        }
        Ok(RawLeg {
            tx_hash: record.signature.clone(),
            actor: actor.to_string(),
            mint: transfer.mint.clone(),
            from_account: transfer.from_user_account.clone(),
            to_account: transfer.to_user_account.clone(),
            amount: transfer.token_amount,
            timestamp: record.timestamp,
            source: record.source.clone(),
        })
    }
}

/// One side of the top-level annotation: `(mint, user account, amount)`
fn resolve_side(
    tokens: &[TokenBalanceChange],
    native: Option<&NativeAmount>,
    signature: &str,
    side: &str,
) -> Result<(String, String, Decimal), ReconstructError> {
    match tokens {
        [token] => {
            let amount = token.raw_token_amount.to_decimal()?.abs();
            Ok((token.mint.clone(), token.user_account.clone(), amount))
        }
        [] => {
            let native = native.filter(|n| !n.account.is_empty()).ok_or_else(|| {
                ReconstructError::UnsupportedRecord(format!("{}: swap {} side is empty", signature, side))
            })?;
            Ok((NATIVE_MINT.to_string(), native.account.clone(), native.to_decimal()?.abs()))
        }
        many => Err(ReconstructError::UnsupportedRecord(format!(
            "{}: swap {} side has {} token entries",
            signature,
            side,
            many.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_DCA_PROGRAM_ID;
    use crate::extract::dca::tests::{open_accounts, open_payload};
    use crate::provider::record::Instruction;
    use std::str::FromStr;

    fn extractor() -> LegExtractor {
        LegExtractor::new(DEFAULT_DCA_PROGRAM_ID)
    }

    fn swap_record() -> ProviderRecord {
        serde_json::from_value(serde_json::json!({
            "signature": "swapsig",
            "feePayer": "User1",
            "timestamp": 1700000000,
            "type": "SWAP",
            "source": "RAYDIUM",
            "events": {"swap": {
                "nativeInput": {"account": "User1", "amount": "1500000000"},
                "nativeOutput": null,
                "tokenInputs": [],
                "tokenOutputs": [{"mint": "MintB", "userAccount": "User1", "tokenAccount": "Ata1",
                    "rawTokenAmount": {"decimals": 6, "tokenAmount": "42000000"}}],
                "innerSwaps": []
            }}
        }))
        .unwrap()
    }

    #[test]
    fn test_swap_legs_native_input() {
        let legs = extractor().extract_swap_legs(&swap_record()).unwrap();
        assert_eq!(legs.len(), 2);
        assert_eq!(legs[0].mint, NATIVE_MINT);
        assert_eq!(legs[0].amount, Decimal::from_str("1.5").unwrap());
        assert_eq!(legs[0].from_account, "User1");
        assert_eq!(legs[1].mint, "MintB");
        assert_eq!(legs[1].amount, Decimal::from(42));
        assert_eq!(legs[1].to_account, "User1");
    }

    #[test]
    fn test_swap_legs_inner_swap() {
        let record: ProviderRecord = serde_json::from_value(serde_json::json!({
            "signature": "innersig",
            "feePayer": "Keeper",
            "events": {"swap": {
                "tokenInputs": [], "tokenOutputs": [],
                "innerSwaps": [{
                    "programInfo": {"source": "ORCA", "account": "x", "programName": "whirlpool", "instructionName": "swap"},
                    "tokenInputs": [{"fromUserAccount": "User9", "toUserAccount": "Pool", "mint": "MintA", "tokenAmount": 2.5}],
                    "tokenOutputs": [{"fromUserAccount": "Pool", "toUserAccount": "User9", "mint": "MintB", "tokenAmount": 7}]
                }]
            }}
        }))
        .unwrap();
        let legs = extractor().extract_swap_legs(&record).unwrap();
        assert_eq!(legs[0].actor, "User9");
        assert_eq!(legs[1].to_account, "User9");
    }

    #[test]
    fn test_swap_legs_ambiguous_side() {
        let mut record = swap_record();
        let swap = record.events.swap.as_mut().unwrap();
        let first = swap.token_outputs[0].clone();
        swap.token_outputs.push(first);
        assert!(matches!(
            extractor().extract_swap_legs(&record),
            Err(ReconstructError::UnsupportedRecord(_))
        ));
    }

    #[test]
    fn test_transfer_legs() {
        let record: ProviderRecord = serde_json::from_value(serde_json::json!({
            "signature": "xfer",
            "feePayer": "Payer",
            "type": "TRANSFER",
            "nativeTransfers": [
                {"fromUserAccount": "Payer", "toUserAccount": "B", "amount": 2000000000u64},
                {"fromUserAccount": "Payer", "toUserAccount": "C", "amount": 0}
            ],
            "tokenTransfers": [
                {"fromUserAccount": "Payer", "toUserAccount": "B", "mint": "MintA", "tokenAmount": 0.3}
            ]
        }))
        .unwrap();
        let extracted = extractor().extract(&record).unwrap();
        let legs = match &extracted {
            ExtractedRecord::RawTransfers { legs, dca: None } => legs,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(legs.len(), 2);
        assert_eq!(legs[0].amount, Decimal::from(2));
        assert!(legs.iter().all(|l| l.actor == "Payer"));
        assert_eq!(legs[1].amount, Decimal::from_str("0.3").unwrap());
    }

    #[test]
    fn test_extract_open_dca() {
        let record = ProviderRecord {
            signature: "dca".into(),
            instructions: vec![Instruction {
                program_id: DEFAULT_DCA_PROGRAM_ID.into(),
                accounts: open_accounts(),
                data: bs58::encode(open_payload(Some(1), Some(2), None)).into_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        match extractor().extract(&record).unwrap() {
            ExtractedRecord::OpenDca(order) => assert_eq!(order.max_out_amount, Some(2)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_dca_fill_detection() {
        let accounts: Vec<String> = (0..12).map(|i| format!("F{}", i)).collect();
        let record = ProviderRecord {
            instructions: vec![Instruction {
                program_id: DEFAULT_DCA_PROGRAM_ID.into(),
                accounts,
                data: "1".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        match extractor().find_dca_instruction(&record) {
            Some(DcaInstruction::Trade(trade)) => assert_eq!(trade.fill_user(), Some("F2")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_swap_annotated_carries_dca_trade() {
        let mut record = swap_record();
        record.instructions.push(Instruction {
            program_id: DEFAULT_DCA_PROGRAM_ID.into(),
            accounts: (0..12).map(|i| format!("F{}", i)).collect(),
            data: "1".into(),
            ..Default::default()
        });
        match extractor().extract(&record).unwrap() {
            ExtractedRecord::SwapAnnotated { legs, dca: Some(trade) } => {
                assert_eq!(legs.len(), 2);
                assert_eq!(trade.fill_user(), Some("F2"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            extractor().extract(&swap_record()).unwrap(),
            ExtractedRecord::SwapAnnotated { dca: None, .. }
        ));
    }

    #[test]
    fn test_unsupported_record() {
        let record = ProviderRecord {
            signature: "empty".into(),
            ..Default::default()
        };
        assert!(matches!(
            extractor().extract(&record),
            Err(ReconstructError::UnsupportedRecord(_))
        ));
    }
}
