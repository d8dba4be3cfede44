//! Serde model of the data provider's enhanced-transaction JSON
//!
//! Field names follow the provider's camelCase payload. Lists the provider
//! sends as `null` decode as empty, and amounts are converted to `Decimal`
//! without passing through binary floating-point arithmetic.

use crate::error::ReconstructError;
use crate::types::NATIVE_DECIMALS;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts a JSON number or numeric string and keeps its decimal text
fn decimal_from_json<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let text = match &value {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => return Ok(Decimal::ZERO),
        other => {
            return Err(serde::de::Error::custom(format!(
                "expected numeric amount, got {}",
                other
            )))
        }
    };
    parse_decimal(&text).map_err(serde::de::Error::custom)
}

/// Parse decimal text, accepting scientific notation (`1e-7`)
pub fn parse_decimal(text: &str) -> Result<Decimal, ReconstructError> {
    let trimmed = text.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| ReconstructError::InvalidAmount(text.to_string()))
}

/// Scale an integer base-unit amount by `decimals`
pub fn scale_raw_amount(raw: &str, decimals: u32) -> Result<Decimal, ReconstructError> {
    let units: i128 = raw
        .trim()
        .parse()
        .map_err(|_| ReconstructError::InvalidAmount(raw.to_string()))?;
    Decimal::try_from_i128_with_scale(units, decimals)
        .map_err(|_| ReconstructError::InvalidAmount(raw.to_string()))
}

pub fn lamports_to_sol(lamports: u64) -> Decimal {
    Decimal::from_i128_with_scale(lamports as i128, NATIVE_DECIMALS)
}

/// One transaction as reported by the data provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderRecord {
    #[serde(deserialize_with = "null_as_default")]
    pub account_data: Vec<AccountData>,
    #[serde(deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(deserialize_with = "null_as_default")]
    pub events: EventData,
    pub fee: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub fee_payer: String,
    #[serde(deserialize_with = "null_as_default")]
    pub instructions: Vec<Instruction>,
    #[serde(deserialize_with = "null_as_default")]
    pub native_transfers: Vec<NativeTransfer>,
    pub signature: String,
    pub slot: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub source: String,
    pub timestamp: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub token_transfers: Vec<TokenTransfer>,
    pub transaction_error: Option<serde_json::Value>,
    #[serde(rename = "type", deserialize_with = "null_as_default")]
    pub kind: String,
}

impl ProviderRecord {
    pub fn is_swap_typed(&self) -> bool {
        self.kind.eq_ignore_ascii_case("SWAP")
    }

    pub fn is_create_typed(&self) -> bool {
        self.kind.eq_ignore_ascii_case("CREATE")
    }

    pub fn failed(&self) -> bool {
        matches!(&self.transaction_error, Some(v) if !v.is_null())
    }

    pub fn swap_event(&self) -> Option<&SwapEvent> {
        self.events.swap.as_ref()
    }

    /// Every instruction, each outer one followed by its inner instructions
    pub fn all_instructions(&self) -> impl Iterator<Item = InstructionRef<'_>> + '_ {
        self.instructions.iter().enumerate().flat_map(|(outer_index, ix)| {
            std::iter::once(InstructionRef {
                outer_index,
                inner_index: None,
                program_id: &ix.program_id,
                accounts: &ix.accounts,
                data: &ix.data,
            })
            .chain(ix.inner_instructions.iter().enumerate().map(move |(inner_idx, inner)| {
                InstructionRef {
                    outer_index,
                    inner_index: Some(inner_idx),
                    program_id: &inner.program_id,
                    accounts: &inner.accounts,
                    data: &inner.data,
                }
            }))
        })
    }

    /// Net balance change of `account` in `mint` as declared by the provider.
    ///
    /// Native changes include the fee for the fee payer, so the fee is added
    /// back to isolate transfer value.
    pub fn declared_change(&self, account: &str, mint: &str) -> Option<Decimal> {
        if mint == crate::types::NATIVE_MINT {
            let entry = self.account_data.iter().find(|a| a.account == account)?;
            let mut lamports = entry.native_balance_change as i128;
            if account == self.fee_payer {
                lamports += self.fee as i128;
            }
            return Decimal::try_from_i128_with_scale(lamports, NATIVE_DECIMALS).ok();
        }

        let mut total = Decimal::ZERO;
        let mut found = false;
        for change in self
            .account_data
            .iter()
            .flat_map(|a| a.token_balance_changes.iter())
            .filter(|c| c.user_account == account && c.mint == mint)
        {
            total = total.checked_add(change.raw_token_amount.to_decimal().ok()?)?;
            found = true;
        }
        found.then_some(total)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountData {
    pub account: String,
    pub native_balance_change: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub token_balance_changes: Vec<TokenBalanceChange>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenBalanceChange {
    pub mint: String,
    pub raw_token_amount: RawTokenAmount,
    pub token_account: String,
    pub user_account: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawTokenAmount {
    pub decimals: u32,
    /// Signed integer base units as text
    pub token_amount: String,
}

impl RawTokenAmount {
    pub fn to_decimal(&self) -> Result<Decimal, ReconstructError> {
        scale_raw_amount(&self.token_amount, self.decimals)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NativeTransfer {
    pub from_user_account: String,
    pub to_user_account: String,
    /// Lamports
    pub amount: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenTransfer {
    pub from_token_account: String,
    pub from_user_account: String,
    pub mint: String,
    pub to_token_account: String,
    pub to_user_account: String,
    /// UI amount, already scaled by the mint's decimals
    #[serde(deserialize_with = "decimal_from_json")]
    pub token_amount: Decimal,
    pub token_standard: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Instruction {
    pub accounts: Vec<String>,
    pub data: String,
    #[serde(deserialize_with = "null_as_default")]
    pub inner_instructions: Vec<InnerInstruction>,
    pub program_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InnerInstruction {
    pub accounts: Vec<String>,
    pub data: String,
    pub program_id: String,
}

/// Borrowed view of an outer or inner instruction
#[derive(Debug, Clone, Copy)]
pub struct InstructionRef<'a> {
    pub outer_index: usize,
    pub inner_index: Option<usize>,
    pub program_id: &'a str,
    pub accounts: &'a [String],
    pub data: &'a str,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EventData {
    pub swap: Option<SwapEvent>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeAmount {
    pub account: String,
    /// Lamports as text
    pub amount: String,
}

impl NativeAmount {
    pub fn to_decimal(&self) -> Result<Decimal, ReconstructError> {
        scale_raw_amount(&self.amount, NATIVE_DECIMALS)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SwapEvent {
    pub native_input: Option<NativeAmount>,
    pub native_output: Option<NativeAmount>,
    #[serde(deserialize_with = "null_as_default")]
    pub token_inputs: Vec<TokenBalanceChange>,
    #[serde(deserialize_with = "null_as_default")]
    pub token_outputs: Vec<TokenBalanceChange>,
    #[serde(deserialize_with = "null_as_default")]
    pub inner_swaps: Vec<InnerSwap>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InnerSwap {
    pub program_info: ProgramInfo,
    #[serde(deserialize_with = "null_as_default")]
    pub token_inputs: Vec<TokenTransfer>,
    #[serde(deserialize_with = "null_as_default")]
    pub token_outputs: Vec<TokenTransfer>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgramInfo {
    pub account: String,
    pub instruction_name: String,
    pub program_name: String,
    pub source: String,
}
