//! Positional decoder for the recurring-order (DCA) open instruction
//!
//! Layout (little-endian, base58 encoded in the provider payload):
//!
//! | offset | size | field                 |
//! |--------|------|-----------------------|
//! | 0      | 8    | instruction prefix    |
//! | 8      | 8    | application index     |
//! | 16     | 8    | in amount             |
//! | 24     | 8    | in amount per cycle   |
//! | 32     | 8    | cycle frequency (i64) |
//! | 40     | 1+8? | min out amount        |
//! | ..     | 1+8? | max out amount        |
//! | ..     | 1+8? | start at (i64)        |
//!
//! Each optional field is a presence flag byte (0 = absent) followed by the
//! value when present.

use crate::error::ReconstructError;
use serde::{Deserialize, Serialize};

/// Account arity of the open instruction
pub const OPEN_DCA_ACCOUNTS: usize = 13;

/// Account arity of a fill (keeper-executed swap) instruction
pub const FILL_DCA_ACCOUNTS: usize = 12;

/// Fixed fields plus the three presence flags
pub const MIN_OPEN_DCA_LEN: usize = 5 * 8 + 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DcaOpenOrder {
    pub dca_address: String,
    pub user: String,
    pub payer: String,
    pub input_mint: String,
    pub output_mint: String,
    pub user_ata: String,
    pub in_ata: String,
    pub out_ata: String,

    pub prefix_code: u64,
    pub app_idx: u64,
    pub in_amount: u64,
    pub in_amount_per_cycle: u64,
    pub cycle_frequency: i64,
    pub min_out_amount: Option<u64>,
    pub max_out_amount: Option<u64>,
    pub start_at: Option<i64>,
}

/// The order owner on a keeper-executed DCA fill
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DcaFill {
    pub user: String,
}

impl DcaFill {
    pub fn from_accounts(accounts: &[String]) -> Option<Self> {
        (accounts.len() == FILL_DCA_ACCOUNTS).then(|| Self {
            user: accounts[2].clone(),
        })
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn take<const N: usize>(&mut self, field: &str) -> Result<[u8; N], ReconstructError> {
        let end = self.offset + N;
        let bytes = self.data.get(self.offset..end).ok_or_else(|| {
            ReconstructError::MalformedInstruction(format!(
                "truncated at {} (offset {}, len {})",
                field,
                self.offset,
                self.data.len()
            ))
        })?;
        self.offset = end;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn u64(&mut self, field: &str) -> Result<u64, ReconstructError> {
        Ok(u64::from_le_bytes(self.take::<8>(field)?))
    }

    fn i64(&mut self, field: &str) -> Result<i64, ReconstructError> {
        Ok(i64::from_le_bytes(self.take::<8>(field)?))
    }

    fn flag(&mut self, field: &str) -> Result<bool, ReconstructError> {
        Ok(self.take::<1>(field)?[0] != 0)
    }

    fn optional_u64(&mut self, field: &str) -> Result<Option<u64>, ReconstructError> {
        if self.flag(field)? {
            self.u64(field).map(Some)
        } else {
            Ok(None)
        }
    }

    fn optional_i64(&mut self, field: &str) -> Result<Option<i64>, ReconstructError> {
        if self.flag(field)? {
            self.i64(field).map(Some)
        } else {
            Ok(None)
        }
    }
}

/// Decode an open instruction from its account list and base58 data
pub fn decode_open_dca(accounts: &[String], data: &str) -> Result<DcaOpenOrder, ReconstructError> {
    if accounts.len() != OPEN_DCA_ACCOUNTS {
        return Err(ReconstructError::MalformedInstruction(format!(
            "expected {} accounts, got {}",
            OPEN_DCA_ACCOUNTS,
            accounts.len()
        )));
    }

    let bytes = bs58::decode(data).into_vec()?;
    decode_open_dca_bytes(accounts, &bytes)
}

pub fn decode_open_dca_bytes(accounts: &[String], bytes: &[u8]) -> Result<DcaOpenOrder, ReconstructError> {
    if bytes.len() < MIN_OPEN_DCA_LEN {
        return Err(ReconstructError::MalformedInstruction(format!(
            "data length {} below minimum {}",
            bytes.len(),
            MIN_OPEN_DCA_LEN
        )));
    }

    let mut cursor = Cursor { data: bytes, offset: 0 };
    let prefix_code = cursor.u64("prefix")?;
    let app_idx = cursor.u64("app_idx")?;
    let in_amount = cursor.u64("in_amount")?;
    let in_amount_per_cycle = cursor.u64("in_amount_per_cycle")?;
    let cycle_frequency = cursor.i64("cycle_frequency")?;
    let min_out_amount = cursor.optional_u64("min_out_amount")?;
    let max_out_amount = cursor.optional_u64("max_out_amount")?;
    let start_at = cursor.optional_i64("start_at")?;

    log::debug!(
        "🔁 Decoded DCA open: prefix={} in_amount={} per_cycle={} freq={}s",
        hex::encode(prefix_code.to_le_bytes()),
        in_amount,
        in_amount_per_cycle,
        cycle_frequency
    );

    Ok(DcaOpenOrder {
        dca_address: accounts[0].clone(),
        user: accounts[1].clone(),
        payer: accounts[2].clone(),
        input_mint: accounts[3].clone(),
        output_mint: accounts[4].clone(),
        user_ata: accounts[5].clone(),
        in_ata: accounts[6].clone(),
        out_ata: accounts[7].clone(),
        prefix_code,
        app_idx,
        in_amount,
        in_amount_per_cycle,
        cycle_frequency,
        min_out_amount,
        max_out_amount,
        start_at,
    })
}
