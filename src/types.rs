//! Core value types shared by extraction, reconciliation and merging
//!
//! `RawLeg` is one observed value movement; `CanonicalTradeEvent` is the
//! reconstructed economic fact handed to downstream collaborators.

use crate::extract::dca::DcaOpenOrder;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Mint address used for the native asset (wrapped SOL)
pub const NATIVE_MINT: &str = "So11111111111111111111111111111111111111112";

/// Decimals of the native asset (lamports per SOL = 10^9)
pub const NATIVE_DECIMALS: u32 = 9;

/// One observed single-direction value movement within a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLeg {
    pub tx_hash: String,
    /// Fee-paying / signing account
    pub actor: String,
    /// Native-asset sentinel or token mint address
    pub mint: String,
    pub from_account: String,
    pub to_account: String,
    /// Already scaled by the mint's decimals, never negative
    pub amount: Decimal,
    pub timestamp: i64,
    /// Originating program or venue label
    #[serde(default)]
    pub source: String,
}

impl RawLeg {
    pub fn is_native(&self) -> bool {
        self.mint == NATIVE_MINT
    }

    pub fn is_self_transfer(&self) -> bool {
        self.from_account == self.to_account
    }

    /// The account on the other side of the actor, if the actor is involved
    pub fn counterparty(&self) -> Option<&str> {
        if self.from_account == self.actor && self.to_account != self.actor {
            Some(&self.to_account)
        } else if self.to_account == self.actor && self.from_account != self.actor {
            Some(&self.from_account)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Swap,
    Transfer,
    Create,
    OpenDca,
}

impl From<EventKind> for &'static str {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Swap => "SWAP",
            EventKind::Transfer => "TRANSFER",
            EventKind::Create => "CREATE",
            EventKind::OpenDca => "OPEN_DCA",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s: &'static str = (*self).into();
        write!(f, "{}", s)
    }
}

/// Trade direction from the actor's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeDirection {
    Buy,
    Sell,
    Send,
    Receive,
    Create,
    OpenDca,
}

impl From<TradeDirection> for &'static str {
    fn from(direction: TradeDirection) -> Self {
        match direction {
            TradeDirection::Buy => "BUY",
            TradeDirection::Sell => "SELL",
            TradeDirection::Send => "SEND",
            TradeDirection::Receive => "RECEIVE",
            TradeDirection::Create => "CREATE",
            TradeDirection::OpenDca => "OPEN_DCA",
        }
    }
}

fn default_wallet_count() -> usize {
    1
}

/// The reconstructed economic fact for one transaction (or one partition of it)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalTradeEvent {
    pub tx_hash: String,
    pub source: String,
    pub kind: EventKind,
    pub timestamp: i64,

    pub from_token: String,
    /// `None` on the counterpart side of a fan-in aggregate
    pub from_account: Option<String>,
    pub from_amount: Decimal,

    pub to_token: String,
    /// `None` on the counterpart side of a fan-out aggregate
    pub to_account: Option<String>,
    pub to_amount: Decimal,

    pub actor_account: Option<String>,

    #[serde(default = "default_wallet_count")]
    pub wallet_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_legs: Vec<RawLeg>,

    #[serde(default)]
    pub is_dca_trade: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dca_open: Option<DcaOpenOrder>,
}

impl CanonicalTradeEvent {
    /// Promote a single leg to a TRANSFER event without netting
    pub fn from_leg(leg: &RawLeg) -> Self {
        Self {
            tx_hash: leg.tx_hash.clone(),
            source: leg.source.clone(),
            kind: EventKind::Transfer,
            timestamp: leg.timestamp,
            from_token: leg.mint.clone(),
            from_account: Some(leg.from_account.clone()),
            from_amount: leg.amount,
            to_token: leg.mint.clone(),
            to_account: Some(leg.to_account.clone()),
            to_amount: leg.amount,
            actor_account: (!leg.actor.is_empty()).then(|| leg.actor.clone()),
            wallet_count: 1,
            child_legs: Vec::new(),
            is_dca_trade: false,
            dca_open: None,
        }
    }

    /// Direction from the actor's perspective.
    ///
    /// A swap paying the native asset is a BUY, one receiving it is a SELL.
    /// Token-to-token swaps are reported as BUY of the received token.
    pub fn direction(&self) -> TradeDirection {
        match self.kind {
            EventKind::Create => TradeDirection::Create,
            EventKind::OpenDca => TradeDirection::OpenDca,
            EventKind::Swap => {
                if self.to_token == NATIVE_MINT {
                    TradeDirection::Sell
                } else {
                    TradeDirection::Buy
                }
            }
            EventKind::Transfer => {
                let actor = self.actor_account.as_deref();
                if actor.is_some() && self.to_account.as_deref() == actor {
                    TradeDirection::Receive
                } else {
                    TradeDirection::Send
                }
            }
        }
    }

    pub fn is_aggregate(&self) -> bool {
        !self.child_legs.is_empty()
    }

    /// UTC calendar date of the event, `None` for out-of-range timestamps
    pub fn date(&self) -> Option<chrono::NaiveDate> {
        chrono::DateTime::from_timestamp(self.timestamp, 0).map(|dt| dt.date_naive())
    }
}
