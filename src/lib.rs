//! Solana trade reconstruction and cross-leg merge engine
//!
//! Provider records go through [`CanonicalEventBuilder`], which extracts raw
//! legs, collapses fan-in/fan-out transfers and nets swaps into
//! [`CanonicalTradeEvent`]s. Alert legs that arrive separately are buffered
//! per transaction hash in a [`MergeWindow`] and reconciled on a periodic
//! drain.

pub mod builder;
pub mod config;
pub mod error;
pub mod extract;
pub mod gate;
pub mod merge;
pub mod provider;
pub mod reconcile;
pub mod sink;
pub mod types;

pub use builder::CanonicalEventBuilder;
pub use config::{ConfigError, ReconstructConfig};
pub use error::ReconstructError;
pub use extract::LegExtractor;
pub use gate::{AddressRateLimiter, PermissionGate};
pub use merge::{AlertLeg, MergeEmission, MergeWindow};
pub use provider::ProviderRecord;
pub use reconcile::{FanGroupCollapser, NettingReconciler};
pub use sink::{EventSink, SinkError};
pub use types::{CanonicalTradeEvent, EventKind, RawLeg, TradeDirection, NATIVE_MINT};
