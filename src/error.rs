//! Error taxonomy for extraction and reconciliation

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconstructError {
    /// Instruction payload could not be decoded positionally
    MalformedInstruction(String),
    /// No extraction path produced a valid event for the record
    NoReconstructableEvent(String),
    /// Record shape matches no supported family
    UnsupportedRecord(String),
    EmptyLegSet,
    UnbalancedLegs { tx_hash: String, nonzero_mints: usize },
    ActorMismatch { expected: String, found: String },
    TxHashMismatch { expected: String, found: String },
    InvalidAmount(String),
    AmountOverflow { mint: String },
}

impl ReconstructError {
    /// Netting failures degrade to fallback emission instead of dropping data
    pub fn is_netting_failure(&self) -> bool {
        matches!(
            self,
            ReconstructError::EmptyLegSet
                | ReconstructError::UnbalancedLegs { .. }
                | ReconstructError::ActorMismatch { .. }
                | ReconstructError::TxHashMismatch { .. }
                | ReconstructError::AmountOverflow { .. }
        )
    }
}

impl std::fmt::Display for ReconstructError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconstructError::MalformedInstruction(msg) => {
                write!(f, "Malformed instruction: {}", msg)
            }
            ReconstructError::NoReconstructableEvent(tx) => {
                write!(f, "No reconstructable event in transaction {}", tx)
            }
            ReconstructError::UnsupportedRecord(msg) => write!(f, "Unsupported record: {}", msg),
            ReconstructError::EmptyLegSet => write!(f, "Empty leg set"),
            ReconstructError::UnbalancedLegs {
                tx_hash,
                nonzero_mints,
            } => write!(
                f,
                "Unbalanced legs in {}: {} mints with nonzero net (expected 2)",
                tx_hash, nonzero_mints
            ),
            ReconstructError::ActorMismatch { expected, found } => {
                write!(f, "Actor mismatch: expected {}, found {}", expected, found)
            }
            ReconstructError::TxHashMismatch { expected, found } => {
                write!(f, "Tx hash mismatch: expected {}, found {}", expected, found)
            }
            ReconstructError::InvalidAmount(raw) => write!(f, "Invalid amount: {}", raw),
            ReconstructError::AmountOverflow { mint } => {
                write!(f, "Amount overflow while netting mint {}", mint)
            }
        }
    }
}

impl std::error::Error for ReconstructError {}

impl From<rust_decimal::Error> for ReconstructError {
    fn from(err: rust_decimal::Error) -> Self {
        ReconstructError::InvalidAmount(err.to_string())
    }
}

impl From<bs58::decode::Error> for ReconstructError {
    fn from(err: bs58::decode::Error) -> Self {
        ReconstructError::MalformedInstruction(format!("base58: {}", err))
    }
}
