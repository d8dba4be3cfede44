//! Program registry for labelling provider records by venue
//!
//! Scans outer and inner (CPI) instructions of a provider record against a
//! registry of known DEX / launchpad programs. The first match labels the
//! reconstructed event's `source`. Infrastructure programs (compute budget,
//! system, any token program) are never treated as venues.

use super::record::ProviderRecord;
use crate::config::ReconstructConfig;
use std::collections::HashMap;

const COMPUTE_BUDGET_PROGRAM: &str = "ComputeBudget111111111111111111111111111111";
const SYSTEM_PROGRAM: &str = "11111111111111111111111111111111";

const BUILTIN_PROGRAMS: [(&str, &str); 7] = [
    ("6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P", "PUMP_FUN"),
    ("pAMMBay6oceH9fJKBRHGP5D4bD4sWpmSwMn52FMfXEA", "PUMP_AMM"),
    ("LanMV9sAd7wArD4vJFi2qDdfnVhFxYSUg6eADduJ3uj", "BONK_SWAP"),
    ("MoonCVVNZFSYkqNXP6bxHLPL6QQJiMagDL3qcqUQTrG", "MOONSHOT"),
    ("DCA265Vj8a9CEuX1eb1LWRnDT7uK6q1xMipnNyatn23M", "JUPITER_DCA"),
    ("JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4", "JUPITER"),
    ("675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8", "RAYDIUM"),
];

/// Result when a known program is found in a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramMatch {
    pub program_id: String,
    pub label: String,
    pub path: InstructionPath,
}

/// Where the program match occurred in the transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstructionPath {
    Outer { index: usize },
    Inner { outer_index: usize, inner_index: usize },
}

#[derive(Debug, Clone)]
pub struct ProgramRegistry {
    labels: HashMap<String, String>,
}

impl ProgramRegistry {
    pub fn new() -> Self {
        let labels = BUILTIN_PROGRAMS
            .iter()
            .map(|(id, label)| (id.to_string(), label.to_string()))
            .collect();
        Self { labels }
    }

    /// Built-in registry extended with `DEX_PROGRAMS` entries
    pub fn from_config(config: &ReconstructConfig) -> Self {
        let mut registry = Self::new();
        for (id, label) in &config.dex_programs {
            registry.register(id, label);
        }
        log::info!("📋 ProgramRegistry initialized with {} programs", registry.program_count());
        registry
    }

    pub fn register(&mut self, program_id: &str, label: &str) {
        self.labels.insert(program_id.to_string(), label.to_string());
    }

    pub fn label(&self, program_id: &str) -> Option<&str> {
        self.labels.get(program_id).map(String::as_str)
    }

    pub fn program_count(&self) -> usize {
        self.labels.len()
    }

    fn is_infrastructure(program_id: &str) -> bool {
        program_id == COMPUTE_BUDGET_PROGRAM
            || program_id == SYSTEM_PROGRAM
            || program_id.contains("Token")
    }

    /// First known venue in instruction order (outer before its inner instructions)
    pub fn scan(&self, record: &ProviderRecord) -> Option<ProgramMatch> {
        record
            .all_instructions()
            .filter(|ix| !Self::is_infrastructure(ix.program_id))
            .find_map(|ix| {
                let label = self.labels.get(ix.program_id)?;
                let path = match ix.inner_index {
                    None => InstructionPath::Outer { index: ix.outer_index },
                    Some(inner_index) => InstructionPath::Inner {
                        outer_index: ix.outer_index,
                        inner_index,
                    },
                };
                Some(ProgramMatch {
                    program_id: ix.program_id.to_string(),
                    label: label.clone(),
                    path,
                })
            })
    }
}

impl Default for ProgramRegistry {
    fn default() -> Self {
        Self::new()
    }
}
