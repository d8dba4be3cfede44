pub mod record;
pub mod registry;

pub use record::ProviderRecord;
pub use registry::{InstructionPath, ProgramMatch, ProgramRegistry};
