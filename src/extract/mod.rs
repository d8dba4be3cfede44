pub mod dca;
pub mod legs;

pub use dca::{decode_open_dca, DcaFill, DcaOpenOrder};
pub use legs::{DcaInstruction, DcaTrade, ExtractedRecord, LegExtractor};
