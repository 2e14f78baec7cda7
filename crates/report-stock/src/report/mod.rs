//! Final report documents

pub mod markdown;

pub use markdown::{MarkdownAssembler, NARRATIVE_FALLBACK, forecast_table};
