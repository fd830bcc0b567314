//! Response ingestion: parse, fall back, merge, persist.

pub mod fallback;
pub mod groups;
pub mod merge;
pub mod parser;
pub mod pipeline;

pub use groups::{BranchPlan, TaskSpec};
pub use parser::{ParseOutcome, ParseStrategy, parse_response};
pub use pipeline::{IngestReport, IngestRequest, IngestSource, IngestState, IngestionPipeline};
