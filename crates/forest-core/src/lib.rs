//! Forest core: turning generative-model output into persisted HTA trees.
//!
//! - [`intelligence`]: the provider seam for the external text service.
//! - [`ingest`]: response parsing, fallback synthesis, tree merging, and the
//!   ingestion pipeline that ties them to the document store.

pub mod ingest;
pub mod intelligence;
