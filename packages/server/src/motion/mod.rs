//! Motion-data operations behind the HTTP handlers.

pub mod export;
pub mod ingest;
pub mod preview;
pub mod query;
