pub mod archive;
pub mod config;
pub mod context;
pub mod csv;
pub mod database;
pub mod download;
pub mod error;
pub mod jobs;
pub mod processor;
pub mod revision;
pub mod transcode;
pub mod upload;

#[cfg(test)]
mod testing;

pub use config::{WorkerAppConfig, WorkerConfig};
pub use context::WorkerContext;
pub use error::{Result, WorkerError};
pub use processor::{RetryPolicy, handle_envelope, run_worker};
