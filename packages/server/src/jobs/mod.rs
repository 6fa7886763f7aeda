mod pruner;
mod service;

pub use pruner::run_job_pruner;
pub use service::{DEFAULT_LIST_LIMIT, JobService, MAX_LIST_LIMIT, PruneSummary, archive_of};
