pub mod audit;
pub mod config;
#[cfg(feature = "sea-orm")]
pub mod entity;
pub mod job;
pub mod motion;
pub mod notify;
pub mod status;
pub mod storage;

pub use job::{JobEnvelope, JobReport, MotionJob};
pub use status::{JobState, MotionDataStatus};
