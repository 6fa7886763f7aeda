pub mod job;
pub mod motion;
