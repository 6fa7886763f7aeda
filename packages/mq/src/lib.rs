pub mod error;
pub mod memory;
pub mod queue;
pub mod redis;

pub use error::MqError;
pub use memory::MemoryQueue;
pub use queue::Mq;
pub use redis::RedisQueue;
