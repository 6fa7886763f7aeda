mod error;
mod hash;
mod keys;
mod kind;
mod registry;
mod traits;

pub mod filesystem;
#[cfg(feature = "object-storage")]
pub mod s3;

pub use error::StorageError;
pub use filesystem::LocalObjectStore;
pub use hash::ContentHash;
pub use keys::{ObjectKeys, safe_device_segment, safe_file_name, validate_key};
pub use kind::StorageKind;
pub use registry::StorageRegistry;
pub use traits::{BoxReader, ByteRange, ObjectStore, PutOutcome};
