use std::fmt;

/// Errors surfaced by an [`ObjectStore`](super::ObjectStore) backend.
#[derive(Debug)]
pub enum StorageError {
    /// The requested object does not exist.
    NotFound(String),
    /// The key would escape the store root or contains forbidden characters.
    InvalidKey(String),
    /// The backend is not configured or its client could not be constructed.
    Unavailable(String),
    /// The backend rejected the request or the network call failed.
    Backend(String),
    /// An I/O error occurred.
    Io(std::io::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(key) => write!(f, "object not found: {key}"),
            Self::InvalidKey(key) => write!(f, "invalid object key: {key}"),
            Self::Unavailable(msg) => write!(f, "storage unavailable: {msg}"),
            Self::Backend(msg) => write!(f, "storage backend error: {msg}"),
            Self::Io(err) => write!(f, "storage IO error: {err}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}
