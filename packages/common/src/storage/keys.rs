use super::error::StorageError;

const MAX_SEGMENT_CHARS: usize = 100;

/// Make a device id safe to use as one key segment.
///
/// Path separators and NUL become `_`, `..` collapses to `_`, the result is
/// capped at 100 characters and an empty result falls back to `unknown`.
pub fn safe_device_segment(device_id: &str) -> String {
    let replaced: String = device_id
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            _ => c,
        })
        .collect::<String>()
        .replace("..", "_");
    let capped: String = replaced.chars().take(MAX_SEGMENT_CHARS).collect();
    if capped.is_empty() || capped == "." {
        "unknown".into()
    } else {
        capped
    }
}

/// Reduce a client-supplied filename to a safe basename.
pub fn safe_file_name(name: &str, fallback: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| match c {
            '\r' | '\n' | '"' | '\0' => '_',
            _ => c,
        })
        .collect::<String>()
        .replace("..", "_");
    let capped: String = cleaned.chars().take(255).collect();
    if capped.trim().is_empty() || capped == "." {
        fallback.into()
    } else {
        capped
    }
}

/// Reject keys that could escape a store root.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.contains('\0')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        Err(StorageError::InvalidKey(key.to_string()))
    } else {
        Ok(())
    }
}

/// Deterministic key layout under a configurable prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectKeys {
    prefix: String,
}

impl Default for ObjectKeys {
    fn default() -> Self {
        Self::new("motion-data/")
    }
}

impl ObjectKeys {
    pub fn new(prefix: &str) -> Self {
        let prefix = prefix
            .split('/')
            .filter(|seg| !seg.is_empty() && *seg != "." && *seg != "..")
            .collect::<Vec<_>>()
            .join("/");
        Self { prefix }
    }

    fn join(&self, rest: String) -> String {
        if self.prefix.is_empty() {
            rest
        } else {
            format!("{}/{rest}", self.prefix)
        }
    }

    /// `{prefix}/{device}/raw/{file}`
    pub fn raw_key(&self, device_id: &str, file_name: &str) -> String {
        self.join(format!(
            "{}/raw/{}",
            safe_device_segment(device_id),
            safe_file_name(file_name, "motion.bin")
        ))
    }

    /// `{prefix}/{device}/parsed/{base}.jsonl.gz`
    pub fn parsed_key(&self, device_id: &str, file_name: &str) -> String {
        let file = safe_file_name(file_name, "motion.bin");
        self.join(format!(
            "{}/parsed/{}.jsonl.gz",
            safe_device_segment(device_id),
            crate::motion::base_name(&file)
        ))
    }

    /// Where a write destined for `final_key` waits until its revision is
    /// committed: `{prefix}/{device}/staging/r{revision}/{raw|parsed}/{file}`.
    pub fn staging_key(&self, final_key: &str, revision: i32) -> String {
        let rest = final_key
            .strip_prefix(&self.prefix)
            .map(|k| k.trim_start_matches('/'))
            .unwrap_or(final_key);
        let (device, tail) = rest.split_once('/').unwrap_or(("unknown", rest));
        self.join(format!("{device}/staging/r{revision}/{tail}"))
    }
}
