#[cfg(feature = "sea-orm")]
use sea_orm::prelude::StringLen;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Processing state of one stored motion file.
///
/// When the `sea-orm` feature is enabled, this enum can be used directly in SeaORM entities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "snake_case")]
pub enum MotionDataStatus {
    /// Registered, waiting for the worker.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "uploading"))]
    Uploading,
    /// The worker is validating and transcoding.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "parsing"))]
    Parsing,
    /// Raw bytes were stored but transcoding failed.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "parse_failed"))]
    ParseFailed,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "completed"))]
    Completed,
    /// Filename, size or timestamps are invalid. Needs a new upload.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "file_error"))]
    FileError,
    /// Storage or infrastructure failure. Can be retried.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "processing_failed"))]
    ProcessingFailed,
}

impl MotionDataStatus {
    pub const ALL: &'static [MotionDataStatus] = &[
        Self::Uploading,
        Self::Parsing,
        Self::ParseFailed,
        Self::Completed,
        Self::FileError,
        Self::ProcessingFailed,
    ];

    /// Whether the worker has nothing more to do for this record.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Uploading | Self::Parsing)
    }

    /// Whether an explicit retry may re-run processing from stored raw bytes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ProcessingFailed | Self::ParseFailed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Parsing => "parsing",
            Self::ParseFailed => "parse_failed",
            Self::Completed => "completed",
            Self::FileError => "file_error",
            Self::ProcessingFailed => "processing_failed",
        }
    }
}

impl fmt::Display for MotionDataStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for MotionDataStatus {
    fn default() -> Self {
        Self::Uploading
    }
}

/// Lifecycle of a queued job: waiting → active → completed | failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "waiting"))]
    Waiting,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "active"))]
    Active,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "completed"))]
    Completed,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "failed"))]
    Failed,
}

impl JobState {
    pub const ALL: &'static [JobState] = &[Self::Waiting, Self::Active, Self::Completed, Self::Failed];

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error when parsing an invalid status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError {
    invalid: String,
    valid: Vec<&'static str>,
}

impl fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid status '{}'. Valid values: {}",
            self.invalid,
            self.valid.join(", ")
        )
    }
}

impl std::error::Error for ParseStatusError {}

impl FromStr for MotionDataStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|v| v.as_str() == s)
            .copied()
            .ok_or_else(|| ParseStatusError {
                invalid: s.to_string(),
                valid: Self::ALL.iter().map(|v| v.as_str()).collect(),
            })
    }
}

impl FromStr for JobState {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|v| v.as_str() == s)
            .copied()
            .ok_or_else(|| ParseStatusError {
                invalid: s.to_string(),
                valid: Self::ALL.iter().map(|v| v.as_str()).collect(),
            })
    }
}
