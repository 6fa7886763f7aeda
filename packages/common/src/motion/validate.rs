use std::fmt;

use chrono::NaiveDateTime;
use thiserror::Error;

use super::frame::FRAME_SIZE;
use super::timestamp::{parse_file_time_token, parse_frame_timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePosition {
    First,
    Last,
}

impl fmt::Display for FramePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::First => "first",
            Self::Last => "last",
        })
    }
}

/// Reasons a motion file is rejected before any storage write.
///
/// Every variant maps to the `file_error` record status.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("filename '{0}' does not match YYYYMMDDHHMM.bin")]
    BadFilename(String),

    #[error("filename '{0}' does not encode a valid date and time")]
    BadFileTime(String),

    #[error("file is empty")]
    Empty,

    #[error("file size {0} is not a multiple of 924 bytes")]
    Misaligned(u64),

    #[error("{position} frame timestamp {value} is not a valid 17-digit date")]
    BadTimestamp { position: FramePosition, value: u64 },
}

/// A filename of the form `YYYYMMDDHHMM.bin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotionFileName {
    pub token: String,
    /// Nominal wall-clock time from the name, independent of frame timestamps.
    pub local_time: NaiveDateTime,
}

pub fn parse_motion_filename(name: &str) -> Result<MotionFileName, ValidationError> {
    let token = name
        .strip_suffix(".bin")
        .filter(|t| t.len() == 12 && t.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| ValidationError::BadFilename(name.to_string()))?;
    let local_time =
        parse_file_time_token(token).ok_or_else(|| ValidationError::BadFileTime(name.to_string()))?;
    Ok(MotionFileName {
        token: token.to_string(),
        local_time,
    })
}

/// Number of whole frames in a file of `size` bytes.
pub fn frame_count(size: u64) -> Result<u64, ValidationError> {
    if size == 0 {
        return Err(ValidationError::Empty);
    }
    if size % FRAME_SIZE as u64 != 0 {
        return Err(ValidationError::Misaligned(size));
    }
    Ok(size / FRAME_SIZE as u64)
}

pub fn check_boundary_timestamps(first: u64, last: u64) -> Result<(), ValidationError> {
    for (position, value) in [(FramePosition::First, first), (FramePosition::Last, last)] {
        if parse_frame_timestamp(value).is_none() {
            return Err(ValidationError::BadTimestamp { position, value });
        }
    }
    Ok(())
}

/// Filename without a trailing `.bin` (any case).
pub fn base_name(name: &str) -> &str {
    match name.len().checked_sub(4) {
        Some(cut) if name.is_char_boundary(cut) && name[cut..].eq_ignore_ascii_case(".bin") => {
            &name[..cut]
        }
        _ => name,
    }
}
