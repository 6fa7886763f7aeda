use common::motion::{DeviceClock, FRAME_SIZE, Frame, FrameError, decode_frame};
use common::storage::{ByteRange, ObjectStore, StorageError};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::AppError;

pub const MAX_PREVIEW_FRAMES: u64 = 5000;
pub const DEFAULT_PREVIEW_FRAMES: u64 = 100;

/// Byte range of frames `[offset, min(total, offset + limit))`.
///
/// A window starting past the end is empty rather than an error.
pub fn frame_window(total_frames: u64, offset: u64, limit: u64) -> ByteRange {
    let first = offset.min(total_frames);
    let end = offset.saturating_add(limit).min(total_frames);
    ByteRange::new(first * FRAME_SIZE as u64, end * FRAME_SIZE as u64)
}

#[derive(Debug, Clone, PartialEq, Serialize, utoipa::ToSchema)]
pub struct PreviewPage {
    pub offset: u64,
    pub limit: u64,
    pub total_frames: u64,
    /// Frame objects with an added `time_ms` when the timestamp is valid.
    #[schema(value_type = Vec<Object>)]
    pub frames: Vec<Map<String, Value>>,
}

#[derive(Debug)]
pub enum PreviewError {
    Storage(StorageError),
    Frame(FrameError),
}

impl From<StorageError> for PreviewError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<FrameError> for PreviewError {
    fn from(e: FrameError) -> Self {
        Self::Frame(e)
    }
}

impl From<PreviewError> for AppError {
    fn from(e: PreviewError) -> Self {
        match e {
            PreviewError::Storage(e) => e.into(),
            PreviewError::Frame(e) => AppError::Internal(format!("Corrupt raw frame: {e}")),
        }
    }
}

/// Decode one page of raw frames with a single positioned read.
pub async fn preview_frames(
    store: &dyn ObjectStore,
    raw_key: &str,
    total_frames: u64,
    offset: u64,
    limit: u64,
    clock: &DeviceClock,
) -> Result<PreviewPage, PreviewError> {
    let limit = limit.min(MAX_PREVIEW_FRAMES);
    let range = frame_window(total_frames, offset, limit);

    let frames = if range.is_empty() {
        Vec::new()
    } else {
        let buf = store.get_range(raw_key, range).await?;
        (0..buf.len() / FRAME_SIZE)
            .map(|i| decode_frame(&buf, i * FRAME_SIZE).map(|f| render(&f, clock)))
            .collect::<Result<Vec<_>, _>>()?
    };

    Ok(PreviewPage {
        offset,
        limit,
        total_frames,
        frames,
    })
}

fn render(frame: &Frame, clock: &DeviceClock) -> Map<String, Value> {
    let mut obj = frame.to_json();
    if let Some(ms) = clock.frame_epoch_ms(frame.timestamp) {
        obj.insert("time_ms".into(), Value::from(ms));
    }
    obj
}
