use chrono::{DateTime, Utc};
use common::entity::motion_data_file;
use common::job::ExportFormat;
use serde::{Deserialize, Serialize};

use crate::motion::query::QueryPoint;

/// A stored motion file.
#[derive(Serialize, utoipa::ToSchema)]
pub struct MotionFileResponse {
    #[schema(example = 1)]
    pub id: i32,
    #[schema(example = "RB-0001")]
    pub device_id: String,
    #[schema(example = "202501151030.bin")]
    pub original_name: String,
    pub uploader_id: Option<i32>,
    /// Job that last processed this file.
    pub task_id: Option<String>,
    /// `YYYYMMDDHHMM` from the filename.
    #[schema(example = "202501151030")]
    pub file_time_token: Option<String>,
    pub file_time: Option<DateTime<Utc>>,
    pub size_bytes: i64,
    /// Increases on every re-upload or retry of the same device + filename.
    pub revision: i32,
    /// `local` or `oss`.
    pub storage: String,
    /// One of `uploading`, `parsing`, `parse_failed`, `completed`,
    /// `file_error`, `processing_failed`.
    #[schema(example = "completed")]
    pub status: String,
    pub error_message: Option<String>,
    pub sha256: Option<String>,
    pub entry_size_bytes: i32,
    pub sample_rate_hz: i32,
    pub total_frames: Option<i64>,
    /// 17-digit device timestamp of the first frame.
    #[schema(example = 20250115103000000_i64)]
    pub ts_first: Option<i64>,
    pub ts_last: Option<i64>,
    /// Whether range queries and fast exports are available.
    pub has_parsed: bool,
    /// Whether the explicit retry action applies.
    pub retryable: bool,
    pub upload_time: DateTime<Utc>,
    pub parse_time: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<motion_data_file::Model> for MotionFileResponse {
    fn from(m: motion_data_file::Model) -> Self {
        Self {
            has_parsed: m.parsed_object_key.is_some(),
            retryable: m.status.is_retryable() && m.raw_object_key.is_some(),
            id: m.id,
            device_id: m.device_id,
            original_name: m.original_name,
            uploader_id: m.uploader_id,
            task_id: m.task_id,
            file_time_token: m.file_time_token,
            file_time: m.file_time,
            size_bytes: m.size_bytes,
            revision: m.revision,
            storage: m.storage.as_str().to_string(),
            status: m.status.as_str().to_string(),
            error_message: m.error_message,
            sha256: m.sha256,
            entry_size_bytes: m.entry_size_bytes,
            sample_rate_hz: m.sample_rate_hz,
            total_frames: m.total_frames,
            ts_first: m.ts_first,
            ts_last: m.ts_last,
            upload_time: m.upload_time,
            parse_time: m.parse_time,
            updated_at: m.updated_at,
        }
    }
}

/// A file registered by an upload request.
#[derive(Serialize, utoipa::ToSchema)]
pub struct RegisteredFile {
    pub id: i32,
    #[schema(example = "202501151030.bin")]
    pub filename: String,
    /// Revision the queued job will commit under.
    pub revision: i32,
    pub size_bytes: u64,
}

/// Response for an accepted upload batch.
#[derive(Serialize, utoipa::ToSchema)]
pub struct UploadAccepted {
    pub job_id: String,
    pub device_id: String,
    pub files: Vec<RegisteredFile>,
}

/// Request body for a batch download.
#[derive(Deserialize, utoipa::ToSchema)]
pub struct DownloadRequest {
    /// Records to include. At least one.
    pub file_ids: Vec<i32>,
    /// `csv` (default) or `jsonl`.
    #[serde(default)]
    #[schema(value_type = String, example = "csv")]
    pub format: ExportFormat,
}

/// Query parameters for a time-range read.
#[derive(Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RangeQuery {
    /// Inclusive start, Unix epoch milliseconds.
    pub start_ms: i64,
    /// Inclusive end, Unix epoch milliseconds.
    pub end_ms: i64,
    /// Clamped to 100..=5000. Default: 2000.
    #[param(example = 2000)]
    pub max_points: Option<usize>,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct RangeResponse {
    pub id: i32,
    pub start_ms: i64,
    pub end_ms: i64,
    /// Effective point limit after clamping.
    pub max_points: usize,
    /// Frames inside the range before downsampling.
    pub matched: usize,
    /// Frame objects with an added `time_ms`.
    #[schema(value_type = Vec<Object>)]
    pub points: Vec<QueryPoint>,
}

/// Query parameters for a raw frame preview.
#[derive(Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PreviewQuery {
    /// First frame index. Default: 0.
    pub offset: Option<u64>,
    /// Frames to return, 0..=5000. Default: 100.
    #[param(example = 100)]
    pub limit: Option<u64>,
}
