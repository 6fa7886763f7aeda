use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Message published to the job queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub job_id: String,
    pub user_id: Option<i32>,
    pub job: MotionJob,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MotionJob {
    BatchUpload(BatchUpload),
    BatchDownload(BatchDownload),
}

impl MotionJob {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::BatchUpload(_) => "batch-upload",
            Self::BatchDownload(_) => "batch-download",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchUpload {
    pub device_id: String,
    pub files: Vec<UploadItem>,
}

/// One file of an upload batch, pinned to the revision seen at enqueue time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadItem {
    pub record_id: i32,
    pub revision: i32,
    pub original_name: String,
    pub source: UploadSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UploadSource {
    /// Freshly uploaded bytes staged on local disk. Deleted after processing.
    TempFile { path: PathBuf },
    /// Raw object already persisted for the record (explicit retry).
    StoredRaw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Jsonl,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchDownload {
    pub file_ids: Vec<i32>,
    #[serde(default)]
    pub format: ExportFormat,
}

/// Why a single batch item did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemErrorKind {
    Validation,
    Storage,
    Transcode,
    NotFound,
    NotReady,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub kind: ItemErrorKind,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub id: i32,
    pub filename: String,
    pub size: u64,
    pub revision: i32,
    pub total_frames: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub id: i32,
    pub filename: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadReport {
    pub files: Vec<UploadedFile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedFile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ItemError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedFile {
    pub id: i32,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadReport {
    pub zip_file_name: String,
    pub zip_file_path: PathBuf,
    pub size: u64,
    pub success_files: Vec<ArchivedFile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ItemError>,
}

/// Result stored on a finished job for later polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum JobReport {
    BatchUpload(UploadReport),
    BatchDownload(DownloadReport),
    /// Per-item errors of a job that produced nothing usable.
    Failed { errors: Vec<ItemError> },
}
