use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::status::MotionDataStatus;
use crate::storage::StorageKind;

/// One uploaded motion file. Re-uploads of the same device + filename reuse
/// the row and bump `revision`.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "motion_data_file")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(unique_key = "device_file")]
    pub device_id: String,
    #[sea_orm(unique_key = "device_file")]
    pub original_name: String,

    pub uploader_id: Option<i32>,
    /// Job that last touched this record.
    #[sea_orm(indexed)]
    pub task_id: Option<String>,

    /// `YYYYMMDDHHMM` taken from the filename.
    pub file_time_token: Option<String>,
    pub file_time: Option<DateTimeUtc>,

    pub size_bytes: i64,
    pub revision: i32,
    /// Backend fixed at creation time.
    pub storage: StorageKind,
    pub raw_object_key: Option<String>,
    pub parsed_object_key: Option<String>,
    pub sha256: Option<String>,
    pub etag: Option<String>,

    pub entry_size_bytes: i32,
    pub sample_rate_hz: i32,
    pub total_frames: Option<i64>,
    /// Raw 17-digit device timestamps of the first and last frame.
    pub ts_first: Option<i64>,
    pub ts_last: Option<i64>,

    #[sea_orm(indexed)]
    pub status: MotionDataStatus,
    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    pub upload_time: DateTimeUtc,
    pub parse_time: Option<DateTimeUtc>,
    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
