use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::status::JobState;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "motion_job")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// `batch-upload` or `batch-download`.
    #[sea_orm(indexed)]
    pub job_type: String,
    #[sea_orm(indexed)]
    pub state: JobState,
    /// 0..=100
    pub progress: i32,
    pub attempts: i32,
    pub user_id: Option<i32>,

    #[sea_orm(column_type = "JsonBinary")]
    pub payload: Json,
    /// Serialized `JobReport` once finished.
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub result: Option<Json>,
    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    pub created_at: DateTimeUtc,
    pub started_at: Option<DateTimeUtc>,
    #[sea_orm(indexed)]
    pub finished_at: Option<DateTimeUtc>,
}

impl ActiveModelBehavior for ActiveModel {}
