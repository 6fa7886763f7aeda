use chrono::{DateTime, Utc};
use common::JobState;
use common::entity::motion_job;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::jobs::archive_of;

/// Response for a newly queued job.
#[derive(Serialize, utoipa::ToSchema)]
pub struct JobAccepted {
    #[schema(example = "01932c1e-8f6a-7c3e-a9b0-6d1f2e3a4b5c")]
    pub job_id: String,
}

/// Query parameters for listing the caller's jobs.
#[derive(Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct JobListQuery {
    /// Jobs to return, at most 200. Default: 50.
    #[param(example = 50)]
    pub limit: Option<u64>,
}

/// A queued or finished job.
#[derive(Serialize, utoipa::ToSchema)]
pub struct JobResponse {
    pub id: String,
    /// `batch-upload` or `batch-download`.
    #[schema(example = "batch-upload")]
    pub job_type: String,
    /// One of `waiting`, `active`, `completed`, `failed`.
    #[schema(example = "completed")]
    pub state: String,
    /// 0-100.
    pub progress: i32,
    pub attempts: i32,
    pub user_id: Option<i32>,
    /// Job report. Download reports omit the server-side archive path.
    #[schema(value_type = Option<Object>)]
    pub result: Option<Value>,
    pub error_message: Option<String>,
    /// Set once a download job has an archive to fetch.
    pub download_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<motion_job::Model> for JobResponse {
    fn from(m: motion_job::Model) -> Self {
        let download_url = (m.state == JobState::Completed && archive_of(&m).is_some())
            .then(|| format!("/api/v1/jobs/{}/download", m.id));
        let result = m.result.map(|mut value| {
            if let Some(obj) = value.as_object_mut() {
                obj.remove("zip_file_path");
            }
            value
        });
        Self {
            id: m.id,
            job_type: m.job_type,
            state: m.state.as_str().to_string(),
            progress: m.progress,
            attempts: m.attempts,
            user_id: m.user_id,
            result,
            error_message: m.error_message,
            download_url,
            created_at: m.created_at,
            started_at: m.started_at,
            finished_at: m.finished_at,
        }
    }
}
