use std::path::Path;

use chrono::{Duration, Utc};
use common::config::JobRetentionConfig;
use common::entity::motion_job;
use common::{JobEnvelope, JobReport, JobState, MotionJob};
use mq::Mq;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;

/// Outcome of one retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneSummary {
    pub jobs: usize,
    pub archives: usize,
}

/// Page size of a job listing when the caller does not ask for one.
pub const DEFAULT_LIST_LIMIT: u64 = 50;
pub const MAX_LIST_LIMIT: u64 = 200;

pub struct JobService<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> JobService<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    /// Record a waiting job and publish it. The row exists before the message
    /// so a client can poll as soon as it has the id.
    pub async fn enqueue(
        &self,
        mq: &Mq,
        queue: &str,
        user_id: Option<i32>,
        job: MotionJob,
    ) -> Result<String, AppError> {
        let job_id = Uuid::now_v7().to_string();
        let payload = serde_json::to_value(&job)
            .map_err(|e| AppError::Internal(format!("Failed to serialize job: {e}")))?;

        motion_job::ActiveModel {
            id: Set(job_id.clone()),
            job_type: Set(job.type_name().to_string()),
            state: Set(JobState::Waiting),
            progress: Set(0),
            attempts: Set(0),
            user_id: Set(user_id),
            payload: Set(payload),
            result: Set(None),
            error_message: Set(None),
            created_at: Set(Utc::now()),
            started_at: Set(None),
            finished_at: Set(None),
        }
        .insert(self.db)
        .await?;

        let job_type = job.type_name();
        let envelope = JobEnvelope {
            job_id: job_id.clone(),
            user_id,
            job,
        };
        if let Err(e) = mq.publish(queue, &envelope).await {
            warn!(job_id = %job_id, error = %e, "Failed to publish job");
            motion_job::ActiveModel {
                id: Set(job_id.clone()),
                state: Set(JobState::Failed),
                error_message: Set(Some(format!("Failed to enqueue: {e}"))),
                finished_at: Set(Some(Utc::now())),
                ..Default::default()
            }
            .update(self.db)
            .await?;
            return Err(e.into());
        }

        info!(job_id = %job_id, job_type, "Job enqueued");
        Ok(job_id)
    }

    pub async fn find(&self, job_id: &str) -> Result<Option<motion_job::Model>, DbErr> {
        motion_job::Entity::find_by_id(job_id.to_string())
            .one(self.db)
            .await
    }

    /// Retained jobs submitted by `user_id`, newest first.
    pub async fn list_for_user(
        &self,
        user_id: i32,
        limit: u64,
    ) -> Result<Vec<motion_job::Model>, DbErr> {
        motion_job::Entity::find()
            .filter(motion_job::Column::UserId.eq(user_id))
            .order_by_desc(motion_job::Column::CreatedAt)
            .order_by_desc(motion_job::Column::Id)
            .limit(limit.min(MAX_LIST_LIMIT))
            .all(self.db)
            .await
    }

    /// Drop finished jobs beyond the newest `keep_*` per state that are also
    /// older than the TTL, along with any archive they produced.
    pub async fn prune(&self, retention: &JobRetentionConfig) -> Result<PruneSummary, DbErr> {
        let cutoff = Utc::now() - Duration::seconds(retention.ttl_secs as i64);
        let mut summary = PruneSummary::default();

        for (state, keep) in [
            (JobState::Completed, retention.keep_completed),
            (JobState::Failed, retention.keep_failed),
        ] {
            let expired: Vec<motion_job::Model> = motion_job::Entity::find()
                .filter(motion_job::Column::State.eq(state))
                .order_by_desc(motion_job::Column::FinishedAt)
                .order_by_desc(motion_job::Column::CreatedAt)
                .offset(keep)
                .all(self.db)
                .await?
                .into_iter()
                .filter(|job| job.finished_at.unwrap_or(job.created_at) < cutoff)
                .collect();

            if expired.is_empty() {
                continue;
            }

            for job in &expired {
                if remove_archive(job).await {
                    summary.archives += 1;
                }
            }

            let ids: Vec<String> = expired.into_iter().map(|job| job.id).collect();
            let deleted = motion_job::Entity::delete_many()
                .filter(motion_job::Column::Id.is_in(ids))
                .exec(self.db)
                .await?;
            summary.jobs += deleted.rows_affected as usize;
        }

        Ok(summary)
    }
}

/// The ZIP a finished download job points at, if any.
pub fn archive_of(job: &motion_job::Model) -> Option<common::job::DownloadReport> {
    let value = job.result.clone()?;
    match serde_json::from_value::<JobReport>(value) {
        Ok(JobReport::BatchDownload(report)) => Some(report),
        _ => None,
    }
}

async fn remove_archive(job: &motion_job::Model) -> bool {
    let Some(report) = archive_of(job) else {
        return false;
    };
    remove_file_quietly(&report.zip_file_path).await
}

async fn remove_file_quietly(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to delete job archive");
            false
        }
    }
}
