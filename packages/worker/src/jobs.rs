use chrono::Utc;
use common::entity::motion_job;
use common::notify::JobUpdate;
use common::{JobEnvelope, JobReport, JobState};
use sea_orm::sea_query::{Expr, ExprTrait};
use sea_orm::{ActiveModelTrait, ColumnTrait, DbErr, EntityTrait, QueryFilter, Set};
use tracing::{debug, warn};

use crate::context::WorkerContext;

/// Writes one job's lifecycle to its `motion_job` row and pushes each change
/// to the notifier.
pub struct JobTracker<'a> {
    ctx: &'a WorkerContext,
    job_id: String,
    user_id: Option<i32>,
}

impl<'a> JobTracker<'a> {
    pub fn new(ctx: &'a WorkerContext, envelope: &JobEnvelope) -> Self {
        Self {
            ctx,
            job_id: envelope.job_id.clone(),
            user_id: envelope.user_id,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Move the job to `active` and count the attempt. Creates the row if
    /// the producer did not.
    pub async fn activate(&self, envelope: &JobEnvelope) -> Result<(), DbErr> {
        let now = Utc::now();
        let updated = motion_job::Entity::update_many()
            .col_expr(motion_job::Column::State, Expr::value(JobState::Active))
            .col_expr(motion_job::Column::Progress, Expr::value(0))
            .col_expr(motion_job::Column::Attempts, Expr::col(motion_job::Column::Attempts).add(1))
            .col_expr(motion_job::Column::StartedAt, Expr::value(Some(now)))
            .filter(motion_job::Column::Id.eq(self.job_id.as_str()))
            .exec(&self.ctx.db)
            .await?;

        if updated.rows_affected == 0 {
            debug!(job_id = %self.job_id, "Job row missing, creating it");
            let payload = serde_json::to_value(&envelope.job)
                .map_err(|e| DbErr::Custom(format!("job payload: {e}")))?;
            motion_job::ActiveModel {
                id: Set(self.job_id.clone()),
                job_type: Set(envelope.job.type_name().to_string()),
                state: Set(JobState::Active),
                progress: Set(0),
                attempts: Set(1),
                user_id: Set(envelope.user_id),
                payload: Set(payload),
                result: Set(None),
                error_message: Set(None),
                created_at: Set(now),
                started_at: Set(Some(now)),
                finished_at: Set(None),
            }
            .insert(&self.ctx.db)
            .await?;
        }

        self.push(JobState::Active, 0).await;
        Ok(())
    }

    /// Record progress (clamped to 0..=100). Best effort.
    pub async fn progress(&self, progress: u8) {
        let progress = Ord::min(progress, 100);
        let result = motion_job::Entity::update_many()
            .col_expr(motion_job::Column::Progress, Expr::value(i32::from(progress)))
            .filter(motion_job::Column::Id.eq(self.job_id.as_str()))
            .filter(motion_job::Column::State.eq(JobState::Active))
            .exec(&self.ctx.db)
            .await;
        if let Err(e) = result {
            warn!(job_id = %self.job_id, progress, error = %e, "Failed to store job progress");
        }
        self.push(JobState::Active, progress).await;
    }

    pub async fn complete(&self, report: &JobReport) -> Result<(), DbErr> {
        self.finish(JobState::Completed, 100, Some(report), None).await
    }

    pub async fn fail(&self, message: &str, report: Option<&JobReport>) -> Result<(), DbErr> {
        let progress = self.current_progress().await.unwrap_or(0);
        self.finish(JobState::Failed, progress, report, Some(message)).await
    }

    async fn current_progress(&self) -> Option<u8> {
        motion_job::Entity::find_by_id(self.job_id.clone())
            .one(&self.ctx.db)
            .await
            .ok()
            .flatten()
            .map(|job| job.progress.clamp(0, 100) as u8)
    }

    async fn finish(
        &self,
        state: JobState,
        progress: u8,
        report: Option<&JobReport>,
        message: Option<&str>,
    ) -> Result<(), DbErr> {
        let result = report
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| DbErr::Custom(format!("job result: {e}")))?;
        motion_job::ActiveModel {
            id: Set(self.job_id.clone()),
            state: Set(state),
            progress: Set(i32::from(progress)),
            result: Set(result),
            error_message: Set(message.map(str::to_string)),
            finished_at: Set(Some(Utc::now())),
            ..Default::default()
        }
        .update(&self.ctx.db)
        .await?;

        self.push(state, progress).await;
        Ok(())
    }

    async fn push(&self, state: JobState, progress: u8) {
        self.ctx
            .notify(JobUpdate {
                job_id: self.job_id.clone(),
                state,
                progress,
                user_id: self.user_id,
            })
            .await;
    }
}

/// Progress after `done` of `total` items, spread over `span` points above `base`.
pub fn spread_progress(base: u8, span: u8, done: usize, total: usize) -> u8 {
    if total == 0 {
        return base.saturating_add(span);
    }
    let share = (done.min(total) * usize::from(span)) / total;
    base.saturating_add(share as u8)
}
