use axum::Json;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Response;
use common::JobState;
use common::entity::motion_job;
use common::notify::JobUpdate;
use futures::{Stream, StreamExt, stream};
use sea_orm::DatabaseConnection;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument, warn};

use crate::error::{AppError, ErrorBody};
use crate::extractors::AppQuery;
use crate::handlers::motion::{USER_ID_HEADER, user_id_from};
use crate::jobs::{DEFAULT_LIST_LIMIT, JobService, archive_of};
use crate::models::job::{JobListQuery, JobResponse};
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/jobs",
    tag = "Jobs",
    operation_id = "listJobs",
    summary = "List the caller's jobs",
    description = "Retained jobs submitted with the same `x-user-id`, newest first, with their \
        state and progress. Pruned jobs no longer appear.",
    params(
        ("x-user-id" = i32, Header, description = "Caller's user id"),
        JobListQuery,
    ),
    responses(
        (status = 200, description = "Jobs", body = Vec<JobResponse>),
        (status = 400, description = "Missing or invalid user id (VALIDATION_ERROR)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, headers, query))]
pub async fn list_jobs(
    State(state): State<AppState>,
    headers: HeaderMap,
    AppQuery(query): AppQuery<JobListQuery>,
) -> Result<Json<Vec<JobResponse>>, AppError> {
    let user_id = user_id_from(&headers)?
        .ok_or_else(|| AppError::Validation(format!("{USER_ID_HEADER} header is required")))?;
    let jobs = JobService::new(&state.db)
        .list_for_user(user_id, query.limit.unwrap_or(DEFAULT_LIST_LIMIT))
        .await?;
    Ok(Json(jobs.into_iter().map(JobResponse::from).collect()))
}

#[utoipa::path(
    get,
    path = "/{id}",
    tag = "Jobs",
    operation_id = "getJob",
    summary = "Poll a job",
    description = "Returns the job state, progress and, once finished, its report.",
    params(("id" = String, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job", body = JobResponse),
        (status = 404, description = "Job not found (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state))]
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, AppError> {
    let job = JobService::new(&state.db)
        .find(&id)
        .await?
        .ok_or_else(|| AppError::NotFound("Job not found".into()))?;
    Ok(Json(job.into()))
}

#[utoipa::path(
    get,
    path = "/{id}/download",
    tag = "Jobs",
    operation_id = "downloadJobArchive",
    summary = "Fetch the ZIP of a finished download job",
    params(("id" = String, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Archive", body = Vec<u8>, content_type = "application/zip"),
        (status = 404, description = "Job or archive not found (NOT_FOUND)", body = ErrorBody),
        (status = 409, description = "Job not finished (CONFLICT)", body = ErrorBody),
    ),
)]
#[instrument(skip(state))]
pub async fn download_archive(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let job = JobService::new(&state.db)
        .find(&id)
        .await?
        .ok_or_else(|| AppError::NotFound("Job not found".into()))?;
    if job.state != JobState::Completed {
        return Err(AppError::Conflict(format!(
            "Job has not completed (state: {})",
            job.state
        )));
    }
    let report =
        archive_of(&job).ok_or_else(|| AppError::NotFound("Job has no archive".into()))?;

    let file = match tokio::fs::File::open(&report.zip_file_path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::NotFound("Archive has expired".into()));
        }
        Err(e) => return Err(AppError::Internal(format!("Failed to open archive: {e}"))),
    };
    let size = file
        .metadata()
        .await
        .map_err(|e| AppError::Internal(format!("Failed to stat archive: {e}")))?
        .len();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(header::CONTENT_LENGTH, size.to_string())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", report.zip_file_name),
        )
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {e}")))
}

#[utoipa::path(
    get,
    path = "/{id}/events",
    tag = "Jobs",
    operation_id = "streamJobEvents",
    summary = "Follow job progress as server-sent events",
    description = "Sends the current state first, then every update, and ends once the job \
        completes or fails. Only jobs run by this process produce live updates.",
    params(("id" = String, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Event stream", body = String, content_type = "text/event-stream"),
        (status = 404, description = "Job not found (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state))]
pub async fn job_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    // Subscribe before reading the row so no update falls in between.
    let rx = state.notifier.subscribe();
    let job = JobService::new(&state.db)
        .find(&id)
        .await?
        .ok_or_else(|| AppError::NotFound("Job not found".into()))?;

    let updates = job_updates(state.db.clone(), rx, snapshot(&job));
    Ok(Sse::new(updates.map(|update| event(&update))).keep_alive(KeepAlive::default()))
}

/// `current` followed by every broadcast update for the same job, ending
/// after the first finished state. A lagging subscriber re-reads the row
/// instead of replaying what it missed.
fn job_updates(
    db: DatabaseConnection,
    rx: broadcast::Receiver<JobUpdate>,
    current: JobUpdate,
) -> impl Stream<Item = JobUpdate> {
    let job_id = current.job_id.clone();
    stream::unfold(Some((rx, Some(current))), move |cursor| {
        let job_id = job_id.clone();
        let db = db.clone();
        async move {
            let (mut rx, pending) = cursor?;
            if let Some(update) = pending {
                return Some(emit(update, rx));
            }
            loop {
                match rx.recv().await {
                    Ok(update) if update.job_id == job_id => return Some(emit(update, rx)),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(job_id = %job_id, skipped, "Event subscriber lagged");
                        match JobService::new(&db).find(&job_id).await {
                            Ok(Some(job)) => return Some(emit(snapshot(&job), rx)),
                            Ok(None) => return None,
                            Err(e) => warn!(job_id = %job_id, error = %e, "Failed to re-read lagged job"),
                        }
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        }
    })
}

type Cursor = Option<(broadcast::Receiver<JobUpdate>, Option<JobUpdate>)>;

fn emit(update: JobUpdate, rx: broadcast::Receiver<JobUpdate>) -> (JobUpdate, Cursor) {
    let next = (!update.state.is_finished()).then_some((rx, None));
    (update, next)
}

fn snapshot(job: &motion_job::Model) -> JobUpdate {
    JobUpdate {
        job_id: job.id.clone(),
        state: job.state,
        progress: job.progress.clamp(0, 100) as u8,
        user_id: job.user_id,
    }
}

fn event(update: &JobUpdate) -> Result<Event, axum::Error> {
    Event::default().event("progress").json_data(update)
}
