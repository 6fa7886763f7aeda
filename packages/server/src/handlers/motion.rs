use std::path::{Path as FsPath, PathBuf};

use axum::Json;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use common::entity::motion_data_file;
use common::job::{BatchDownload, BatchUpload, UploadItem, UploadSource};
use common::motion::{FRAME_SIZE, base_name};
use common::storage::{safe_device_segment, safe_file_name};
use common::{MotionDataStatus, MotionJob};
use sea_orm::EntityTrait;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{AppError, ErrorBody};
use crate::extractors::{AppJson, AppQuery};
use crate::jobs::JobService;
use crate::models::job::JobAccepted;
use crate::models::motion::{
    DownloadRequest, MotionFileResponse, PreviewQuery, RangeQuery, RangeResponse, RegisteredFile,
    UploadAccepted,
};
use crate::motion::export::{CsvSource, csv_body};
use crate::motion::ingest::{NewUpload, abandon_upload, claim_retry, register_upload};
use crate::motion::preview::{DEFAULT_PREVIEW_FRAMES, PreviewPage, preview_frames};
use crate::motion::query::{clamp_max_points, query_range};
use crate::state::AppState;

/// Header carrying the uploading user's id, set by the fronting gateway.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Uploads are capped per file while staging, not per request.
pub fn upload_body_limit() -> DefaultBodyLimit {
    DefaultBodyLimit::disable()
}

/// One multipart file written to the staging directory.
struct StagedFile {
    original_name: String,
    path: PathBuf,
    size: u64,
}

#[utoipa::path(
    post,
    path = "/upload",
    tag = "Motion Data",
    operation_id = "uploadMotionFiles",
    summary = "Upload motion files for a device",
    description = "Accepts a `device_id` text field and one or more `files` parts. Each file is \
        registered (re-uploads of the same device + filename bump the revision) and a \
        batch-upload job is queued. Validation and transcoding happen in the worker.",
    params(("x-user-id" = Option<i32>, Header, description = "Uploading user")),
    request_body(content_type = "multipart/form-data", description = "device_id plus files"),
    responses(
        (status = 202, description = "Job queued", body = UploadAccepted),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 503, description = "Queue unavailable (UNAVAILABLE)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, headers, multipart))]
pub async fn upload_files(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let uploader_id = user_id_from(&headers)?;
    let staging_dir = PathBuf::from(&state.config.motion.upload_temp_dir);
    tokio::fs::create_dir_all(&staging_dir)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to create staging dir: {e}")))?;

    let mut device_id: Option<String> = None;
    let mut staged: Vec<StagedFile> = Vec::new();

    let received = async {
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::Validation(format!("Multipart error: {e}")))?
        {
            match field.name() {
                Some("device_id") => {
                    let text = field.text().await.map_err(|e| {
                        AppError::Validation(format!("Failed to read device_id: {e}"))
                    })?;
                    device_id = Some(text);
                }
                Some("files") | Some("file") => {
                    if staged.len() >= state.config.motion.max_batch_files {
                        return Err(AppError::Validation(format!(
                            "At most {} files per upload",
                            state.config.motion.max_batch_files
                        )));
                    }
                    let name = field
                        .file_name()
                        .map(|s| safe_file_name(s, ""))
                        .filter(|s| !s.is_empty())
                        .ok_or_else(|| {
                            AppError::Validation("File field must have a filename".into())
                        })?;
                    let path = staging_dir.join(format!("{}-{name}", Uuid::new_v4()));
                    // Track the path before writing so a failed write is cleaned up too.
                    staged.push(StagedFile {
                        original_name: name,
                        path: path.clone(),
                        size: 0,
                    });
                    let size =
                        stage_field(field, &path, state.config.server.max_upload_bytes).await?;
                    if let Some(last) = staged.last_mut() {
                        last.size = size;
                    }
                }
                _ => {} // Ignore unknown fields.
            }
        }
        Ok::<(), AppError>(())
    }
    .await;

    if let Err(e) = received {
        discard_staged(&staged).await;
        return Err(e);
    }

    let device_id = match validate_device_id(device_id.as_deref()) {
        Ok(id) => id,
        Err(e) => {
            discard_staged(&staged).await;
            return Err(e);
        }
    };
    if staged.is_empty() {
        return Err(AppError::Validation("No files uploaded".into()));
    }

    let storage = state.ctx.storage.default_kind();
    let mut records = Vec::with_capacity(staged.len());
    for file in &staged {
        let upload = NewUpload {
            device_id: &device_id,
            original_name: &file.original_name,
            uploader_id,
            size_bytes: file.size,
            storage,
            sample_rate_hz: state.config.motion.sample_rate_hz,
        };
        match register_upload(&state.db, &upload).await {
            Ok(record) => records.push(record),
            Err(e) => {
                discard_staged(&staged).await;
                abandon_all(&state, &records, "upload registration failed").await;
                return Err(e.into());
            }
        }
    }

    let items = records
        .iter()
        .zip(&staged)
        .map(|(record, file)| UploadItem {
            record_id: record.id,
            revision: record.revision,
            original_name: record.original_name.clone(),
            source: UploadSource::TempFile {
                path: file.path.clone(),
            },
        })
        .collect();
    let job = MotionJob::BatchUpload(BatchUpload {
        device_id: device_id.clone(),
        files: items,
    });

    let job_id = match JobService::new(&state.db)
        .enqueue(&state.mq, &state.config.mq.queue_name, uploader_id, job)
        .await
    {
        Ok(id) => id,
        Err(e) => {
            discard_staged(&staged).await;
            abandon_all(&state, &records, "failed to queue upload job").await;
            return Err(e);
        }
    };

    info!(job_id = %job_id, device_id = %device_id, files = records.len(), "Upload accepted");

    let files = records
        .into_iter()
        .zip(&staged)
        .map(|(record, file)| RegisteredFile {
            id: record.id,
            filename: record.original_name,
            revision: record.revision,
            size_bytes: file.size,
        })
        .collect();

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadAccepted {
            job_id,
            device_id,
            files,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/{id}",
    tag = "Motion Data",
    operation_id = "getMotionFile",
    summary = "Get a motion file record",
    params(("id" = i32, Path, description = "Record ID")),
    responses(
        (status = 200, description = "Record", body = MotionFileResponse),
        (status = 404, description = "Not found (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state))]
pub async fn get_file(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<MotionFileResponse>, AppError> {
    let record = find_record(&state, id).await?;
    Ok(Json(record.into()))
}

#[utoipa::path(
    post,
    path = "/{id}/retry",
    tag = "Motion Data",
    operation_id = "retryMotionFile",
    summary = "Reprocess a failed file from its stored raw bytes",
    description = "Only records in `processing_failed` or `parse_failed` with stored raw data \
        can be retried. The revision is bumped so any older job for the file stands down.",
    params(("id" = i32, Path, description = "Record ID")),
    responses(
        (status = 202, description = "Retry job queued", body = JobAccepted),
        (status = 404, description = "Not found (NOT_FOUND)", body = ErrorBody),
        (status = 409, description = "Not retryable (CONFLICT)", body = ErrorBody),
        (status = 503, description = "Queue unavailable (UNAVAILABLE)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, headers))]
pub async fn retry_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = user_id_from(&headers)?;
    let record = find_record(&state, id).await?;

    if !record.status.is_retryable() {
        return Err(AppError::Conflict(format!(
            "File cannot be retried (status: {})",
            record.status
        )));
    }
    if record.raw_object_key.is_none() {
        return Err(AppError::Conflict(
            "File has no stored raw data; upload it again".into(),
        ));
    }

    let claimed = claim_retry(&state.db, &record)
        .await?
        .ok_or_else(|| AppError::Conflict("File changed while retrying; try again".into()))?;

    let job = MotionJob::BatchUpload(BatchUpload {
        device_id: claimed.device_id.clone(),
        files: vec![UploadItem {
            record_id: claimed.id,
            revision: claimed.revision,
            original_name: claimed.original_name.clone(),
            source: UploadSource::StoredRaw,
        }],
    });
    let job_id = match JobService::new(&state.db)
        .enqueue(&state.mq, &state.config.mq.queue_name, user_id, job)
        .await
    {
        Ok(id) => id,
        Err(e) => {
            abandon_all(&state, std::slice::from_ref(&claimed), "failed to queue retry job").await;
            return Err(e);
        }
    };

    info!(job_id = %job_id, record_id = id, revision = claimed.revision, "Retry queued");
    Ok((StatusCode::ACCEPTED, Json(JobAccepted { job_id })))
}

#[utoipa::path(
    get,
    path = "/{id}/query",
    tag = "Motion Data",
    operation_id = "queryMotionRange",
    summary = "Read a time range, downsampled",
    description = "Returns frames whose timestamps fall in `[start_ms, end_ms]`. When more than \
        `max_points` frames match, evenly spread frames are kept, always including the first \
        and last.",
    params(("id" = i32, Path, description = "Record ID"), RangeQuery),
    responses(
        (status = 200, description = "Points", body = RangeResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 404, description = "Not found (NOT_FOUND)", body = ErrorBody),
        (status = 409, description = "File not transcoded yet (CONFLICT)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, query))]
pub async fn query_file(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    AppQuery(query): AppQuery<RangeQuery>,
) -> Result<Json<RangeResponse>, AppError> {
    if query.start_ms > query.end_ms {
        return Err(AppError::Validation("start_ms must not exceed end_ms".into()));
    }

    let record = find_record(&state, id).await?;
    let parsed_key = match (&record.status, &record.parsed_object_key) {
        (MotionDataStatus::Completed, Some(key)) => key.clone(),
        _ => {
            return Err(AppError::Conflict(format!(
                "File is not ready for queries (status: {})",
                record.status
            )));
        }
    };

    let max_points = clamp_max_points(query.max_points);
    let store = state.ctx.storage.resolve(record.storage).await?;
    let result = query_range(
        store.as_ref(),
        &parsed_key,
        &state.ctx.clock,
        query.start_ms,
        query.end_ms,
        max_points,
    )
    .await?;

    Ok(Json(RangeResponse {
        id,
        start_ms: query.start_ms,
        end_ms: query.end_ms,
        max_points,
        matched: result.matched,
        points: result.points,
    }))
}

#[utoipa::path(
    get,
    path = "/{id}/preview",
    tag = "Motion Data",
    operation_id = "previewMotionFrames",
    summary = "Decode a page of raw frames",
    description = "Reads only the requested frames from the raw object. A window past the end \
        of the file returns no frames.",
    params(("id" = i32, Path, description = "Record ID"), PreviewQuery),
    responses(
        (status = 200, description = "Frames", body = PreviewPage),
        (status = 404, description = "Not found (NOT_FOUND)", body = ErrorBody),
        (status = 409, description = "No raw data stored (CONFLICT)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, query))]
pub async fn preview_file(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    AppQuery(query): AppQuery<PreviewQuery>,
) -> Result<Json<PreviewPage>, AppError> {
    let record = find_record(&state, id).await?;
    let raw_key = record.raw_object_key.clone().ok_or_else(|| {
        AppError::Conflict(format!(
            "File has no stored raw data (status: {})",
            record.status
        ))
    })?;
    let total_frames = record
        .total_frames
        .map(|n| n.max(0) as u64)
        .unwrap_or(record.size_bytes.max(0) as u64 / FRAME_SIZE as u64);

    let store = state.ctx.storage.resolve(record.storage).await?;
    let page = preview_frames(
        store.as_ref(),
        &raw_key,
        total_frames,
        query.offset.unwrap_or(0),
        query.limit.unwrap_or(DEFAULT_PREVIEW_FRAMES),
        &state.ctx.clock,
    )
    .await?;

    Ok(Json(page))
}

#[utoipa::path(
    get,
    path = "/{id}/export.csv",
    tag = "Motion Data",
    operation_id = "exportMotionCsv",
    summary = "Stream one file as CSV",
    description = "UTF-8 BOM, a header row, then one row per frame. Uses the transcoded artifact \
        when present and falls back to decoding raw frames.",
    params(("id" = i32, Path, description = "Record ID")),
    responses(
        (status = 200, description = "CSV stream", body = String, content_type = "text/csv"),
        (status = 404, description = "Not found (NOT_FOUND)", body = ErrorBody),
        (status = 409, description = "File not ready (CONFLICT)", body = ErrorBody),
    ),
)]
#[instrument(skip(state))]
pub async fn export_csv(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Response, AppError> {
    let record = find_record(&state, id).await?;
    if record.status != MotionDataStatus::Completed {
        return Err(AppError::Conflict(format!(
            "File is not ready for export (status: {})",
            record.status
        )));
    }
    let source = match (&record.parsed_object_key, &record.raw_object_key) {
        (Some(parsed), _) => CsvSource::Parsed(parsed.clone()),
        (None, Some(raw)) => CsvSource::Raw(raw.clone()),
        (None, None) => return Err(AppError::Conflict("File has no stored data".into())),
    };

    let store = state.ctx.storage.resolve(record.storage).await?;
    let body = csv_body(store, state.ctx.columns.clone(), source, record.id);
    let filename = format!("{}.csv", base_name(&record.original_name));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/csv; charset=utf-8")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", safe_file_name(&filename, "export.csv")),
        )
        .body(body)
        .map_err(|e| AppError::Internal(format!("Failed to build response: {e}")))
}

#[utoipa::path(
    post,
    path = "/download",
    tag = "Motion Data",
    operation_id = "createMotionDownload",
    summary = "Queue a ZIP export of several files",
    description = "Each completed file becomes one `.csv` or `.jsonl.gz` entry. Files that cannot \
        be exported are listed in an `errors.json` entry.",
    request_body = DownloadRequest,
    responses(
        (status = 202, description = "Job queued", body = JobAccepted),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 503, description = "Queue unavailable (UNAVAILABLE)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, headers, payload))]
pub async fn create_download(
    State(state): State<AppState>,
    headers: HeaderMap,
    AppJson(payload): AppJson<DownloadRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = user_id_from(&headers)?;
    let mut file_ids = Vec::with_capacity(payload.file_ids.len());
    for id in payload.file_ids {
        if !file_ids.contains(&id) {
            file_ids.push(id);
        }
    }
    if file_ids.is_empty() {
        return Err(AppError::Validation("file_ids must not be empty".into()));
    }
    if file_ids.len() > state.config.motion.max_batch_files {
        return Err(AppError::Validation(format!(
            "At most {} files per download",
            state.config.motion.max_batch_files
        )));
    }

    let count = file_ids.len();
    let job = MotionJob::BatchDownload(BatchDownload {
        file_ids,
        format: payload.format,
    });
    let job_id = JobService::new(&state.db)
        .enqueue(&state.mq, &state.config.mq.queue_name, user_id, job)
        .await?;

    info!(job_id = %job_id, files = count, "Download queued");
    Ok((StatusCode::ACCEPTED, Json(JobAccepted { job_id })))
}

async fn find_record(state: &AppState, id: i32) -> Result<motion_data_file::Model, AppError> {
    motion_data_file::Entity::find_by_id(id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Motion file not found".into()))
}

pub(crate) fn user_id_from(headers: &HeaderMap) -> Result<Option<i32>, AppError> {
    headers
        .get(USER_ID_HEADER)
        .map(|value| {
            value
                .to_str()
                .ok()
                .and_then(|s| s.trim().parse::<i32>().ok())
                .ok_or_else(|| AppError::Validation(format!("Invalid {USER_ID_HEADER} header")))
        })
        .transpose()
}

/// Device ids become storage key segments, so anything the sanitizer would
/// rewrite is rejected instead of silently renamed.
fn validate_device_id(device_id: Option<&str>) -> Result<String, AppError> {
    let device_id = device_id
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::Validation("Missing 'device_id' field".into()))?;
    if safe_device_segment(device_id) != device_id {
        return Err(AppError::Validation(
            "device_id must not contain path separators, '..' or NUL and must be at most 100 characters"
                .into(),
        ));
    }
    Ok(device_id.to_string())
}

async fn stage_field(
    mut field: axum::extract::multipart::Field<'_>,
    path: &FsPath,
    max_size: u64,
) -> Result<u64, AppError> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to create temp file: {e}")))?;

    let mut total: u64 = 0;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| AppError::Validation(format!("Upload read error: {e}")))?
    {
        total += chunk.len() as u64;
        if total > max_size {
            return Err(AppError::Validation(format!(
                "File exceeds maximum size of {max_size} bytes"
            )));
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| AppError::Internal(format!("Temp file write failed: {e}")))?;
    }

    file.flush()
        .await
        .map_err(|e| AppError::Internal(format!("Temp file flush failed: {e}")))?;
    Ok(total)
}

async fn discard_staged(staged: &[StagedFile]) {
    for file in staged {
        if let Err(e) = tokio::fs::remove_file(&file.path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %file.path.display(), error = %e, "Failed to delete staged upload");
        }
    }
}

async fn abandon_all(state: &AppState, records: &[motion_data_file::Model], reason: &str) {
    for record in records {
        if let Err(e) = abandon_upload(&state.db, record, reason).await {
            warn!(record_id = record.id, error = %e, "Failed to mark upload abandoned");
        }
    }
}
