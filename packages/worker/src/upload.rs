use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use common::MotionDataStatus;
use common::entity::motion_data_file;
use common::job::{
    BatchUpload, ItemError, ItemErrorKind, SkippedFile, UploadItem, UploadReport, UploadSource,
    UploadedFile,
};
use common::motion::{
    FRAME_SIZE, ValidationError, check_boundary_timestamps, decode_frame, frame_count,
    parse_motion_filename,
};
use common::storage::{BoxReader, ByteRange, ContentHash, ObjectStore, StorageError};
use sea_orm::Set;
use serde_json::json;
use tracing::{info, warn};

use crate::context::WorkerContext;
use crate::error::Result;
use crate::jobs::{JobTracker, spread_progress};
use crate::revision::{Lookup, RevisionGuard};
use crate::transcode::{TranscodeError, transcode_to_store};

const STALE_REASON: &str = "overwritten by a newer upload";

/// Raw bytes of one upload item.
enum RawSource {
    Temp(PathBuf),
    Stored {
        store: Arc<dyn ObjectStore>,
        key: String,
    },
}

impl RawSource {
    async fn size(&self) -> std::result::Result<u64, StorageError> {
        match self {
            Self::Temp(path) => Ok(tokio::fs::metadata(path).await?.len()),
            Self::Stored { store, key } => store.size(key).await,
        }
    }

    async fn open(&self) -> std::result::Result<BoxReader, StorageError> {
        match self {
            Self::Temp(path) => Ok(Box::new(tokio::io::BufReader::new(
                tokio::fs::File::open(path).await?,
            ))),
            Self::Stored { store, key } => store.get_stream(key).await,
        }
    }

    async fn read_frame_at(&self, index: u64) -> std::result::Result<Vec<u8>, StorageError> {
        let start = index * FRAME_SIZE as u64;
        let range = ByteRange::new(start, start + FRAME_SIZE as u64);
        match self {
            Self::Temp(path) => {
                use tokio::io::{AsyncReadExt, AsyncSeekExt};
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(std::io::SeekFrom::Start(range.start)).await?;
                let mut buf = vec![0u8; FRAME_SIZE];
                file.read_exact(&mut buf).await?;
                Ok(buf)
            }
            Self::Stored { store, key } => store.get_range(key, range).await,
        }
    }
}

/// Per-item result of the upload pipeline.
enum Outcome {
    Uploaded(UploadedFile),
    Skipped(SkippedFile),
    Failed(ItemError),
}

/// Why an item stopped after the record was claimed.
enum ItemFailure {
    Invalid(ValidationError),
    Storage(StorageError),
    Transcode(TranscodeError),
    Stale,
}

impl From<StorageError> for ItemFailure {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

/// Run a batch upload. Files are processed one at a time; a failing file
/// never stops the batch.
pub async fn process_upload(
    ctx: &WorkerContext,
    tracker: &JobTracker<'_>,
    batch: &BatchUpload,
) -> Result<UploadReport> {
    tracker.progress(10).await;

    let total = batch.files.len();
    let mut report = UploadReport::default();
    for (i, item) in batch.files.iter().enumerate() {
        let outcome = process_item(ctx, tracker.job_id(), &batch.device_id, item).await;
        match outcome {
            Ok(Outcome::Uploaded(file)) => report.files.push(file),
            Ok(Outcome::Skipped(skip)) => report.skipped.push(skip),
            Ok(Outcome::Failed(err)) => report.errors.push(err),
            Err(e) => {
                // Database trouble for this item only; keep going.
                warn!(job_id = %tracker.job_id(), record_id = item.record_id, error = %e, "Upload item failed");
                report.errors.push(ItemError {
                    id: Some(item.record_id),
                    filename: Some(item.original_name.clone()),
                    kind: ItemErrorKind::Internal,
                    error: e.to_string(),
                });
            }
        }
        tracker.progress(spread_progress(10, 80, i + 1, total)).await;
    }

    tracker.progress(95).await;
    info!(
        job_id = %tracker.job_id(),
        device_id = %batch.device_id,
        uploaded = report.files.len(),
        skipped = report.skipped.len(),
        failed = report.errors.len(),
        "Batch upload finished"
    );
    Ok(report)
}

async fn process_item(
    ctx: &WorkerContext,
    job_id: &str,
    device_id: &str,
    item: &UploadItem,
) -> Result<Outcome> {
    let temp = match &item.source {
        UploadSource::TempFile { path } => Some(path.clone()),
        UploadSource::StoredRaw => None,
    };
    let outcome = run_item(ctx, job_id, device_id, item).await;
    if let Some(path) = temp {
        remove_temp(&path).await;
    }
    outcome
}

async fn run_item(
    ctx: &WorkerContext,
    job_id: &str,
    device_id: &str,
    item: &UploadItem,
) -> Result<Outcome> {
    let guard = RevisionGuard::new(&ctx.db, item.record_id, item.revision);
    let skipped = || stale_skip(item);

    let record = match guard.lookup().await? {
        Lookup::Current(record) => record,
        Lookup::Stale { current } => {
            info!(
                job_id,
                record_id = item.record_id,
                job_revision = item.revision,
                current_revision = current,
                "Skipping stale upload"
            );
            return Ok(skipped());
        }
        Lookup::Missing => {
            return Ok(Outcome::Failed(ItemError {
                id: Some(item.record_id),
                filename: Some(item.original_name.clone()),
                kind: ItemErrorKind::NotFound,
                error: format!("record {} not found", item.record_id),
            }));
        }
    };

    if !guard.set_status(MotionDataStatus::Parsing, job_id).await? {
        return Ok(skipped());
    }

    let store = match ctx.storage.resolve(record.storage).await {
        Ok(store) => store,
        Err(e) => return fail_item(&guard, item, ItemFailure::Storage(e)).await,
    };
    let keys = ctx.storage.keys();
    let raw_key = keys.raw_key(device_id, &item.original_name);
    let parsed_key = keys.parsed_key(device_id, &item.original_name);
    let source = match &item.source {
        UploadSource::TempFile { path } => RawSource::Temp(path.clone()),
        UploadSource::StoredRaw => RawSource::Stored {
            store: Arc::clone(&store),
            key: record.raw_object_key.clone().unwrap_or_else(|| raw_key.clone()),
        },
    };

    match ingest(ctx, &guard, &record, &source, store.as_ref(), &raw_key, &parsed_key).await {
        Ok(Some(file)) => {
            ctx.audit(
                "motion_data.parsed",
                json!({
                    "record_id": file.id,
                    "device_id": device_id,
                    "filename": &file.filename,
                    "revision": file.revision,
                    "total_frames": file.total_frames,
                    "job_id": job_id,
                }),
            )
            .await;
            Ok(Outcome::Uploaded(file))
        }
        Ok(None) | Err(ItemFailure::Stale) => Ok(skipped()),
        Err(failure) => fail_item(&guard, item, failure).await,
    }
}

/// Steps after the record is claimed: validate, hash, stage raw and parsed
/// objects under revision-specific keys, then publish them and commit the
/// record while holding its row lock. `Ok(None)` means a newer revision
/// claimed the record first; staged objects are discarded and the final
/// keys are left alone.
async fn ingest(
    ctx: &WorkerContext,
    guard: &RevisionGuard<'_, sea_orm::DatabaseConnection>,
    record: &motion_data_file::Model,
    source: &RawSource,
    store: &dyn ObjectStore,
    raw_key: &str,
    parsed_key: &str,
) -> std::result::Result<Option<UploadedFile>, ItemFailure> {
    let name = parse_motion_filename(&record.original_name).map_err(ItemFailure::Invalid)?;
    let size = source.size().await?;
    let frames = frame_count(size).map_err(ItemFailure::Invalid)?;
    let first = decode_frame(&source.read_frame_at(0).await?, 0)
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    let last = decode_frame(&source.read_frame_at(frames - 1).await?, 0)
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    check_boundary_timestamps(first.timestamp, last.timestamp).map_err(ItemFailure::Invalid)?;

    let (hash, _) = ContentHash::of_reader(source.open().await?)
        .await
        .map_err(StorageError::from)?;

    ensure_current(guard).await?;
    let keys = ctx.storage.keys();
    let staged = Staged {
        raw: matches!(source, RawSource::Temp(_))
            .then(|| (keys.staging_key(raw_key, guard.revision()), raw_key)),
        parsed: (keys.staging_key(parsed_key, guard.revision()), parsed_key),
    };

    let written = async {
        let raw = match &staged.raw {
            Some((staging, _)) => Some(store.put_stream(staging, source.open().await?).await?),
            None => None,
        };
        let summary = transcode_to_store(source.open().await?, store, &staged.parsed.0)
            .await
            .map_err(ItemFailure::Transcode)?;
        Ok::<_, ItemFailure>((raw, summary))
    }
    .await;
    let (raw, summary) = match written {
        Ok(written) => written,
        Err(failure) => {
            staged.discard(store).await;
            return Err(failure);
        }
    };

    let Some(locked) = guard.lock_current().await.map_err(db_failure)? else {
        info!(
            record_id = record.id,
            revision = guard.revision(),
            "Revision moved on while transcoding, discarding staged objects"
        );
        staged.discard(store).await;
        return Ok(None);
    };

    if let Err(e) = staged.publish(store).await {
        if let Err(db) = locked.rollback().await {
            warn!(record_id = record.id, error = %db, "Rollback failed");
        }
        staged.discard(store).await;
        return Err(ItemFailure::Storage(e));
    }

    let now = Utc::now();
    let raw_object_key = match source {
        RawSource::Temp(_) => raw_key.to_string(),
        RawSource::Stored { key, .. } => key.clone(),
    };
    let committed = locked
        .write(motion_data_file::ActiveModel {
            file_time_token: Set(Some(name.token.clone())),
            file_time: Set(ctx.clock.to_utc(name.local_time)),
            size_bytes: Set(size as i64),
            raw_object_key: Set(Some(raw_object_key)),
            parsed_object_key: Set(Some(parsed_key.to_string())),
            sha256: Set(Some(hash.to_hex())),
            etag: Set(raw.and_then(|r| r.etag).or_else(|| record.etag.clone())),
            entry_size_bytes: Set(FRAME_SIZE as i32),
            total_frames: Set(Some(summary.total_frames as i64)),
            ts_first: Set(Some(summary.ts_first as i64)),
            ts_last: Set(Some(summary.ts_last as i64)),
            status: Set(MotionDataStatus::Completed),
            error_message: Set(None),
            parse_time: Set(Some(now)),
            ..Default::default()
        })
        .await
        .map_err(db_failure)?;
    locked.commit().await.map_err(db_failure)?;

    if !committed {
        return Ok(None);
    }
    Ok(Some(UploadedFile {
        id: record.id,
        filename: record.original_name.clone(),
        size,
        revision: guard.revision(),
        total_frames: summary.total_frames,
    }))
}

/// Objects written under staging keys, paired with their final keys.
struct Staged<'k> {
    raw: Option<(String, &'k str)>,
    parsed: (String, &'k str),
}

impl Staged<'_> {
    fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.raw
            .iter()
            .chain(std::iter::once(&self.parsed))
            .map(|(staging, target)| (staging.as_str(), *target))
    }

    async fn publish(&self, store: &dyn ObjectStore) -> std::result::Result<(), StorageError> {
        for (staging, target) in self.pairs() {
            store.rename(staging, target).await?;
        }
        Ok(())
    }

    async fn discard(&self, store: &dyn ObjectStore) {
        for (staging, _) in self.pairs() {
            if let Err(e) = store.delete(staging).await {
                warn!(key = staging, error = %e, "Failed to delete staged object");
            }
        }
    }
}

fn db_failure(e: sea_orm::DbErr) -> ItemFailure {
    ItemFailure::Storage(StorageError::Backend(e.to_string()))
}

async fn ensure_current(
    guard: &RevisionGuard<'_, sea_orm::DatabaseConnection>,
) -> std::result::Result<(), ItemFailure> {
    match guard.is_current().await {
        Ok(true) => Ok(()),
        Ok(false) => Err(ItemFailure::Stale),
        Err(e) => Err(db_failure(e)),
    }
}

async fn fail_item(
    guard: &RevisionGuard<'_, sea_orm::DatabaseConnection>,
    item: &UploadItem,
    failure: ItemFailure,
) -> Result<Outcome> {
    let (status, kind, message) = match failure {
        ItemFailure::Invalid(e) => (MotionDataStatus::FileError, ItemErrorKind::Validation, e.to_string()),
        ItemFailure::Storage(e) => (
            MotionDataStatus::ProcessingFailed,
            ItemErrorKind::Storage,
            e.to_string(),
        ),
        ItemFailure::Transcode(e) => (
            MotionDataStatus::ProcessingFailed,
            ItemErrorKind::Transcode,
            e.to_string(),
        ),
        ItemFailure::Stale => return Ok(stale_skip(item)),
    };
    warn!(
        record_id = item.record_id,
        revision = item.revision,
        filename = %item.original_name,
        status = %status,
        error = %message,
        "Upload item failed"
    );

    if !guard.fail(status, &message).await? {
        return Ok(stale_skip(item));
    }
    Ok(Outcome::Failed(ItemError {
        id: Some(item.record_id),
        filename: Some(item.original_name.clone()),
        kind,
        error: message,
    }))
}

fn stale_skip(item: &UploadItem) -> Outcome {
    Outcome::Skipped(SkippedFile {
        id: item.record_id,
        filename: item.original_name.clone(),
        reason: STALE_REASON.into(),
    })
}

async fn remove_temp(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete temp upload"),
    }
}
