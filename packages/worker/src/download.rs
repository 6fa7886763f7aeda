use std::collections::HashSet;
use std::path::Path;

use bytes::Bytes;
use chrono::Utc;
use common::MotionDataStatus;
use common::entity::motion_data_file;
use common::job::{
    ArchivedFile, BatchDownload, DownloadReport, ExportFormat, ItemError, ItemErrorKind, JobReport,
};
use common::motion::{FRAME_SIZE, JsonlGzEncoder, base_name, decode_frame};
use common::storage::{ByteRange, ObjectStore, StorageError, safe_file_name};
use sea_orm::EntityTrait;
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use crate::archive::{EntryCompression, ZipSink};
use crate::context::WorkerContext;
use crate::csv::{CSV_CHUNK_FRAMES, ChunkSink, ExportError, csv_from_parsed, csv_from_raw};
use crate::error::{Result, WorkerError};
use crate::jobs::{JobTracker, spread_progress};

const COPY_CHUNK: usize = 64 * 1024;

/// `errors.json` appended to archives with failed items.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorManifest<'a> {
    message: &'a str,
    errors: &'a [ItemError],
    success_count: usize,
    total_count: usize,
}

pub fn zip_file_name(job_id: &str) -> String {
    let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%S");
    format!(
        "motion_data_batch_{}_{stamp}.zip",
        safe_file_name(job_id, "job")
    )
}

/// Build one ZIP with an entry per requested record.
///
/// Items that cannot be exported are listed in `errors.json`. When nothing
/// could be exported the archive is deleted and a [`JobReport::Failed`] is
/// returned instead.
pub async fn process_download(
    ctx: &WorkerContext,
    tracker: &JobTracker<'_>,
    batch: &BatchDownload,
) -> Result<JobReport> {
    tracker.progress(5).await;

    tokio::fs::create_dir_all(&ctx.results_dir).await?;
    let zip_file_name = zip_file_name(tracker.job_id());
    let zip_file_path = ctx.results_dir.join(&zip_file_name);
    let mut sink = ZipSink::create(&zip_file_path).await?;

    tracker.progress(10).await;

    let total = batch.file_ids.len();
    let mut success_files = Vec::new();
    let mut errors = Vec::new();
    let mut used_names = HashSet::new();

    for (i, &id) in batch.file_ids.iter().enumerate() {
        if sink.is_closed() {
            discard(&zip_file_path).await;
            return Err(WorkerError::Job("archive writer stopped".into()));
        }

        match archive_record(ctx, &mut sink, id, batch.format, &mut used_names).await {
            Ok(filename) => success_files.push(ArchivedFile { id, filename }),
            Err(err) => {
                warn!(job_id = %tracker.job_id(), record_id = id, error = %err.error, "Skipping file in download");
                errors.push(err);
            }
        }
        tracker.progress(spread_progress(10, 85, i + 1, total)).await;
    }

    if success_files.is_empty() {
        // Best effort: close the writer before removing its file.
        let _ = sink.finish().await;
        discard(&zip_file_path).await;
        info!(job_id = %tracker.job_id(), failed = errors.len(), "No file could be archived");
        return Ok(JobReport::Failed { errors });
    }

    if !errors.is_empty() {
        let manifest = ErrorManifest {
            message: "Some files could not be exported",
            errors: &errors,
            success_count: success_files.len(),
            total_count: total,
        };
        let body = serde_json::to_vec_pretty(&manifest)?;
        sink.add_entry("errors.json", EntryCompression::Deflated, Bytes::from(body))
            .await?;
    }

    let size = match sink.finish().await {
        Ok(size) => size,
        Err(e) => {
            discard(&zip_file_path).await;
            return Err(e.into());
        }
    };

    info!(
        job_id = %tracker.job_id(),
        zip = %zip_file_name,
        size,
        archived = success_files.len(),
        failed = errors.len(),
        "Batch download archive ready"
    );

    Ok(JobReport::BatchDownload(DownloadReport {
        zip_file_name,
        zip_file_path,
        size,
        success_files,
        errors,
    }))
}

async fn archive_record(
    ctx: &WorkerContext,
    sink: &mut ZipSink,
    id: i32,
    format: ExportFormat,
    used_names: &mut HashSet<String>,
) -> std::result::Result<String, ItemError> {
    let item_error = |kind, error: String, filename: Option<String>| ItemError {
        id: Some(id),
        filename,
        kind,
        error,
    };

    let record = motion_data_file::Entity::find_by_id(id)
        .one(&ctx.db)
        .await
        .map_err(|e| item_error(ItemErrorKind::Internal, e.to_string(), None))?
        .ok_or_else(|| item_error(ItemErrorKind::NotFound, format!("record {id} not found"), None))?;
    let filename = Some(record.original_name.clone());

    if record.status != MotionDataStatus::Completed {
        return Err(item_error(
            ItemErrorKind::NotReady,
            format!("file is not ready (status: {})", record.status),
            filename,
        ));
    }

    let store = ctx
        .storage
        .resolve(record.storage)
        .await
        .map_err(|e| item_error(ItemErrorKind::Storage, e.to_string(), filename.clone()))?;

    let base = base_name(&record.original_name).to_string();
    let (extension, compression) = match format {
        ExportFormat::Csv => ("csv", EntryCompression::Deflated),
        ExportFormat::Jsonl => ("jsonl.gz", EntryCompression::Stored),
    };
    let entry_name = unique_entry_name(used_names, &base, extension, id);

    sink.start_entry(&entry_name, compression)
        .await
        .map_err(|e| item_error(ItemErrorKind::Internal, e.to_string(), filename.clone()))?;

    let written = write_entry(ctx, store.as_ref(), &record, format, sink).await;
    match written {
        Ok(()) => {
            sink.end_entry();
            used_names.insert(entry_name.clone());
            Ok(entry_name)
        }
        Err(e) => {
            if let Err(abort) = sink.abort_entry().await {
                warn!(record_id = id, error = %abort, "Failed to drop partial archive entry");
            }
            let kind = match &e {
                ExportError::Storage(s) if s.is_not_found() => ItemErrorKind::NotFound,
                ExportError::Storage(_) => ItemErrorKind::Storage,
                ExportError::Frame(_) | ExportError::Io(_) => ItemErrorKind::Transcode,
                ExportError::Layout(_) | ExportError::SinkClosed => ItemErrorKind::Internal,
            };
            Err(item_error(kind, e.to_string(), filename))
        }
    }
}

async fn write_entry(
    ctx: &WorkerContext,
    store: &dyn ObjectStore,
    record: &motion_data_file::Model,
    format: ExportFormat,
    sink: &mut ZipSink,
) -> std::result::Result<(), ExportError> {
    let raw_key = record.raw_object_key.as_deref();
    match (format, record.parsed_object_key.as_deref()) {
        (ExportFormat::Csv, Some(parsed)) => {
            csv_from_parsed(&ctx.columns, store, parsed, sink).await?;
        }
        (ExportFormat::Jsonl, Some(parsed)) => copy_object(store, parsed, sink).await?,
        (format, None) => {
            let raw = raw_key.ok_or_else(|| {
                ExportError::Storage(StorageError::NotFound(format!(
                    "record {} has no stored data",
                    record.id
                )))
            })?;
            match format {
                ExportFormat::Csv => {
                    csv_from_raw(&ctx.columns, store, raw, sink).await?;
                }
                ExportFormat::Jsonl => jsonl_from_raw(store, raw, sink).await?,
            }
        }
    }
    Ok(())
}

async fn copy_object<S: ChunkSink + ?Sized>(
    store: &dyn ObjectStore,
    key: &str,
    sink: &mut S,
) -> std::result::Result<(), ExportError> {
    let mut reader = store.get_stream(key).await?;
    let mut buf = vec![0u8; COPY_CHUNK];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        sink.write_chunk(Bytes::copy_from_slice(&buf[..n])).await?;
    }
}

/// Re-encode raw frames as `.jsonl.gz` when no parsed artifact exists.
async fn jsonl_from_raw<S: ChunkSink + ?Sized>(
    store: &dyn ObjectStore,
    raw_key: &str,
    sink: &mut S,
) -> std::result::Result<(), ExportError> {
    let total = store.size(raw_key).await? / FRAME_SIZE as u64;
    let mut encoder = JsonlGzEncoder::new();
    let mut offset = 0u64;
    while offset < total {
        let count = (CSV_CHUNK_FRAMES as u64).min(total - offset);
        let range = ByteRange::new(offset * FRAME_SIZE as u64, (offset + count) * FRAME_SIZE as u64);
        let buf = store.get_range(raw_key, range).await?;
        for at in (0..buf.len() / FRAME_SIZE).map(|i| i * FRAME_SIZE) {
            encoder.push_frame(&decode_frame(&buf, at)?)?;
        }
        let out = encoder.take_output();
        if !out.is_empty() {
            sink.write_chunk(Bytes::from(out)).await?;
        }
        offset += count;
    }
    sink.write_chunk(Bytes::from(encoder.finish()?)).await
}

fn unique_entry_name(used: &HashSet<String>, base: &str, extension: &str, id: i32) -> String {
    let name = format!("{base}.{extension}");
    if used.contains(&name) {
        format!("{base}_{id}.{extension}")
    } else {
        name
    }
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to delete archive");
        }
    }
}
