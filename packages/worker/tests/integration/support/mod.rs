use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use common::MotionDataStatus;
use common::entity::{motion_data_file, motion_job};
use common::job::{BatchDownload, BatchUpload, ExportFormat, UploadItem, UploadSource};
use common::motion::Frame;
use common::storage::{LocalObjectStore, ObjectKeys, ObjectStore, StorageKind, StorageRegistry};
use common::{JobEnvelope, MotionJob};
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, EntityTrait, Set};
use tempfile::TempDir;

use worker::{RetryPolicy, WorkerContext, handle_envelope};

pub const DEVICE: &str = "dev-01";
pub const FIRST_TS: u64 = 20250115103000000;

/// A worker context over an in-memory database and a scratch directory.
pub struct TestWorker {
    pub ctx: WorkerContext,
    pub db: DatabaseConnection,
    pub store: Arc<dyn ObjectStore>,
    pub dir: TempDir,
}

impl TestWorker {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_, store, _| store).await
    }

    /// Like `spawn`, but the worker sees the store returned by `wrap`.
    /// `store` stays the plain local store for assertions.
    pub async fn spawn_with<F>(wrap: F) -> Self
    where
        F: FnOnce(&DatabaseConnection, Arc<dyn ObjectStore>, &Path) -> Arc<dyn ObjectStore>,
    {
        let mut opts = ConnectOptions::new("sqlite::memory:");
        opts.max_connections(1)
            .min_connections(1)
            .sqlx_logging(false);
        let db = Database::connect(opts)
            .await
            .expect("Failed to open in-memory database");
        db.get_schema_registry("common::entity::*")
            .sync(&db)
            .await
            .expect("Failed to create schema");

        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store: Arc<dyn ObjectStore> = Arc::new(
            LocalObjectStore::new(dir.path().join("objects"))
                .await
                .expect("Failed to open local store"),
        );
        let seen = wrap(&db, Arc::clone(&store), dir.path());
        let ctx = local_context(db.clone(), seen, dir.path());

        Self {
            ctx,
            db,
            store,
            dir,
        }
    }

    pub fn results_dir(&self) -> PathBuf {
        self.dir.path().join("results")
    }

    /// Register a record the way the upload endpoint does.
    pub async fn register(&self, name: &str, revision: i32) -> motion_data_file::Model {
        let now = Utc::now();
        motion_data_file::ActiveModel {
            device_id: Set(DEVICE.into()),
            original_name: Set(name.into()),
            size_bytes: Set(0),
            revision: Set(revision),
            storage: Set(StorageKind::Local),
            entry_size_bytes: Set(924),
            sample_rate_hz: Set(100),
            status: Set(MotionDataStatus::Uploading),
            upload_time: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&self.db)
        .await
        .expect("Failed to insert record")
    }

    /// Write `bytes` to the staging area and return the path.
    pub async fn stage(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let staging = self.dir.path().join("staging");
        tokio::fs::create_dir_all(&staging).await.unwrap();
        let path = staging.join(format!("{}-{name}", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, bytes).await.unwrap();
        path
    }

    /// Register, stage and run a single-file upload job.
    pub async fn upload(&self, name: &str, bytes: &[u8]) -> motion_data_file::Model {
        let record = self.register(name, 1).await;
        let path = self.stage(name, bytes).await;
        self.run(upload_job(vec![item(&record, path)])).await;
        self.record(record.id).await
    }

    pub async fn run(&self, job: MotionJob) -> motion_job::Model {
        run_job(&self.ctx, job).await
    }

    pub async fn record(&self, id: i32) -> motion_data_file::Model {
        motion_data_file::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .unwrap()
            .expect("Record should exist")
    }
}

/// A worker context writing to `store` with results under `dir/results`.
pub fn local_context(db: DatabaseConnection, store: Arc<dyn ObjectStore>, dir: &Path) -> WorkerContext {
    let storage = StorageRegistry::with_stores(StorageKind::Local, ObjectKeys::default(), store, None);
    WorkerContext::new(db, Arc::new(storage), dir.join("results"))
}

/// Run `job` to completion on `ctx` and return its job row.
pub async fn run_job(ctx: &WorkerContext, job: MotionJob) -> motion_job::Model {
    let envelope = JobEnvelope {
        job_id: uuid::Uuid::new_v4().to_string(),
        user_id: Some(1),
        job,
    };
    let job_id = envelope.job_id.clone();
    let policy = RetryPolicy {
        max_attempts: 1,
        base_delay_ms: 1,
        max_delay_ms: 1,
    };
    handle_envelope(ctx, envelope, policy)
        .await
        .expect("Job handling failed");
    motion_job::Entity::find_by_id(job_id)
        .one(&ctx.db)
        .await
        .unwrap()
        .expect("Job row should exist")
}

pub fn item(record: &motion_data_file::Model, path: PathBuf) -> UploadItem {
    UploadItem {
        record_id: record.id,
        revision: record.revision,
        original_name: record.original_name.clone(),
        source: UploadSource::TempFile { path },
    }
}

pub fn upload_job(files: Vec<UploadItem>) -> MotionJob {
    MotionJob::BatchUpload(BatchUpload {
        device_id: DEVICE.into(),
        files,
    })
}

pub fn download_job(file_ids: Vec<i32>, format: ExportFormat) -> MotionJob {
    MotionJob::BatchDownload(BatchDownload { file_ids, format })
}

/// `count` consecutive frames starting at `first_ts`.
pub fn motion_bytes(first_ts: u64, count: u64) -> Vec<u8> {
    (0..count)
        .flat_map(|i| {
            let mut frame = Frame::with_timestamp(first_ts + i);
            frame.real[0] = i as f32 + 0.5;
            frame.uint = 7;
            frame.encode()
        })
        .collect()
}

pub fn zip_entries(path: &Path) -> Vec<(String, Vec<u8>)> {
    use std::io::Read;

    let file = std::fs::File::open(path).expect("Archive should exist");
    let mut archive = zip::ZipArchive::new(file).expect("Archive should be readable");
    (0..archive.len())
        .map(|i| {
            let mut entry = archive.by_index(i).unwrap();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            (entry.name().to_string(), data)
        })
        .collect()
}
