use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use common::motion::Frame;
use common::notify::{BroadcastNotifier, Notifier};
use common::storage::{LocalObjectStore, ObjectKeys, ObjectStore, StorageKind, StorageRegistry};
use mq::Mq;
use reqwest::Client;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use serde_json::Value;
use tempfile::TempDir;

use server::config::{AppConfig, MotionConfig, MqAppConfig, MqBackend};
use server::state::AppState;
use worker::{RetryPolicy, WorkerContext, run_worker};

pub const DEVICE: &str = "RB-0001";
pub const FIRST_TS: u64 = 20250115103000000;

pub mod routes {
    pub const UPLOAD: &str = "/api/v1/motion-data/upload";
    pub const DOWNLOAD: &str = "/api/v1/motion-data/download";
    pub const JOBS: &str = "/api/v1/jobs";

    pub fn file(id: i64) -> String {
        format!("/api/v1/motion-data/{id}")
    }

    pub fn retry(id: i64) -> String {
        format!("/api/v1/motion-data/{id}/retry")
    }

    pub fn query(id: i64, start_ms: i64, end_ms: i64, max_points: Option<usize>) -> String {
        let mut url = format!("/api/v1/motion-data/{id}/query?start_ms={start_ms}&end_ms={end_ms}");
        if let Some(max) = max_points {
            url.push_str(&format!("&max_points={max}"));
        }
        url
    }

    pub fn preview(id: i64, offset: u64, limit: u64) -> String {
        format!("/api/v1/motion-data/{id}/preview?offset={offset}&limit={limit}")
    }

    pub fn export_csv(id: i64) -> String {
        format!("/api/v1/motion-data/{id}/export.csv")
    }

    pub fn job(id: &str) -> String {
        format!("/api/v1/jobs/{id}")
    }

    pub fn job_download(id: &str) -> String {
        format!("/api/v1/jobs/{id}/download")
    }

    pub fn job_events(id: &str) -> String {
        format!("/api/v1/jobs/{id}/events")
    }
}

/// A running server with an embedded worker over an in-memory database.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub db: DatabaseConnection,
    pub dir: TempDir,
}

/// Parsed HTTP response for test assertions.
pub struct TestResponse {
    pub status: u16,
    pub text: String,
    /// Parsed JSON body, or `Null` if the response is not valid JSON.
    pub body: Value,
}

impl TestResponse {
    async fn from_response(res: reqwest::Response) -> Self {
        let status = res.status().as_u16();
        let text = res.text().await.expect("Failed to read response body");
        let body = serde_json::from_str(&text).unwrap_or(Value::Null);
        Self { status, text, body }
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
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
        let storage =
            StorageRegistry::with_stores(StorageKind::Local, ObjectKeys::default(), store, None);

        let config = AppConfig {
            mq: MqAppConfig {
                backend: MqBackend::Memory,
                ..Default::default()
            },
            motion: MotionConfig {
                upload_temp_dir: dir.path().join("staging").display().to_string(),
                results_dir: dir.path().join("results").display().to_string(),
                max_batch_files: 5,
                ..Default::default()
            },
            ..Default::default()
        };

        let notifier = Arc::new(BroadcastNotifier::new(64));
        let ctx = WorkerContext::new(db.clone(), Arc::new(storage), dir.path().join("results"))
            .with_notifier(Arc::clone(&notifier) as Arc<dyn Notifier>);
        let mq = Mq::memory();

        let worker_ctx = ctx.clone();
        let worker_mq = mq.clone();
        let queue = config.mq.queue_name.clone();
        tokio::spawn(async move {
            let policy = RetryPolicy {
                max_attempts: 1,
                base_delay_ms: 1,
                max_delay_ms: 1,
            };
            let _ = run_worker(worker_ctx, &worker_mq, &queue, 2, policy).await;
        });

        let state = AppState {
            db: db.clone(),
            ctx,
            mq,
            notifier,
            config: Arc::new(config),
        };
        let app = server::build_router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            client: Client::new(),
            db,
            dir,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        let res = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to send GET request");

        TestResponse::from_response(res).await
    }

    /// GET on behalf of `user_id`, as the gateway would forward it.
    pub async fn get_as(&self, path: &str, user_id: &str) -> TestResponse {
        let res = self
            .client
            .get(self.url(path))
            .header("x-user-id", user_id)
            .send()
            .await
            .expect("Failed to send GET request");

        TestResponse::from_response(res).await
    }

    pub async fn get_raw(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to send GET request")
    }

    pub async fn post(&self, path: &str) -> TestResponse {
        let res = self
            .client
            .post(self.url(path))
            .send()
            .await
            .expect("Failed to send POST request");

        TestResponse::from_response(res).await
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> TestResponse {
        let res = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .expect("Failed to send POST request");

        TestResponse::from_response(res).await
    }

    /// Multipart upload of `files` for `device_id`.
    pub async fn upload(&self, device_id: Option<&str>, files: &[(&str, Vec<u8>)]) -> TestResponse {
        let mut form = reqwest::multipart::Form::new();
        if let Some(device_id) = device_id {
            form = form.text("device_id", device_id.to_string());
        }
        for (name, bytes) in files {
            let part = reqwest::multipart::Part::bytes(bytes.clone())
                .file_name(name.to_string())
                .mime_str("application/octet-stream")
                .expect("Failed to set MIME type");
            form = form.part("files", part);
        }

        let res = self
            .client
            .post(self.url(routes::UPLOAD))
            .header("x-user-id", "7")
            .multipart(form)
            .send()
            .await
            .expect("Failed to send upload");

        TestResponse::from_response(res).await
    }

    /// Poll a job until it completes or fails.
    pub async fn wait_for_job(&self, job_id: &str) -> Value {
        for _ in 0..200 {
            let res = self.get(&routes::job(job_id)).await;
            assert_eq!(res.status, 200, "job poll failed: {}", res.text);
            let state = res.body["state"].as_str().unwrap_or_default().to_string();
            if state == "completed" || state == "failed" {
                return res.body;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("job {job_id} did not finish");
    }

    /// Upload one file and wait for its job. Returns the record id.
    pub async fn upload_and_wait(&self, name: &str, bytes: Vec<u8>) -> i64 {
        let res = self.upload(Some(DEVICE), &[(name, bytes)]).await;
        assert_eq!(res.status, 202, "upload failed: {}", res.text);
        let job_id = res.body["job_id"].as_str().expect("job_id").to_string();
        let job = self.wait_for_job(&job_id).await;
        assert_eq!(job["state"], "completed", "upload job: {job}");
        res.body["files"][0]["id"].as_i64().expect("record id")
    }
}

/// `count` consecutive frames, one millisecond apart, starting at `first_ts`.
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

/// Epoch milliseconds of [`FIRST_TS`] with the default UTC device clock.
pub fn first_ms() -> i64 {
    Utc.with_ymd_and_hms(2025, 1, 15, 10, 30, 0)
        .unwrap()
        .timestamp_millis()
}

pub fn zip_entries(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    use std::io::Read;

    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).expect("Archive should be readable");
    (0..archive.len())
        .map(|i| {
            let mut entry = archive.by_index(i).unwrap();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            (entry.name().to_string(), data)
        })
        .collect()
}
