use common::JobState;
use common::MotionDataStatus;
use common::job::{UploadItem, UploadSource};
use common::motion::Frame;
use common::storage::ContentHash;
use sea_orm::{ActiveModelTrait, IntoActiveModel, Set};

use crate::support::{DEVICE, FIRST_TS, TestWorker, item, motion_bytes, upload_job};

const NAME: &str = "202501151030.bin";

async fn staging_is_empty(t: &TestWorker) -> bool {
    let mut entries = tokio::fs::read_dir(t.dir.path().join("staging")).await.unwrap();
    entries.next_entry().await.unwrap().is_none()
}

mod pipeline {
    use super::*;

    #[tokio::test]
    async fn valid_file_is_stored_and_transcoded() {
        let t = TestWorker::spawn().await;
        let bytes = motion_bytes(FIRST_TS, 2);
        assert_eq!(bytes.len(), 1848);

        let record = t.upload(NAME, &bytes).await;

        assert_eq!(record.status, MotionDataStatus::Completed);
        assert_eq!(record.revision, 1);
        assert_eq!(record.size_bytes, 1848);
        assert_eq!(record.total_frames, Some(2));
        assert_eq!(record.ts_first, Some(FIRST_TS as i64));
        assert_eq!(record.ts_last, Some(FIRST_TS as i64 + 1));
        assert_eq!(record.file_time_token.as_deref(), Some("202501151030"));
        assert_eq!(
            record.sha256.as_deref(),
            Some(ContentHash::compute(&bytes).to_hex().as_str())
        );
        assert!(record.error_message.is_none());
        assert!(record.parse_time.is_some());

        let keys = t.ctx.storage.keys();
        assert_eq!(
            record.raw_object_key.as_deref(),
            Some(keys.raw_key(DEVICE, NAME).as_str())
        );
        assert_eq!(t.store.get(&keys.raw_key(DEVICE, NAME)).await.unwrap(), bytes);
        assert!(t.store.exists(&keys.parsed_key(DEVICE, NAME)).await.unwrap());

        assert!(staging_is_empty(&t).await, "temp file should be deleted");
    }

    #[tokio::test]
    async fn job_row_reports_uploaded_files() {
        let t = TestWorker::spawn().await;
        let record = t.register(NAME, 1).await;
        let path = t.stage(NAME, &motion_bytes(FIRST_TS, 3)).await;

        let job = t.run(upload_job(vec![item(&record, path)])).await;

        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.job_type, "batch-upload");
        assert!(job.finished_at.is_some());

        let result = job.result.expect("completed job should carry a result");
        assert_eq!(result["type"], "batch-upload");
        assert_eq!(result["files"][0]["id"], record.id);
        assert_eq!(result["files"][0]["total_frames"], 3);
        assert_eq!(result["files"][0]["size"], 2772);
        assert!(result.get("errors").is_none());
    }

    #[tokio::test]
    async fn retry_rebuilds_from_stored_raw() {
        let t = TestWorker::spawn().await;
        let record = t.upload(NAME, &motion_bytes(FIRST_TS, 4)).await;
        let parsed_key = record.parsed_object_key.clone().unwrap();
        t.store.delete(&parsed_key).await.unwrap();

        let mut failed = record.clone().into_active_model();
        failed.status = Set(MotionDataStatus::ProcessingFailed);
        failed.parsed_object_key = Set(None);
        failed.update(&t.db).await.unwrap();

        let job = t
            .run(upload_job(vec![UploadItem {
                record_id: record.id,
                revision: record.revision,
                original_name: NAME.into(),
                source: UploadSource::StoredRaw,
            }]))
            .await;

        assert_eq!(job.state, JobState::Completed);
        let after = t.record(record.id).await;
        assert_eq!(after.status, MotionDataStatus::Completed);
        assert_eq!(after.total_frames, Some(4));
        assert_eq!(after.parsed_object_key.as_deref(), Some(parsed_key.as_str()));
        assert!(t.store.exists(&parsed_key).await.unwrap());
    }
}

mod staleness {
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use common::entity::motion_data_file;
    use common::motion::JsonlGzReader;
    use common::storage::{BoxReader, ByteRange, ObjectStore, PutOutcome, StorageError, StorageKind};
    use sea_orm::{DatabaseConnection, EntityTrait};

    use super::*;
    use crate::support::{local_context, run_job};

    /// Delegates to a local store, but the first write of a parsed object
    /// first re-registers the record at revision 2 and runs that upload to
    /// completion, as if a re-upload overtook the running job.
    struct ReuploadDuringTranscode {
        inner: Arc<dyn ObjectStore>,
        db: DatabaseConnection,
        dir: PathBuf,
        pending: Arc<Mutex<Option<UploadItem>>>,
    }

    impl ReuploadDuringTranscode {
        async fn overtake(&self, newer: UploadItem) {
            let mut record = motion_data_file::Entity::find_by_id(newer.record_id)
                .one(&self.db)
                .await
                .unwrap()
                .expect("record should exist")
                .into_active_model();
            record.revision = Set(newer.revision);
            record.status = Set(MotionDataStatus::Uploading);
            record.task_id = Set(None);
            record.update(&self.db).await.unwrap();

            let ctx = local_context(self.db.clone(), Arc::clone(&self.inner), &self.dir);
            let job = run_job(&ctx, upload_job(vec![newer])).await;
            assert_eq!(job.state, JobState::Completed);
        }
    }

    #[async_trait]
    impl ObjectStore for ReuploadDuringTranscode {
        fn kind(&self) -> StorageKind {
            self.inner.kind()
        }

        async fn put_stream(&self, key: &str, reader: BoxReader) -> Result<PutOutcome, StorageError> {
            let newer = if key.contains("/parsed/") {
                self.pending.lock().unwrap().take()
            } else {
                None
            };
            if let Some(newer) = newer {
                self.overtake(newer).await;
            }
            self.inner.put_stream(key, reader).await
        }

        async fn get_stream(&self, key: &str) -> Result<BoxReader, StorageError> {
            self.inner.get_stream(key).await
        }

        async fn get_range(&self, key: &str, range: ByteRange) -> Result<Vec<u8>, StorageError> {
            self.inner.get_range(key, range).await
        }

        async fn exists(&self, key: &str) -> Result<bool, StorageError> {
            self.inner.exists(key).await
        }

        async fn delete(&self, key: &str) -> Result<bool, StorageError> {
            self.inner.delete(key).await
        }

        async fn size(&self, key: &str) -> Result<u64, StorageError> {
            self.inner.size(key).await
        }

        async fn rename(&self, from: &str, to: &str) -> Result<(), StorageError> {
            self.inner.rename(from, to).await
        }
    }

    #[tokio::test]
    async fn reupload_during_transcode_keeps_newer_objects() {
        let pending = Arc::new(Mutex::new(None));
        let hook = Arc::clone(&pending);
        let t = TestWorker::spawn_with(move |db, inner, dir| {
            Arc::new(ReuploadDuringTranscode {
                inner,
                db: db.clone(),
                dir: dir.to_path_buf(),
                pending: hook,
            })
        })
        .await;

        let record = t.register(NAME, 1).await;
        let old_bytes = motion_bytes(FIRST_TS, 2);
        let new_bytes = motion_bytes(FIRST_TS + 100_000, 5);
        let old_path = t.stage(NAME, &old_bytes).await;
        let new_path = t.stage(NAME, &new_bytes).await;
        *pending.lock().unwrap() = Some(UploadItem {
            record_id: record.id,
            revision: 2,
            original_name: NAME.into(),
            source: UploadSource::TempFile { path: new_path },
        });

        let job = t.run(upload_job(vec![item(&record, old_path)])).await;

        assert!(pending.lock().unwrap().is_none(), "re-upload should have run");
        assert_eq!(job.state, JobState::Completed);
        let result = job.result.unwrap();
        assert_eq!(result["files"].as_array().unwrap().len(), 0);
        assert_eq!(result["skipped"][0]["reason"], "overwritten by a newer upload");

        let after = t.record(record.id).await;
        assert_eq!(after.revision, 2);
        assert_eq!(after.status, MotionDataStatus::Completed);
        assert_eq!(after.total_frames, Some(5));
        assert_eq!(after.ts_first, Some((FIRST_TS + 100_000) as i64));
        assert_eq!(after.ts_last, Some((FIRST_TS + 100_004) as i64));
        assert_eq!(
            after.sha256.as_deref(),
            Some(ContentHash::compute(&new_bytes).to_hex().as_str())
        );

        let keys = t.ctx.storage.keys();
        let raw_key = keys.raw_key(DEVICE, NAME);
        let parsed_key = keys.parsed_key(DEVICE, NAME);
        assert_eq!(t.store.get(&raw_key).await.unwrap(), new_bytes);

        let mut reader = JsonlGzReader::new(t.store.get_stream(&parsed_key).await.unwrap());
        let mut stamps = Vec::new();
        while let Some(batch) = reader.next_batch().await.unwrap() {
            stamps.extend(batch.iter().map(|r| Frame::from_json(r).unwrap().timestamp));
        }
        assert_eq!(stamps.len(), 5);
        assert_eq!(stamps[0], FIRST_TS + 100_000);

        for staging in [keys.staging_key(&raw_key, 1), keys.staging_key(&parsed_key, 1)] {
            assert!(!t.store.exists(&staging).await.unwrap(), "{staging} left behind");
        }
        assert!(staging_is_empty(&t).await);
    }

    #[tokio::test]
    async fn superseded_job_changes_nothing() {
        let t = TestWorker::spawn().await;
        let record = t.register(NAME, 2).await;
        let path = t.stage(NAME, &motion_bytes(FIRST_TS, 2)).await;

        let job = t
            .run(upload_job(vec![UploadItem {
                record_id: record.id,
                revision: 1,
                original_name: NAME.into(),
                source: UploadSource::TempFile { path },
            }]))
            .await;

        assert_eq!(job.state, JobState::Completed);
        let result = job.result.unwrap();
        assert_eq!(result["files"].as_array().unwrap().len(), 0);
        assert_eq!(result["skipped"][0]["id"], record.id);
        assert_eq!(result["skipped"][0]["reason"], "overwritten by a newer upload");

        let after = t.record(record.id).await;
        assert_eq!(after.status, MotionDataStatus::Uploading);
        assert_eq!(after.revision, 2);
        assert!(after.task_id.is_none());
        assert!(after.raw_object_key.is_none());

        let keys = t.ctx.storage.keys();
        assert!(!t.store.exists(&keys.raw_key(DEVICE, NAME)).await.unwrap());
        assert!(!t.store.exists(&keys.parsed_key(DEVICE, NAME)).await.unwrap());
        assert!(staging_is_empty(&t).await);
    }
}

mod validation {
    use super::*;

    #[tokio::test]
    async fn invalid_files_are_marked_file_error() {
        let t = TestWorker::spawn().await;

        let bad_name = t.register("motion.bin", 1).await;
        let misaligned = t.register("202501151031.bin", 1).await;
        let bad_ts = t.register("202501151032.bin", 1).await;
        let good = t.register(NAME, 1).await;

        let mut bad_ts_bytes = Frame::with_timestamp(123).encode().to_vec();
        bad_ts_bytes.extend(motion_bytes(FIRST_TS, 1));

        let items = vec![
            item(&bad_name, t.stage("motion.bin", &motion_bytes(FIRST_TS, 1)).await),
            item(&misaligned, t.stage("202501151031.bin", &[0u8; 1000]).await),
            item(&bad_ts, t.stage("202501151032.bin", &bad_ts_bytes).await),
            item(&good, t.stage(NAME, &motion_bytes(FIRST_TS, 1)).await),
        ];
        let job = t.run(upload_job(items)).await;

        assert_eq!(job.state, JobState::Completed);
        let result = job.result.unwrap();
        assert_eq!(result["files"].as_array().unwrap().len(), 1);
        let errors = result["errors"].as_array().unwrap();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().all(|e| e["kind"] == "validation"));

        for id in [bad_name.id, misaligned.id, bad_ts.id] {
            let record = t.record(id).await;
            assert_eq!(record.status, MotionDataStatus::FileError);
            assert!(record.error_message.is_some());
            assert!(record.raw_object_key.is_none());
        }
        assert!(
            t.record(misaligned.id)
                .await
                .error_message
                .unwrap()
                .contains("not a multiple of 924")
        );

        let keys = t.ctx.storage.keys();
        assert!(!t.store.exists(&keys.raw_key(DEVICE, "202501151031.bin")).await.unwrap());
        assert_eq!(t.record(good.id).await.status, MotionDataStatus::Completed);
        assert!(staging_is_empty(&t).await);
    }

    #[tokio::test]
    async fn missing_record_is_reported_per_item() {
        let t = TestWorker::spawn().await;
        let path = t.stage(NAME, &motion_bytes(FIRST_TS, 1)).await;

        let job = t
            .run(upload_job(vec![UploadItem {
                record_id: 404,
                revision: 1,
                original_name: NAME.into(),
                source: UploadSource::TempFile { path },
            }]))
            .await;

        assert_eq!(job.state, JobState::Completed);
        let result = job.result.unwrap();
        assert_eq!(result["errors"][0]["kind"], "not_found");
        assert!(staging_is_empty(&t).await);
    }
}
