use std::sync::Arc;

use chrono::Utc;
use common::MotionDataStatus;
use common::entity::motion_data_file;
use common::motion::Frame;
use common::storage::{LocalObjectStore, ObjectKeys, ObjectStore, StorageKind, StorageRegistry};
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};

use crate::context::WorkerContext;

pub async fn memory_db() -> DatabaseConnection {
    let mut opt = ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = Database::connect(opt).await.unwrap();
    db.get_schema_registry("common::entity::*")
        .sync(&db)
        .await
        .unwrap();
    db
}

pub async fn insert_record(
    db: &DatabaseConnection,
    device_id: &str,
    name: &str,
    revision: i32,
) -> motion_data_file::Model {
    let now = Utc::now();
    motion_data_file::ActiveModel {
        device_id: Set(device_id.into()),
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
    .insert(db)
    .await
    .unwrap()
}

pub fn frame(timestamp: u64, seed: f32) -> Frame {
    let mut f = Frame::with_timestamp(timestamp);
    for (i, v) in f.real.iter_mut().enumerate() {
        *v = seed + i as f32;
    }
    f.dint = -5;
    f.uint = 17;
    f.bools[0] = true;
    f.inst_type[3] = 2;
    f.inst_udi[0] = 90;
    f
}

pub fn motion_bytes(first_ts: u64, count: u64) -> Vec<u8> {
    (0..count)
        .flat_map(|i| frame(first_ts + i, i as f32).encode())
        .collect()
}

pub async fn test_context(db: DatabaseConnection, dir: &std::path::Path) -> WorkerContext {
    let local: Arc<dyn ObjectStore> =
        Arc::new(LocalObjectStore::new(dir.join("objects")).await.unwrap());
    let storage = StorageRegistry::with_stores(StorageKind::Local, ObjectKeys::default(), local, None);
    WorkerContext::new(db, Arc::new(storage), dir.join("results"))
}
