use chrono::Utc;
use common::MotionDataStatus;
use common::entity::motion_data_file;
use common::motion::FRAME_SIZE;
use common::storage::StorageKind;
use sea_orm::sea_query::{Expr, ExprTrait, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QuerySelect, Set, SqlErr, TransactionTrait,
};
use tracing::{debug, info};

const REGISTER_ATTEMPTS: usize = 3;

/// A freshly received file about to be handed to the worker.
#[derive(Debug, Clone)]
pub struct NewUpload<'a> {
    pub device_id: &'a str,
    pub original_name: &'a str,
    pub uploader_id: Option<i32>,
    pub size_bytes: u64,
    /// Backend for a record created by this upload. Existing records keep theirs.
    pub storage: StorageKind,
    pub sample_rate_hz: i32,
}

/// Create the record for `device_id + original_name` at revision 1, or bump
/// the existing one and reset its per-file results.
///
/// The increment runs as `revision = revision + 1` inside a transaction that
/// holds the row lock, so concurrent uploads of the same file always observe
/// distinct, increasing revisions. Two first uploads racing on the unique key
/// are resolved by retrying the loser as an update.
pub async fn register_upload(
    db: &DatabaseConnection,
    upload: &NewUpload<'_>,
) -> Result<motion_data_file::Model, DbErr> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match try_register(db, upload).await {
            Err(e)
                if attempt < REGISTER_ATTEMPTS
                    && matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) =>
            {
                debug!(
                    device_id = upload.device_id,
                    filename = upload.original_name,
                    attempt,
                    "Concurrent first upload, retrying as re-upload"
                );
            }
            result => return result,
        }
    }
}

async fn try_register(
    db: &DatabaseConnection,
    upload: &NewUpload<'_>,
) -> Result<motion_data_file::Model, DbErr> {
    let txn = db.begin().await?;
    let now = Utc::now();

    let existing = motion_data_file::Entity::find()
        .filter(motion_data_file::Column::DeviceId.eq(upload.device_id))
        .filter(motion_data_file::Column::OriginalName.eq(upload.original_name))
        .lock(LockType::Update)
        .one(&txn)
        .await?;

    let record = match existing {
        Some(record) => {
            motion_data_file::Entity::update_many()
                .set(motion_data_file::ActiveModel {
                    uploader_id: Set(upload.uploader_id),
                    task_id: Set(None),
                    size_bytes: Set(upload.size_bytes as i64),
                    raw_object_key: Set(None),
                    parsed_object_key: Set(None),
                    sha256: Set(None),
                    etag: Set(None),
                    total_frames: Set(None),
                    ts_first: Set(None),
                    ts_last: Set(None),
                    status: Set(MotionDataStatus::Uploading),
                    error_message: Set(None),
                    upload_time: Set(now),
                    parse_time: Set(None),
                    updated_at: Set(now),
                    ..Default::default()
                })
                .col_expr(
                    motion_data_file::Column::Revision,
                    Expr::col(motion_data_file::Column::Revision).add(1),
                )
                .filter(motion_data_file::Column::Id.eq(record.id))
                .exec(&txn)
                .await?;

            motion_data_file::Entity::find_by_id(record.id)
                .one(&txn)
                .await?
                .ok_or_else(|| DbErr::RecordNotFound(format!("motion_data_file {}", record.id)))?
        }
        None => {
            motion_data_file::ActiveModel {
                device_id: Set(upload.device_id.to_string()),
                original_name: Set(upload.original_name.to_string()),
                uploader_id: Set(upload.uploader_id),
                size_bytes: Set(upload.size_bytes as i64),
                revision: Set(1),
                storage: Set(upload.storage),
                entry_size_bytes: Set(FRAME_SIZE as i32),
                sample_rate_hz: Set(upload.sample_rate_hz),
                status: Set(MotionDataStatus::Uploading),
                upload_time: Set(now),
                updated_at: Set(now),
                ..Default::default()
            }
            .insert(&txn)
            .await?
        }
    };

    txn.commit().await?;

    info!(
        record_id = record.id,
        device_id = %record.device_id,
        filename = %record.original_name,
        revision = record.revision,
        "Registered upload"
    );
    Ok(record)
}

/// Claim a failed record for reprocessing from its stored raw bytes.
///
/// Bumps the revision so any job still holding the old one stands down.
/// Returns `None` if the record changed since `record` was read.
pub async fn claim_retry(
    db: &DatabaseConnection,
    record: &motion_data_file::Model,
) -> Result<Option<motion_data_file::Model>, DbErr> {
    let updated = motion_data_file::Entity::update_many()
        .col_expr(
            motion_data_file::Column::Revision,
            Expr::col(motion_data_file::Column::Revision).add(1),
        )
        .col_expr(
            motion_data_file::Column::Status,
            Expr::value(MotionDataStatus::Uploading),
        )
        .col_expr(
            motion_data_file::Column::ErrorMessage,
            Expr::value(Option::<String>::None),
        )
        .col_expr(motion_data_file::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(motion_data_file::Column::Id.eq(record.id))
        .filter(motion_data_file::Column::Revision.eq(record.revision))
        .exec(db)
        .await?;

    if updated.rows_affected == 0 {
        return Ok(None);
    }
    motion_data_file::Entity::find_by_id(record.id).one(db).await
}

/// Mark a registered record failed when its job never reached the queue.
/// A newer revision is left untouched.
pub async fn abandon_upload(
    db: &DatabaseConnection,
    record: &motion_data_file::Model,
    reason: &str,
) -> Result<bool, DbErr> {
    let updated = motion_data_file::Entity::update_many()
        .col_expr(
            motion_data_file::Column::Status,
            Expr::value(MotionDataStatus::ProcessingFailed),
        )
        .col_expr(
            motion_data_file::Column::ErrorMessage,
            Expr::value(Some(reason.to_string())),
        )
        .col_expr(motion_data_file::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(motion_data_file::Column::Id.eq(record.id))
        .filter(motion_data_file::Column::Revision.eq(record.revision))
        .exec(db)
        .await?;
    Ok(updated.rows_affected > 0)
}
