use chrono::Utc;
use common::MotionDataStatus;
use common::entity::motion_data_file;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseTransaction, DbErr, EntityTrait, QueryFilter,
    QuerySelect, Set, TransactionSession, TransactionTrait,
};

/// What a job finds when it re-reads its record.
#[derive(Debug)]
pub enum Lookup {
    Current(motion_data_file::Model),
    /// Someone re-uploaded the file after this job was enqueued.
    Stale { current: i32 },
    Missing,
}

/// Optimistic-concurrency handle for one record at the revision a job
/// captured when it was enqueued.
///
/// Every write is a single `UPDATE ... WHERE id = ? AND revision = ?`, so a
/// write from a superseded job matches no row and changes nothing.
pub struct RevisionGuard<'a, C: ConnectionTrait> {
    conn: &'a C,
    record_id: i32,
    revision: i32,
}

impl<'a, C: ConnectionTrait> RevisionGuard<'a, C> {
    pub fn new(conn: &'a C, record_id: i32, revision: i32) -> Self {
        Self {
            conn,
            record_id,
            revision,
        }
    }

    pub fn record_id(&self) -> i32 {
        self.record_id
    }

    pub fn revision(&self) -> i32 {
        self.revision
    }

    pub async fn lookup(&self) -> Result<Lookup, DbErr> {
        let found = motion_data_file::Entity::find_by_id(self.record_id)
            .one(self.conn)
            .await?;
        Ok(match found {
            None => Lookup::Missing,
            Some(m) if m.revision == self.revision => Lookup::Current(m),
            Some(m) => Lookup::Stale { current: m.revision },
        })
    }

    pub async fn is_current(&self) -> Result<bool, DbErr> {
        Ok(matches!(self.lookup().await?, Lookup::Current(_)))
    }

    /// Apply `changes` only if the record is still at this revision.
    ///
    /// Returns `false` when the write was discarded as stale.
    pub async fn write(&self, changes: motion_data_file::ActiveModel) -> Result<bool, DbErr> {
        write_at_revision(self.conn, self.record_id, self.revision, changes).await
    }

    pub async fn set_status(
        &self,
        status: MotionDataStatus,
        task_id: &str,
    ) -> Result<bool, DbErr> {
        self.write(motion_data_file::ActiveModel {
            status: Set(status),
            task_id: Set(Some(task_id.to_string())),
            ..Default::default()
        })
        .await
    }

    pub async fn fail(&self, status: MotionDataStatus, message: &str) -> Result<bool, DbErr> {
        self.write(motion_data_file::ActiveModel {
            status: Set(status),
            error_message: Set(Some(message.to_string())),
            ..Default::default()
        })
        .await
    }
}

impl<'a, C: ConnectionTrait + TransactionTrait<Transaction = DatabaseTransaction>> RevisionGuard<'a, C> {
    /// Open a transaction holding the record's row lock, the same lock
    /// `register_upload` takes before bumping a revision.
    ///
    /// Returns `None` (and rolls back) when the record moved on or vanished.
    pub async fn lock_current(&self) -> Result<Option<LockedRevision>, DbErr> {
        let txn = self.conn.begin().await?;
        let row = motion_data_file::Entity::find_by_id(self.record_id)
            .lock(LockType::Update)
            .one(&txn)
            .await?;
        match row {
            Some(m) if m.revision == self.revision => Ok(Some(LockedRevision {
                txn,
                record_id: self.record_id,
                revision: self.revision,
            })),
            _ => {
                txn.rollback().await?;
                Ok(None)
            }
        }
    }
}

/// A record locked at a known revision. No re-upload can bump the revision
/// until this is committed or dropped.
pub struct LockedRevision {
    txn: DatabaseTransaction,
    record_id: i32,
    revision: i32,
}

impl LockedRevision {
    pub async fn write(&self, changes: motion_data_file::ActiveModel) -> Result<bool, DbErr> {
        write_at_revision(&self.txn, self.record_id, self.revision, changes).await
    }

    pub async fn commit(self) -> Result<(), DbErr> {
        self.txn.commit().await
    }

    pub async fn rollback(self) -> Result<(), DbErr> {
        self.txn.rollback().await
    }
}

async fn write_at_revision<C: ConnectionTrait>(
    conn: &C,
    record_id: i32,
    revision: i32,
    mut changes: motion_data_file::ActiveModel,
) -> Result<bool, DbErr> {
    changes.updated_at = Set(Utc::now());
    let result = motion_data_file::Entity::update_many()
        .set(changes)
        .filter(motion_data_file::Column::Id.eq(record_id))
        .filter(motion_data_file::Column::Revision.eq(revision))
        .exec(conn)
        .await?;
    Ok(result.rows_affected > 0)
}
