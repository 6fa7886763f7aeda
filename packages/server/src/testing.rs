use sea_orm::{ConnectOptions, Database, DatabaseConnection};

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
