//! Database initialization
//!
//! Creates the connection pool and the schema on first run. Safe to call
//! repeatedly; every statement is idempotent.

use std::path::Path;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::info;

use crate::error::Result;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    configure_and_migrate(&pool).await?;
    Ok(pool)
}

/// In-memory pool for tests
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    configure_and_migrate(&pool).await?;
    Ok(pool)
}

async fn configure_and_migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    // WAL allows concurrent readers with one writer; per-tour and per-courier
    // tasks read and write independently.
    sqlx::query("PRAGMA journal_mode = WAL").execute(pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(pool).await?;

    create_tours_table(pool).await?;
    create_customers_table(pool).await?;
    create_stops_table(pool).await?;
    create_stop_items_table(pool).await?;
    create_driver_positions_table(pool).await?;
    create_stop_photos_table(pool).await?;
    create_stop_signatures_table(pool).await?;

    Ok(())
}

async fn create_tours_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS delivery_tours (
            id TEXT PRIMARY KEY,
            pharmacy_id TEXT NOT NULL,
            name TEXT NOT NULL,
            date TEXT NOT NULL,
            driver_id TEXT,
            status TEXT NOT NULL DEFAULT 'draft',
            started_at TEXT,
            completed_at TEXT,
            route_polyline TEXT,
            total_distance_km REAL,
            estimated_duration_minutes INTEGER,
            optimized_at TEXT,
            source_pdf_url TEXT,
            source_pdf_path TEXT,
            created_by TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_tours_pharmacy_date
         ON delivery_tours (pharmacy_id, date)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_customers_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS delivery_customers (
            id TEXT PRIMARY KEY,
            pharmacy_id TEXT NOT NULL,
            name TEXT NOT NULL,
            street TEXT,
            postal_code TEXT,
            city TEXT,
            phone TEXT,
            delivery_notes TEXT,
            access_info TEXT,
            latitude REAL,
            longitude REAL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_customers_pharmacy_name
         ON delivery_customers (pharmacy_id, name)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_stops_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS delivery_stops (
            id TEXT PRIMARY KEY,
            tour_id TEXT NOT NULL REFERENCES delivery_tours(id) ON DELETE CASCADE,
            customer_id TEXT REFERENCES delivery_customers(id) ON DELETE SET NULL,
            customer_name TEXT NOT NULL,
            street TEXT,
            postal_code TEXT,
            city TEXT,
            phone TEXT,
            latitude REAL,
            longitude REAL,
            package_count INTEGER NOT NULL DEFAULT 1,
            cash_amount REAL NOT NULL DEFAULT 0,
            cash_collected INTEGER NOT NULL DEFAULT 0,
            cash_collected_amount REAL,
            cash_notes TEXT,
            priority TEXT NOT NULL DEFAULT 'normal',
            stop_notes TEXT,
            sort_order INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            completed_at TEXT,
            completed_latitude REAL,
            completed_longitude REAL,
            rescheduled_to TEXT,
            rescheduled_reason TEXT,
            added_by TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_stops_tour_order
         ON delivery_stops (tour_id, sort_order)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_stop_items_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS delivery_stop_items (
            id TEXT PRIMARY KEY,
            stop_id TEXT NOT NULL REFERENCES delivery_stops(id) ON DELETE CASCADE,
            quantity INTEGER NOT NULL DEFAULT 1,
            article_name TEXT NOT NULL,
            package_size TEXT,
            manufacturer_code TEXT,
            sort_order INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_driver_positions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS driver_positions (
            id TEXT PRIMARY KEY,
            driver_id TEXT NOT NULL,
            tour_id TEXT,
            latitude REAL NOT NULL,
            longitude REAL NOT NULL,
            accuracy REAL,
            heading REAL,
            speed REAL,
            recorded_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_positions_driver_time
         ON driver_positions (driver_id, recorded_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_positions_tour
         ON driver_positions (tour_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_stop_photos_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stop_photos (
            id TEXT PRIMARY KEY,
            stop_id TEXT NOT NULL REFERENCES delivery_stops(id) ON DELETE CASCADE,
            photo_url TEXT NOT NULL,
            storage_path TEXT NOT NULL,
            caption TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_stop_signatures_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stop_signatures (
            id TEXT PRIMARY KEY,
            stop_id TEXT NOT NULL REFERENCES delivery_stops(id) ON DELETE CASCADE,
            signature_url TEXT NOT NULL,
            storage_path TEXT NOT NULL,
            signer_name TEXT,
            signed_latitude REAL,
            signed_longitude REAL,
            signed_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_creation_is_idempotent() {
        let pool = init_memory_database().await.unwrap();
        // Second pass over the same pool must not fail
        configure_and_migrate(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("delivery.db");

        let pool = init_database(&db_path).await.unwrap();
        sqlx::query(
            "INSERT INTO delivery_customers
                 (id, pharmacy_id, name, created_at, updated_at)
             VALUES ('a', 'b', 'Bolz', '2025-06-02T08:00:00Z', '2025-06-02T08:00:00Z')",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool.close().await;

        let reopened = init_database(&db_path).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM delivery_customers")
            .fetch_one(&reopened)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
