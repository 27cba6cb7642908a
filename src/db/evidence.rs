//! Completion evidence queries (photos and signatures)
//!
//! Evidence rows are immutable once created; the only mutation is deletion,
//! which the caller pairs with a best-effort object-store delete.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::models::{StopPhoto, StopSignature};
use crate::error::{Error, Result};

fn photo_from_row(row: &SqliteRow) -> Result<StopPhoto> {
    Ok(StopPhoto {
        id: super::parse_id(&row.get::<String, _>("id"))?,
        stop_id: super::parse_id(&row.get::<String, _>("stop_id"))?,
        photo_url: row.get("photo_url"),
        storage_path: row.get("storage_path"),
        caption: row.get("caption"),
        created_at: super::parse_instant(&row.get::<String, _>("created_at"))?,
    })
}

fn signature_from_row(row: &SqliteRow) -> Result<StopSignature> {
    Ok(StopSignature {
        id: super::parse_id(&row.get::<String, _>("id"))?,
        stop_id: super::parse_id(&row.get::<String, _>("stop_id"))?,
        signature_url: row.get("signature_url"),
        storage_path: row.get("storage_path"),
        signer_name: row.get("signer_name"),
        signed_latitude: row.get("signed_latitude"),
        signed_longitude: row.get("signed_longitude"),
        signed_at: super::parse_instant(&row.get::<String, _>("signed_at"))?,
    })
}

pub async fn insert_photo(
    db: &SqlitePool,
    stop_id: Uuid,
    photo_url: &str,
    storage_path: &str,
    caption: Option<&str>,
) -> Result<StopPhoto> {
    let id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO stop_photos (id, stop_id, photo_url, storage_path, caption, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(stop_id.to_string())
    .bind(photo_url)
    .bind(storage_path)
    .bind(caption)
    .bind(Utc::now().to_rfc3339())
    .execute(db)
    .await?;

    let row = sqlx::query("SELECT * FROM stop_photos WHERE id = ?")
        .bind(id.to_string())
        .fetch_one(db)
        .await?;
    photo_from_row(&row)
}

pub async fn insert_signature(
    db: &SqlitePool,
    stop_id: Uuid,
    signature_url: &str,
    storage_path: &str,
    signer_name: Option<&str>,
    signed_latitude: Option<f64>,
    signed_longitude: Option<f64>,
    signed_at: DateTime<Utc>,
) -> Result<StopSignature> {
    let id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO stop_signatures
            (id, stop_id, signature_url, storage_path, signer_name,
             signed_latitude, signed_longitude, signed_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(stop_id.to_string())
    .bind(signature_url)
    .bind(storage_path)
    .bind(signer_name)
    .bind(signed_latitude)
    .bind(signed_longitude)
    .bind(signed_at.to_rfc3339())
    .execute(db)
    .await?;

    let row = sqlx::query("SELECT * FROM stop_signatures WHERE id = ?")
        .bind(id.to_string())
        .fetch_one(db)
        .await?;
    signature_from_row(&row)
}

pub async fn photos_for_stop(db: &SqlitePool, stop_id: Uuid) -> Result<Vec<StopPhoto>> {
    let rows = sqlx::query("SELECT * FROM stop_photos WHERE stop_id = ? ORDER BY created_at ASC")
        .bind(stop_id.to_string())
        .fetch_all(db)
        .await?;

    rows.iter().map(photo_from_row).collect()
}

pub async fn signature_for_stop(db: &SqlitePool, stop_id: Uuid) -> Result<Option<StopSignature>> {
    let row = sqlx::query(
        "SELECT * FROM stop_signatures WHERE stop_id = ? ORDER BY signed_at DESC LIMIT 1",
    )
    .bind(stop_id.to_string())
    .fetch_optional(db)
    .await?;

    row.as_ref().map(signature_from_row).transpose()
}

/// Delete a photo row, returning its storage path for object-store cleanup
pub async fn delete_photo(db: &SqlitePool, photo_id: Uuid) -> Result<String> {
    let path: Option<String> =
        sqlx::query_scalar("SELECT storage_path FROM stop_photos WHERE id = ?")
            .bind(photo_id.to_string())
            .fetch_optional(db)
            .await?;

    let path = path.ok_or_else(|| Error::NotFound(format!("photo {}", photo_id)))?;

    sqlx::query("DELETE FROM stop_photos WHERE id = ?")
        .bind(photo_id.to_string())
        .execute(db)
        .await?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_database;
    use crate::db::stops::{self, NewStop};
    use crate::db::tours::{self, NewTour};
    use chrono::NaiveDate;

    async fn stop_fixture(db: &SqlitePool) -> Uuid {
        let tour = tours::insert(
            db,
            &NewTour {
                pharmacy_id: Uuid::new_v4(),
                name: "Tour".into(),
                date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
                driver_id: None,
                created_by: None,
            },
        )
        .await
        .unwrap();

        let stop = stops::insert(
            db,
            tour.id,
            &NewStop {
                customer_name: "A".into(),
                package_count: 1,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        stop.id
    }

    #[tokio::test]
    async fn photo_round_trip() {
        let db = init_memory_database().await.unwrap();
        let stop_id = stop_fixture(&db).await;

        insert_photo(
            &db,
            stop_id,
            "https://store/photo.jpg",
            "stop-photos/x/1.jpg",
            Some("Haustür"),
        )
        .await
        .unwrap();

        let photos = photos_for_stop(&db, stop_id).await.unwrap();
        assert_eq!(photos.len(), 1);
        assert_eq!(photos[0].caption.as_deref(), Some("Haustür"));
    }

    #[tokio::test]
    async fn delete_photo_returns_storage_path() {
        let db = init_memory_database().await.unwrap();
        let stop_id = stop_fixture(&db).await;

        let photo = insert_photo(&db, stop_id, "https://store/p.jpg", "stop-photos/x/p.jpg", None)
            .await
            .unwrap();

        let path = delete_photo(&db, photo.id).await.unwrap();
        assert_eq!(path, "stop-photos/x/p.jpg");
        assert!(photos_for_stop(&db, stop_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn evidence_is_removed_with_the_stop() {
        let db = init_memory_database().await.unwrap();
        let stop_id = stop_fixture(&db).await;

        insert_signature(
            &db,
            stop_id,
            "https://store/s.png",
            "stop-signatures/x/s.png",
            Some("H. Bolz"),
            None,
            None,
            Utc::now(),
        )
        .await
        .unwrap();

        stops::delete(&db, stop_id).await.unwrap();
        assert!(signature_for_stop(&db, stop_id).await.unwrap().is_none());
    }
}
