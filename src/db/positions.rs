//! Driver position queries
//!
//! Samples are append-only and never mutated. "Latest position" is selected
//! by sample timestamp (`recorded_at`), not insertion order, so a delayed
//! sample can never shadow a newer one.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::models::DriverPosition;
use crate::error::Result;

/// One position fix to append
#[derive(Debug, Clone)]
pub struct NewPosition {
    pub driver_id: Uuid,
    pub tour_id: Option<Uuid>,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

fn position_from_row(row: &SqliteRow) -> Result<DriverPosition> {
    Ok(DriverPosition {
        id: super::parse_id(&row.get::<String, _>("id"))?,
        driver_id: super::parse_id(&row.get::<String, _>("driver_id"))?,
        tour_id: super::parse_opt_id(row.get("tour_id"))?,
        latitude: row.get("latitude"),
        longitude: row.get("longitude"),
        accuracy: row.get("accuracy"),
        heading: row.get("heading"),
        speed: row.get("speed"),
        recorded_at: super::parse_instant(&row.get::<String, _>("recorded_at"))?,
    })
}

pub async fn append(db: &SqlitePool, new: &NewPosition) -> Result<DriverPosition> {
    let id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO driver_positions
            (id, driver_id, tour_id, latitude, longitude, accuracy, heading, speed, recorded_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(new.driver_id.to_string())
    .bind(new.tour_id.map(|t| t.to_string()))
    .bind(new.latitude)
    .bind(new.longitude)
    .bind(new.accuracy)
    .bind(new.heading)
    .bind(new.speed)
    .bind(new.recorded_at.to_rfc3339())
    .execute(db)
    .await?;

    let row = sqlx::query("SELECT * FROM driver_positions WHERE id = ?")
        .bind(id.to_string())
        .fetch_one(db)
        .await?;

    position_from_row(&row)
}

/// Most recent sample per driver, newest first
pub async fn latest_per_driver(db: &SqlitePool) -> Result<Vec<DriverPosition>> {
    let rows = sqlx::query(
        r#"
        SELECT p.* FROM driver_positions p
        JOIN (
            SELECT driver_id, MAX(recorded_at) AS max_recorded
            FROM driver_positions
            GROUP BY driver_id
        ) latest
        ON p.driver_id = latest.driver_id AND p.recorded_at = latest.max_recorded
        ORDER BY p.recorded_at DESC
        "#,
    )
    .fetch_all(db)
    .await?;

    rows.iter().map(position_from_row).collect()
}

/// All samples for one tour in chronological order (dispatcher breadcrumb)
pub async fn track_for_tour(db: &SqlitePool, tour_id: Uuid) -> Result<Vec<DriverPosition>> {
    let rows = sqlx::query(
        "SELECT * FROM driver_positions WHERE tour_id = ? ORDER BY recorded_at ASC",
    )
    .bind(tour_id.to_string())
    .fetch_all(db)
    .await?;

    rows.iter().map(position_from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_database;
    use chrono::Duration;

    fn fix(driver_id: Uuid, lat: f64, at: DateTime<Utc>) -> NewPosition {
        NewPosition {
            driver_id,
            tour_id: None,
            latitude: lat,
            longitude: 13.4,
            accuracy: Some(5.0),
            heading: None,
            speed: None,
            recorded_at: at,
        }
    }

    #[tokio::test]
    async fn latest_selects_by_sample_timestamp_not_arrival() {
        let db = init_memory_database().await.unwrap();
        let driver = Uuid::new_v4();
        let t2 = Utc::now();
        let t1 = t2 - Duration::seconds(60);

        // The newer sample arrives first, the older one after it
        append(&db, &fix(driver, 52.2, t2)).await.unwrap();
        append(&db, &fix(driver, 52.1, t1)).await.unwrap();

        let latest = latest_per_driver(&db).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].latitude, 52.2);
        assert_eq!(latest[0].recorded_at, t2);
    }

    #[tokio::test]
    async fn latest_is_per_driver() {
        let db = init_memory_database().await.unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let now = Utc::now();

        append(&db, &fix(a, 50.0, now - Duration::seconds(30))).await.unwrap();
        append(&db, &fix(a, 50.1, now)).await.unwrap();
        append(&db, &fix(b, 51.0, now)).await.unwrap();

        let latest = latest_per_driver(&db).await.unwrap();
        assert_eq!(latest.len(), 2);
    }

    #[tokio::test]
    async fn track_is_chronological() {
        let db = init_memory_database().await.unwrap();
        let driver = Uuid::new_v4();
        let tour = Uuid::new_v4();
        let now = Utc::now();

        for (i, offset) in [30i64, 10, 20].iter().enumerate() {
            let mut sample = fix(driver, 52.0 + i as f64, now - Duration::seconds(*offset));
            sample.tour_id = Some(tour);
            append(&db, &sample).await.unwrap();
        }

        let track = track_for_tour(&db, tour).await.unwrap();
        assert_eq!(track.len(), 3);
        assert!(track.windows(2).all(|w| w[0].recorded_at <= w[1].recorded_at));
    }
}
