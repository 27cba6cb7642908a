//! Tour queries

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::models::{Tour, TourStatus};
use crate::error::{Error, Result};

/// Fields accepted when creating a tour
#[derive(Debug, Clone)]
pub struct NewTour {
    pub pharmacy_id: Uuid,
    pub name: String,
    pub date: NaiveDate,
    pub driver_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
}

/// Partial update of mutable tour fields; `None` leaves the column untouched
#[derive(Debug, Clone, Default)]
pub struct TourUpdate {
    pub name: Option<String>,
    pub date: Option<NaiveDate>,
    pub driver_id: Option<Option<Uuid>>,
}

fn tour_from_row(row: &SqliteRow) -> Result<Tour> {
    let status_raw: String = row.get("status");
    let status = TourStatus::from_str(&status_raw)
        .ok_or_else(|| Error::Internal(format!("unknown tour status '{}'", status_raw)))?;

    Ok(Tour {
        id: super::parse_id(&row.get::<String, _>("id"))?,
        pharmacy_id: super::parse_id(&row.get::<String, _>("pharmacy_id"))?,
        name: row.get("name"),
        date: super::parse_date(&row.get::<String, _>("date"))?,
        driver_id: super::parse_opt_id(row.get("driver_id"))?,
        status,
        started_at: super::parse_opt_instant(row.get("started_at"))?,
        completed_at: super::parse_opt_instant(row.get("completed_at"))?,
        route_polyline: row.get("route_polyline"),
        total_distance_km: row.get("total_distance_km"),
        estimated_duration_minutes: row.get("estimated_duration_minutes"),
        optimized_at: super::parse_opt_instant(row.get("optimized_at"))?,
        source_pdf_url: row.get("source_pdf_url"),
        source_pdf_path: row.get("source_pdf_path"),
        created_by: super::parse_opt_id(row.get("created_by"))?,
        created_at: super::parse_instant(&row.get::<String, _>("created_at"))?,
        updated_at: super::parse_instant(&row.get::<String, _>("updated_at"))?,
    })
}

pub async fn insert(db: &SqlitePool, new: &NewTour) -> Result<Tour> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO delivery_tours
            (id, pharmacy_id, name, date, driver_id, status, created_by, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, 'draft', ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(new.pharmacy_id.to_string())
    .bind(&new.name)
    .bind(new.date.to_string())
    .bind(new.driver_id.map(|d| d.to_string()))
    .bind(new.created_by.map(|c| c.to_string()))
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(db)
    .await?;

    get(db, id).await
}

pub async fn get(db: &SqlitePool, tour_id: Uuid) -> Result<Tour> {
    let row = sqlx::query("SELECT * FROM delivery_tours WHERE id = ?")
        .bind(tour_id.to_string())
        .fetch_optional(db)
        .await?
        .ok_or_else(|| Error::NotFound(format!("tour {}", tour_id)))?;

    tour_from_row(&row)
}

/// List tours for a pharmacy, newest date first, optionally filtered by status
pub async fn list(
    db: &SqlitePool,
    pharmacy_id: Uuid,
    status: Option<TourStatus>,
) -> Result<Vec<Tour>> {
    let rows = match status {
        Some(status) => {
            sqlx::query(
                "SELECT * FROM delivery_tours
                 WHERE pharmacy_id = ? AND status = ?
                 ORDER BY date DESC, created_at DESC",
            )
            .bind(pharmacy_id.to_string())
            .bind(status.as_str())
            .fetch_all(db)
            .await?
        }
        None => {
            sqlx::query(
                "SELECT * FROM delivery_tours
                 WHERE pharmacy_id = ?
                 ORDER BY date DESC, created_at DESC",
            )
            .bind(pharmacy_id.to_string())
            .fetch_all(db)
            .await?
        }
    };

    rows.iter().map(tour_from_row).collect()
}

/// The driver's single active tour, if any (newest date wins)
pub async fn active_for_driver(db: &SqlitePool, driver_id: Uuid) -> Result<Option<Tour>> {
    let row = sqlx::query(
        "SELECT * FROM delivery_tours
         WHERE driver_id = ? AND status = 'active'
         ORDER BY date DESC LIMIT 1",
    )
    .bind(driver_id.to_string())
    .fetch_optional(db)
    .await?;

    row.as_ref().map(tour_from_row).transpose()
}

pub async fn update_fields(db: &SqlitePool, tour_id: Uuid, update: &TourUpdate) -> Result<Tour> {
    // Re-read first so partial updates start from the persisted state
    let current = get(db, tour_id).await?;

    let name = update.name.clone().unwrap_or(current.name);
    let date = update.date.unwrap_or(current.date);
    let driver_id = match &update.driver_id {
        Some(driver) => *driver,
        None => current.driver_id,
    };

    sqlx::query(
        "UPDATE delivery_tours SET name = ?, date = ?, driver_id = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&name)
    .bind(date.to_string())
    .bind(driver_id.map(|d| d.to_string()))
    .bind(Utc::now().to_rfc3339())
    .bind(tour_id.to_string())
    .execute(db)
    .await?;

    get(db, tour_id).await
}

/// Persist a status transition, stamping the transition timestamp exactly once
pub async fn set_status(
    db: &SqlitePool,
    tour_id: Uuid,
    status: TourStatus,
    stamp: Option<DateTime<Utc>>,
) -> Result<Tour> {
    let now = Utc::now();

    match status {
        TourStatus::Active => {
            sqlx::query(
                "UPDATE delivery_tours
                 SET status = ?, started_at = COALESCE(started_at, ?), updated_at = ?
                 WHERE id = ?",
            )
            .bind(status.as_str())
            .bind(stamp.unwrap_or(now).to_rfc3339())
            .bind(now.to_rfc3339())
            .bind(tour_id.to_string())
            .execute(db)
            .await?;
        }
        TourStatus::Completed => {
            sqlx::query(
                "UPDATE delivery_tours
                 SET status = ?, completed_at = COALESCE(completed_at, ?), updated_at = ?
                 WHERE id = ?",
            )
            .bind(status.as_str())
            .bind(stamp.unwrap_or(now).to_rfc3339())
            .bind(now.to_rfc3339())
            .bind(tour_id.to_string())
            .execute(db)
            .await?;
        }
        _ => {
            sqlx::query(
                "UPDATE delivery_tours SET status = ?, updated_at = ? WHERE id = ?",
            )
            .bind(status.as_str())
            .bind(now.to_rfc3339())
            .bind(tour_id.to_string())
            .execute(db)
            .await?;
        }
    }

    get(db, tour_id).await
}

/// Store the optimization result on the tour and stamp `optimized_at`
pub async fn set_route(
    db: &SqlitePool,
    tour_id: Uuid,
    polyline: Option<&str>,
    distance_km: Option<f64>,
    duration_minutes: Option<i64>,
) -> Result<()> {
    let now = Utc::now();
    sqlx::query(
        "UPDATE delivery_tours
         SET route_polyline = ?, total_distance_km = ?, estimated_duration_minutes = ?,
             optimized_at = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(polyline)
    .bind(distance_km)
    .bind(duration_minutes)
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .bind(tour_id.to_string())
    .execute(db)
    .await?;

    Ok(())
}

/// Attach the source document reference (uploaded scan/PDF) to the tour
pub async fn set_source_pdf(
    db: &SqlitePool,
    tour_id: Uuid,
    url: &str,
    storage_path: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE delivery_tours
         SET source_pdf_url = ?, source_pdf_path = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(url)
    .bind(storage_path)
    .bind(Utc::now().to_rfc3339())
    .bind(tour_id.to_string())
    .execute(db)
    .await?;

    Ok(())
}

pub async fn delete(db: &SqlitePool, tour_id: Uuid) -> Result<()> {
    let result = sqlx::query("DELETE FROM delivery_tours WHERE id = ?")
        .bind(tour_id.to_string())
        .execute(db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("tour {}", tour_id)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_database;

    async fn sample_tour(db: &SqlitePool) -> Tour {
        insert(
            db,
            &NewTour {
                pharmacy_id: Uuid::new_v4(),
                name: "Tour Nord".into(),
                date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
                driver_id: None,
                created_by: None,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn insert_and_get() {
        let db = init_memory_database().await.unwrap();
        let tour = sample_tour(&db).await;

        assert_eq!(tour.status, TourStatus::Draft);
        assert!(tour.started_at.is_none());

        let fetched = get(&db, tour.id).await.unwrap();
        assert_eq!(fetched.name, "Tour Nord");
        assert_eq!(fetched.date, tour.date);
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let db = init_memory_database().await.unwrap();
        let tour = sample_tour(&db).await;

        let drafts = list(&db, tour.pharmacy_id, Some(TourStatus::Draft))
            .await
            .unwrap();
        assert_eq!(drafts.len(), 1);

        let active = list(&db, tour.pharmacy_id, Some(TourStatus::Active))
            .await
            .unwrap();
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn started_at_is_stamped_once() {
        let db = init_memory_database().await.unwrap();
        let tour = sample_tour(&db).await;

        let first = set_status(&db, tour.id, TourStatus::Active, None)
            .await
            .unwrap();
        let stamp = first.started_at.unwrap();

        // A second write must not move the original stamp
        let second = set_status(&db, tour.id, TourStatus::Active, None)
            .await
            .unwrap();
        assert_eq!(second.started_at.unwrap(), stamp);
    }

    #[tokio::test]
    async fn missing_tour_is_not_found() {
        let db = init_memory_database().await.unwrap();
        let err = get(&db, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
