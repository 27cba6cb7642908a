//! Stop queries
//!
//! Sort order is authoritative for visiting order. `reorder` rewrites every
//! position inside one transaction so readers never observe a partially
//! rewritten order.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::models::{Priority, Stop, StopItem, StopStatus};
use crate::error::{Error, Result};

/// Fields accepted when creating a stop
#[derive(Debug, Clone, Default)]
pub struct NewStop {
    pub customer_id: Option<Uuid>,
    pub customer_name: String,
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub phone: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub package_count: i64,
    pub cash_amount: f64,
    pub priority: Option<Priority>,
    pub stop_notes: Option<String>,
    pub added_by: Option<Uuid>,
    pub items: Vec<NewStopItem>,
}

#[derive(Debug, Clone)]
pub struct NewStopItem {
    pub quantity: i64,
    pub article_name: String,
    pub package_size: Option<String>,
    pub manufacturer_code: Option<String>,
}

/// Partial update of mutable stop fields
#[derive(Debug, Clone, Default)]
pub struct StopUpdate {
    pub customer_name: Option<String>,
    pub street: Option<Option<String>>,
    pub postal_code: Option<Option<String>>,
    pub city: Option<Option<String>>,
    pub phone: Option<Option<String>>,
    pub latitude: Option<Option<f64>>,
    pub longitude: Option<Option<f64>>,
    pub package_count: Option<i64>,
    pub cash_amount: Option<f64>,
    pub priority: Option<Priority>,
    pub stop_notes: Option<Option<String>>,
}

fn stop_from_row(row: &SqliteRow) -> Result<Stop> {
    let status_raw: String = row.get("status");
    let status = StopStatus::from_str(&status_raw)
        .ok_or_else(|| Error::Internal(format!("unknown stop status '{}'", status_raw)))?;
    let priority_raw: String = row.get("priority");
    let priority = Priority::from_str(&priority_raw)
        .ok_or_else(|| Error::Internal(format!("unknown priority '{}'", priority_raw)))?;

    Ok(Stop {
        id: super::parse_id(&row.get::<String, _>("id"))?,
        tour_id: super::parse_id(&row.get::<String, _>("tour_id"))?,
        customer_id: super::parse_opt_id(row.get("customer_id"))?,
        customer_name: row.get("customer_name"),
        street: row.get("street"),
        postal_code: row.get("postal_code"),
        city: row.get("city"),
        phone: row.get("phone"),
        latitude: row.get("latitude"),
        longitude: row.get("longitude"),
        package_count: row.get("package_count"),
        cash_amount: row.get("cash_amount"),
        cash_collected: row.get::<i64, _>("cash_collected") != 0,
        cash_collected_amount: row.get("cash_collected_amount"),
        cash_notes: row.get("cash_notes"),
        priority,
        stop_notes: row.get("stop_notes"),
        sort_order: row.get("sort_order"),
        status,
        completed_at: super::parse_opt_instant(row.get("completed_at"))?,
        completed_latitude: row.get("completed_latitude"),
        completed_longitude: row.get("completed_longitude"),
        rescheduled_to: super::parse_opt_date(row.get("rescheduled_to"))?,
        rescheduled_reason: row.get("rescheduled_reason"),
        added_by: super::parse_opt_id(row.get("added_by"))?,
        created_at: super::parse_instant(&row.get::<String, _>("created_at"))?,
    })
}

fn item_from_row(row: &SqliteRow) -> Result<StopItem> {
    Ok(StopItem {
        id: super::parse_id(&row.get::<String, _>("id"))?,
        stop_id: super::parse_id(&row.get::<String, _>("stop_id"))?,
        quantity: row.get("quantity"),
        article_name: row.get("article_name"),
        package_size: row.get("package_size"),
        manufacturer_code: row.get("manufacturer_code"),
        sort_order: row.get("sort_order"),
    })
}

/// Insert a stop at the end of the tour's visiting order (max sort_order + 1)
pub async fn insert(db: &SqlitePool, tour_id: Uuid, new: &NewStop) -> Result<Stop> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    let next_order: i64 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM delivery_stops WHERE tour_id = ?",
    )
    .bind(tour_id.to_string())
    .fetch_one(db)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO delivery_stops
            (id, tour_id, customer_id, customer_name, street, postal_code, city, phone,
             latitude, longitude, package_count, cash_amount, priority, stop_notes,
             sort_order, status, added_by, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(tour_id.to_string())
    .bind(new.customer_id.map(|c| c.to_string()))
    .bind(&new.customer_name)
    .bind(&new.street)
    .bind(&new.postal_code)
    .bind(&new.city)
    .bind(&new.phone)
    .bind(new.latitude)
    .bind(new.longitude)
    .bind(new.package_count.max(1))
    .bind(new.cash_amount)
    .bind(new.priority.unwrap_or(Priority::Normal).as_str())
    .bind(&new.stop_notes)
    .bind(next_order)
    .bind(new.added_by.map(|a| a.to_string()))
    .bind(now.to_rfc3339())
    .execute(db)
    .await?;

    for (idx, item) in new.items.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO delivery_stop_items
                (id, stop_id, quantity, article_name, package_size, manufacturer_code, sort_order)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(id.to_string())
        .bind(item.quantity.max(1))
        .bind(&item.article_name)
        .bind(&item.package_size)
        .bind(&item.manufacturer_code)
        .bind(idx as i64)
        .execute(db)
        .await?;
    }

    get(db, id).await
}

pub async fn get(db: &SqlitePool, stop_id: Uuid) -> Result<Stop> {
    let row = sqlx::query("SELECT * FROM delivery_stops WHERE id = ?")
        .bind(stop_id.to_string())
        .fetch_optional(db)
        .await?
        .ok_or_else(|| Error::NotFound(format!("stop {}", stop_id)))?;

    stop_from_row(&row)
}

/// Stops of a tour in visiting order
pub async fn list_for_tour(db: &SqlitePool, tour_id: Uuid) -> Result<Vec<Stop>> {
    let rows = sqlx::query(
        "SELECT * FROM delivery_stops WHERE tour_id = ? ORDER BY sort_order ASC",
    )
    .bind(tour_id.to_string())
    .fetch_all(db)
    .await?;

    rows.iter().map(stop_from_row).collect()
}

pub async fn list_items(db: &SqlitePool, stop_id: Uuid) -> Result<Vec<StopItem>> {
    let rows = sqlx::query(
        "SELECT * FROM delivery_stop_items WHERE stop_id = ? ORDER BY sort_order ASC",
    )
    .bind(stop_id.to_string())
    .fetch_all(db)
    .await?;

    rows.iter().map(item_from_row).collect()
}

pub async fn update_fields(db: &SqlitePool, stop_id: Uuid, update: &StopUpdate) -> Result<Stop> {
    let current = get(db, stop_id).await?;

    let customer_name = update.customer_name.clone().unwrap_or(current.customer_name);
    let street = update.street.clone().unwrap_or(current.street);
    let postal_code = update.postal_code.clone().unwrap_or(current.postal_code);
    let city = update.city.clone().unwrap_or(current.city);
    let phone = update.phone.clone().unwrap_or(current.phone);
    let latitude = update.latitude.unwrap_or(current.latitude);
    let longitude = update.longitude.unwrap_or(current.longitude);
    let package_count = update.package_count.unwrap_or(current.package_count);
    let cash_amount = update.cash_amount.unwrap_or(current.cash_amount);
    let priority = update.priority.unwrap_or(current.priority);
    let stop_notes = update.stop_notes.clone().unwrap_or(current.stop_notes);

    sqlx::query(
        r#"
        UPDATE delivery_stops
        SET customer_name = ?, street = ?, postal_code = ?, city = ?, phone = ?,
            latitude = ?, longitude = ?, package_count = ?, cash_amount = ?,
            priority = ?, stop_notes = ?
        WHERE id = ?
        "#,
    )
    .bind(&customer_name)
    .bind(&street)
    .bind(&postal_code)
    .bind(&city)
    .bind(&phone)
    .bind(latitude)
    .bind(longitude)
    .bind(package_count)
    .bind(cash_amount)
    .bind(priority.as_str())
    .bind(&stop_notes)
    .bind(stop_id.to_string())
    .execute(db)
    .await?;

    get(db, stop_id).await
}

/// Mark a stop completed, stamping `completed_at` only on the first call
pub async fn set_completed(
    db: &SqlitePool,
    stop_id: Uuid,
    latitude: Option<f64>,
    longitude: Option<f64>,
) -> Result<Stop> {
    sqlx::query(
        r#"
        UPDATE delivery_stops
        SET status = 'completed',
            completed_at = COALESCE(completed_at, ?),
            completed_latitude = COALESCE(?, completed_latitude),
            completed_longitude = COALESCE(?, completed_longitude)
        WHERE id = ?
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .bind(latitude)
    .bind(longitude)
    .bind(stop_id.to_string())
    .execute(db)
    .await?;

    get(db, stop_id).await
}

pub async fn set_skipped(db: &SqlitePool, stop_id: Uuid, notes: &str) -> Result<Stop> {
    sqlx::query("UPDATE delivery_stops SET status = 'skipped', stop_notes = ? WHERE id = ?")
        .bind(notes)
        .bind(stop_id.to_string())
        .execute(db)
        .await?;

    get(db, stop_id).await
}

pub async fn set_rescheduled(
    db: &SqlitePool,
    stop_id: Uuid,
    to: chrono::NaiveDate,
    reason: Option<&str>,
) -> Result<Stop> {
    sqlx::query(
        "UPDATE delivery_stops
         SET status = 'rescheduled', rescheduled_to = ?, rescheduled_reason = ?
         WHERE id = ?",
    )
    .bind(to.to_string())
    .bind(reason)
    .bind(stop_id.to_string())
    .execute(db)
    .await?;

    get(db, stop_id).await
}

/// Set cash-collection fields; never touches `status`
pub async fn set_cash_collected(
    db: &SqlitePool,
    stop_id: Uuid,
    amount: Option<f64>,
    notes: Option<&str>,
) -> Result<Stop> {
    sqlx::query(
        "UPDATE delivery_stops
         SET cash_collected = 1,
             cash_collected_amount = COALESCE(?, cash_collected_amount),
             cash_notes = COALESCE(?, cash_notes)
         WHERE id = ?",
    )
    .bind(amount)
    .bind(notes)
    .bind(stop_id.to_string())
    .execute(db)
    .await?;

    get(db, stop_id).await
}

/// Rewrite sort positions to match `ordered_ids` in one transaction.
///
/// Every stop of the tour must appear exactly once; otherwise the request is
/// rejected and nothing is written.
pub async fn reorder(db: &SqlitePool, tour_id: Uuid, ordered_ids: &[Uuid]) -> Result<()> {
    let existing = list_for_tour(db, tour_id).await?;

    if existing.len() != ordered_ids.len() {
        return Err(Error::Validation(format!(
            "reorder must cover all {} stops, got {}",
            existing.len(),
            ordered_ids.len()
        )));
    }
    for stop in &existing {
        if !ordered_ids.contains(&stop.id) {
            return Err(Error::Validation(format!(
                "reorder is missing stop {}",
                stop.id
            )));
        }
    }

    let mut tx = db.begin().await?;
    for (index, stop_id) in ordered_ids.iter().enumerate() {
        sqlx::query("UPDATE delivery_stops SET sort_order = ? WHERE id = ? AND tour_id = ?")
            .bind(index as i64)
            .bind(stop_id.to_string())
            .bind(tour_id.to_string())
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    Ok(())
}

pub async fn delete(db: &SqlitePool, stop_id: Uuid) -> Result<()> {
    let result = sqlx::query("DELETE FROM delivery_stops WHERE id = ?")
        .bind(stop_id.to_string())
        .execute(db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("stop {}", stop_id)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_database;
    use crate::db::tours::{self, NewTour};
    use chrono::NaiveDate;

    async fn fixture(db: &SqlitePool) -> Uuid {
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
        tour.id
    }

    fn stop_named(name: &str) -> NewStop {
        NewStop {
            customer_name: name.into(),
            package_count: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn sort_order_appends() {
        let db = init_memory_database().await.unwrap();
        let tour_id = fixture(&db).await;

        let a = insert(&db, tour_id, &stop_named("A")).await.unwrap();
        let b = insert(&db, tour_id, &stop_named("B")).await.unwrap();

        assert_eq!(a.sort_order, 0);
        assert_eq!(b.sort_order, 1);
    }

    #[tokio::test]
    async fn reorder_rewrites_permutation() {
        let db = init_memory_database().await.unwrap();
        let tour_id = fixture(&db).await;

        let a = insert(&db, tour_id, &stop_named("A")).await.unwrap();
        let b = insert(&db, tour_id, &stop_named("B")).await.unwrap();
        let c = insert(&db, tour_id, &stop_named("C")).await.unwrap();

        reorder(&db, tour_id, &[c.id, a.id, b.id]).await.unwrap();

        let stops = list_for_tour(&db, tour_id).await.unwrap();
        let names: Vec<_> = stops.iter().map(|s| s.customer_name.as_str()).collect();
        assert_eq!(names, ["C", "A", "B"]);

        let orders: Vec<_> = stops.iter().map(|s| s.sort_order).collect();
        assert_eq!(orders, [0, 1, 2]);
    }

    #[tokio::test]
    async fn reorder_rejects_incomplete_order() {
        let db = init_memory_database().await.unwrap();
        let tour_id = fixture(&db).await;

        let a = insert(&db, tour_id, &stop_named("A")).await.unwrap();
        let _b = insert(&db, tour_id, &stop_named("B")).await.unwrap();

        let err = reorder(&db, tour_id, &[a.id]).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        // Nothing written
        let stops = list_for_tour(&db, tour_id).await.unwrap();
        assert_eq!(stops[0].customer_name, "A");
        assert_eq!(stops[0].sort_order, 0);
    }

    #[tokio::test]
    async fn complete_is_idempotent_in_effect() {
        let db = init_memory_database().await.unwrap();
        let tour_id = fixture(&db).await;
        let stop = insert(&db, tour_id, &stop_named("A")).await.unwrap();

        let first = set_completed(&db, stop.id, Some(52.5), Some(13.4)).await.unwrap();
        let stamp = first.completed_at.unwrap();
        assert_eq!(first.completed_latitude, Some(52.5));

        let second = set_completed(&db, stop.id, None, None).await.unwrap();
        assert_eq!(second.status, StopStatus::Completed);
        assert_eq!(second.completed_at.unwrap(), stamp);
        assert_eq!(second.completed_latitude, Some(52.5));
    }

    #[tokio::test]
    async fn cash_collection_leaves_status_alone() {
        let db = init_memory_database().await.unwrap();
        let tour_id = fixture(&db).await;
        let stop = insert(&db, tour_id, &stop_named("A")).await.unwrap();

        set_skipped(&db, stop.id, "Übersprungen").await.unwrap();
        let updated = set_cash_collected(&db, stop.id, Some(12.5), Some("passend"))
            .await
            .unwrap();

        assert_eq!(updated.status, StopStatus::Skipped);
        assert!(updated.cash_collected);
        assert_eq!(updated.cash_collected_amount, Some(12.5));
    }

    #[tokio::test]
    async fn items_are_stored_with_the_stop() {
        let db = init_memory_database().await.unwrap();
        let tour_id = fixture(&db).await;

        let mut new = stop_named("A");
        new.items = vec![NewStopItem {
            quantity: 2,
            article_name: "Ibuprofen 400".into(),
            package_size: Some("20 St".into()),
            manufacturer_code: None,
        }];
        let stop = insert(&db, tour_id, &new).await.unwrap();

        let items = list_items(&db, stop.id).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].article_name, "Ibuprofen 400");
        assert_eq!(items[0].quantity, 2);
    }
}
