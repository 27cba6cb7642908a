//! Customer queries
//!
//! Two lookup precisions exist on purpose: the import pipeline matches by
//! name alone (case-insensitive, tolerant of scanned input), while stop
//! creation matches by name+street (explicit, precise). Both are here.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::models::Customer;
use crate::error::{Error, Result};

/// Fields accepted when creating a customer
#[derive(Debug, Clone, Default)]
pub struct NewCustomer {
    pub name: String,
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub phone: Option<String>,
    pub delivery_notes: Option<String>,
    pub access_info: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

fn customer_from_row(row: &SqliteRow) -> Result<Customer> {
    Ok(Customer {
        id: super::parse_id(&row.get::<String, _>("id"))?,
        pharmacy_id: super::parse_id(&row.get::<String, _>("pharmacy_id"))?,
        name: row.get("name"),
        street: row.get("street"),
        postal_code: row.get("postal_code"),
        city: row.get("city"),
        phone: row.get("phone"),
        delivery_notes: row.get("delivery_notes"),
        access_info: row.get("access_info"),
        latitude: row.get("latitude"),
        longitude: row.get("longitude"),
        created_at: super::parse_instant(&row.get::<String, _>("created_at"))?,
        updated_at: super::parse_instant(&row.get::<String, _>("updated_at"))?,
    })
}

pub async fn insert(db: &SqlitePool, pharmacy_id: Uuid, new: &NewCustomer) -> Result<Customer> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO delivery_customers
            (id, pharmacy_id, name, street, postal_code, city, phone,
             delivery_notes, access_info, latitude, longitude, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(pharmacy_id.to_string())
    .bind(&new.name)
    .bind(&new.street)
    .bind(&new.postal_code)
    .bind(&new.city)
    .bind(&new.phone)
    .bind(&new.delivery_notes)
    .bind(&new.access_info)
    .bind(new.latitude)
    .bind(new.longitude)
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(db)
    .await?;

    get(db, id).await
}

pub async fn get(db: &SqlitePool, customer_id: Uuid) -> Result<Customer> {
    let row = sqlx::query("SELECT * FROM delivery_customers WHERE id = ?")
        .bind(customer_id.to_string())
        .fetch_optional(db)
        .await?
        .ok_or_else(|| Error::NotFound(format!("customer {}", customer_id)))?;

    customer_from_row(&row)
}

pub async fn list(db: &SqlitePool, pharmacy_id: Uuid) -> Result<Vec<Customer>> {
    let rows = sqlx::query(
        "SELECT * FROM delivery_customers WHERE pharmacy_id = ? ORDER BY name ASC",
    )
    .bind(pharmacy_id.to_string())
    .fetch_all(db)
    .await?;

    rows.iter().map(customer_from_row).collect()
}

/// Substring search over name and street, for the dispatcher's lookup box
pub async fn search(db: &SqlitePool, pharmacy_id: Uuid, query: &str) -> Result<Vec<Customer>> {
    let pattern = format!("%{}%", query);
    let rows = sqlx::query(
        "SELECT * FROM delivery_customers
         WHERE pharmacy_id = ? AND (name LIKE ? COLLATE NOCASE OR street LIKE ? COLLATE NOCASE)
         ORDER BY name ASC LIMIT 10",
    )
    .bind(pharmacy_id.to_string())
    .bind(&pattern)
    .bind(&pattern)
    .fetch_all(db)
    .await?;

    rows.iter().map(customer_from_row).collect()
}

/// Case-insensitive exact name match (import pipeline precision)
pub async fn find_by_name(
    db: &SqlitePool,
    pharmacy_id: Uuid,
    name: &str,
) -> Result<Option<Customer>> {
    let row = sqlx::query(
        "SELECT * FROM delivery_customers
         WHERE pharmacy_id = ? AND name = ? COLLATE NOCASE LIMIT 1",
    )
    .bind(pharmacy_id.to_string())
    .bind(name.trim())
    .fetch_optional(db)
    .await?;

    row.as_ref().map(customer_from_row).transpose()
}

/// Case-insensitive name+street match (stop-creation precision)
pub async fn find_by_name_and_street(
    db: &SqlitePool,
    pharmacy_id: Uuid,
    name: &str,
    street: &str,
) -> Result<Option<Customer>> {
    let row = sqlx::query(
        "SELECT * FROM delivery_customers
         WHERE pharmacy_id = ? AND name = ? COLLATE NOCASE AND street = ? COLLATE NOCASE
         LIMIT 1",
    )
    .bind(pharmacy_id.to_string())
    .bind(name.trim())
    .bind(street.trim())
    .fetch_optional(db)
    .await?;

    row.as_ref().map(customer_from_row).transpose()
}

pub async fn update(db: &SqlitePool, customer_id: Uuid, new: &NewCustomer) -> Result<Customer> {
    sqlx::query(
        r#"
        UPDATE delivery_customers
        SET name = ?, street = ?, postal_code = ?, city = ?, phone = ?,
            delivery_notes = ?, access_info = ?, latitude = ?, longitude = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&new.name)
    .bind(&new.street)
    .bind(&new.postal_code)
    .bind(&new.city)
    .bind(&new.phone)
    .bind(&new.delivery_notes)
    .bind(&new.access_info)
    .bind(new.latitude)
    .bind(new.longitude)
    .bind(Utc::now().to_rfc3339())
    .bind(customer_id.to_string())
    .execute(db)
    .await?;

    get(db, customer_id).await
}

/// Backfill coordinates for a customer that has none yet.
///
/// Never overwrites existing coordinates; a manually verified address stays
/// authoritative.
pub async fn set_coordinates_if_missing(
    db: &SqlitePool,
    customer_id: Uuid,
    latitude: f64,
    longitude: f64,
) -> Result<()> {
    sqlx::query(
        "UPDATE delivery_customers
         SET latitude = COALESCE(latitude, ?), longitude = COALESCE(longitude, ?), updated_at = ?
         WHERE id = ?",
    )
    .bind(latitude)
    .bind(longitude)
    .bind(Utc::now().to_rfc3339())
    .bind(customer_id.to_string())
    .execute(db)
    .await?;

    Ok(())
}

pub async fn delete(db: &SqlitePool, customer_id: Uuid) -> Result<()> {
    let result = sqlx::query("DELETE FROM delivery_customers WHERE id = ?")
        .bind(customer_id.to_string())
        .execute(db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("customer {}", customer_id)));
    }
    Ok(())
}
