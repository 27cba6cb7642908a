//! Import candidates
//!
//! The OCR/parsing side hands the pipeline an ordered batch of candidate
//! stops plus optional tour metadata detected in the source document. The
//! pipeline treats candidates as opaque input; only the address completeness
//! check interprets them.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::db::models::Customer;
use crate::db::stops::{NewStop, NewStopItem};

/// One OCR-derived candidate stop; fields may be empty or missing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StopCandidate {
    pub customer_name: String,
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub postal_code: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default = "default_package_count")]
    pub package_count: i64,
    #[serde(default)]
    pub cash_amount: f64,
    #[serde(default)]
    pub stop_notes: Option<String>,
    #[serde(default)]
    pub items: Vec<CandidateItem>,
}

fn default_package_count() -> i64 {
    1
}

/// Line item detected on a candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateItem {
    #[serde(default = "default_package_count")]
    pub quantity: i64,
    pub article_name: String,
    #[serde(default)]
    pub package_size: Option<String>,
    #[serde(default)]
    pub manufacturer_code: Option<String>,
}

/// An ordered batch of candidates plus tour metadata from the source document
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImportBatch {
    pub candidates: Vec<StopCandidate>,
    #[serde(default)]
    pub tour_date: Option<NaiveDate>,
    #[serde(default)]
    pub tour_name: Option<String>,
}

/// Corrections supplied by the dispatcher for an incomplete candidate
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CorrectedAddress {
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Address completeness: street and city non-empty, postal code a 5-digit
/// value. A matched customer's fields override the candidate's before the
/// check, so a known customer with a good address passes even when the scan
/// was unreadable.
pub fn is_address_complete(candidate: &StopCandidate, customer: Option<&Customer>) -> bool {
    let street = customer
        .and_then(|c| c.street.as_deref())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(&candidate.street);
    let postal_code = customer
        .and_then(|c| c.postal_code.as_deref())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(&candidate.postal_code);
    let city = customer
        .and_then(|c| c.city.as_deref())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(&candidate.city);

    !street.trim().is_empty() && is_valid_postal_code(postal_code) && !city.trim().is_empty()
}

fn is_valid_postal_code(plz: &str) -> bool {
    let plz = plz.trim();
    plz.len() == 5 && plz.bytes().all(|b| b.is_ascii_digit())
}

impl StopCandidate {
    /// Resolve to stop fields, preferring the matched customer's address and
    /// phone over the scanned values.
    pub fn to_new_stop(&self, customer: Option<&Customer>) -> NewStop {
        let pick = |own: &str, known: Option<&str>| -> Option<String> {
            let known = known.filter(|s| !s.trim().is_empty());
            let own = Some(own).filter(|s| !s.trim().is_empty());
            known.or(own).map(|s| s.trim().to_string())
        };

        NewStop {
            customer_id: None,
            customer_name: self.customer_name.trim().to_string(),
            street: pick(&self.street, customer.and_then(|c| c.street.as_deref())),
            postal_code: pick(
                &self.postal_code,
                customer.and_then(|c| c.postal_code.as_deref()),
            ),
            city: pick(&self.city, customer.and_then(|c| c.city.as_deref())),
            phone: pick(
                self.phone.as_deref().unwrap_or(""),
                customer.and_then(|c| c.phone.as_deref()),
            ),
            latitude: None,
            longitude: None,
            package_count: self.package_count.max(1),
            cash_amount: self.cash_amount,
            priority: None,
            stop_notes: self.stop_notes.clone(),
            added_by: None,
            items: self
                .items
                .iter()
                .map(|item| NewStopItem {
                    quantity: item.quantity.max(1),
                    article_name: item.article_name.clone(),
                    package_size: item.package_size.clone(),
                    manufacturer_code: item.manufacturer_code.clone(),
                })
                .collect(),
        }
    }

    /// Apply dispatcher corrections, replacing only the supplied fields
    pub fn with_corrections(&self, corrected: &CorrectedAddress) -> StopCandidate {
        let mut candidate = self.clone();
        if let Some(street) = &corrected.street {
            candidate.street = street.clone();
        }
        if let Some(postal_code) = &corrected.postal_code {
            candidate.postal_code = postal_code.clone();
        }
        if let Some(city) = &corrected.city {
            candidate.city = city.clone();
        }
        if let Some(phone) = &corrected.phone {
            candidate.phone = Some(phone.clone());
        }
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn candidate(street: &str, plz: &str, city: &str) -> StopCandidate {
        StopCandidate {
            customer_name: "Bolz, Hilde".into(),
            street: street.into(),
            postal_code: plz.into(),
            city: city.into(),
            package_count: 1,
            ..Default::default()
        }
    }

    fn customer_with(street: Option<&str>, plz: Option<&str>, city: Option<&str>) -> Customer {
        Customer {
            id: Uuid::new_v4(),
            pharmacy_id: Uuid::new_v4(),
            name: "Bolz, Hilde".into(),
            street: street.map(String::from),
            postal_code: plz.map(String::from),
            city: city.map(String::from),
            phone: None,
            delivery_notes: None,
            access_info: None,
            latitude: None,
            longitude: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn complete_address_passes() {
        assert!(is_address_complete(
            &candidate("Hauptstr. 1", "12345", "Berlin"),
            None
        ));
    }

    #[test]
    fn missing_pieces_fail() {
        assert!(!is_address_complete(&candidate("", "12345", "Berlin"), None));
        assert!(!is_address_complete(&candidate("Hauptstr. 1", "", "Berlin"), None));
        assert!(!is_address_complete(&candidate("Hauptstr. 1", "12345", ""), None));
        // Postal code must be exactly 5 digits
        assert!(!is_address_complete(&candidate("Hauptstr. 1", "1234", "Berlin"), None));
        assert!(!is_address_complete(&candidate("Hauptstr. 1", "1234a", "Berlin"), None));
    }

    #[test]
    fn customer_fields_override_blank_scan() {
        let customer = customer_with(Some("Nebenstr. 2"), Some("54321"), Some("Köln"));
        assert!(is_address_complete(&candidate("", "", ""), Some(&customer)));
    }

    #[test]
    fn empty_customer_fields_do_not_override() {
        let customer = customer_with(Some(""), None, Some("Köln"));
        assert!(!is_address_complete(&candidate("", "", ""), Some(&customer)));
    }

    #[test]
    fn to_new_stop_prefers_customer_address() {
        let customer = customer_with(Some("Nebenstr. 2"), Some("54321"), Some("Köln"));
        let new = candidate("Hauptstr. 1", "12345", "Berlin").to_new_stop(Some(&customer));

        assert_eq!(new.street.as_deref(), Some("Nebenstr. 2"));
        assert_eq!(new.postal_code.as_deref(), Some("54321"));
        assert_eq!(new.city.as_deref(), Some("Köln"));
    }

    #[test]
    fn corrections_replace_only_supplied_fields() {
        let corrected = candidate("", "", "Berlin").with_corrections(&CorrectedAddress {
            street: Some("Nebenstr. 2".into()),
            postal_code: Some("54321".into()),
            city: None,
            phone: None,
        });

        assert_eq!(corrected.street, "Nebenstr. 2");
        assert_eq!(corrected.postal_code, "54321");
        assert_eq!(corrected.city, "Berlin");
    }
}
