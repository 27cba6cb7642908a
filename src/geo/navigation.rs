//! Navigation link builders
//!
//! Pure functions producing external turn-by-turn navigation URLs from stop
//! addresses. No network calls.

use crate::db::models::Stop;

/// URL opening turn-by-turn navigation to a single stop
pub fn navigation_url(stop: &Stop) -> Option<String> {
    let street = stop.street.as_deref()?.trim();
    if street.is_empty() {
        return None;
    }

    let address = format!(
        "{}, {} {}, Germany",
        street,
        stop.postal_code.as_deref().unwrap_or(""),
        stop.city.as_deref().unwrap_or("")
    );

    Some(format!(
        "https://www.google.com/maps/dir/?api=1&destination={}&travelmode=driving",
        encode_component(&address)
    ))
}

/// URL showing the whole tour as a multi-stop route
///
/// One address becomes a plain search link; with more, the first and last
/// are origin/destination and the rest waypoints.
pub fn tour_url(stops: &[Stop]) -> Option<String> {
    let addresses: Vec<String> = stops
        .iter()
        .filter_map(|s| {
            let street = s.street.as_deref()?.trim();
            if street.is_empty() {
                return None;
            }
            Some(encode_component(&format!(
                "{}, {} {}",
                street,
                s.postal_code.as_deref().unwrap_or(""),
                s.city.as_deref().unwrap_or("")
            )))
        })
        .collect();

    match addresses.len() {
        0 => None,
        1 => Some(format!(
            "https://www.google.com/maps/search/?api=1&query={}",
            addresses[0]
        )),
        _ => {
            let origin = &addresses[0];
            let destination = &addresses[addresses.len() - 1];
            let waypoints = addresses[1..addresses.len() - 1].join("%7C");

            let mut url = format!(
                "https://www.google.com/maps/dir/?api=1&origin={}&destination={}",
                origin, destination
            );
            if !waypoints.is_empty() {
                url.push_str("&waypoints=");
                url.push_str(&waypoints);
            }
            url.push_str("&travelmode=driving");
            Some(url)
        }
    }
}

/// Percent-encode a URL query component (RFC 3986 unreserved set kept)
fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for &byte in raw.as_bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
