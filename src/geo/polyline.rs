//! Encoded polyline codec
//!
//! Google's polyline format: deltas scaled by 1e5, zigzag-signed, emitted as
//! 5-bit groups offset by 63. Decoding tolerates a truncated tail by
//! stopping at the last complete point.

/// Decode an encoded polyline into `(lat, lon)` points
pub fn decode(encoded: &str) -> Vec<(f64, f64)> {
    let bytes = encoded.as_bytes();
    let mut points = Vec::new();
    let mut index = 0usize;
    let mut lat: i64 = 0;
    let mut lon: i64 = 0;

    while index < bytes.len() {
        let (d_lat, next) = match decode_value(bytes, index) {
            Some(v) => v,
            None => break,
        };
        lat += d_lat;

        let (d_lon, next) = match decode_value(bytes, next) {
            Some(v) => v,
            None => break,
        };
        lon += d_lon;
        index = next;

        points.push((lat as f64 / 1e5, lon as f64 / 1e5));
    }

    points
}

fn decode_value(bytes: &[u8], mut index: usize) -> Option<(i64, usize)> {
    let mut shift = 0u32;
    let mut result: i64 = 0;

    loop {
        let byte = (*bytes.get(index)? as i64) - 63;
        index += 1;
        result |= (byte & 0x1f) << shift;
        shift += 5;
        if byte < 0x20 {
            break;
        }
    }

    let value = if result & 1 != 0 { !(result >> 1) } else { result >> 1 };
    Some((value, index))
}

/// Encode `(lat, lon)` points into a polyline string
pub fn encode(points: &[(f64, f64)]) -> String {
    let mut out = String::new();
    let mut prev_lat: i64 = 0;
    let mut prev_lon: i64 = 0;

    for &(lat, lon) in points {
        let lat_e5 = (lat * 1e5).round() as i64;
        let lon_e5 = (lon * 1e5).round() as i64;

        encode_value(lat_e5 - prev_lat, &mut out);
        encode_value(lon_e5 - prev_lon, &mut out);

        prev_lat = lat_e5;
        prev_lon = lon_e5;
    }

    out
}

fn encode_value(value: i64, out: &mut String) {
    let mut v = if value < 0 { !(value << 1) } else { value << 1 };

    while v >= 0x20 {
        out.push((((v & 0x1f) | 0x20) as u8 + 63) as char);
        v >>= 5;
    }
    out.push((v as u8 + 63) as char);
}
