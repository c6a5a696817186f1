use chrono::{DateTime, Utc};
use rand::RngCore;

/// Prefix shared by every marketplace order reference.
pub const ORDER_NUMBER_PREFIX: &str = "NM";

/// Generates a human-facing order reference `NM-<BASE36 MILLIS>-<6 HEX>`.
pub fn generate_order_number() -> String {
    let mut suffix = [0u8; 3];
    rand::thread_rng().fill_bytes(&mut suffix);
    format_order_number(Utc::now(), suffix)
}

fn format_order_number(at: DateTime<Utc>, suffix: [u8; 3]) -> String {
    let millis = u64::try_from(at.timestamp_millis()).unwrap_or_default();
    format!(
        "{}-{}-{}",
        ORDER_NUMBER_PREFIX,
        to_base36(millis),
        hex::encode_upper(suffix)
    )
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::with_capacity(13);
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Cheap shape check used to route `GET /orders/:id` lookups.
pub fn looks_like_order_number(candidate: &str) -> bool {
    let mut parts = candidate.split('-');
    let (Some(prefix), Some(stamp), Some(random), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    prefix == ORDER_NUMBER_PREFIX
        && !stamp.is_empty()
        && stamp.bytes().all(|b| b.is_ascii_digit() || b.is_ascii_uppercase())
        && random.len() == 6
        && random.bytes().all(|b| b.is_ascii_hexdigit())
}
