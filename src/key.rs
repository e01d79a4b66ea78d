//! Canonical cache keys for (query, result count) pairs.

/// Smallest result count the provider accepts.
pub const MIN_RESULT_COUNT: u8 = 1;
/// Largest result count the provider accepts.
pub const MAX_RESULT_COUNT: u8 = 10;

/// Bound an optional result count into `1..=10`.
///
/// Negative values are treated as not provided. `0` clamps up to 1 and
/// anything above 10 clamps down to 10. This is the only place the rule
/// lives; the cache key and the provider `num` parameter both go through it.
pub fn clamp_result_count(count: Option<i64>) -> Option<u8> {
    match count {
        None => None,
        Some(n) if n < 0 => None,
        Some(n) => Some(n.clamp(MIN_RESULT_COUNT as i64, MAX_RESULT_COUNT as i64) as u8),
    }
}

/// Build the cache key for a query.
///
/// The query is trimmed and lowercased; a valid result count is appended as
/// `:<n>`. Never fails.
pub fn normalize(query: &str, result_count: Option<i64>) -> String {
    let base = query.trim().to_lowercase();
    match clamp_result_count(result_count) {
        Some(n) => format!("{base}:{n}"),
        None => base,
    }
}
