// Timestamp helpers - millisecond epochs are canonical throughout the store

/// Values below this are assumed to be second-based epochs.
pub const MS_EPOCH_THRESHOLD: i64 = 1_000_000_000_000;

/// Current time in milliseconds since Unix epoch
pub fn current_time_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

/// Normalize a timestamp that may be in seconds or milliseconds into a
/// millisecond epoch. Webhook payloads and contract reads do not agree on
/// precision, so every write into the store passes through here. Values too
/// large to scale saturate instead of wrapping.
pub fn normalize_timestamp_ms(timestamp: i64) -> i64 {
    if timestamp < MS_EPOCH_THRESHOLD {
        timestamp.saturating_mul(1000)
    } else {
        timestamp
    }
}
