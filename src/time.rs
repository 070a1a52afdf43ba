/// Time utilities for the chat core.
///
/// Message ordering is keyed on server-assigned millisecond timestamps;
/// these helpers produce the matching local timestamps for pending entries.

/// Returns the current Unix timestamp in milliseconds.
pub fn now_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
