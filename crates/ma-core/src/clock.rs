//! Wall-clock access, isolated so callers needing deterministic tests can
//! stub it via dependency injection rather than reaching for a mocking
//! crate (the teacher does the same for time-sensitive diagnostics).

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, used to back the `Date.now()` literal
/// in the condition/expression grammar (§4.12).
pub fn now_millis() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as f64
}
