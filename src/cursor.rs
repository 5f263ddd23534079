//! Resume cursor shared across reconnects.

use crate::{DEFAULT_LAST_EVENT_ID, DEFAULT_RETRY_COOLDOWN_MS};

/// Per-client resume state that survives reconnects.
///
/// `last_event_id` is overwritten by server `id:` fields and incremented
/// locally after every dispatched event as a fallback numbering scheme.
/// `retry_cooldown_ms` is overwritten by server `retry:` fields; a
/// non-positive value means reconnect without waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    /// Id of the latest event, sent as `Last-Event-ID` on each request.
    pub last_event_id: i64,
    /// Cooldown in milliseconds before a reconnect attempt.
    pub retry_cooldown_ms: i64,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            last_event_id: DEFAULT_LAST_EVENT_ID,
            retry_cooldown_ms: DEFAULT_RETRY_COOLDOWN_MS,
        }
    }
}
