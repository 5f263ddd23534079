//! SSE event record.

/// Event received from the server.
///
/// One event is produced per SSE block (fields terminated by a blank line).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Event type (from the `event:` field). `None` when the server sent no
    /// `event:` field for the block.
    pub event: Option<String>,
    /// Event data: all `data:` field values of the block joined with newlines.
    pub data: String,
}

impl Event {
    /// Create a new event with data and no type.
    #[must_use]
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    /// Set the event type.
    #[must_use]
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    /// Check if this is a specific event type.
    #[must_use]
    pub fn is_event(&self, event_type: &str) -> bool {
        self.event.as_deref() == Some(event_type)
    }

    /// Parse data as JSON.
    ///
    /// # Errors
    /// Returns a JSON parsing error if the payload is not valid JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.data)
    }
}
