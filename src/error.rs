//! Streaming error types.

/// Errors raised by the event-stream client.
///
/// Network and peer-originated errors are asynchronous and routed to
/// listeners via [`EventStreamListener::on_error`](crate::EventStreamListener::on_error);
/// configuration errors are returned synchronously to the caller.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// A field with a numeric value (`id:` or `retry:`) could not be parsed.
    /// Non-fatal; the field is ignored and parsing continues.
    #[error("invalid {field} field: {value:?}")]
    InvalidField {
        /// Field name as it appears on the wire.
        field: &'static str,
        /// Raw value that failed to parse.
        value: String,
    },

    /// Transport-level failure (connection reset, DNS, timeout).
    #[error("transport failure: {0}")]
    Transport(String),

    /// HTTP error response.
    #[error("HTTP error: {status} - {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
    },

    /// The parser's accumulation buffer exceeded its configured limit
    /// before a block terminator arrived.
    #[error("buffer overflow: {size} bytes exceeds limit of {limit}")]
    BufferOverflow {
        /// Bytes that would have been buffered.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// A listener handler panicked while processing a notification.
    #[error("listener failed: {0}")]
    Listener(String),

    /// Header or cookie key was empty or blank.
    #[error("key cannot be empty or blank")]
    InvalidKey,

    /// Raw cookie string without a `=` separator, or with `=` first.
    #[error("cookie has invalid format: {0:?}")]
    CookieFormat(String),

    /// Target URL could not be parsed.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// HTTP client error.
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

/// Result type for streaming operations.
pub type StreamResult<T> = Result<T, StreamError>;
