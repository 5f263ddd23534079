//! Event-Stream Client - Server-Sent Events (SSE) over HTTP(S)
//!
//! This crate provides a long-lived SSE subscription client:
//!
//! - **Frame Parsing**: Incremental decoding of the `text/event-stream` wire
//!   format, tolerant of arbitrary chunk fragmentation
//! - **Listener Fan-out**: Isolated delivery of events and lifecycle
//!   notifications to registered listeners
//! - **Automatic Reconnect**: Server-controlled retry cooldown (`retry:`) and
//!   resume via `Last-Event-ID`
//! - **Cookie Sessions**: Optional extension that carries session cookies
//!   across reconnects
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use eventstream_client::{EventStreamClient, EventStreamListener, Event};
//!
//! struct Printer;
//! impl EventStreamListener for Printer {
//!     fn on_event(&self, event: &Event) {
//!         println!("Event: {event:?}");
//!     }
//! }
//!
//! let client = EventStreamClient::new("https://api.example.com/events")?
//!     .with_listener(std::sync::Arc::new(Printer));
//! client.start();
//! client.join().await;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod client;
mod cursor;
mod error;
mod event;
mod listener;
mod parser;
mod session;
mod transport;

pub use client::*;
pub use cursor::*;
pub use error::*;
pub use event::*;
pub use listener::*;
pub use parser::*;
pub use session::*;
pub use transport::*;

/// Event id sent as `Last-Event-ID` before the server supplies one.
pub const DEFAULT_LAST_EVENT_ID: i64 = 1;

/// Default retry cooldown in milliseconds; non-positive means reconnect
/// without waiting. Overridden at runtime by the server's `retry:` field.
pub const DEFAULT_RETRY_COOLDOWN_MS: i64 = -1;
