//! SSE client: connection driving and reconnection control.
//!
//! One background task owns the active attempt. `start()` schedules it and
//! returns; the task feeds bytes to the frame parser, fans parsed events out
//! to listeners, and decides after each terminal outcome whether to retry
//! (after the current cooldown) or stop for good.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::listener::{
    dispatch_close, dispatch_error, dispatch_event, dispatch_reconnect, ListenerSet,
};
use crate::{
    Cursor, EventStreamListener, FrameParser, ParserItem, ReqwestTransport, Request, RequestMethod,
    ResponseInfo, StreamError, StreamResult, Transport, DEFAULT_MAX_BUFFER_SIZE,
};

/// Headers the protocol owns. Applied after all caller headers on every
/// request build, so caller configuration can never suppress them.
const RESERVED_HEADERS: [(&str, &str); 2] = [
    ("accept", "text/event-stream"),
    ("cache-control", "no-cache"),
];

const HEADER_LAST_EVENT_ID: &str = "last-event-id";

/// Crate-internal observer used by extensions (cookie sessions) to hook the
/// request lifecycle without appearing in the public listener surface.
#[allow(unused_variables)]
pub(crate) trait InternalAdapter: Send + Sync {
    /// Called at the top of every attempt with the previous attempt's
    /// terminal response, if any.
    fn attempt_begin(&self, last_response: Option<&ResponseInfo>) {}

    /// Called with the fully built request immediately before send.
    fn before_send(&self, request: &mut Request) {}

    /// Called when the client stops permanently.
    fn closed(&self, last_response: Option<&ResponseInfo>) {}
}

/// Persistent, caller-mutable configuration. Guarded by one mutex so a
/// request snapshot always observes a consistent view.
struct Config {
    url: Url,
    method: RequestMethod,
    body: Option<Bytes>,
    version: Option<reqwest::Version>,
    headers: BTreeMap<String, String>,
    timeout: Option<Duration>,
    auto_stop_if_no_events: bool,
    max_buffer_size: usize,
    cursor: Cursor,
}

/// The running loop task plus a generation counter. Each `start()` bumps
/// the generation, so a superseded loop can tell it no longer owns the
/// client when it reaches its stop decision.
struct AttemptSlot {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

struct Inner {
    config: Mutex<Config>,
    transport: Mutex<Arc<dyn Transport>>,
    listeners: Mutex<ListenerSet>,
    internal: Mutex<Vec<Arc<dyn InternalAdapter>>>,
    last_response: Mutex<Option<ResponseInfo>>,
    received_events: AtomicBool,
    /// Gate ensuring at most one close notification per run.
    active: AtomicBool,
    running_tx: watch::Sender<bool>,
    attempt: Mutex<AttemptSlot>,
}

/// HTTP client that listens for Server-Sent Events.
///
/// Implements the full wire protocol and reconnects automatically, resuming
/// via the `Last-Event-ID` header. Cloning is cheap and shares state.
#[derive(Clone)]
pub struct EventStreamClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EventStreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStreamClient")
            .field("url", &self.url())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl EventStreamClient {
    /// Create a client for the given URL. Listening begins with
    /// [`start`](Self::start).
    ///
    /// # Errors
    /// Returns [`StreamError::InvalidUrl`] if the URL does not parse.
    pub fn new(url: impl AsRef<str>) -> StreamResult<Self> {
        let url = Url::parse(url.as_ref())?;
        let (running_tx, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(Inner {
                config: Mutex::new(Config {
                    url,
                    method: RequestMethod::Get,
                    body: None,
                    version: None,
                    headers: BTreeMap::new(),
                    timeout: None,
                    auto_stop_if_no_events: false,
                    max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
                    cursor: Cursor::default(),
                }),
                transport: Mutex::new(Arc::new(ReqwestTransport::new())),
                listeners: Mutex::new(ListenerSet::default()),
                internal: Mutex::new(Vec::new()),
                last_response: Mutex::new(None),
                received_events: AtomicBool::new(false),
                active: AtomicBool::new(false),
                running_tx,
                attempt: Mutex::new(AttemptSlot {
                    generation: 0,
                    handle: None,
                }),
            }),
        })
    }

    // ----- builder-style configuration -------------------------------------

    /// Set the HTTP method.
    #[must_use]
    pub fn with_method(self, method: RequestMethod) -> Self {
        self.set_method(method);
        self
    }

    /// Set the request body.
    #[must_use]
    pub fn with_body(self, body: impl Into<Bytes>) -> Self {
        self.set_body(Some(body.into()));
        self
    }

    /// Add a header.
    ///
    /// # Errors
    /// Returns [`StreamError::InvalidKey`] if the key is blank.
    pub fn with_header(self, key: &str, value: &str) -> StreamResult<Self> {
        self.set_header(key, value)?;
        Ok(self)
    }

    /// Set the request timeout.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.set_timeout(Some(timeout));
        self
    }

    /// Set the retry cooldown in milliseconds.
    #[must_use]
    pub fn with_retry_cooldown(self, cooldown_ms: i64) -> Self {
        self.set_retry_cooldown(cooldown_ms);
        self
    }

    /// Enable or disable auto-stop when a connection closes without events.
    #[must_use]
    pub fn with_auto_stop_if_no_events(self, enabled: bool) -> Self {
        self.set_auto_stop_if_no_events(enabled);
        self
    }

    /// Set the parser buffer cap in bytes.
    #[must_use]
    pub fn with_max_buffer_size(self, limit: usize) -> Self {
        self.set_max_buffer_size(limit);
        self
    }

    /// Override the transport implementation.
    #[must_use]
    pub fn with_transport(self, transport: Arc<dyn Transport>) -> Self {
        self.set_transport(transport);
        self
    }

    /// Register a listener.
    #[must_use]
    pub fn with_listener(self, listener: Arc<dyn EventStreamListener>) -> Self {
        self.add_listener(listener);
        self
    }

    // ----- runtime configuration -------------------------------------------

    /// URL this client listens at.
    #[must_use]
    pub fn url(&self) -> String {
        self.inner.config.lock().unwrap().url.to_string()
    }

    /// HTTP method used for requests.
    #[must_use]
    pub fn method(&self) -> RequestMethod {
        self.inner.config.lock().unwrap().method
    }

    /// Set the HTTP method used for requests.
    pub fn set_method(&self, method: RequestMethod) {
        self.inner.config.lock().unwrap().method = method;
    }

    /// Request body, if any.
    #[must_use]
    pub fn body(&self) -> Option<Bytes> {
        self.inner.config.lock().unwrap().body.clone()
    }

    /// Set the request body. Only used for POST/PUT, ignored otherwise.
    pub fn set_body(&self, body: Option<Bytes>) {
        self.inner.config.lock().unwrap().body = body;
    }

    /// Forced HTTP version, if any.
    #[must_use]
    pub fn version(&self) -> Option<reqwest::Version> {
        self.inner.config.lock().unwrap().version
    }

    /// Force a specific HTTP version, or let the transport negotiate.
    pub fn set_version(&self, version: Option<reqwest::Version>) {
        self.inner.config.lock().unwrap().version = version;
    }

    /// Copy of the configured headers (lowercased keys).
    #[must_use]
    pub fn headers(&self) -> BTreeMap<String, String> {
        self.inner.config.lock().unwrap().headers.clone()
    }

    /// Set a header. A blank value removes the key. Reserved headers
    /// (`Accept`, `Cache-Control`, `Last-Event-ID`) are overwritten at
    /// request time regardless of what is configured here.
    ///
    /// # Errors
    /// Returns [`StreamError::InvalidKey`] if the key is blank.
    pub fn set_header(&self, key: &str, value: &str) -> StreamResult<()> {
        let key = normalize_key(key)?;
        let mut config = self.inner.config.lock().unwrap();
        if value.trim().is_empty() {
            config.headers.remove(&key);
        } else {
            config.headers.insert(key, value.to_string());
        }
        Ok(())
    }

    /// Add multiple headers, overwriting existing ones.
    ///
    /// # Errors
    /// Returns [`StreamError::InvalidKey`] if any key is blank.
    pub fn add_headers<'a>(
        &self,
        headers: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> StreamResult<()> {
        for (key, value) in headers {
            self.set_header(key, value)?;
        }
        Ok(())
    }

    /// Replace all configured headers.
    ///
    /// # Errors
    /// Returns [`StreamError::InvalidKey`] if any key is blank.
    pub fn set_headers<'a>(
        &self,
        headers: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> StreamResult<()> {
        self.clear_headers();
        self.add_headers(headers)
    }

    /// Value configured for a header key, if any.
    #[must_use]
    pub fn header(&self, key: &str) -> Option<String> {
        let key = normalize_key(key).ok()?;
        self.inner.config.lock().unwrap().headers.get(&key).cloned()
    }

    /// Remove a header, returning the previous value.
    pub fn remove_header(&self, key: &str) -> Option<String> {
        let key = normalize_key(key).ok()?;
        self.inner.config.lock().unwrap().headers.remove(&key)
    }

    /// Remove multiple headers.
    pub fn remove_headers<'a>(&self, keys: impl IntoIterator<Item = &'a str>) {
        let mut config = self.inner.config.lock().unwrap();
        for key in keys {
            config.headers.remove(&key.trim().to_ascii_lowercase());
        }
    }

    /// Remove all configured headers.
    pub fn clear_headers(&self) {
        self.inner.config.lock().unwrap().headers.clear();
    }

    /// Request timeout, if any.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.inner.config.lock().unwrap().timeout
    }

    /// Set the request timeout.
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        self.inner.config.lock().unwrap().timeout = timeout;
    }

    /// Current retry cooldown in milliseconds. May have been overwritten by
    /// a server `retry:` field.
    #[must_use]
    pub fn retry_cooldown(&self) -> i64 {
        self.inner.config.lock().unwrap().cursor.retry_cooldown_ms
    }

    /// Set the retry cooldown in milliseconds (non-positive for no wait).
    pub fn set_retry_cooldown(&self, cooldown_ms: i64) {
        self.inner.config.lock().unwrap().cursor.retry_cooldown_ms = cooldown_ms;
    }

    /// Whether the client stops when a connection closes without events.
    #[must_use]
    pub fn auto_stop_if_no_events(&self) -> bool {
        self.inner.config.lock().unwrap().auto_stop_if_no_events
    }

    /// Enable or disable auto-stop when a connection closes without events.
    pub fn set_auto_stop_if_no_events(&self, enabled: bool) {
        self.inner.config.lock().unwrap().auto_stop_if_no_events = enabled;
    }

    /// Maximum bytes buffered while waiting for a block terminator.
    #[must_use]
    pub fn max_buffer_size(&self) -> usize {
        self.inner.config.lock().unwrap().max_buffer_size
    }

    /// Set the parser buffer cap. An attempt whose peer exceeds it fails
    /// with [`StreamError::BufferOverflow`] and follows the normal
    /// reconnect policy. Takes effect on the next attempt.
    pub fn set_max_buffer_size(&self, limit: usize) {
        self.inner.config.lock().unwrap().max_buffer_size = limit;
    }

    /// Id of the latest event.
    #[must_use]
    pub fn last_event_id(&self) -> i64 {
        self.inner.config.lock().unwrap().cursor.last_event_id
    }

    /// Set the event id sent as `Last-Event-ID` on the next attempt. May be
    /// overwritten by the server in the meantime.
    pub fn set_last_event_id(&self, id: i64) {
        self.inner.config.lock().unwrap().cursor.last_event_id = id;
    }

    /// Replace the transport used for future attempts.
    pub fn set_transport(&self, transport: Arc<dyn Transport>) {
        *self.inner.transport.lock().unwrap() = transport;
    }

    /// Register a listener. Adding the same listener twice registers once.
    pub fn add_listener(&self, listener: Arc<dyn EventStreamListener>) {
        self.inner.listeners.lock().unwrap().add(listener);
    }

    /// Remove a listener so it no longer gets called.
    pub fn remove_listener(&self, listener: &Arc<dyn EventStreamListener>) {
        self.inner.listeners.lock().unwrap().remove(listener);
    }

    /// Remove all listeners.
    pub fn clear_listeners(&self) {
        self.inner.listeners.lock().unwrap().clear();
    }

    /// Currently registered listeners.
    #[must_use]
    pub fn listeners(&self) -> Vec<Arc<dyn EventStreamListener>> {
        self.inner.listeners.lock().unwrap().snapshot()
    }

    pub(crate) fn add_internal_adapter(&self, adapter: Arc<dyn InternalAdapter>) {
        self.inner.internal.lock().unwrap().push(adapter);
    }

    // ----- lifecycle -------------------------------------------------------

    /// Whether the client is currently listening.
    #[must_use]
    pub fn is_running(&self) -> bool {
        *self.inner.running_tx.borrow()
    }

    /// Start listening and return immediately. Lost connections reconnect
    /// automatically. Calling `start` while already listening cancels the
    /// in-flight attempt and notifies listeners via `on_reconnect` before
    /// the new attempt begins; two transports are never active at once.
    pub fn start(&self) -> &Self {
        let inner = Arc::clone(&self.inner);
        let mut attempt = self.inner.attempt.lock().unwrap();
        let reconnecting = match attempt.handle.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        };
        attempt.generation += 1;
        let generation = attempt.generation;
        self.inner.active.store(true, Ordering::SeqCst);
        self.inner.running_tx.send_replace(true);
        debug!(url = %self.url(), reconnecting, "starting event stream client");
        attempt.handle = Some(tokio::spawn(run_loop(inner, reconnecting, generation)));
        self
    }

    /// Stop without reconnecting and notify listeners via `on_close`.
    /// Cancelling the in-flight attempt is not treated as a failure. A stop
    /// while already idle is a no-op.
    pub fn stop(&self) -> &Self {
        let handle = self.inner.attempt.lock().unwrap().handle.take();
        if let Some(handle) = handle {
            handle.abort();
        }
        self.inner.close_now();
        self
    }

    /// Wait until this client has stopped listening. Returns immediately if
    /// idle; safe to call concurrently with reconnect loops.
    pub async fn join(&self) {
        let mut running = self.inner.running_tx.subscribe();
        while *running.borrow_and_update() {
            if running.changed().await.is_err() {
                break;
            }
        }
    }
}

impl Inner {
    fn listener_snapshot(&self) -> Vec<Arc<dyn EventStreamListener>> {
        self.listeners.lock().unwrap().snapshot()
    }

    fn internal_snapshot(&self) -> Vec<Arc<dyn InternalAdapter>> {
        self.internal.lock().unwrap().clone()
    }

    /// Build the per-attempt request snapshot under the config lock, with
    /// the reserved headers applied last.
    fn build_request(&self) -> Request {
        let config = self.config.lock().unwrap();
        let mut request = Request {
            url: config.url.clone(),
            method: config.method,
            headers: config
                .headers
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            body: if config.method.allows_body() {
                config.body.clone()
            } else {
                None
            },
            version: config.version,
            timeout: config.timeout,
        };
        for (key, value) in RESERVED_HEADERS {
            request.set_header(key, value);
        }
        request.set_header(HEADER_LAST_EVENT_ID, &config.cursor.last_event_id.to_string());
        request
    }

    /// Notify close hooks and listeners exactly once, then release joiners.
    fn close_now(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        debug!("event stream client stopped");
        let last_response = self.last_response.lock().unwrap().clone();
        for adapter in self.internal_snapshot() {
            adapter.closed(last_response.as_ref());
        }
        dispatch_close(&self.listener_snapshot(), last_response.as_ref());
        self.running_tx.send_replace(false);
    }
}

/// Reconnect loop: one iteration per attempt. `generation` identifies the
/// `start()` that spawned this loop.
async fn run_loop(inner: Arc<Inner>, mut reconnecting: bool, generation: u64) {
    loop {
        let last_response = inner.last_response.lock().unwrap().clone();
        for adapter in inner.internal_snapshot() {
            adapter.attempt_begin(last_response.as_ref());
        }

        if reconnecting {
            let received = inner.received_events.load(Ordering::SeqCst);
            let last_event_id = inner.config.lock().unwrap().cursor.last_event_id;
            dispatch_reconnect(
                &inner.listener_snapshot(),
                last_response.as_ref(),
                received,
                last_event_id,
            );
        }
        inner.received_events.store(false, Ordering::SeqCst);

        let mut request = inner.build_request();
        for adapter in inner.internal_snapshot() {
            adapter.before_send(&mut request);
        }

        let transport = Arc::clone(&*inner.transport.lock().unwrap());
        debug!(url = %request.url, method = ?request.method, "opening event stream");
        if let Err(error) = drive_attempt(&inner, transport, request).await {
            warn!(error = %error, "event stream attempt failed");
            dispatch_error(&inner.listener_snapshot(), &error);
        }

        let (auto_stop, cooldown_ms) = {
            let config = inner.config.lock().unwrap();
            (
                config.auto_stop_if_no_events,
                config.cursor.retry_cooldown_ms,
            )
        };
        if auto_stop && !inner.received_events.load(Ordering::SeqCst) {
            {
                let mut attempt = inner.attempt.lock().unwrap();
                if attempt.generation != generation {
                    // A concurrent start() superseded this loop after its
                    // attempt ended; the new run owns the client. Closing
                    // here would orphan it.
                    return;
                }
                attempt.handle.take();
            }
            debug!("connection closed without events, stopping");
            inner.close_now();
            return;
        }

        if cooldown_ms > 0 {
            debug!(cooldown_ms, "waiting before reconnect");
            #[allow(clippy::cast_sign_loss)]
            tokio::time::sleep(Duration::from_millis(cooldown_ms as u64)).await;
        }
        reconnecting = true;
    }
}

/// Execute exactly one request/response/stream attempt.
async fn drive_attempt(
    inner: &Arc<Inner>,
    transport: Arc<dyn Transport>,
    request: Request,
) -> StreamResult<()> {
    let response = transport.open(request).await?;
    *inner.last_response.lock().unwrap() = Some(response.info.clone());

    let max_buffer_size = inner.config.lock().unwrap().max_buffer_size;
    let mut parser = FrameParser::with_max_buffer_size(max_buffer_size);
    let mut bytes = response.bytes;
    while let Some(chunk) = bytes.next().await {
        let chunk = chunk?;
        if chunk.is_empty() {
            continue;
        }
        let items = {
            let mut config = inner.config.lock().unwrap();
            parser.feed(&chunk, &mut config.cursor)?
        };
        if items.is_empty() {
            continue;
        }
        let listeners = inner.listener_snapshot();
        for item in items {
            match item {
                ParserItem::Event(event) => {
                    inner.received_events.store(true, Ordering::SeqCst);
                    dispatch_event(&listeners, &event);
                }
                ParserItem::FieldError(error) => {
                    warn!(error = %error, "malformed event stream field");
                    dispatch_error(&listeners, &error);
                }
            }
        }
    }
    Ok(())
}

fn normalize_key(key: &str) -> StreamResult<String> {
    let key = key.trim();
    if key.is_empty() {
        return Err(StreamError::InvalidKey);
    }
    Ok(key.to_ascii_lowercase())
}
