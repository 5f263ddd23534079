//! Shared test support: a scriptable in-memory transport and a recording
//! listener.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream;

use eventstream_client::{
    Event, EventStreamListener, Request, ResponseInfo, StreamError, StreamResult,
    StreamingResponse, Transport,
};

/// One scripted connection attempt.
pub enum ScriptedAttempt {
    /// The open succeeds, the given chunks arrive, then the stream ends.
    Respond {
        headers: Vec<(String, String)>,
        chunks: Vec<StreamResult<Bytes>>,
    },
    /// The open itself fails.
    Fail(String),
}

impl ScriptedAttempt {
    /// Successful attempt streaming the given chunks.
    pub fn chunks(chunks: &[&str]) -> Self {
        Self::Respond {
            headers: Vec::new(),
            chunks: chunks
                .iter()
                .map(|chunk| Ok(Bytes::copy_from_slice(chunk.as_bytes())))
                .collect(),
        }
    }

    /// Successful attempt with response headers and no body.
    pub fn with_headers(headers: &[(&str, &str)]) -> Self {
        Self::Respond {
            headers: headers
                .iter()
                .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
                .collect(),
            chunks: Vec::new(),
        }
    }
}

/// Transport that replays scripted attempts and records every request it
/// receives. Once the script runs out, further attempts stay open forever
/// (until the client cancels them).
#[derive(Default)]
pub struct MockTransport {
    scripts: Mutex<VecDeque<ScriptedAttempt>>,
    requests: Mutex<Vec<Request>>,
}

impl MockTransport {
    pub fn new(scripts: Vec<ScriptedAttempt>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request(&self, index: usize) -> Request {
        self.requests.lock().unwrap()[index].clone()
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }
}

impl Transport for MockTransport {
    fn open(&self, request: Request) -> BoxFuture<'static, StreamResult<StreamingResponse>> {
        self.requests.lock().unwrap().push(request);
        let script = self.scripts.lock().unwrap().pop_front();
        Box::pin(async move {
            match script {
                None => {
                    // Script exhausted: hold the connection open until the
                    // client cancels it.
                    futures_util::future::pending().await
                }
                Some(ScriptedAttempt::Fail(message)) => Err(StreamError::Transport(message)),
                Some(ScriptedAttempt::Respond { headers, chunks }) => Ok(StreamingResponse {
                    info: ResponseInfo {
                        status: 200,
                        headers,
                    },
                    bytes: Box::pin(stream::iter(chunks)),
                }),
            }
        })
    }
}

/// Listener that records every notification it receives.
#[derive(Default)]
pub struct RecordingListener {
    pub events: Mutex<Vec<Event>>,
    pub errors: Mutex<Vec<String>>,
    pub reconnects: Mutex<Vec<(bool, i64)>>,
    pub closes: AtomicUsize,
}

impl RecordingListener {
    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn error_count(&self) -> usize {
        self.errors.lock().unwrap().len()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl EventStreamListener for RecordingListener {
    fn on_event(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }

    fn on_error(&self, error: &StreamError) {
        self.errors.lock().unwrap().push(error.to_string());
    }

    fn on_reconnect(
        &self,
        _last_response: Option<&ResponseInfo>,
        received_events: bool,
        last_event_id: i64,
    ) {
        self.reconnects
            .lock()
            .unwrap()
            .push((received_events, last_event_id));
    }

    fn on_close(&self, _last_response: Option<&ResponseInfo>) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Poll a condition until it holds, failing the test after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 2s");
}
