//! HTTP transport collaborator interface.
//!
//! The client only needs "send a request, get a byte stream plus a terminal
//! response or error". The [`Transport`] trait captures exactly that, with
//! [`ReqwestTransport`] as the default implementation; tests substitute an
//! in-memory transport.

use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::Client;
use url::Url;

use crate::{StreamError, StreamResult};

/// HTTP method used to request the event stream.
///
/// GET and DELETE requests carry no body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMethod {
    /// GET request (default).
    #[default]
    Get,
    /// POST request.
    Post,
    /// PUT request.
    Put,
    /// DELETE request.
    Delete,
}

impl RequestMethod {
    pub(crate) fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Delete => reqwest::Method::DELETE,
        }
    }

    pub(crate) const fn allows_body(self) -> bool {
        matches!(self, Self::Post | Self::Put)
    }
}

/// Immutable per-attempt request snapshot handed to the transport.
///
/// Header names are lowercased; the protocol-reserved headers (`accept`,
/// `cache-control`, `last-event-id`) are applied by the client after all
/// caller-supplied headers and cannot be suppressed.
#[derive(Debug, Clone)]
pub struct Request {
    /// Target URL.
    pub url: Url,
    /// HTTP method.
    pub method: RequestMethod,
    /// Headers in application order, lowercased names.
    pub headers: Vec<(String, String)>,
    /// Optional request body (POST/PUT only).
    pub body: Option<Bytes>,
    /// Optional forced HTTP version.
    pub version: Option<reqwest::Version>,
    /// Optional request timeout.
    pub timeout: Option<Duration>,
}

impl Request {
    /// Set a header, replacing any existing value for the same
    /// (case-insensitive) name.
    pub fn set_header(&mut self, key: &str, value: &str) {
        let key = key.to_ascii_lowercase();
        if let Some(entry) = self.headers.iter_mut().find(|(name, _)| *name == key) {
            entry.1 = value.to_string();
        } else {
            self.headers.push((key, value.to_string()));
        }
    }

    /// Get the first header value for a (case-insensitive) name.
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        let key = key.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value.as_str())
    }
}

/// Terminal response descriptor: status and headers, no body.
#[derive(Debug, Clone)]
pub struct ResponseInfo {
    /// HTTP status code.
    pub status: u16,
    /// Response headers, lowercased names, repeated names preserved.
    pub headers: Vec<(String, String)>,
}

impl ResponseInfo {
    /// All values for a (case-insensitive) header name, in wire order.
    pub fn header_values<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a str> {
        let key = key.to_ascii_lowercase();
        self.headers
            .iter()
            .filter(move |(name, _)| *name == key)
            .map(|(_, value)| value.as_str())
    }
}

/// An opened event-stream attempt: response metadata plus the byte stream.
pub struct StreamingResponse {
    /// Response status and headers.
    pub info: ResponseInfo,
    /// Body chunks as they arrive; ends with `None` on graceful stream end
    /// or yields an error on transport failure.
    pub bytes: BoxStream<'static, StreamResult<Bytes>>,
}

/// Collaborator that executes one request and streams the response body.
pub trait Transport: Send + Sync {
    /// Open the stream for one attempt.
    fn open(&self, request: Request) -> BoxFuture<'static, StreamResult<StreamingResponse>>;
}

/// Default [`Transport`] backed by [`reqwest`].
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a transport with a fresh HTTP client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport reusing an existing HTTP client.
    #[must_use]
    pub const fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Transport for ReqwestTransport {
    fn open(&self, request: Request) -> BoxFuture<'static, StreamResult<StreamingResponse>> {
        let client = self.client.clone();
        Box::pin(async move {
            let mut builder = client.request(request.method.as_reqwest(), request.url.clone());
            for (key, value) in &request.headers {
                builder = builder.header(key, value);
            }
            if let Some(version) = request.version {
                builder = builder.version(version);
            }
            if let Some(timeout) = request.timeout {
                builder = builder.timeout(timeout);
            }
            if let Some(body) = request.body {
                if request.method.allows_body() {
                    builder = builder.body(body);
                }
            }

            let response = builder.send().await?;
            if !response.status().is_success() {
                return Err(StreamError::Http {
                    status: response.status().as_u16(),
                    message: response.status().to_string(),
                });
            }

            let info = ResponseInfo {
                status: response.status().as_u16(),
                headers: response
                    .headers()
                    .iter()
                    .map(|(name, value)| {
                        (
                            name.as_str().to_ascii_lowercase(),
                            String::from_utf8_lossy(value.as_bytes()).into_owned(),
                        )
                    })
                    .collect(),
            };
            let bytes = response
                .bytes_stream()
                .map_err(StreamError::from)
                .boxed();

            Ok(StreamingResponse { info, bytes })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> Request {
        Request {
            url: Url::parse("http://localhost/events").unwrap(),
            method: RequestMethod::Get,
            headers: Vec::new(),
            body: None,
            version: None,
            timeout: None,
        }
    }

    #[test]
    fn test_set_header_replaces_case_insensitively() {
        let mut req = request();
        req.set_header("Accept", "application/json");
        req.set_header("ACCEPT", "text/event-stream");

        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.header("accept"), Some("text/event-stream"));
    }

    #[test]
    fn test_response_header_values_preserves_repeats() {
        let info = ResponseInfo {
            status: 200,
            headers: vec![
                ("set-cookie".to_string(), "a=1".to_string()),
                ("content-type".to_string(), "text/event-stream".to_string()),
                ("set-cookie".to_string(), "b=2".to_string()),
            ],
        };

        let values: Vec<_> = info.header_values("Set-Cookie").collect();
        assert_eq!(values, vec!["a=1", "b=2"]);
    }
}
