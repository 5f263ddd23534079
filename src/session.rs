//! Cookie session extension.
//!
//! Stores all received cookies and replays them on each request, so a
//! server-side session survives reconnects without caller involvement. This
//! is a flat key/value store: domain, path, expiry and security attributes
//! of `Set-Cookie` are discarded.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::client::InternalAdapter;
use crate::{EventStreamClient, Request, ResponseInfo, StreamError, StreamResult};

/// Event stream client that persists session cookies across reconnects.
///
/// Dereferences to [`EventStreamClient`], so the full configuration and
/// lifecycle surface is available directly.
#[derive(Clone)]
pub struct CookieSessionClient {
    client: EventStreamClient,
    jar: Arc<CookieJar>,
}

/// Primary and legacy cookie maps, harvested from response headers and
/// injected into request headers by an internal lifecycle adapter.
#[derive(Default)]
struct CookieJar {
    cookies: Mutex<HashMap<String, String>>,
    /// Obsolete dual-cookie scheme (`Cookie2`/`Set-Cookie2`); kept for
    /// protocol compatibility with servers still using it.
    cookies2: Mutex<HashMap<String, String>>,
}

impl InternalAdapter for CookieJar {
    fn attempt_begin(&self, last_response: Option<&ResponseInfo>) {
        if let Some(response) = last_response {
            self.harvest(response);
        }
    }

    fn before_send(&self, request: &mut Request) {
        if let Some(value) = serialize_pairs(&self.cookies.lock().unwrap()) {
            request.set_header("cookie", &value);
        }
        if let Some(value) = serialize_pairs(&self.cookies2.lock().unwrap()) {
            request.set_header("cookie2", &value);
        }
    }

    fn closed(&self, last_response: Option<&ResponseInfo>) {
        if let Some(response) = last_response {
            self.harvest(response);
        }
    }
}

impl CookieJar {
    /// Merge session pairs from known response header names. Malformed
    /// entries sent by the peer are logged and skipped.
    fn harvest(&self, response: &ResponseInfo) {
        for raw in response.header_values("cookie") {
            if let Err(error) = merge_cookie_list(&self.cookies, raw) {
                warn!(error = %error, "ignoring malformed cookie header");
            }
        }
        for raw in response.header_values("set-cookie") {
            if let Err(error) = merge_set_cookie(&self.cookies, raw) {
                warn!(error = %error, "ignoring malformed set-cookie header");
            }
        }
        for raw in response.header_values("cookie2") {
            if let Err(error) = merge_cookie_list(&self.cookies2, raw) {
                warn!(error = %error, "ignoring malformed cookie2 header");
            }
        }
        for raw in response.header_values("set-cookie2") {
            if let Err(error) = merge_set_cookie(&self.cookies2, raw) {
                warn!(error = %error, "ignoring malformed set-cookie2 header");
            }
        }
    }
}

fn merge_cookie_list(map: &Mutex<HashMap<String, String>>, raw: &str) -> StreamResult<()> {
    let pairs = parse_cookie_pairs(raw)?;
    map.lock().unwrap().extend(pairs);
    Ok(())
}

fn merge_set_cookie(map: &Mutex<HashMap<String, String>>, raw: &str) -> StreamResult<()> {
    let (key, value) = parse_set_cookie_pair(raw)?;
    map.lock().unwrap().insert(key, value);
    Ok(())
}

impl CookieSessionClient {
    /// Create a cookie-persisting client for the given URL.
    ///
    /// # Errors
    /// Returns [`StreamError::InvalidUrl`] if the URL does not parse.
    pub fn new(url: impl AsRef<str>) -> StreamResult<Self> {
        Self::wrap(EventStreamClient::new(url)?)
    }

    /// Attach cookie session handling to an existing client.
    ///
    /// # Errors
    /// Currently infallible; kept fallible for parity with [`Self::new`].
    pub fn wrap(client: EventStreamClient) -> StreamResult<Self> {
        let jar = Arc::new(CookieJar::default());
        client.add_internal_adapter(Arc::clone(&jar) as Arc<dyn InternalAdapter>);
        Ok(Self { client, jar })
    }

    /// Copy of the stored cookies.
    #[must_use]
    pub fn cookies(&self) -> HashMap<String, String> {
        self.jar.cookies.lock().unwrap().clone()
    }

    /// Value of a cookie (case-sensitive key).
    #[must_use]
    pub fn cookie(&self, key: &str) -> Option<String> {
        self.jar.cookies.lock().unwrap().get(key).cloned()
    }

    /// Set a cookie; `None` deletes the key.
    ///
    /// # Errors
    /// Returns [`StreamError::InvalidKey`] if the key is blank.
    pub fn set_cookie(&self, key: &str, value: Option<&str>) -> StreamResult<()> {
        set_pair(&self.jar.cookies, key, value)
    }

    /// Remove cookies by key.
    ///
    /// # Errors
    /// Returns [`StreamError::InvalidKey`] if any key is blank.
    pub fn remove_cookies<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> StreamResult<()> {
        for key in keys {
            self.set_cookie(key, None)?;
        }
        Ok(())
    }

    /// Parse a raw request-style cookie string (`name=value; name2=value2`)
    /// into the store.
    ///
    /// # Errors
    /// Returns [`StreamError::CookieFormat`] if any pair lacks a `=` or
    /// starts with one.
    pub fn parse_cookie(&self, raw: &str) -> StreamResult<()> {
        let pairs = parse_cookie_pairs(raw)?;
        self.jar.cookies.lock().unwrap().extend(pairs);
        Ok(())
    }

    /// Parse a raw `Set-Cookie` response header value into the store,
    /// discarding attributes (`Domain`, `Path`, flags).
    ///
    /// # Errors
    /// Returns [`StreamError::CookieFormat`] if the value lacks a `=` or
    /// starts with one.
    pub fn parse_set_cookie(&self, raw: &str) -> StreamResult<()> {
        let (key, value) = parse_set_cookie_pair(raw)?;
        self.jar.cookies.lock().unwrap().insert(key, value);
        Ok(())
    }

    /// Harvest session state from a set of response headers.
    pub fn parse_cookies_from_response(&self, response: &ResponseInfo) {
        self.jar.harvest(response);
    }

    /// Copy of the stored legacy cookies.
    #[deprecated(note = "Cookie2 scheme is obsolete")]
    #[must_use]
    pub fn cookies2(&self) -> HashMap<String, String> {
        self.jar.cookies2.lock().unwrap().clone()
    }

    /// Value of a legacy cookie (case-sensitive key).
    #[deprecated(note = "Cookie2 scheme is obsolete")]
    #[must_use]
    pub fn cookie2(&self, key: &str) -> Option<String> {
        self.jar.cookies2.lock().unwrap().get(key).cloned()
    }

    /// Set a legacy cookie; `None` deletes the key.
    ///
    /// # Errors
    /// Returns [`StreamError::InvalidKey`] if the key is blank.
    #[deprecated(note = "Cookie2 scheme is obsolete")]
    pub fn set_cookie2(&self, key: &str, value: Option<&str>) -> StreamResult<()> {
        set_pair(&self.jar.cookies2, key, value)
    }

    /// Parse a raw request-style cookie2 string into the legacy store.
    ///
    /// # Errors
    /// Returns [`StreamError::CookieFormat`] if any pair lacks a `=` or
    /// starts with one.
    #[deprecated(note = "Cookie2 scheme is obsolete")]
    pub fn parse_cookie2(&self, raw: &str) -> StreamResult<()> {
        let pairs = parse_cookie_pairs(raw)?;
        self.jar.cookies2.lock().unwrap().extend(pairs);
        Ok(())
    }

    /// Parse a raw `Set-Cookie2` response header value into the legacy store.
    ///
    /// # Errors
    /// Returns [`StreamError::CookieFormat`] if the value lacks a `=` or
    /// starts with one.
    #[deprecated(note = "Cookie2 scheme is obsolete")]
    pub fn parse_set_cookie2(&self, raw: &str) -> StreamResult<()> {
        let (key, value) = parse_set_cookie_pair(raw)?;
        self.jar.cookies2.lock().unwrap().insert(key, value);
        Ok(())
    }
}

impl Deref for CookieSessionClient {
    type Target = EventStreamClient;

    fn deref(&self) -> &EventStreamClient {
        &self.client
    }
}

fn set_pair(
    map: &Mutex<HashMap<String, String>>,
    key: &str,
    value: Option<&str>,
) -> StreamResult<()> {
    if key.trim().is_empty() {
        return Err(StreamError::InvalidKey);
    }
    let mut map = map.lock().unwrap();
    match value {
        Some(value) => {
            map.insert(key.to_string(), value.to_string());
        }
        None => {
            map.remove(key);
        }
    }
    Ok(())
}

/// Parse `name=value; name2=value2` into pairs. Fails if any pair has no
/// `=`, or the `=` is its first character.
fn parse_cookie_pairs(raw: &str) -> StreamResult<Vec<(String, String)>> {
    raw.split(';')
        .map(|part| parse_pair(part.trim()))
        .collect()
}

/// Parse one `Set-Cookie` style value: only the text up to the first `;`
/// after the `=` is kept, attributes are discarded.
fn parse_set_cookie_pair(raw: &str) -> StreamResult<(String, String)> {
    let first = raw.split(';').next().unwrap_or(raw);
    parse_pair(first.trim())
}

fn parse_pair(raw: &str) -> StreamResult<(String, String)> {
    match raw.find('=') {
        Some(0) | None => Err(StreamError::CookieFormat(raw.to_string())),
        Some(idx) => Ok((raw[..idx].to_string(), raw[idx + 1..].to_string())),
    }
}

/// Serialize a map as `k1=v1; k2=v2`; `None` when empty so no empty header
/// is emitted.
fn serialize_pairs(map: &HashMap<String, String>) -> Option<String> {
    if map.is_empty() {
        return None;
    }
    Some(
        map.iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("; "),
    )
}
