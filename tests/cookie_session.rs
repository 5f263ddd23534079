//! Cookie session tests: injection into requests, harvesting from
//! responses, and survival across reconnects.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use eventstream_client::{CookieSessionClient, StreamError};

use common::{wait_until, MockTransport, RecordingListener, ScriptedAttempt};

fn cookie_client(transport: &Arc<MockTransport>) -> CookieSessionClient {
    let client = CookieSessionClient::new("http://localhost/events").unwrap();
    client.set_transport(Arc::clone(transport) as _);
    client
}

fn parse_header(value: &str) -> HashMap<String, String> {
    value
        .split("; ")
        .map(|pair| {
            let (key, value) = pair.split_once('=').expect("malformed pair");
            (key.to_string(), value.to_string())
        })
        .collect()
}

#[tokio::test]
async fn test_cookies_injected_into_request() {
    let transport = MockTransport::new(vec![]);
    let client = cookie_client(&transport);
    client.parse_cookie("a=1; b=2").unwrap();

    client.start();
    wait_until(|| transport.request_count() >= 1).await;

    let cookies = parse_header(transport.request(0).header("cookie").unwrap());
    assert_eq!(cookies.get("a").map(String::as_str), Some("1"));
    assert_eq!(cookies.get("b").map(String::as_str), Some("2"));

    client.stop();
    client.join().await;
}

#[tokio::test]
async fn test_empty_jar_emits_no_cookie_header() {
    let transport = MockTransport::new(vec![]);
    let client = cookie_client(&transport);

    client.start();
    wait_until(|| transport.request_count() >= 1).await;

    assert_eq!(transport.request(0).header("cookie"), None);
    assert_eq!(transport.request(0).header("cookie2"), None);

    client.stop();
    client.join().await;
}

#[tokio::test]
async fn test_harvested_cookies_survive_reconnect() {
    let transport = MockTransport::new(vec![ScriptedAttempt::with_headers(&[(
        "set-cookie",
        "sid=abc; Path=/; HttpOnly",
    )])]);
    let client = cookie_client(&transport);

    client.start();
    wait_until(|| transport.request_count() >= 2).await;

    // First request went out before any session existed.
    assert_eq!(transport.request(0).header("cookie"), None);
    // The reconnect replays the harvested session, attributes stripped.
    assert_eq!(transport.request(1).header("cookie"), Some("sid=abc"));
    assert_eq!(client.cookie("sid"), Some("abc".to_string()));

    client.stop();
    client.join().await;
}

#[tokio::test]
async fn test_harvest_on_close() {
    let transport = MockTransport::new(vec![ScriptedAttempt::with_headers(&[(
        "set-cookie",
        "sid=final",
    )])]);
    let client = cookie_client(&transport);
    client.set_auto_stop_if_no_events(true);

    client.start();
    client.join().await;

    assert_eq!(client.cookie("sid"), Some("final".to_string()));
}

#[tokio::test]
async fn test_cookie2_scheme_uses_own_header() {
    let transport = MockTransport::new(vec![]);
    let client = cookie_client(&transport);
    #[allow(deprecated)]
    client.set_cookie2("legacy", Some("old")).unwrap();

    client.start();
    wait_until(|| transport.request_count() >= 1).await;

    assert_eq!(transport.request(0).header("cookie2"), Some("legacy=old"));
    assert_eq!(transport.request(0).header("cookie"), None);

    client.stop();
    client.join().await;
}

#[tokio::test]
async fn test_malformed_cookie_is_synchronous_error() {
    let transport = MockTransport::new(vec![]);
    let client = cookie_client(&transport);

    assert!(matches!(
        client.parse_cookie("novalue"),
        Err(StreamError::CookieFormat(_))
    ));
    assert!(client.cookies().is_empty());
}

#[tokio::test]
async fn test_session_client_exposes_listener_surface() {
    let transport = MockTransport::new(vec![ScriptedAttempt::chunks(&["data: hi\n\n"])]);
    let client = cookie_client(&transport);
    let recorder = Arc::new(RecordingListener::default());
    client.add_listener(Arc::clone(&recorder) as _);

    client.start();
    wait_until(|| recorder.event_count() >= 1).await;

    assert_eq!(recorder.events.lock().unwrap()[0].data, "hi");

    client.stop();
    client.join().await;
    assert_eq!(recorder.close_count(), 1);
}
