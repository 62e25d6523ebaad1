//! Session exchange against a one-shot local HTTP server.

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use townpass_bridge::identity::{normalize_value, IdentityRecord};
use townpass_bridge::session::{ExchangeError, SessionClient, SessionExchange};

/// Serve `responses` in order, one connection each, and hand back the raw
/// first request the client sent.
async fn serve(responses: Vec<(&str, &str, &str)>) -> (String, oneshot::Receiver<String>) {
    let responses = responses
        .into_iter()
        .map(|(status_line, content_type, body)| {
            format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nSet-Cookie: sid=abc; Path=/\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )
        })
        .collect();
    serve_raw(responses).await
}

/// Write each response verbatim, then close the connection.
async fn serve_raw(responses: Vec<String>) -> (String, oneshot::Receiver<String>) {
    let listener = match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => listener,
        Err(err) => panic!("listener should bind: {err}"),
    };
    let addr = match listener.local_addr() {
        Ok(addr) => addr,
        Err(err) => panic!("listener should expose local addr: {err}"),
    };

    let (request_tx, request_rx) = oneshot::channel();
    tokio::spawn(async move {
        let mut request_tx = Some(request_tx);
        for response in responses {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let request = read_request(&mut socket).await;
            if let Some(tx) = request_tx.take() {
                let _ = tx.send(request);
            }
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    (format!("http://{addr}"), request_rx)
}

async fn serve_once(
    status_line: &str,
    content_type: &str,
    body: &str,
) -> (String, oneshot::Receiver<String>) {
    serve(vec![(status_line, content_type, body)]).await
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut request = Vec::new();
    let mut buf = [0_u8; 4096];
    loop {
        let Ok(read) = socket.read(&mut buf).await else {
            break;
        };
        if read == 0 {
            break;
        }
        request.extend_from_slice(&buf[..read]);
        if request_complete(&request) {
            break;
        }
    }
    String::from_utf8_lossy(&request).into_owned()
}

/// Headers received and `Content-Length` bytes of body after them.
fn request_complete(raw: &[u8]) -> bool {
    let text = String::from_utf8_lossy(raw);
    let Some(split) = text.find("\r\n\r\n") else {
        return false;
    };
    let length = text[..split]
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    text.len() >= split.saturating_add(4).saturating_add(length)
}

fn identity() -> IdentityRecord {
    normalize_value(&json!({"id": "u1", "name": "Ada", "token": "tok-secret-123"}))
        .expect("valid identity")
}

#[tokio::test]
async fn success_returns_parsed_body_and_marks_authenticated() {
    let (base, request) =
        serve_once("200 OK", "application/json", r#"{"ok":true,"session":"s1"}"#).await;
    let client = SessionClient::new(&base, "/api/auth/townpass", "user").expect("valid endpoint");

    let result = client.exchange(&identity()).await.expect("exchange succeeds");

    assert_eq!(result.status, 200);
    assert_eq!(result.body, json!({"ok": true, "session": "s1"}));
    assert!(client.is_authenticated());

    let raw = request.await.expect("request captured");
    assert!(raw.starts_with("POST /api/auth/townpass HTTP/1.1"), "request: {raw}");
    assert!(raw.to_ascii_lowercase().contains("content-type: application/json"));
    let body = raw.split("\r\n\r\n").nth(1).expect("request body");
    let sent: Value = serde_json::from_str(body).expect("JSON body");
    assert_eq!(
        sent,
        json!({"user": {"id": "u1", "name": "Ada", "token": "tok-secret-123"}})
    );
}

#[tokio::test]
async fn aliased_identity_is_posted_as_delivered() {
    let (base, request) = serve_once("200 OK", "application/json", "{}").await;
    let client = SessionClient::new(&base, "/api/auth/townpass", "user").expect("valid endpoint");
    let delivered = json!({
        "uid": 7,
        "displayName": "Ada",
        "name": {"first": "A"},
        "iat": 1_700_000_000,
        "timestamp": "yesterday",
        "signature": "sig-over-fields"
    });
    let identity = normalize_value(&delivered).expect("valid identity");
    assert_eq!(identity.name(), Some("Ada"));

    client.exchange(&identity).await.expect("exchange succeeds");

    let raw = request.await.expect("request captured");
    let body = raw.split("\r\n\r\n").nth(1).expect("request body");
    let sent: Value = serde_json::from_str(body).expect("JSON body");
    assert_eq!(sent, json!({"user": delivered}));
    assert_eq!(body.matches("\"name\"").count(), 1, "{body}");
    assert_eq!(body.matches("\"timestamp\"").count(), 1, "{body}");
}

#[tokio::test]
async fn non_success_status_is_reported_with_body() {
    let (base, _request) = serve_once("401 Unauthorized", "text/plain", "bad signature").await;
    let client = SessionClient::new(&base, "/api/auth/townpass", "user").expect("valid endpoint");

    let err = match client.exchange(&identity()).await {
        Ok(result) => panic!("401 should fail, got {result:?}"),
        Err(err) => err,
    };

    match err {
        ExchangeError::HttpStatus { status, body } => {
            assert_eq!(status, 401);
            assert_eq!(body, "bad signature");
        }
        other => panic!("expected HttpStatus, got {other:?}"),
    }
    assert!(!client.is_authenticated());
}

#[tokio::test]
async fn error_body_never_echoes_the_token() {
    let (base, _request) = serve_once(
        "500 Internal Server Error",
        "text/plain",
        "rejected token tok-secret-123",
    )
    .await;
    let client = SessionClient::new(&base, "/api/auth/townpass", "user").expect("valid endpoint");

    let err = client.exchange(&identity()).await.expect_err("500 should fail");

    let rendered = err.to_string();
    assert!(rendered.contains("500"));
    assert!(!rendered.contains("tok-secret-123"), "{rendered}");
    match err {
        ExchangeError::HttpStatus { body, .. } => {
            assert_eq!(body, "rejected token tok-secret-123");
        }
        other => panic!("expected HttpStatus, got {other:?}"),
    }
}

#[tokio::test]
async fn error_body_is_kept_in_full() {
    let long_body = format!("  first line\n\n  {}  ", "x".repeat(600));
    let (base, _request) = serve_once("422 Unprocessable Entity", "text/plain", &long_body).await;
    let client = SessionClient::new(&base, "/api/auth/townpass", "user").expect("valid endpoint");

    let err = client.exchange(&identity()).await.expect_err("422 should fail");

    match err {
        ExchangeError::HttpStatus { status, body } => {
            assert_eq!(status, 422);
            assert_eq!(body, long_body);
        }
        other => panic!("expected HttpStatus, got {other:?}"),
    }
}

#[tokio::test]
async fn unreadable_error_body_keeps_the_status() {
    // Promises more body than it sends, then hangs up.
    let response = "HTTP/1.1 502 Bad Gateway\r\nContent-Type: text/plain\r\nContent-Length: 100\r\nConnection: close\r\n\r\npartial".to_owned();
    let (base, _request) = serve_raw(vec![response]).await;
    let client = SessionClient::new(&base, "/api/auth/townpass", "user").expect("valid endpoint");

    let err = client.exchange(&identity()).await.expect_err("502 should fail");

    match err {
        ExchangeError::HttpStatus { status, body } => {
            assert_eq!(status, 502);
            assert!(body.is_empty(), "{body:?}");
        }
        other => panic!("expected HttpStatus, got {other:?}"),
    }
    assert!(!client.is_authenticated());
}

#[tokio::test]
async fn success_with_non_json_body_is_a_parse_error() {
    let (base, _request) = serve_once("200 OK", "text/html", "<html>welcome</html>").await;
    let client = SessionClient::new(&base, "/api/auth/townpass", "user").expect("valid endpoint");

    let err = client.exchange(&identity()).await.expect_err("HTML should fail");

    assert!(matches!(err, ExchangeError::Parse(_)), "{err:?}");
    assert!(!client.is_authenticated());
}

#[tokio::test]
async fn unreachable_backend_is_a_request_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let client =
        SessionClient::new(&format!("http://{addr}"), "/auth", "user").expect("valid endpoint");

    let err = client.exchange(&identity()).await.expect_err("nothing listens");

    assert!(matches!(err, ExchangeError::Request(_)), "{err:?}");
}

#[tokio::test]
async fn failure_after_success_clears_authentication() {
    let (base, _request) = serve(vec![
        ("200 OK", "application/json", "{}"),
        ("403 Forbidden", "text/plain", "expired"),
    ])
    .await;
    let client = SessionClient::new(&base, "/auth", "user").expect("valid endpoint");
    client.exchange(&identity()).await.expect("first exchange succeeds");
    assert!(client.is_authenticated());

    let err = client.exchange(&identity()).await;

    assert!(matches!(err, Err(ExchangeError::HttpStatus { status: 403, .. })));
    assert!(!client.is_authenticated());
}
