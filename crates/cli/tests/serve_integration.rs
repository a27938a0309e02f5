//! Integration tests for the `docflow serve` HTTP API.
//!
//! Each test starts the server as a child process on a unique port,
//! makes HTTP requests, and verifies the responses.

use std::io::Read;
use std::net::TcpStream;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use serde_json::Value;

/// Atomic port counter to avoid port conflicts between parallel tests.
/// Base port is derived from process ID so separate test binaries don't
/// collide on the same port range.
static NEXT_PORT: AtomicU16 = AtomicU16::new(0);
static PORT_INIT: std::sync::Once = std::sync::Once::new();

fn next_port() -> u16 {
    PORT_INIT.call_once(|| {
        let base = 20000 + (std::process::id() as u16 % 20000);
        NEXT_PORT.store(base, Ordering::SeqCst);
    });
    NEXT_PORT.fetch_add(1, Ordering::SeqCst)
}

/// Kills the server when a test ends, including on assertion failure.
struct Server(Child);

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

/// Helper: start `docflow serve` on the given port with extra args and env.
fn start_server_with(port: u16, args: &[&str], envs: &[(&str, &str)]) -> Server {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_docflow"));
    cmd.arg("serve").arg("--port").arg(port.to_string());
    cmd.args(args);
    cmd.env_remove("DOCFLOW_API_KEY");
    cmd.env_remove("DOCFLOW_RATE_LIMIT");
    for (key, value) in envs {
        cmd.env(key, value);
    }
    cmd.stdout(std::process::Stdio::null());
    cmd.stderr(std::process::Stdio::null());

    let child = cmd.spawn().expect("failed to start docflow serve");
    // Wait for server to be ready by polling the port
    for _ in 0..50 {
        if TcpStream::connect(format!("127.0.0.1:{}", port)).is_ok() {
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    Server(child)
}

/// Helper: server with background workers disabled.
fn start_server(port: u16) -> Server {
    start_server_with(port, &["--no-workers"], &[])
}

fn send(port: u16, request: String) -> (u16, String, String) {
    let mut stream = TcpStream::connect(format!("127.0.0.1:{}", port)).expect("failed to connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    std::io::Write::write_all(&mut stream, request.as_bytes()).expect("failed to write");

    let mut response = String::new();
    let _ = stream.read_to_string(&mut response);

    parse_http_response_full(&response)
}

/// Helper: make a simple HTTP GET request and return (status, body).
fn http_get(port: u16, path: &str) -> (u16, String) {
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: localhost:{}\r\nConnection: close\r\n\r\n",
        path, port
    );
    let (status, _, body) = send(port, request);
    (status, body)
}

/// Helper: make an HTTP POST request with custom headers and return
/// (status, response_headers, body).
fn http_post_with_headers(
    port: u16,
    path: &str,
    body: &str,
    extra_headers: &[(&str, &str)],
) -> (u16, String, String) {
    let mut header_lines = String::new();
    for (name, value) in extra_headers {
        header_lines.push_str(&format!("{}: {}\r\n", name, value));
    }
    let request = format!(
        "POST {} HTTP/1.1\r\nHost: localhost:{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n{}Connection: close\r\n\r\n{}",
        path, port, body.len(), header_lines, body
    );
    send(port, request)
}

/// Helper: make a simple HTTP POST request and return (status, body).
fn http_post(port: u16, path: &str, body: &str) -> (u16, String) {
    let (status, _, body) = http_post_with_headers(port, path, body, &[]);
    (status, body)
}

fn json(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or_else(|e| panic!("invalid JSON ({e}): {body}"))
}

/// Extract a header value from raw headers string.
fn extract_header<'a>(headers: &'a str, name: &str) -> Option<&'a str> {
    let name_lower = name.to_lowercase();
    for line in headers.lines() {
        if let Some((key, value)) = line.split_once(':') {
            if key.trim().to_lowercase() == name_lower {
                return Some(value.trim());
            }
        }
    }
    None
}

/// Parse an HTTP response into (status_code, headers_string, body).
fn parse_http_response_full(response: &str) -> (u16, String, String) {
    let parts: Vec<&str> = response.splitn(2, "\r\n\r\n").collect();
    let headers = parts.first().unwrap_or(&"").to_string();
    let body = parts.get(1).unwrap_or(&"").to_string();

    let status_line = headers.lines().next().unwrap_or("");
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(0);

    let chunked = extract_header(&headers, "transfer-encoding")
        .map(|v| v.eq_ignore_ascii_case("chunked"))
        .unwrap_or(false);
    let body = if chunked { decode_chunked(&body) } else { body };

    (status, headers, body)
}

/// Decode chunked transfer encoding.
fn decode_chunked(data: &str) -> String {
    let mut result = String::new();
    let mut remaining = data;

    while let Some(line_end) = remaining.find("\r\n") {
        let size = match usize::from_str_radix(remaining[..line_end].trim(), 16) {
            Ok(s) => s,
            Err(_) => break,
        };
        if size == 0 {
            break;
        }
        let chunk_start = line_end + 2;
        let chunk_end = chunk_start + size;
        if chunk_end > remaining.len() {
            result.push_str(&remaining[chunk_start..]);
            break;
        }
        result.push_str(&remaining[chunk_start..chunk_end]);
        remaining = remaining.get(chunk_end + 2..).unwrap_or("");
    }

    result
}

/// Helper: create a document and return its id.
fn create_document(port: u16, author: &str, title: &str) -> String {
    let body = serde_json::json!({ "author": author, "title": title }).to_string();
    let (status, body) = http_post(port, "/api/v1/documents", &body);
    assert_eq!(status, 201, "create failed: {}", body);
    json(&body)["id"].as_str().unwrap().to_string()
}

fn batch_body(ids: &[&str], initiator: &str) -> String {
    serde_json::json!({ "documentIds": ids, "initiator": initiator }).to_string()
}

// ──────────────────────────────────────────────
// Health and routing
// ──────────────────────────────────────────────

#[test]
fn health_returns_200_with_version() {
    let port = next_port();
    let _server = start_server(port);

    let (status, body) = http_get(port, "/health");
    assert_eq!(status, 200);
    let value = json(&body);
    assert_eq!(value["status"], "ok");
    assert!(value["version"].is_string());
}

#[test]
fn unknown_route_returns_json_404() {
    let port = next_port();
    let _server = start_server(port);

    let (status, body) = http_get(port, "/nope");
    assert_eq!(status, 404);
    assert_eq!(json(&body)["error"], "NOT_FOUND");
}

// ──────────────────────────────────────────────
// Documents
// ──────────────────────────────────────────────

#[test]
fn create_then_get_returns_draft_with_empty_history() {
    let port = next_port();
    let _server = start_server(port);

    let body = r#"{"author":"Alice","title":"Quarterly report"}"#;
    let (status, created) = http_post(port, "/api/v1/documents", body);
    assert_eq!(status, 201);
    let created = json(&created);
    assert_eq!(created["status"], "DRAFT");
    assert_eq!(created["version"], 0);
    assert!(created["uniqueNumber"].as_str().unwrap().starts_with("DOC-"));

    let id = created["id"].as_str().unwrap();
    let (status, fetched) = http_get(port, &format!("/api/v1/documents/{}", id));
    assert_eq!(status, 200);
    let fetched = json(&fetched);
    assert_eq!(fetched["author"], "Alice");
    assert_eq!(fetched["history"].as_array().unwrap().len(), 0);
}

#[test]
fn create_with_blank_author_is_validation_error() {
    let port = next_port();
    let _server = start_server(port);

    let (status, body) = http_post(port, "/api/v1/documents", r#"{"author":" ","title":"T"}"#);
    assert_eq!(status, 400);
    assert_eq!(json(&body)["error"], "VALIDATION_ERROR");
}

#[test]
fn malformed_json_is_validation_error() {
    let port = next_port();
    let _server = start_server(port);

    let (status, body) = http_post(port, "/api/v1/documents", "{not json");
    assert_eq!(status, 400);
    assert_eq!(json(&body)["error"], "VALIDATION_ERROR");
}

#[test]
fn get_unknown_and_invalid_ids() {
    let port = next_port();
    let _server = start_server(port);

    let (status, body) = http_get(
        port,
        "/api/v1/documents/00000000-0000-4000-8000-000000000000",
    );
    assert_eq!(status, 404);
    assert_eq!(json(&body)["error"], "NOT_FOUND");

    let (status, body) = http_get(port, "/api/v1/documents/not-a-uuid");
    assert_eq!(status, 400);
    assert_eq!(json(&body)["error"], "VALIDATION_ERROR");
}

#[test]
fn single_submit_and_approve_walk_the_workflow() {
    let port = next_port();
    let _server = start_server(port);
    let id = create_document(port, "A", "T");

    let (status, body) = http_post(
        port,
        &format!("/api/v1/documents/{}/approve", id),
        r#"{"initiator":"u1"}"#,
    );
    assert_eq!(status, 409, "approve from DRAFT: {}", body);
    assert_eq!(json(&body)["error"], "CONFLICT");

    let (status, body) = http_post(
        port,
        &format!("/api/v1/documents/{}/submit", id),
        r#"{"initiator":"u1"}"#,
    );
    assert_eq!(status, 200, "{}", body);
    let receipt = json(&body);
    assert_eq!(receipt["from"], "DRAFT");
    assert_eq!(receipt["to"], "SUBMITTED");

    let (status, _) = http_post(
        port,
        &format!("/api/v1/documents/{}/approve", id),
        r#"{"initiator":"u2"}"#,
    );
    assert_eq!(status, 200);

    let (_, body) = http_get(port, &format!("/api/v1/documents/{}", id));
    let doc = json(&body);
    assert_eq!(doc["status"], "APPROVED");
    assert_eq!(doc["version"], 2);
    let history = doc["history"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["action"], "SUBMIT");
    assert_eq!(history[1]["action"], "APPROVE");
    assert_eq!(history[1]["initiator"], "u2");
}

#[test]
fn batch_approve_reports_per_item_outcomes() {
    let port = next_port();
    let _server = start_server(port);
    let ready = create_document(port, "A", "ready");
    let draft = create_document(port, "A", "draft");
    let missing = "00000000-0000-4000-8000-000000000001";

    let (status, body) = http_post(
        port,
        "/api/v1/documents/submit",
        &batch_body(&[&ready], "u1"),
    );
    assert_eq!(status, 200);
    assert_eq!(json(&body)[&ready], "SUCCESS");

    let (status, body) = http_post(
        port,
        "/api/v1/documents/approve",
        &batch_body(&[&ready, &draft, missing], "u2"),
    );
    assert_eq!(status, 200);
    let outcomes = json(&body);
    assert_eq!(outcomes[&ready], "SUCCESS");
    assert_eq!(outcomes[&draft], "CONFLICT");
    assert_eq!(outcomes[missing], "NOT_FOUND");
}

#[test]
fn batch_requests_are_validated() {
    let port = next_port();
    let _server = start_server(port);

    let (status, body) = http_post(port, "/api/v1/documents/submit", &batch_body(&[], "u1"));
    assert_eq!(status, 400);
    assert_eq!(json(&body)["error"], "VALIDATION_ERROR");

    let id = create_document(port, "A", "T");
    let (status, _) = http_post(port, "/api/v1/documents/approve", &batch_body(&[&id], ""));
    assert_eq!(status, 400);
}

#[test]
fn batch_get_skips_unknown_ids() {
    let port = next_port();
    let _server = start_server(port);
    let a = create_document(port, "A", "a");
    let b = create_document(port, "B", "b");

    let ids = serde_json::json!([a, "00000000-0000-4000-8000-000000000002", b]).to_string();
    let (status, body) = http_post(port, "/api/v1/documents/batch-get", &ids);
    assert_eq!(status, 200);
    let docs = json(&body);
    let docs = docs.as_array().unwrap();
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0]["id"], a.as_str());
    assert_eq!(docs[1]["id"], b.as_str());
}

#[test]
fn concurrency_test_endpoint_reports_single_winner() {
    let port = next_port();
    let _server = start_server(port);
    let id = create_document(port, "A", "T");
    http_post(
        port,
        &format!("/api/v1/documents/{}/submit", id),
        r#"{"initiator":"u1"}"#,
    );

    let (status, body) = http_post(
        port,
        &format!("/api/v1/documents/{}/concurrency-test?threads=5&attempts=10", id),
        "",
    );
    assert_eq!(status, 200, "{}", body);
    let report = json(&body);
    assert_eq!(report["successCount"], 1);
    assert_eq!(report["conflictCount"], 9);
    assert_eq!(report["errorCount"], 0);
    assert_eq!(report["finalStatus"], "APPROVED");
}

#[test]
fn concurrency_test_with_zero_threads_is_rejected() {
    let port = next_port();
    let _server = start_server(port);
    let id = create_document(port, "A", "T");

    let (status, _) = http_post(
        port,
        &format!("/api/v1/documents/{}/concurrency-test?threads=0", id),
        "",
    );
    assert_eq!(status, 400);
}

#[test]
fn concurrency_test_above_ceiling_is_rejected() {
    let port = next_port();
    let _server = start_server(port);
    let id = create_document(port, "A", "T");

    let (status, body) = http_post(
        port,
        &format!(
            "/api/v1/documents/{}/concurrency-test?threads={}&attempts=1",
            id,
            usize::MAX
        ),
        "",
    );
    assert_eq!(status, 400, "{}", body);
    assert_eq!(json(&body)["error"], "VALIDATION_ERROR");

    let (status, _) = http_get(port, "/health");
    assert_eq!(status, 200);
}

// ──────────────────────────────────────────────
// Background workers
// ──────────────────────────────────────────────

#[test]
fn workers_drive_drafts_to_approved() {
    let port = next_port();
    let _server = start_server_with(
        port,
        &[],
        &[
            ("DOCFLOW_SUBMIT_DELAY_MS", "50"),
            ("DOCFLOW_APPROVE_DELAY_MS", "50"),
        ],
    );
    let id = create_document(port, "A", "T");

    let mut status = String::new();
    for _ in 0..100 {
        let (_, body) = http_get(port, &format!("/api/v1/documents/{}", id));
        status = json(&body)["status"].as_str().unwrap_or("").to_string();
        if status == "APPROVED" {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    assert_eq!(status, "APPROVED");

    let (_, body) = http_get(port, &format!("/api/v1/documents/{}", id));
    let doc = json(&body);
    assert_eq!(doc["history"][0]["initiator"], "SUBMIT-WORKER");
    assert_eq!(doc["history"][1]["initiator"], "APPROVE-WORKER");
}

// ──────────────────────────────────────────────
// Authentication
// ──────────────────────────────────────────────

#[test]
fn api_key_is_enforced_except_on_health() {
    let port = next_port();
    let _server = start_server_with(port, &["--no-workers"], &[("DOCFLOW_API_KEY", "s3cret")]);
    let body = r#"{"author":"A","title":"T"}"#;

    let (status, _) = http_get(port, "/health");
    assert_eq!(status, 200);

    let (status, _, _) = http_post_with_headers(port, "/api/v1/documents", body, &[]);
    assert_eq!(status, 401);

    let (status, _, _) =
        http_post_with_headers(port, "/api/v1/documents", body, &[("X-API-Key", "wrong")]);
    assert_eq!(status, 403);

    let (status, headers, _) = http_post_with_headers(
        port,
        "/api/v1/documents",
        body,
        &[("Authorization", "Bearer s3cret")],
    );
    assert_eq!(status, 201);
    assert_eq!(
        extract_header(&headers, "content-type"),
        Some("application/json")
    );
}

#[test]
fn rate_limit_returns_429_when_configured() {
    let port = next_port();
    let _server = start_server_with(port, &["--no-workers"], &[("DOCFLOW_RATE_LIMIT", "2")]);

    assert_eq!(http_get(port, "/health").0, 200);
    assert_eq!(http_get(port, "/health").0, 200);
    let (status, body) = http_get(port, "/health");
    assert_eq!(status, 429);
    assert_eq!(json(&body)["error"], "RATE_LIMITED");
}
