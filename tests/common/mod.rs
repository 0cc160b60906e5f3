//! Minimal HTTP/1.1 mock endpoints on a local TcpListener.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Helper: bind a TCP listener on localhost and return (listener, port).
pub async fn mock_listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Read one full request (headers plus Content-Length or chunked body).
pub async fn read_request(socket: &mut TcpStream) -> Vec<u8> {
    let mut data = Vec::new();
    let mut buf = vec![0u8; 16 * 1024];

    let header_end = loop {
        if let Some(pos) = find(&data, b"\r\n\r\n") {
            break pos + 4;
        }
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return data,
            Ok(n) => data.extend_from_slice(&buf[..n]),
        }
    };

    let head = String::from_utf8_lossy(&data[..header_end]).to_lowercase();
    let content_length = head
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok());
    let chunked = head.contains("transfer-encoding: chunked");

    loop {
        let body = &data[header_end..];
        let complete = match content_length {
            Some(len) => body.len() >= len,
            None if chunked => find(body, b"0\r\n\r\n").is_some(),
            None => true,
        };
        if complete {
            return data;
        }
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return data,
            Ok(n) => data.extend_from_slice(&buf[..n]),
        }
    }
}

/// Request line target, e.g. `/v1/tasks/abc`.
pub fn request_path(request: &str) -> &str {
    request
        .lines()
        .next()
        .and_then(|l| l.split_whitespace().nth(1))
        .unwrap_or("")
}

pub fn http_response(status: &str, content_type: &str, body: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )
    .into_bytes();
    out.extend_from_slice(body);
    out
}

pub fn json_response(status: &str, body: &str) -> Vec<u8> {
    http_response(status, "application/json", body.as_bytes())
}

pub fn png_response(body: &[u8]) -> Vec<u8> {
    http_response("200 OK", "image/png", body)
}

/// Captured raw requests, in arrival order.
pub type RequestLog = Arc<Mutex<Vec<String>>>;

/// Serve every connection with `handler(request_text)` until the test ends.
/// Returns the port and a log of received requests.
pub async fn spawn_router<F>(handler: F) -> (u16, RequestLog)
where
    F: Fn(&str) -> Vec<u8> + Send + Sync + 'static,
{
    spawn_async_router(move |request: String| {
        let reply = handler(&request);
        async move { reply }
    })
    .await
}

/// Like `spawn_router`, but the handler may await (e.g. to delay a reply).
/// Connections are served concurrently.
pub async fn spawn_async_router<F, Fut>(handler: F) -> (u16, RequestLog)
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Vec<u8>> + Send + 'static,
{
    let (listener, port) = mock_listener().await;
    let log: RequestLog = Arc::new(Mutex::new(Vec::new()));
    let handler = Arc::new(handler);
    let server_log = log.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let handler = handler.clone();
            let log = server_log.clone();
            tokio::spawn(async move {
                let raw = read_request(&mut socket).await;
                let request = String::from_utf8_lossy(&raw).into_owned();
                log.lock().unwrap().push(request.clone());
                let reply = handler(request).await;
                let _ = socket.write_all(&reply).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (port, log)
}

/// Requests in `log` whose target starts with `prefix`.
pub fn count_requests(log: &RequestLog, prefix: &str) -> usize {
    log.lock()
        .unwrap()
        .iter()
        .filter(|r| request_path(r).starts_with(prefix))
        .count()
}

/// `Host` header value, e.g. `127.0.0.1:4321`.
pub fn request_host(request: &str) -> String {
    request
        .lines()
        .find_map(|l| {
            let (name, value) = l.split_once(':')?;
            name.eq_ignore_ascii_case("host").then(|| value.trim().to_string())
        })
        .unwrap_or_default()
}

/// JSON body of a captured request.
pub fn request_json(request: &str) -> serde_json::Value {
    let start = request.find("\r\n\r\n").map(|p| p + 4).unwrap_or(request.len());
    serde_json::from_str(&request[start..]).unwrap_or(serde_json::Value::Null)
}
