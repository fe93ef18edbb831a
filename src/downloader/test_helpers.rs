//! Shared test helpers: an HTTP range server backed by wiremock, with fault injection,
//! plus a raw TCP server for faults wiremock cannot express.

use crate::config::{Config, RetryConfig};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Config with short retry delays so failure tests stay fast
pub(crate) fn test_config() -> Config {
    Config {
        retry: RetryConfig {
            initial_delay: Duration::from_millis(10),
            ..RetryConfig::default()
        },
        ..Config::default()
    }
}

/// Deterministic, non-repeating-looking body of `len` bytes
pub(crate) fn pattern_body(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i.wrapping_mul(31) ^ (i >> 7)) as u8)
        .collect()
}

/// Parse `bytes=start-end` from a request's Range header
pub(crate) fn requested_range(request: &Request) -> Option<(usize, usize)> {
    let value = request.headers.get("range")?.to_str().ok()?;
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

/// Serves `body`: 206 with Content-Range for ranged requests, 200 otherwise
#[derive(Clone)]
pub(crate) struct RangeResponder {
    body: Arc<Vec<u8>>,
}

impl RangeResponder {
    pub(crate) fn new(body: Arc<Vec<u8>>) -> Self {
        Self { body }
    }
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        match requested_range(request) {
            Some((start, end)) if start <= end && end < self.body.len() => {
                ResponseTemplate::new(206)
                    .insert_header(
                        "content-range",
                        format!("bytes {}-{}/{}", start, end, self.body.len()).as_str(),
                    )
                    .set_body_bytes(self.body[start..=end].to_vec())
            }
            Some(_) => ResponseTemplate::new(416),
            None => ResponseTemplate::new(200).set_body_bytes(self.body.as_ref().clone()),
        }
    }
}

/// Misbehaviour injected into ranged responses
#[derive(Clone, Copy, Debug)]
pub(crate) enum Fault {
    /// Plain error status
    Status(u16),
    /// Ignore the Range header and send the full body with 200
    IgnoreRange,
    /// 206 with a Content-Range for a different window
    WrongContentRange,
    /// 206 with the right headers but only half the body
    Truncate,
}

/// Wraps a [`RangeResponder`], injecting a fault into the first `remaining`
/// requests for the range starting at `target_start`
pub(crate) struct FaultyRangeResponder {
    inner: RangeResponder,
    fault: Fault,
    target_start: usize,
    remaining: AtomicUsize,
}

impl FaultyRangeResponder {
    pub(crate) fn new(body: Arc<Vec<u8>>, fault: Fault, target_start: usize, times: usize) -> Self {
        Self {
            inner: RangeResponder::new(body),
            fault,
            target_start,
            remaining: AtomicUsize::new(times),
        }
    }

    fn take_fault(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Respond for FaultyRangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let Some((start, end)) = requested_range(request) else {
            return self.inner.respond(request);
        };
        if start != self.target_start || !self.take_fault() {
            return self.inner.respond(request);
        }

        let body = &self.inner.body;
        match self.fault {
            Fault::Status(code) => ResponseTemplate::new(code),
            Fault::IgnoreRange => ResponseTemplate::new(200).set_body_bytes(body.as_ref().clone()),
            Fault::WrongContentRange => ResponseTemplate::new(206)
                .insert_header(
                    "content-range",
                    format!("bytes 0-{}/{}", end - start, body.len()).as_str(),
                )
                .set_body_bytes(body[..=end - start].to_vec()),
            Fault::Truncate => {
                let half = start + (end - start + 1) / 2;
                ResponseTemplate::new(206)
                    .insert_header(
                        "content-range",
                        format!("bytes {}-{}/{}", start, end, body.len()).as_str(),
                    )
                    .set_body_bytes(body[start..half].to_vec())
            }
        }
    }
}

/// Mount a HEAD responder advertising `len` bytes (and optionally byte ranges) at `route`
pub(crate) async fn mount_head(server: &MockServer, route: &str, len: usize, accept_ranges: bool) {
    let mut template = ResponseTemplate::new(200)
        .insert_header("content-length", len.to_string().as_str())
        .set_body_bytes(vec![0u8; len]);
    if accept_ranges {
        template = template.insert_header("accept-ranges", "bytes");
    }

    Mock::given(method("HEAD"))
        .and(path(route))
        .respond_with(template)
        .mount(server)
        .await;
}

/// Mount HEAD and ranged GET for `body` at `route`
pub(crate) async fn mount_resource(
    server: &MockServer,
    route: &str,
    body: Arc<Vec<u8>>,
    accept_ranges: bool,
) {
    mount_head(server, route, body.len(), accept_ranges).await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(RangeResponder::new(body))
        .mount(server)
        .await;
}

/// Mount HEAD and a GET responder that injects `fault` into the range starting at `target_start`
pub(crate) async fn mount_faulty_resource(
    server: &MockServer,
    route: &str,
    body: Arc<Vec<u8>>,
    fault: Fault,
    target_start: usize,
    times: usize,
) {
    mount_head(server, route, body.len(), true).await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(FaultyRangeResponder::new(body, fault, target_start, times))
        .mount(server)
        .await;
}

/// All GET requests the server saw, as their Range header value ("" when absent)
pub(crate) async fn get_requests(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.method.as_str() == "GET")
        .map(|r| {
            r.headers
                .get("range")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        })
        .collect()
}

/// Raw HTTP/1.1 range server that closes the connection halfway through the
/// body of the first `drops` responses for the range starting at `target_start`
pub(crate) struct DroppingRangeServer {
    addr: SocketAddr,
    ranges: Arc<Mutex<Vec<String>>>,
    accept_loop: JoinHandle<()>,
}

impl DroppingRangeServer {
    pub(crate) async fn start(body: Arc<Vec<u8>>, target_start: usize, drops: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let ranges = Arc::new(Mutex::new(Vec::new()));
        let remaining = Arc::new(AtomicUsize::new(drops));

        let seen = Arc::clone(&ranges);
        let accept_loop = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let connection = DroppingConnection {
                    body: Arc::clone(&body),
                    target_start,
                    remaining: Arc::clone(&remaining),
                    seen: Arc::clone(&seen),
                };
                tokio::spawn(connection.serve(socket));
            }
        });

        Self {
            addr,
            ranges,
            accept_loop,
        }
    }

    pub(crate) fn uri(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Range header of every ranged GET received so far
    pub(crate) fn ranges(&self) -> Vec<String> {
        self.ranges.lock().unwrap().clone()
    }
}

impl Drop for DroppingRangeServer {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

struct DroppingConnection {
    body: Arc<Vec<u8>>,
    target_start: usize,
    remaining: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<String>>>,
}

impl DroppingConnection {
    /// Answer one request, then close the connection
    async fn serve(self, mut socket: TcpStream) {
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => request.extend_from_slice(&buf[..n]),
            }
        }
        let request = String::from_utf8_lossy(&request);
        let method = request.split_whitespace().next().unwrap_or_default();
        let range = request.lines().find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("range").then(|| value.trim().to_string())
        });
        let len = self.body.len();

        if method == "HEAD" {
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nAccept-Ranges: bytes\r\nConnection: close\r\n\r\n",
                len
            );
            let _ = socket.write_all(head.as_bytes()).await;
            return;
        }

        let Some(range) = range else {
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                len
            );
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.write_all(&self.body).await;
            let _ = socket.shutdown().await;
            return;
        };

        self.seen.lock().unwrap().push(range.clone());
        let (start, end) = range
            .strip_prefix("bytes=")
            .and_then(|r| r.split_once('-'))
            .map(|(s, e)| (s.parse::<usize>().unwrap(), e.parse::<usize>().unwrap()))
            .unwrap();
        let window = &self.body[start..=end];

        let head = format!(
            "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {}-{}/{}\r\nConnection: close\r\n\r\n",
            window.len(),
            start,
            end,
            len
        );
        if socket.write_all(head.as_bytes()).await.is_err() {
            return;
        }

        let drop_now = start == self.target_start
            && self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if drop_now {
            // Half the promised bytes, then the socket goes away with the connection
            let _ = socket.write_all(&window[..window.len() / 2]).await;
            let _ = socket.flush().await;
            return;
        }

        let _ = socket.write_all(window).await;
        let _ = socket.shutdown().await;
    }
}
