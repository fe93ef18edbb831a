//! HTTP fixtures: a wiremock server that honours byte ranges

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Deterministic body of `len` bytes
pub fn test_body(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed) ^ ((i >> 9) as u8))
        .collect()
}

fn parse_range(request: &Request) -> Option<(usize, usize)> {
    let value = request.headers.get("range")?.to_str().ok()?;
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

/// Serves a body with range support; the first `fail_first` ranged requests get a 500
pub struct RangedBody {
    body: Arc<Vec<u8>>,
    fail_first: AtomicUsize,
}

impl RangedBody {
    /// Well-behaved server for `body`
    pub fn new(body: Vec<u8>) -> Self {
        Self::flaky(body, 0)
    }

    /// Server for `body` that fails its first `failures` ranged requests
    pub fn flaky(body: Vec<u8>, failures: usize) -> Self {
        Self {
            body: Arc::new(body),
            fail_first: AtomicUsize::new(failures),
        }
    }
}

impl Respond for RangedBody {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let Some((start, end)) = parse_range(request) else {
            return ResponseTemplate::new(200).set_body_bytes(self.body.as_ref().clone());
        };

        let inject = self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if inject {
            return ResponseTemplate::new(500);
        }

        ResponseTemplate::new(206)
            .insert_header(
                "content-range",
                format!("bytes {}-{}/{}", start, end, self.body.len()).as_str(),
            )
            .set_body_bytes(self.body[start..=end].to_vec())
    }
}

/// Mount HEAD + GET for `body` at `route`
pub async fn serve(server: &MockServer, route: &str, responder: RangedBody) {
    let len = responder.body.len();
    Mock::given(method("HEAD"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-length", len.to_string().as_str())
                .insert_header("accept-ranges", "bytes")
                .set_body_bytes(vec![0u8; len]),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(responder)
        .mount(server)
        .await;
}

/// Number of GET requests the server received
pub async fn get_count(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.method.as_str() == "GET")
        .count()
}
