//! Streamed relay of an upstream body to the caller.
//!
//! The relay is a pull stream: actix polls it only as fast as the caller's
//! socket drains, and each poll pulls at most one chunk from upstream. Every
//! chunk is handed on unchanged and appended to a capture buffer; the capture
//! record is written once the upstream body ends.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use actix_web::web::Bytes;
use async_stream::stream;
use futures::{Stream, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::capture::{CaptureLog, CaptureRecord, HeaderSnapshot, ResponseMeta};

#[derive(Debug, Error)]
#[error("upstream body interrupted: {0}")]
pub struct RelayError(pub String);

/// Everything known about an exchange before its body is read.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub started: Instant,
    /// Capture snapshot of the inbound request.
    pub request: Value,
    pub status: u16,
    pub headers: HeaderSnapshot,
}

impl Exchange {
    pub fn new(started: Instant, request: Value, status: u16, headers: HeaderSnapshot) -> Self {
        Self {
            started,
            request,
            status,
            headers,
        }
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.started.elapsed().as_millis()
    }

    /// Build the capture record for a body read in full or up to `error`.
    pub fn into_record(self, body: &[u8], error: Option<String>) -> CaptureRecord {
        let text = capture_text(&self.headers, body);
        let mut response = ResponseMeta::success(self.status, self.headers);
        response.error = error;
        CaptureRecord::new(self.request, response, text)
    }

    pub fn log_completion(&self) {
        let elapsed_ms = self.elapsed_ms();
        info!(status = self.status, elapsed_ms, "{} {}ms", self.status, elapsed_ms);
    }
}

/// Body text for a capture record.
///
/// Encoded bodies are not decoded; the record notes their size and encoding
/// instead of holding mangled bytes.
fn capture_text(headers: &HeaderSnapshot, body: &[u8]) -> String {
    match headers.get("content-encoding").map(|v| v.trim()) {
        Some(enc) if !enc.is_empty() && !enc.eq_ignore_ascii_case("identity") => {
            format!("[{} bytes, content-encoding: {enc}]", body.len())
        }
        _ => String::from_utf8_lossy(body).into_owned(),
    }
}

/// Warns when dropped before the relay reached the end of the upstream body.
struct AbortGuard {
    status: u16,
    started: Instant,
    armed: bool,
}

impl AbortGuard {
    fn new(exchange: &Exchange) -> Self {
        Self {
            status: exchange.status,
            started: exchange.started,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        if self.armed {
            warn!(
                status = self.status,
                elapsed_ms = self.started.elapsed().as_millis(),
                "caller aborted before response completed"
            );
        }
    }
}

/// Relay `upstream` chunk by chunk, capturing the full body into `capture`.
///
/// If the caller goes away the returned stream is dropped mid-body: `upstream`
/// is dropped with it and no record is written. Once the body has ended, a
/// record whose write has started is completed even if the stream is dropped.
pub fn relay<S, E>(
    upstream: S,
    exchange: Exchange,
    capture: Option<Arc<CaptureLog>>,
) -> impl Stream<Item = Result<Bytes, RelayError>>
where
    S: Stream<Item = Result<Bytes, E>> + 'static,
    E: fmt::Display + 'static,
{
    stream! {
        let mut guard = AbortGuard::new(&exchange);
        let mut upstream = Box::pin(upstream);
        let mut body: Vec<u8> = Vec::new();
        let mut failure: Option<String> = None;

        while let Some(chunk) = upstream.next().await {
            match chunk {
                Ok(bytes) => {
                    body.extend_from_slice(&bytes);
                    yield Ok(bytes);
                }
                Err(e) => {
                    failure = Some(e.to_string());
                    break;
                }
            }
        }
        guard.disarm();
        exchange.log_completion();

        if let Some(err) = &failure {
            warn!(error = %err, status = exchange.status, "upstream body interrupted");
        }

        if let Some(log) = &capture {
            let record = exchange.into_record(&body, failure.clone());
            log.persist(&record).await;
        }

        if let Some(err) = failure {
            yield Err(RelayError(err));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io;
    use std::time::Duration;
    use tempfile::TempDir;

    fn exchange() -> Exchange {
        Exchange::new(
            Instant::now(),
            json!({"model": "glm-4.5", "headers": {}}),
            200,
            HeaderSnapshot::new(),
        )
    }

    fn chunks(parts: &[&'static str]) -> Vec<Result<Bytes, io::Error>> {
        parts.iter().map(|p| Ok(Bytes::from_static(p.as_bytes()))).collect()
    }

    async fn only_record(log: &CaptureLog) -> String {
        let records = log.records().await.unwrap();
        assert_eq!(records.len(), 1);
        tokio::fs::read_to_string(&records[0]).await.unwrap()
    }

    #[tokio::test]
    async fn test_chunks_arrive_in_order_and_are_captured() {
        let dir = TempDir::new().unwrap();
        let log = Arc::new(CaptureLog::new(dir.path()));

        let upstream = futures::stream::iter(chunks(&["ab", "cd", "ef"]));
        let received: Vec<Bytes> = relay(upstream, exchange(), Some(log.clone()))
            .map(|r| r.unwrap())
            .collect()
            .await;

        assert_eq!(
            received,
            vec![
                Bytes::from_static(b"ab"),
                Bytes::from_static(b"cd"),
                Bytes::from_static(b"ef")
            ]
        );
        let record = only_record(&log).await;
        assert!(record.contains("**Data:**\n```\nabcdef\n```"));
        assert!(!record.contains("\"error\""));
    }

    #[tokio::test]
    async fn test_caller_abort_writes_no_record() {
        let dir = TempDir::new().unwrap();
        let log = Arc::new(CaptureLog::new(dir.path()));

        let upstream = futures::stream::iter(chunks(&["ab", "cd", "ef"]));
        let mut relayed = Box::pin(relay(upstream, exchange(), Some(log.clone())));
        let first = relayed.next().await.unwrap().unwrap();
        assert_eq!(first, Bytes::from_static(b"ab"));
        drop(relayed);

        assert!(log.records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_interrupted_body_is_captured_with_error() {
        let dir = TempDir::new().unwrap();
        let log = Arc::new(CaptureLog::new(dir.path()));

        let mut parts = chunks(&["partial"]);
        parts.push(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer")));
        parts.extend(chunks(&["never"]));

        let results: Vec<Result<Bytes, RelayError>> =
            relay(futures::stream::iter(parts), exchange(), Some(log.clone()))
                .collect()
                .await;

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1]
            .as_ref()
            .is_err_and(|e| e.to_string().contains("reset by peer")));

        let record = only_record(&log).await;
        assert!(record.contains("\"error\": \"reset by peer\""));
        assert!(record.contains("**Data:**\n```\npartial\n```"));
    }

    #[tokio::test]
    async fn test_relay_without_capture() {
        let upstream = futures::stream::iter(chunks(&["x", "y"]));
        let n = relay(upstream, exchange(), None).count().await;
        assert_eq!(n, 2);
    }

    #[tokio::test]
    async fn test_drop_during_persist_leaves_whole_record() {
        let dir = TempDir::new().unwrap();
        let log = Arc::new(CaptureLog::new(dir.path()));

        let upstream = futures::stream::iter(chunks(&["ab", "cd", "ef"]));
        let mut relayed = Box::pin(relay(upstream, exchange(), Some(log.clone())));
        for _ in 0..3 {
            relayed.next().await.unwrap().unwrap();
        }
        // One poll past the last chunk starts the write; then the caller leaves.
        let _ = tokio::time::timeout(Duration::ZERO, relayed.next()).await;
        drop(relayed);

        let mut records = Vec::new();
        for _ in 0..200 {
            records = log.records().await.unwrap();
            if !records.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(records.len(), 1);
        let record = tokio::fs::read_to_string(&records[0]).await.unwrap();
        assert!(record.contains("**Data:**\n```\nabcdef\n```\n"));
        assert!(record.ends_with("```\n\n"));
    }

    #[test]
    fn test_encoded_body_is_noted_not_mangled() {
        let mut headers = HeaderSnapshot::new();
        headers.insert("content-encoding".into(), "gzip".into());
        let gzip_magic = [0x1f, 0x8b, 0x08, 0x00, 0xff, 0xfe];

        let record = Exchange::new(Instant::now(), json!({}), 200, headers)
            .into_record(&gzip_magic, None);

        assert_eq!(record.body, "[6 bytes, content-encoding: gzip]");
        assert_eq!(record.response.headers["content-encoding"], "gzip");
    }

    #[test]
    fn test_identity_body_is_kept_as_text() {
        let mut headers = HeaderSnapshot::new();
        headers.insert("content-encoding".into(), "identity".into());

        let record = Exchange::new(Instant::now(), json!({}), 200, headers)
            .into_record(b"data: {}\n\n", None);

        assert_eq!(record.body, "data: {}\n\n");
    }
}
