//! Capture log: one human-readable record per relayed exchange.
//!
//! Records are markdown files named `req-<timestamp>.md` (UTC, millisecond
//! precision, `:` and `.` replaced by `-`) holding three fenced sections: the
//! inbound request with its headers, the upstream response metadata, and the
//! response body. Files are created once and never rewritten.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{error, info};

/// Header name -> value, multi-valued headers joined with `, `.
pub type HeaderSnapshot = BTreeMap<String, String>;

const REQUEST_FENCE: &str = "## Request\n```json\n";
const MAX_NAME_ATTEMPTS: usize = 1000;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to write capture record {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read capture record {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode capture record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("malformed capture record: {0}")]
    MalformedRecord(String),
}

/// Upstream status and headers, or the failure that prevented a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMeta {
    pub status: u16,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: HeaderSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseMeta {
    pub fn success(status: u16, headers: HeaderSnapshot) -> Self {
        Self {
            status,
            headers,
            error: None,
        }
    }

    pub fn failure(status: u16, error: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderSnapshot::new(),
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRecord {
    pub timestamp: DateTime<Utc>,
    /// Inbound JSON body with a `headers` object merged in.
    pub request: Value,
    pub response: ResponseMeta,
    pub body: String,
}

impl CaptureRecord {
    pub fn new(request: Value, response: ResponseMeta, body: String) -> Self {
        Self {
            timestamp: Utc::now(),
            request,
            response,
            body,
        }
    }

    /// File name without extension, e.g. `req-2025-08-25T08-32-01-903Z`.
    pub fn file_stem(&self) -> String {
        let ts = self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);
        format!("req-{}", ts.replace([':', '.'], "-"))
    }

    pub fn to_markdown(&self) -> Result<String, CaptureError> {
        let request = serde_json::to_string_pretty(&self.request)?;
        let response = serde_json::to_string_pretty(&self.response)?;
        let ts = self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);

        Ok(format!(
            "# Request Log - {ts}\n\n{REQUEST_FENCE}{request}\n```\n\n## Response\n```json\n{response}\n```\n\n**Data:**\n```\n{body}\n```\n\n",
            body = self.body,
        ))
    }
}

/// Merge inbound headers into the request body the way records store it.
///
/// Non-object bodies are wrapped as `{"body": ...}`.
pub fn request_snapshot(headers: &HeaderSnapshot, body: &Value) -> Value {
    let mut obj = match body {
        Value::Object(map) => map.clone(),
        other => {
            let mut map = Map::new();
            map.insert("body".to_string(), other.clone());
            map
        }
    };
    let headers = headers
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    obj.insert("headers".to_string(), Value::Object(headers));
    Value::Object(obj)
}

/// A request read back from a capture record, ready to be replayed.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedRequest {
    pub headers: HeaderSnapshot,
    pub body: Value,
}

impl CapturedRequest {
    pub fn from_markdown(text: &str) -> Result<Self, CaptureError> {
        let start = text
            .find(REQUEST_FENCE)
            .map(|idx| idx + REQUEST_FENCE.len())
            .ok_or_else(|| CaptureError::MalformedRecord("missing request section".into()))?;

        // Pretty-printed JSON never puts a bare fence on its own line.
        let mut json = String::new();
        let mut closed = false;
        for line in text[start..].lines() {
            if line == "```" {
                closed = true;
                break;
            }
            json.push_str(line);
            json.push('\n');
        }
        if !closed {
            return Err(CaptureError::MalformedRecord(
                "unterminated request section".into(),
            ));
        }

        let value: Value = serde_json::from_str(&json)
            .map_err(|e| CaptureError::MalformedRecord(e.to_string()))?;
        let Value::Object(mut obj) = value else {
            return Err(CaptureError::MalformedRecord(
                "request section is not a JSON object".into(),
            ));
        };

        let headers = match obj.remove("headers") {
            Some(Value::Object(map)) => map
                .into_iter()
                .map(|(k, v)| match v {
                    Value::String(s) => (k, s),
                    other => (k, other.to_string()),
                })
                .collect(),
            _ => HeaderSnapshot::new(),
        };

        Ok(Self {
            headers,
            body: Value::Object(obj),
        })
    }
}

/// Append-only directory of capture records.
#[derive(Debug, Clone)]
pub struct CaptureLog {
    dir: PathBuf,
}

impl CaptureLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn ensure_dir(&self) -> Result<(), CaptureError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| CaptureError::Persistence {
                path: self.dir.clone(),
                source,
            })
    }

    /// Write `record` to a new file and return its path.
    ///
    /// A record landing on an existing name (same millisecond) gets a `-N` suffix.
    /// The content is staged in a temporary file and linked into place whole, on a
    /// blocking task that finishes even if the caller stops waiting.
    pub async fn record(&self, record: &CaptureRecord) -> Result<PathBuf, CaptureError> {
        let content = record.to_markdown()?;
        let stem = record.file_stem();
        let dir = self.dir.clone();

        tokio::task::spawn_blocking(move || write_record(&dir, &stem, content.as_bytes()))
            .await
            .map_err(|e| CaptureError::Persistence {
                path: self.dir.clone(),
                source: std::io::Error::other(e),
            })?
    }

    /// Write `record`, logging instead of returning any failure.
    pub async fn persist(&self, record: &CaptureRecord) {
        match self.record(record).await {
            Ok(path) => {
                let file = path.file_name().unwrap_or_default().to_string_lossy();
                info!(file = %file, "request logged");
            }
            Err(e) => error!(error = %e, "failed to write capture record"),
        }
    }

    /// Record paths in timestamp order.
    pub async fn records(&self) -> Result<Vec<PathBuf>, CaptureError> {
        let read_err = |source| CaptureError::Read {
            path: self.dir.clone(),
            source,
        };

        let mut entries = fs::read_dir(&self.dir).await.map_err(read_err)?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
            let path = entry.path();
            let is_record = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("req-") && n.ends_with(".md"));
            if is_record {
                paths.push(path);
            }
        }
        paths.sort_by_key(|p| record_sort_key(p));
        Ok(paths)
    }

    pub async fn load_request(path: impl AsRef<Path>) -> Result<CapturedRequest, CaptureError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .await
            .map_err(|source| CaptureError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        CapturedRequest::from_markdown(&text)
    }
}

fn write_record(dir: &Path, stem: &str, content: &[u8]) -> Result<PathBuf, CaptureError> {
    let staged = |source| CaptureError::Persistence {
        path: dir.to_path_buf(),
        source,
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(".capture-")
        .tempfile_in(dir)
        .map_err(staged)?;
    tmp.write_all(content).map_err(staged)?;
    tmp.as_file().sync_all().map_err(staged)?;

    for attempt in 0..MAX_NAME_ATTEMPTS {
        let path = dir.join(record_name(stem, attempt));
        tmp = match tmp.persist_noclobber(&path) {
            Ok(_) => return Ok(path),
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => e.file,
            Err(e) => return Err(CaptureError::Persistence { path, source: e.error }),
        };
    }

    Err(CaptureError::Persistence {
        path: dir.join(record_name(stem, 0)),
        source: std::io::Error::new(ErrorKind::AlreadyExists, "no free record name"),
    })
}

fn record_name(stem: &str, attempt: usize) -> String {
    if attempt == 0 {
        format!("{stem}.md")
    } else {
        format!("{stem}-{attempt}.md")
    }
}

/// Split `req-<ts>Z[-N].md` into its timestamp part and collision suffix.
fn record_sort_key(path: &Path) -> (String, u64) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.strip_suffix(".md").unwrap_or(&name);

    match stem.rsplit_once("Z-") {
        Some((ts, suffix)) => match suffix.parse() {
            Ok(n) => (format!("{ts}Z"), n),
            Err(_) => (stem.to_string(), 0),
        },
        None => (stem.to_string(), 0),
    }
}
