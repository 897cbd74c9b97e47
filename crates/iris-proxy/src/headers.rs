//! Header snapshots and forwarding filters.
//!
//! actix-web and reqwest sit on different `http` major versions, so headers
//! cross between them as strings and bytes.

use actix_web::http::header as actix_header;
use reqwest::header as upstream_header;

use crate::capture::HeaderSnapshot;

/// Connection-scoped headers that are never relayed in either direction.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
];

/// `content-length` goes stale once the body is re-encoded; `host` is derived
/// from the upstream URL.
pub fn is_forwardable_request_header(name: &str) -> bool {
    !matches!(name, "content-length" | "host") && !HOP_BY_HOP.contains(&name)
}

pub fn is_forwardable_response_header(name: &str) -> bool {
    name != "content-length" && !HOP_BY_HOP.contains(&name)
}

fn snapshot<'a>(pairs: impl Iterator<Item = (&'a str, &'a [u8])>) -> HeaderSnapshot {
    let mut out = HeaderSnapshot::new();
    for (name, value) in pairs {
        let value = String::from_utf8_lossy(value);
        out.entry(name.to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }
    out
}

pub fn snapshot_inbound(headers: &actix_header::HeaderMap) -> HeaderSnapshot {
    snapshot(headers.iter().map(|(k, v)| (k.as_str(), v.as_bytes())))
}

pub fn snapshot_upstream(headers: &upstream_header::HeaderMap) -> HeaderSnapshot {
    snapshot(headers.iter().map(|(k, v)| (k.as_str(), v.as_bytes())))
}

fn forwardable<'a>(pairs: impl Iterator<Item = (&'a str, &'a [u8])>) -> upstream_header::HeaderMap {
    let mut out = upstream_header::HeaderMap::new();
    for (name, value) in pairs {
        if !is_forwardable_request_header(name) {
            continue;
        }
        let (Ok(name), Ok(value)) = (
            upstream_header::HeaderName::from_bytes(name.as_bytes()),
            upstream_header::HeaderValue::from_bytes(value),
        ) else {
            continue;
        };
        out.append(name, value);
    }
    out
}

/// Inbound headers to send upstream in passthrough modes.
pub fn outbound(headers: &actix_header::HeaderMap) -> upstream_header::HeaderMap {
    forwardable(headers.iter().map(|(k, v)| (k.as_str(), v.as_bytes())))
}

/// Captured request headers to send upstream when a record is replayed.
pub fn outbound_from_snapshot(headers: &HeaderSnapshot) -> upstream_header::HeaderMap {
    forwardable(headers.iter().map(|(k, v)| (k.as_str(), v.as_bytes())))
}

/// Upstream response headers to copy onto the caller's response.
pub fn inbound_response(
    headers: &upstream_header::HeaderMap,
) -> Vec<(actix_header::HeaderName, actix_header::HeaderValue)> {
    headers
        .iter()
        .filter(|(name, _)| is_forwardable_response_header(name.as_str()))
        .filter_map(|(name, value)| {
            let name = actix_header::HeaderName::from_bytes(name.as_str().as_bytes()).ok()?;
            let value = actix_header::HeaderValue::from_bytes(value.as_bytes()).ok()?;
            Some((name, value))
        })
        .collect()
}

/// `authorization` for a flat-role upstream: the configured key wins, then the
/// caller's own `authorization`, then its `x-api-key` as a bearer token.
pub fn bearer_authorization(configured: Option<&str>, headers: &HeaderSnapshot) -> Option<String> {
    if let Some(key) = configured {
        return Some(format!("Bearer {key}"));
    }
    if let Some(auth) = headers.get("authorization") {
        return Some(auth.clone());
    }
    headers.get("x-api-key").map(|key| format!("Bearer {key}"))
}
