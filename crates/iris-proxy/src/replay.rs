//! Replay of a captured request against the configured upstream.
//!
//! A record's request section is sent again the way the proxy would have sent
//! it in the configured mode. The response is read whole and not captured.

use std::sync::Arc;

use iris_protocol::{RepairFilter, RepairLedger};
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use tracing::info;

use crate::{
    capture::{CapturedRequest, HeaderSnapshot},
    config::{ProxyConfig, ProxyMode},
    error::ProxyError,
    headers,
    server::{parse_conversation, translated_request},
};

/// What the upstream answered to a replayed request.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayOutcome {
    pub status: u16,
    pub headers: HeaderSnapshot,
    pub body: String,
}

pub async fn replay(
    client: &reqwest::Client,
    config: &ProxyConfig,
    captured: &CapturedRequest,
) -> Result<ReplayOutcome, ProxyError> {
    let request = match config.mode {
        ProxyMode::Capture => {
            let payload = serde_json::to_vec(&captured.body)?;
            passthrough(client, config, captured, payload)
        }
        ProxyMode::Repair => {
            // A fresh ledger: the record stands alone, outside any live session.
            let filter = RepairFilter::new(Arc::new(RepairLedger::new()));
            let repaired = filter.repair(parse_conversation(&captured.body)?);
            passthrough(client, config, captured, serde_json::to_vec(&repaired)?)
        }
        ProxyMode::Translate => {
            let conversation = parse_conversation(&captured.body)?;
            translated_request(client, config, &conversation, &captured.headers)?
        }
    };

    let response = request
        .send()
        .await
        .map_err(|e| ProxyError::Upstream(e.to_string()))?;
    let status = response.status().as_u16();
    let headers = headers::snapshot_upstream(response.headers());
    let body = response
        .text()
        .await
        .map_err(|e| ProxyError::Upstream(e.to_string()))?;

    info!(status, mode = %config.mode, "replayed captured request");
    Ok(ReplayOutcome {
        status,
        headers,
        body,
    })
}

fn passthrough(
    client: &reqwest::Client,
    config: &ProxyConfig,
    captured: &CapturedRequest,
    payload: Vec<u8>,
) -> reqwest::RequestBuilder {
    let mut outbound = headers::outbound_from_snapshot(&captured.headers);
    if !outbound.contains_key(CONTENT_TYPE) {
        outbound.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    client
        .post(config.upstream_url())
        .headers(outbound)
        .body(payload)
}
