//! Actix Web HTTP server.
//!
//! Exposes:
//! - `POST /v1/messages` (relayed according to the configured [`ProxyMode`])
//! - `GET /` (service metadata)
//! - `GET /health`

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::{
    capture::{request_snapshot, CaptureLog, CaptureRecord, HeaderSnapshot, ResponseMeta},
    config::{ProxyConfig, ProxyMode},
    error::ProxyError,
    headers,
    relay::{relay, Exchange},
};
use actix_cors::Cors;
use actix_web::{
    http::StatusCode, web, App, HttpRequest, HttpResponse, HttpResponseBuilder, HttpServer,
};
use anyhow::{Context, Result};
use iris_protocol::{translate, ConversationRequest, RepairFilter, RepairLedger};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

/// Coding-agent conversations routinely exceed actix's 256 KiB default.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: ProxyConfig,
    pub client: reqwest::Client,
    pub capture: Option<Arc<CaptureLog>>,
    pub repair: RepairFilter,
}

/// HTTP client for upstream calls, shared by the server and record replay.
pub fn upstream_client(config: &ProxyConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .build()
        .context("failed to build reqwest client")
}

impl AppState {
    pub fn new(config: ProxyConfig) -> Result<Self> {
        let client = upstream_client(&config)?;

        let capture = config
            .capture_enabled
            .then(|| Arc::new(CaptureLog::new(&config.capture_dir)));

        Ok(Self {
            config,
            client,
            capture,
            repair: RepairFilter::new(Arc::new(RepairLedger::new())),
        })
    }

    async fn capture(&self, record: CaptureRecord) {
        if let Some(log) = &self.capture {
            log.persist(&record).await;
        }
    }

    /// Capture a failed exchange and hand back the error for the caller.
    async fn fail(&self, request: Value, err: ProxyError) -> ProxyError {
        error!(error = %err, "upstream exchange failed");
        let status = StatusCode::BAD_GATEWAY.as_u16();
        self.capture(CaptureRecord::new(
            request,
            ResponseMeta::failure(status, err.to_string()),
            String::new(),
        ))
        .await;
        err
    }
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::PayloadConfig::new(MAX_BODY_BYTES))
        .route("/", web::get().to(index))
        .route("/health", web::get().to(health_check))
        .route("/v1/messages", web::post().to(handle_messages));
}

pub async fn serve(config: ProxyConfig) -> Result<()> {
    let addr = format!("0.0.0.0:{}", config.port);
    let state = AppState::new(config)?;

    if let Some(log) = &state.capture {
        log.ensure_dir().await.with_context(|| {
            format!("failed to create capture directory {}", log.dir().display())
        })?;
    }

    info!(
        addr = %addr,
        mode = %state.config.mode,
        upstream = %state.config.upstream_url(),
        capture = state.capture.is_some(),
        "iris-proxy listening"
    );

    let state = web::Data::new(state);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Cors::permissive())
            .configure(routes)
    })
    .bind(&addr)
    .with_context(|| format!("failed to bind {}", addr))?
    .run()
    .await
    .context("server error")?;

    Ok(())
}

async fn index(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "message": "Iris relay is running",
        "mode": state.config.mode.as_str(),
        "endpoints": {
            "messages": "POST /v1/messages",
            "health": "GET /health"
        },
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health_check() -> &'static str {
    "OK"
}

pub(crate) fn parse_conversation(raw: &Value) -> Result<ConversationRequest, ProxyError> {
    let conversation: ConversationRequest =
        serde_json::from_value(raw.clone()).map_err(|e| ProxyError::InvalidBody(e.to_string()))?;

    debug!(
        model = conversation.model().unwrap_or("-"),
        stream = conversation.is_streaming(),
        messages = conversation.messages.len(),
        "parsed conversation"
    );
    let misplaced = conversation
        .messages
        .iter()
        .filter(|m| !m.role_invariant_holds())
        .count();
    if misplaced > 0 {
        warn!(misplaced, "messages carry tool blocks their role does not send");
    }
    Ok(conversation)
}

/// `chat/completions` request for `conversation`, authorized from config or `inbound`.
pub(crate) fn translated_request(
    client: &reqwest::Client,
    config: &ProxyConfig,
    conversation: &ConversationRequest,
    inbound: &HeaderSnapshot,
) -> Result<reqwest::RequestBuilder, ProxyError> {
    let chat = translate(conversation, &config.model)?;
    let payload = serde_json::to_vec(&chat)?;

    let authorization = headers::bearer_authorization(
        config.api_key.as_ref().map(|k| k.expose_secret()),
        inbound,
    );

    let mut request = client
        .post(config.upstream_url())
        .header(CONTENT_TYPE, "application/json")
        .body(payload);
    if let Some(auth) = authorization {
        request = request.header(AUTHORIZATION, auth);
    }
    Ok(request)
}

async fn handle_messages(
    state: web::Data<AppState>,
    req_http: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, ProxyError> {
    let started = Instant::now();
    let raw: Value =
        serde_json::from_slice(&body).map_err(|e| ProxyError::InvalidBody(e.to_string()))?;
    let inbound = headers::snapshot_inbound(req_http.headers());
    let snapshot = request_snapshot(&inbound, &raw);

    debug!(mode = %state.config.mode, bytes = body.len(), "inbound request");

    match state.config.mode {
        ProxyMode::Capture => forward_streaming(&state, &req_http, body, snapshot, started).await,
        ProxyMode::Repair => {
            let repaired = state.repair.repair(parse_conversation(&raw)?);
            let payload = web::Bytes::from(serde_json::to_vec(&repaired)?);
            forward_streaming(&state, &req_http, payload, snapshot, started).await
        }
        ProxyMode::Translate => {
            let conversation = parse_conversation(&raw)?;
            forward_translated(&state, &inbound, &conversation, snapshot, started).await
        }
    }
}

fn response_builder(
    status: reqwest::StatusCode,
    upstream: &reqwest::header::HeaderMap,
) -> HttpResponseBuilder {
    let status = StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = HttpResponse::build(status);
    for pair in headers::inbound_response(upstream) {
        builder.append_header(pair);
    }
    builder
}

/// Block-structured passthrough: relay the upstream body as it arrives.
async fn forward_streaming(
    state: &AppState,
    req_http: &HttpRequest,
    payload: web::Bytes,
    snapshot: Value,
    started: Instant,
) -> Result<HttpResponse, ProxyError> {
    let sent = state
        .client
        .post(state.config.upstream_url())
        .headers(headers::outbound(req_http.headers()))
        .body(payload)
        .send()
        .await;

    let upstream = match sent {
        Ok(r) => r,
        Err(e) => return Err(state.fail(snapshot, ProxyError::Upstream(e.to_string())).await),
    };

    let status = upstream.status();
    let mut builder = response_builder(status, upstream.headers());
    let exchange = Exchange::new(
        started,
        snapshot,
        status.as_u16(),
        headers::snapshot_upstream(upstream.headers()),
    );

    if !status.is_success() {
        return relay_buffered(state, exchange, builder, upstream).await;
    }

    Ok(builder.streaming(relay(
        upstream.bytes_stream(),
        exchange,
        state.capture.clone(),
    )))
}

/// Flat-role upstream: translate, call `chat/completions`, return its JSON whole.
async fn forward_translated(
    state: &AppState,
    inbound: &HeaderSnapshot,
    conversation: &ConversationRequest,
    snapshot: Value,
    started: Instant,
) -> Result<HttpResponse, ProxyError> {
    let request = translated_request(&state.client, &state.config, conversation, inbound)?;

    let upstream = match request.send().await {
        Ok(r) => r,
        Err(e) => return Err(state.fail(snapshot, ProxyError::Upstream(e.to_string())).await),
    };

    let status = upstream.status();
    let builder = response_builder(status, upstream.headers());
    let exchange = Exchange::new(
        started,
        snapshot,
        status.as_u16(),
        headers::snapshot_upstream(upstream.headers()),
    );

    relay_buffered(state, exchange, builder, upstream).await
}

/// Read the whole upstream body, capture it, then answer in one piece.
async fn relay_buffered(
    state: &AppState,
    exchange: Exchange,
    mut builder: HttpResponseBuilder,
    upstream: reqwest::Response,
) -> Result<HttpResponse, ProxyError> {
    let body = match upstream.bytes().await {
        Ok(b) => b,
        Err(e) => {
            let err = ProxyError::Upstream(e.to_string());
            return Err(state.fail(exchange.request, err).await);
        }
    };

    if body.is_empty() && !(200..300).contains(&exchange.status) {
        let err = ProxyError::UpstreamStatus {
            status: exchange.status,
        };
        return Err(state.fail(exchange.request, err).await);
    }

    exchange.log_completion();
    state.capture(exchange.into_record(&body, None)).await;

    Ok(builder.body(body))
}
