//! Iris Proxy - HTTP relay between coding agents and chat-completion upstreams.
//!
//! Coding agents speak a block-structured `/v1/messages` API. This crate
//! accepts that traffic and, depending on [`ProxyMode`]:
//! - `capture`: forwards it untouched to a block-structured upstream,
//! - `repair`: splits tool-result messages a strict upstream would reject,
//! - `translate`: converts it to a flat-role `chat/completions` call.
//!
//! Every exchange can be written to a markdown capture log for later
//! inspection or replay.

pub mod capture;
pub mod config;
pub mod error;
pub mod headers;
pub mod relay;
pub mod replay;
pub mod server;
pub mod telemetry;

pub use capture::{CaptureError, CaptureLog, CaptureRecord, CapturedRequest};
pub use config::{ConfigError, ProxyConfig, ProxyMode};
pub use error::ProxyError;
pub use replay::{replay, ReplayOutcome};
pub use server::{routes, serve, upstream_client, AppState};
pub use telemetry::{init_subscriber, TelemetryConfig};
