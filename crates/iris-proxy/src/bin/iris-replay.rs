//! `iris-replay` binary: resend a captured request to the configured upstream.
//!
//! Takes the record path as its only argument, or replays the newest record in
//! the capture directory when none is given. The upstream body goes to stdout.

use std::path::PathBuf;

use anyhow::Context;
use iris_proxy::{
    init_subscriber, replay, upstream_client, CaptureLog, ProxyConfig, TelemetryConfig,
};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber(&TelemetryConfig::from_env());

    let config = ProxyConfig::load().context("failed to load configuration")?;
    let path = match std::env::args_os().nth(1) {
        Some(arg) => PathBuf::from(arg),
        None => CaptureLog::new(&config.capture_dir)
            .records()
            .await?
            .pop()
            .with_context(|| {
                format!("no capture records in {}", config.capture_dir.display())
            })?,
    };

    let captured = CaptureLog::load_request(&path).await?;
    info!(record = %path.display(), upstream = %config.upstream_url(), "replaying");

    let client = upstream_client(&config)?;
    let outcome = replay(&client, &config, &captured).await?;

    info!(status = outcome.status, "upstream answered");
    println!("{}", outcome.body);
    Ok(())
}
