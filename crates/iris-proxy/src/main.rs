//! `iris-proxy` binary entrypoint.
//!
//! Starts the Actix server using configuration from the environment and the
//! optional YAML file named by `IRIS_CONFIG`.

use anyhow::Context;
use iris_proxy::{init_subscriber, serve, ProxyConfig, TelemetryConfig};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber(&TelemetryConfig::from_env());

    let config = ProxyConfig::load().context("failed to load configuration")?;
    serve(config).await
}
