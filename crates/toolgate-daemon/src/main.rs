// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use toolgate_config::{GatewayConfig, SharedConfig};
use toolgate_daemon::{AppState, build_app};
use toolgate_upstream::UpstreamClient;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "toolgate", version, about = "Function-calling gateway for text-only LLM upstreams")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "toolgate.toml")]
    config: PathBuf,

    /// Override the bind address from the configuration.
    #[arg(long)]
    bind: Option<String>,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = GatewayConfig::load(&args.config)
        .with_context(|| format!("load config {}", args.config.display()))?;
    let warnings = config.validate().context("validate config")?;

    let filter = if args.debug {
        EnvFilter::new("toolgate=debug")
    } else {
        let level = config.features.log_level.as_deref().unwrap_or("toolgate=info");
        EnvFilter::new(level)
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    for warning in &warnings {
        warn!(%warning, "configuration warning");
    }

    let bind = args.bind.clone().unwrap_or_else(|| config.server.bind_addr());
    let upstream = UpstreamClient::new(Duration::from_secs(config.server.timeout))
        .context("build upstream client")?;
    let shared = SharedConfig::new(config);

    let state = Arc::new(AppState {
        config: shared.clone(),
        upstream,
    });

    #[cfg(unix)]
    spawn_reload_task(shared, args.config.clone());

    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    info!(bind = %bind, "toolgate listening");

    axum::serve(listener, app).await.context("serve")
}

/// Reload the configuration on SIGHUP and swap the shared snapshot.
/// In-flight requests keep the snapshot they started with.
#[cfg(unix)]
fn spawn_reload_task(shared: SharedConfig, path: PathBuf) {
    tokio::spawn(async move {
        let mut hangup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
        {
            Ok(s) => s,
            Err(err) => {
                error!(error = %err, "failed to install SIGHUP handler");
                return;
            }
        };
        while hangup.recv().await.is_some() {
            match GatewayConfig::load(&path).and_then(|c| c.validate().map(|w| (c, w))) {
                Ok((config, warnings)) => {
                    for warning in &warnings {
                        warn!(%warning, "configuration warning");
                    }
                    shared.swap(config);
                    info!(path = %path.display(), "configuration reloaded");
                }
                Err(err) => {
                    error!(error = %err, "configuration reload failed; keeping previous snapshot");
                }
            }
        }
    });
}
