use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mjpeg_relay::{config, server, Result, ServerConfig, SourceConfig};

/// Republish upstream MJPEG streams to multiple HTTP clients
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Upstream MJPEG URL (single-source mode)
    #[arg(long)]
    source: Option<String>,

    /// Upstream username
    #[arg(long, default_value = "")]
    username: String,

    /// Upstream password
    #[arg(long, default_value = "")]
    password: String,

    /// Use Digest auth instead of Basic
    #[arg(long)]
    digest: bool,

    /// Maximum frames per second forwarded downstream, 0 for unlimited
    #[arg(long, default_value_t = 0.0)]
    rate: f64,

    /// Accept part markers from noncompliant cameras
    #[arg(long)]
    legacy: bool,

    /// Serve path for the single source
    #[arg(long, default_value = "/")]
    path: String,

    /// JSON file with a list of sources, overrides --source
    #[arg(long)]
    config: Option<String>,

    /// Listen address
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Seconds to keep the upstream connection after the last client leaves
    #[arg(long, default_value_t = 60)]
    stop_delay: u64,

    /// Trust X-Real-IP / X-Forwarded-For from the reverse proxy in front
    #[arg(long)]
    trusted_proxy: bool,

    /// Header carrying the client address, implies a trusted proxy
    #[arg(long)]
    client_header: Option<String>,
}

impl Args {
    fn sources(&self) -> Result<Vec<SourceConfig>> {
        if let Some(path) = &self.config {
            return config::load(path);
        }

        let Some(source) = &self.source else {
            return Ok(Vec::new());
        };

        Ok(vec![SourceConfig {
            source: source.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            digest: self.digest,
            rate: self.rate,
            legacy: self.legacy,
            path: self.path.clone(),
        }])
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mjpeg_relay=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run(Args::parse()).await {
        tracing::error!(error = %e, "fatal");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let sources = args.sources()?;
    if sources.is_empty() {
        tracing::warn!("no sources configured, pass --source or --config");
    }

    let mut server_config = ServerConfig::default()
        .bind(args.bind)
        .idle_grace(Duration::from_secs(args.stop_delay))
        .trusted_proxy(args.trusted_proxy || args.client_header.is_some());
    if let Some(header) = &args.client_header {
        server_config = server_config.client_header(header.clone());
    }

    let router = server::build(sources, &server_config)?;

    tracing::info!(addr = %server_config.bind_addr, "listening");
    let listener = tokio::net::TcpListener::bind(server_config.bind_addr)
        .await
        .map_err(mjpeg_relay::error::ConfigError::Io)?;

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(mjpeg_relay::error::ConfigError::Io)?;

    Ok(())
}
