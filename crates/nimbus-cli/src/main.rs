//! nimbus - forecast dispatch bridge / worker pool
//!
//! 役割（`--role`）ごとに必要な adapter だけをつないで起動する。
//! - frontend: HTTP + DispatchBridge + cache writer
//! - backend: worker pool + committer
//! - all: 両方（開発用）

mod http;

use std::env;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use nimbus_core::impls::{HttpForecastProvider, RedisCache, RedisStreamOptions, RedisStreamQueue};
use nimbus_core::config::redacted_url;
use nimbus_core::{AppBuilder, Config, Role};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[clap(
    name = "nimbus",
    version,
    about = "Bridges synchronous forecast requests to a queue-backed worker pool."
)]
#[clap(long_about = None)]
struct Args {
    /// Which half of the pipeline this process runs.
    #[clap(long, value_enum, env = "NIMBUS_ROLE", default_value_t = RoleArg::All)]
    role: RoleArg,

    /// HTTP port; overrides `HTTP_PORT`.
    #[clap(long)]
    port: Option<u16>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    Frontend,
    Backend,
    All,
}

impl RoleArg {
    fn roles(self) -> Vec<Role> {
        match self {
            RoleArg::Frontend => vec![Role::Frontend],
            RoleArg::Backend => vec![Role::Backend],
            RoleArg::All => Role::ALL.to_vec(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // .env は無くてもよい
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nimbus=info,nimbus_core=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let roles = args.role.roles();

    // SERVER_NAME が無ければホスト名を使う
    let host = hostname::get().ok().and_then(|h| h.into_string().ok());
    let mut config = Config::from_lookup(|name| {
        env::var(name).ok().or_else(|| match name {
            "SERVER_NAME" => host.clone(),
            _ => None,
        })
    })
    .map_err(|e| {
        error!("Failed to load configuration: {e}");
        e
    })?;
    if let Some(port) = args.port {
        config.http.port = port;
    }
    config.validate().map_err(|e| {
        error!("Configuration validation failed: {e}");
        e
    })?;

    info!(
        ?roles,
        server = config.server_name.as_deref().unwrap_or("-"),
        redis = %redacted_url(&config.cache.redis_url),
        queue = %redacted_url(&config.queue.url),
        request_queue = %config.queue.request_queue,
        response_queue = %config.queue.response_queue,
        "starting nimbus"
    );

    let stream_options = |stream: &str| {
        RedisStreamOptions::new(
            stream,
            config.queue.consumer_group.clone(),
            config.queue.consumer_name.clone(),
        )
        .visibility_timeout(config.queue.visibility_timeout)
    };
    let requests = RedisStreamQueue::connect(
        &config.queue.url,
        stream_options(&config.queue.request_queue),
    )
    .await?;
    let responses = RedisStreamQueue::connect(
        &config.queue.url,
        stream_options(&config.queue.response_queue),
    )
    .await?;

    let mut builder = AppBuilder::new(config.clone())
        .request_queue(Arc::new(requests))
        .response_queue(Arc::new(responses))
        .expect_roles(&roles);

    if roles.contains(&Role::Frontend) {
        let cache = RedisCache::connect(&config.cache.redis_url).await?;
        builder = builder.cache(Arc::new(cache));
    }
    if roles.contains(&Role::Backend) {
        let provider = HttpForecastProvider::new(
            config.provider.base_url.clone(),
            config.provider.api_key()?,
            config.provider.timeout,
        )?;
        builder = builder.provider(Arc::new(provider));
    }

    let app = builder.build().await.map_err(|e| {
        error!(kind = %e.kind(), "Failed to start: {e}");
        e
    })?;
    let workers = app.start();

    let listener = TcpListener::bind(("0.0.0.0", config.http.port)).await?;
    info!("Starting HTTP server on http://{}", listener.local_addr()?);
    axum::serve(listener, http::router(app.bridge()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    warn!(
        "Shutdown requested, draining in-flight work for up to {}s",
        config.shutdown_timeout.as_secs()
    );
    if !workers.shutdown_and_join(config.shutdown_timeout).await {
        warn!("Some background tasks were aborted");
    }
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
