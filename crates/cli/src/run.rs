use std::{future::Future, sync::Arc, time::Duration};

use msglog_stream::{
    BackendError, LogBackend, LogStore, MemoryBackend, ServerOptions, StoreError, start_server,
};
use tokio::signal;
use tracing::{info, warn};

use crate::Context;

/// Environment variable overriding `redis.connection_string`.
const REDIS_URL_ENV: &str = "MSGLOG_REDIS_URL";

#[derive(Debug, Clone, PartialEq, clap::Args)]
pub struct RunCommand {
    /// Host to bind to (overrides server.host)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to run the server on (overrides server.port)
    #[arg(long, short = 'p')]
    pub port: Option<u16>,

    /// Redis connection string (overrides MSGLOG_REDIS_URL and redis.connection_string)
    #[arg(long = "redis-url")]
    pub redis_url: Option<String>,

    /// Keep messages in memory even if a redis connection string is configured
    #[arg(long = "in-memory", default_value = "false")]
    pub in_memory: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Failed to establish a redis connection: {0}")]
    Connect(BackendError),
    #[cfg(not(feature = "redis"))]
    #[error("A redis connection string is configured but this build has no redis support")]
    RedisUnsupported,
    #[error("Server failed: {0}")]
    Serve(std::io::Error),
    #[error("Failed to close the store connection: {0}")]
    Close(StoreError),
}

impl RunCommand {
    /// Server options from the config file with command-line overrides applied.
    fn server_options(&self, ctx: &Context) -> ServerOptions {
        let mut options = ctx.config.server_options();
        if let Some(host) = &self.host {
            options.host = host.clone();
        }
        if let Some(port) = self.port {
            options.port = port;
        }
        options
    }

    /// Flag, then environment, then config file.
    fn redis_url(&self, ctx: &Context) -> Option<String> {
        if self.in_memory {
            return None;
        }
        self.redis_url
            .clone()
            .or_else(|| std::env::var(REDIS_URL_ENV).ok())
            .or_else(|| ctx.config.redis.connection_string.clone())
            .filter(|url| !url.trim().is_empty())
    }

    pub async fn execute(&self, ctx: &Context) -> Result<(), RunError> {
        let options = self.server_options(ctx);
        let ttl = ctx.config.log_ttl();
        info!(
            config = %ctx.config_path.display(),
            ttl_seconds = ttl.as_secs(),
            "Starting msglog"
        );

        match self.redis_url(ctx) {
            Some(url) => run_redis(&url, ttl, options).await,
            None => {
                info!("No redis connection string configured, keeping messages in memory");
                serve_until_shutdown(MemoryBackend::new(), ttl, options, shutdown_signal()).await
            }
        }
    }
}

#[cfg(feature = "redis")]
async fn run_redis(url: &str, ttl: Duration, options: ServerOptions) -> Result<(), RunError> {
    let backend = msglog_stream::RedisBackend::connect(url)
        .await
        .map_err(RunError::Connect)?;
    serve_until_shutdown(backend, ttl, options, shutdown_signal()).await
}

#[cfg(not(feature = "redis"))]
async fn run_redis(_url: &str, _ttl: Duration, _options: ServerOptions) -> Result<(), RunError> {
    Err(RunError::RedisUnsupported)
}

/// Serve until `shutdown` resolves, then close the backend exactly once.
///
/// The store is closed whether the server stopped cleanly, failed, or gave up
/// on requests that outlived the drain deadline.
async fn serve_until_shutdown<B, F>(
    backend: B,
    ttl: Duration,
    options: ServerOptions,
    shutdown: F,
) -> Result<(), RunError>
where
    B: LogBackend,
    F: Future<Output = ()> + Send + 'static,
{
    let store = LogStore::with_ttl(backend, ttl);
    let served = start_server(store.clone(), options, shutdown).await;

    if Arc::strong_count(&store) > 1 {
        warn!("Requests still hold the store after shutdown, closing it under them");
    }
    let closed = store.close().await.map_err(RunError::Close);

    served.map_err(RunError::Serve)?;
    closed?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
