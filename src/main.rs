mod collectors;
mod config;
mod engine;
mod extensions;
mod http;
mod metrics;
mod snapshot;
mod units;

use axum::{serve, Router};
use clap::Parser;
use collectors::system::SystemSource;
use config::Config;
use engine::Collector;
use extensions::ExtensionRegistry;
use metrics::Metrics;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hostprobe")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };
    let secret = match cfg.resolve_api_secret() {
        Ok(secret) => secret,
        Err(err) => {
            error!(error = %err, "refusing to start without an API secret");
            std::process::exit(1);
        }
    };
    let addr = match cfg.listen_addr() {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, listen = %cfg.listen, "invalid listen address");
            std::process::exit(1);
        }
    };

    info!(
        listen = %addr,
        cpu_window_ms = cfg.sampling.cpu_window_ms,
        disk_io = cfg.sampling.disk_io,
        "starting hostprobe"
    );

    let registry = Arc::new(ExtensionRegistry::new());
    for name in &cfg.extensions {
        let registered = match extensions::builtin(name) {
            Ok(extension) => registry.register(extension).await,
            Err(err) => Err(err),
        };
        if let Err(err) = registered {
            warn!(error = %err, "extension disabled");
        }
    }
    if let Err(err) = registry.start_all().await {
        warn!(error = %err, "not every extension started");
    }
    info!(extensions = ?registry.running().await, "extensions running");

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialize metrics");
            std::process::exit(1);
        }
    };

    let collector = Collector::new(
        Arc::new(SystemSource::new()),
        cfg.sampling.cpu_window(),
        cfg.sampling.disk_io_window(),
        registry.clone(),
    );
    let app = http::build_router(http::HttpAppState {
        collector,
        metrics,
        secret: Arc::from(secret),
        stream: Arc::new(cfg.stream.clone()),
    });

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let mut http_task = tokio::spawn(serve_until(addr, app, async move {
        let _ = shutdown_rx.changed().await;
    }));

    let early_exit = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                error!(error = %err, "failed to listen for Ctrl+C");
            }
            None
        }
        outcome = &mut http_task => Some(outcome),
    };

    let server_result = match early_exit {
        None => {
            info!("received Ctrl+C, shutting down");
            let _ = shutdown_tx.send(true);
            http_task.await
        }
        Some(Ok(Ok(()))) => {
            error!("HTTP server stopped unexpectedly");
            Ok(Err(std::io::Error::other("server exited before shutdown")))
        }
        Some(outcome) => outcome,
    };

    if let Err(err) = registry.stop_all().await {
        warn!(error = %err, "extension shutdown incomplete");
    }

    match server_result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            error!(error = %err, "HTTP server failed");
            std::process::exit(1);
        }
        Err(err) => {
            error!(error = %err, "HTTP server task aborted");
            std::process::exit(1);
        }
    }
}

/// Binds `addr` and serves `app` until `shutdown` resolves. A bind failure is
/// returned instead of logged so the caller can exit non-zero.
async fn serve_until(
    addr: SocketAddr,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(listen = %addr, "HTTP API listening");
    serve(listener, app).with_graceful_shutdown(shutdown).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_failure_is_returned() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();
        let result = serve_until(addr, Router::new(), std::future::pending()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn graceful_shutdown_is_success() {
        let result = serve_until("127.0.0.1:0".parse().unwrap(), Router::new(), async {}).await;
        assert!(result.is_ok());
    }
}
