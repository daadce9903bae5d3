//! CSI Driver Starter
//!
//! Watches platform status, feature gates and installed CSI drivers, and
//! starts or stops the matching CSI driver operators.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use csi_driver_starter::{
    builtin_drivers, notice_channel, spawn_watchers, AssetRunnerFactory, DriverStarter, Error,
    EventRecorder, FanoutSink, Flavor, KubeClusterState, Result, StarterConfig, StarterMetrics,
    StarterView, TracingSink,
};
use csi_driver_starter::domain::ports::StatusSinkRef;

// =============================================================================
// CLI Arguments
// =============================================================================

/// CSI Driver Starter - runs the CSI driver operators admitted on this cluster
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Deployment flavor (standalone, hypershift)
    #[arg(long, env = "FLAVOR", default_value = "standalone")]
    flavor: Flavor,

    /// Directory holding the generated driver operator assets
    #[arg(long, env = "ASSETS_DIR", default_value = "/assets")]
    assets_dir: PathBuf,

    /// Namespace driver operators are deployed to
    #[arg(
        long,
        env = "OPERAND_NAMESPACE",
        default_value = "openshift-cluster-csi-drivers"
    )]
    operand_namespace: String,

    /// Release version whose feature gates apply (first status entry if unset)
    #[arg(long, env = "RELEASE_VERSION")]
    release_version: Option<String>,

    /// Periodic resync interval in seconds
    #[arg(long, env = "RESYNC_INTERVAL", default_value = "1200")]
    resync_interval_secs: u64,

    /// Grace period for stopping driver operators in seconds
    #[arg(long, env = "SHUTDOWN_GRACE", default_value = "30")]
    shutdown_grace_secs: u64,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args)?;

    info!("Starting CSI Driver Starter");
    info!("  Version: {}", csi_driver_starter::VERSION);
    info!("  Flavor: {}", args.flavor);
    info!("  Assets: {}", args.assets_dir.display());
    info!("  Operand namespace: {}", args.operand_namespace);

    let health_addr = parse_addr(&args.health_addr, "health")?;
    let metrics_addr = parse_addr(&args.metrics_addr, "metrics")?;

    let client = kube::Client::try_default().await?;
    let shutdown = CancellationToken::new();

    let drivers = builtin_drivers(args.flavor);
    let driver_names: Vec<String> = drivers.iter().map(|d| d.driver_name.clone()).collect();
    info!(drivers = drivers.len(), "Loaded driver catalog");

    let config = StarterConfig {
        resync_interval: Duration::from_secs(args.resync_interval_secs),
        shutdown_grace_period: Duration::from_secs(args.shutdown_grace_secs),
        ..Default::default()
    };

    // Status sinks
    let metrics = StarterMetrics::new(prometheus::default_registry())?;
    let recorder = Arc::new(EventRecorder::new());
    let sinks: Vec<StatusSinkRef> = vec![
        Arc::new(TracingSink),
        recorder.clone(),
        Arc::new(metrics),
    ];
    let sink = Arc::new(FanoutSink::new(sinks));

    // Change notices
    let (tx, rx) = notice_channel();
    let watchers = spawn_watchers(client.clone(), tx, shutdown.clone());

    let cluster = Arc::new(KubeClusterState::new(
        client.clone(),
        args.release_version.clone(),
    ));
    let runners = Arc::new(AssetRunnerFactory::new(
        args.assets_dir.clone(),
        client,
        args.operand_namespace.clone(),
        config.resync_interval,
    ));

    let starter = DriverStarter::new(config, drivers, cluster, rx, runners, sink)?;

    // Start health server
    let health_view = starter.running_view();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(health_addr, health_view, driver_names).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    });

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        signal_token.cancel();
    });

    starter.run(shutdown.clone()).await?;

    shutdown.cancel();
    futures::future::join_all(watchers).await;

    info!(events = recorder.events().len(), "Driver starter shutdown complete");
    Ok(())
}

fn parse_addr(addr: &str, server: &str) -> Result<SocketAddr> {
    addr.parse()
        .map_err(|e| Error::Configuration(format!("Invalid {} server address: {}", server, e)))
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "tower=warn"] {
        filter = filter.add_directive(
            directive
                .parse()
                .map_err(|e| Error::Configuration(format!("Invalid log directive: {}", e)))?,
        );
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}

// =============================================================================
// Health Server
// =============================================================================

#[derive(serde::Serialize)]
struct StatusBody<'a> {
    configured: &'a [String],
    #[serde(flatten)]
    view: StarterView,
}

fn respond(status: hyper::StatusCode, body: hyper::Body) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(body);
    *response.status_mut() = status;
    response
}

async fn run_health_server(
    addr: SocketAddr,
    view: watch::Receiver<StarterView>,
    configured: Vec<String>,
) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let configured = Arc::new(configured);
    let make_svc = make_service_fn(move |_conn| {
        let view = view.clone();
        let configured = configured.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let snapshot = view.borrow().clone();
                let configured = configured.clone();
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => respond(StatusCode::OK, Body::from("ok")),
                        // Ready once the first pass has completed
                        "/readyz" if snapshot.passes > 0 => {
                            respond(StatusCode::OK, Body::from("ok"))
                        }
                        "/readyz" => {
                            respond(StatusCode::SERVICE_UNAVAILABLE, Body::from("not ready"))
                        }
                        "/status" => {
                            let body = StatusBody {
                                configured: &configured,
                                view: snapshot,
                            };
                            match serde_json::to_vec(&body) {
                                Ok(json) => {
                                    let mut response = respond(StatusCode::OK, Body::from(json));
                                    response.headers_mut().insert(
                                        hyper::header::CONTENT_TYPE,
                                        hyper::header::HeaderValue::from_static(
                                            "application/json",
                                        ),
                                    );
                                    response
                                }
                                Err(e) => respond(
                                    StatusCode::INTERNAL_SERVER_ERROR,
                                    Body::from(e.to_string()),
                                ),
                            }
                        }
                        _ => respond(StatusCode::NOT_FOUND, Body::from("not found")),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: SocketAddr) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let metric_families = prometheus::gather();
                    let mut buffer = Vec::new();
                    match encoder.encode(&metric_families, &mut buffer) {
                        Ok(()) => {
                            let mut response = respond(StatusCode::OK, Body::from(buffer));
                            if let Ok(value) =
                                hyper::header::HeaderValue::from_str(encoder.format_type())
                            {
                                response
                                    .headers_mut()
                                    .insert(hyper::header::CONTENT_TYPE, value);
                            }
                            response
                        }
                        Err(e) => {
                            respond(StatusCode::INTERNAL_SERVER_ERROR, Body::from(e.to_string()))
                        }
                    }
                }
                _ => respond(StatusCode::NOT_FOUND, Body::from("not found")),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
