//! Node Fleet Operator
//!
//! Binary entrypoint: wires the adapters, starts the consumer pools and the
//! health/metrics servers, and tears everything down on SIGINT.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use nodefleet_operator::balancing::{BalancerAttachment, LoadBalancerProvisioner};
use nodefleet_operator::config::RuntimeConfig;
use nodefleet_operator::consumer::{ConsumerSet, Handlers};
use nodefleet_operator::domain::ports::{
    ChainRpcRef, CloudProviderRef, ContainerBackendRef, MessageBusRef, StoreRef,
};
use nodefleet_operator::orchestration::{BootstrapCoordinator, NodeDeployer};
use nodefleet_operator::standalone::{MemoryBus, MemoryStore, StandaloneBackend, StandaloneCloud};
use nodefleet_operator::stats::{HttpChainRpc, StatsRegistry};
use nodefleet_operator::{Error, Result};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Node Fleet Operator - blockchain node and load balancer orchestration
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Workers per consumed subject
    #[arg(long, env = "SUBJECT_WORKERS", default_value = "4")]
    subject_workers: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Run with in-process adapters (no external bus/cloud/backend)
    #[arg(long, env = "STANDALONE")]
    standalone: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting Node Fleet Operator");
    info!("  Version: {}", nodefleet_operator::VERSION);
    info!("  Standalone mode: {}", args.standalone);

    if !args.standalone {
        return Err(Error::Configuration(
            "external bus/cloud adapters are wired per deployment; run with --standalone".into(),
        ));
    }

    let mut config = RuntimeConfig::default();
    config.workers.block_finalized = args.subject_workers;
    config.workers.resolve_peer = args.subject_workers;
    config.workers.add_peer = args.subject_workers;
    config.workers.remove_peer = args.subject_workers;
    config.workers.balance_node = args.subject_workers;

    // Adapters
    let store: StoreRef = Arc::new(MemoryStore::new());
    let bus: MessageBusRef = Arc::new(MemoryBus::new());
    let cloud: CloudProviderRef = Arc::new(StandaloneCloud::new());
    let backend: ContainerBackendRef = Arc::new(StandaloneBackend::new());
    let rpc: ChainRpcRef = Arc::new(HttpChainRpc::new());

    // Registries and services; constructed once, passed by reference
    let bootstrap = BootstrapCoordinator::new(store.clone());
    let stats = StatsRegistry::new(store.clone(), bus.clone(), rpc.clone(), config.clone());
    let attachment = BalancerAttachment::new(store.clone(), cloud.clone(), bus.clone());
    let provisioner = LoadBalancerProvisioner::new(store.clone(), cloud.clone());
    let deployer = NodeDeployer::new(
        store.clone(),
        backend.clone(),
        bus.clone(),
        rpc.clone(),
        bootstrap.clone(),
        stats.clone(),
        attachment.clone(),
        config.clone(),
    );

    let handlers = Handlers::new(
        store.clone(),
        bus.clone(),
        rpc.clone(),
        backend.clone(),
        deployer.clone(),
        attachment.clone(),
        provisioner.clone(),
    );

    let consumers = ConsumerSet::new(bus.clone(), handlers, config.clone());
    consumers.start().await?;

    // Start health server
    let health_addr = args.health_addr.clone();
    let health_stats = stats.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_stats).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let metrics_stats = stats.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics_stats).await {
            error!("Metrics server error: {}", e);
        }
    });

    info!("Operator running; press ctrl-c to stop");
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| Error::Internal(format!("signal handler failed: {}", e)))?;

    info!("Shutting down");
    consumers.shutdown();
    stats.shutdown_all();

    info!("Operator shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("reqwest=warn".parse().unwrap());

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
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: &str, stats: Arc<StatsRegistry>) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let stats = stats.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let stats = stats.clone();
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => Response::builder()
                            .status(StatusCode::OK)
                            .body(Body::from("ok"))
                            .unwrap(),
                        "/readyz" => {
                            let body = format!(
                                "{{\"service\":\"{}\",\"version\":\"{}\",\"stats_daemons\":{}}}",
                                nodefleet_operator::NAME,
                                nodefleet_operator::VERSION,
                                stats.len()
                            );
                            Response::builder()
                                .status(StatusCode::OK)
                                .header("Content-Type", "application/json")
                                .body(Body::from(body))
                                .unwrap()
                        }
                        _ => Response::builder()
                            .status(StatusCode::NOT_FOUND)
                            .body(Body::from("not found"))
                            .unwrap(),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Internal(format!("Invalid health server address: {}", e)))?;

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

async fn run_metrics_server(addr: &str, stats: Arc<StatsRegistry>) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    // Register operator metrics; the daemons gauge is refreshed per scrape
    let daemons_gauge = prometheus::register_gauge!(
        "nodefleet_stats_daemons",
        "Number of live per-network stats daemons"
    )
    .map_err(|e| Error::Internal(format!("metric registration failed: {}", e)))?;
    let _ = prometheus::register_counter!(
        "nodefleet_deploys_total",
        "Total number of node deploys"
    );
    let _ = prometheus::register_counter!(
        "nodefleet_elections_total",
        "Total number of bootnode elections"
    );
    let _ = prometheus::register_counter_vec!(
        "nodefleet_messages_by_subject",
        "Consumed messages by subject",
        &["subject"]
    );

    let make_svc = make_service_fn(move |_conn| {
        let stats = stats.clone();
        let daemons_gauge = daemons_gauge.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let stats = stats.clone();
                let daemons_gauge = daemons_gauge.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => {
                            daemons_gauge.set(stats.len() as f64);

                            let encoder = TextEncoder::new();
                            let metric_families = prometheus::gather();
                            let mut buffer = Vec::new();
                            encoder.encode(&metric_families, &mut buffer).unwrap();

                            Response::builder()
                                .status(StatusCode::OK)
                                .header("Content-Type", encoder.format_type())
                                .body(Body::from(buffer))
                                .unwrap()
                        }
                        _ => Response::builder()
                            .status(StatusCode::NOT_FOUND)
                            .body(Body::from("not found"))
                            .unwrap(),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Internal(format!("Invalid metrics server address: {}", e)))?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
