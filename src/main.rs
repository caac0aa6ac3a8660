use std::{net::SocketAddr, sync::Arc, time::Duration};

use axon_control::{
    adapters::{FileRouteProvider, IngressState, TracingAccessLog, ingress_control, signal_router},
    config::{ControlConfig, RoutesConfigValidator},
    core::{FailoverInvoke, Registry, Route},
    ports::route_provider::RouteProvider,
    tracing_setup,
    utils::GracefulShutdown,
};
use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use tower_http::trace::TraceLayer;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "routes.yaml")]
    config: String,

    /// Log level used when RUST_LOG is unset
    #[clap(long, default_value = "info")]
    log_level: String,

    /// Human readable logs instead of JSON
    #[clap(long)]
    pretty: bool,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate a route file
    Validate {
        #[clap(short, long, default_value = "routes.yaml")]
        config: String,
    },
    /// Serve the signal endpoints for the routes in a route file (default)
    Serve {
        #[clap(short, long, default_value = "routes.yaml")]
        config: String,
    },
}

/// Failover callback for routes loaded from a file: the process has no failover target of
/// its own, so the transition is only reported.
fn log_failover() -> FailoverInvoke {
    Arc::new(|route: &str, failover: bool| {
        tracing::warn!(route, failover, "Failover invoked");
    })
}

fn build_routes(config: &ControlConfig, invoke: &FailoverInvoke) -> Result<Vec<Route>> {
    RoutesConfigValidator::validate(config, Some(invoke))?;
    config.to_routes(Some(invoke)).map_err(|errors| {
        eyre!(
            "{}",
            errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ")
        )
    })
}

fn describe(route: &Route) -> String {
    let mut parts = vec![format!("{} ({})", route.name, route.traffic)];
    if let Some(t) = route.timeout.as_ref().filter(|t| t.enabled) {
        parts.push(format!("timeout={}", humantime::format_duration(t.duration)));
    }
    if let Some(r) = route.rate_limiter.as_ref().filter(|r| r.enabled) {
        parts.push(format!("rate-limit={}/{}", r.limit, r.burst));
    }
    if let Some(r) = route.retry.as_ref().filter(|r| r.enabled) {
        parts.push(format!(
            "retry={:?} wait={}",
            r.status_codes,
            humantime::format_duration(r.wait)
        ));
    }
    if let Some(p) = route.proxy.as_ref().filter(|p| p.enabled) {
        parts.push(format!("proxy={}", p.pattern));
    }
    if route.failover.as_ref().is_some_and(|f| f.enabled) {
        parts.push("failover".to_string());
    }
    parts.join(" ")
}

async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("Validating route file: {config_path}");
    let config = axon_control::config::load_config(config_path)
        .await
        .with_context(|| format!("Failed to load route file from {config_path}"))?;

    match build_routes(&config, &log_failover()) {
        Ok(routes) => {
            println!("✅ Route file is valid ({} routes)", routes.len());
            for route in &routes {
                println!("  - {}", describe(route));
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Route file validation failed:");
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

/// Reload the registry whenever the route file changes. A file that fails validation leaves
/// the current routes in place.
fn spawn_route_watcher(
    provider: Arc<dyn RouteProvider>,
    registry: Registry,
    invoke: FailoverInvoke,
    shutdown: GracefulShutdown,
) {
    let debounce = Duration::from_secs(1);
    let mut notify_rx = provider.watch();
    let mut shutdown_rx = shutdown.subscribe();

    tokio::spawn(async move {
        tracing::info!("Route watcher started");
        loop {
            tokio::select! {
                changed = notify_rx.recv() => {
                    if changed.is_none() {
                        break;
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
            // Coalesce the burst of events an editor save produces
            tokio::time::sleep(debounce).await;
            while notify_rx.try_recv().is_ok() {}

            let routes = match provider.load_config().await {
                Ok(config) => build_routes(&config, &invoke),
                Err(e) => Err(e),
            };
            match routes {
                Ok(routes) => match registry.reload(routes) {
                    Ok(()) => tracing::info!(
                        egress = registry.egress().count(),
                        ingress = registry.ingress().count(),
                        "Routes reloaded"
                    ),
                    Err(errors) => {
                        tracing::error!(?errors, "Route reload rejected, keeping current routes");
                    }
                },
                Err(e) => tracing::error!("Failed to reload routes: {e:#}. Keeping current routes."),
            }
        }
        tracing::info!("Route watcher stopped");
    });
}

async fn serve_command(config_path: &str) -> Result<()> {
    tracing::info!("Loading routes from {config_path}");
    let provider: Arc<dyn RouteProvider> = Arc::new(
        FileRouteProvider::new(config_path).context("Failed to create route provider")?,
    );
    let config = provider
        .load_config()
        .await
        .with_context(|| format!("Failed to load routes from {config_path}"))?;

    let invoke = log_failover();
    let routes = build_routes(&config, &invoke)?;
    let registry = Registry::new(
        config.allow_default_fallback,
        Arc::new(TracingAccessLog::new()),
    );
    registry
        .reload(routes)
        .map_err(|errors| eyre!("Failed to register routes: {errors:?}"))?;
    tracing::info!(
        egress = registry.egress().count(),
        ingress = registry.ingress().count(),
        "Routes registered"
    );

    let shutdown = GracefulShutdown::new();
    spawn_route_watcher(provider, registry.clone(), invoke, shutdown.clone());

    let signal_handler = shutdown.clone();
    tokio::spawn(async move { signal_handler.run_signal_handler().await });

    let app = signal_router(registry.clone(), &config.signal_path)
        .layer(axum::middleware::from_fn_with_state(
            IngressState::new(&registry),
            ingress_control,
        ))
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("Invalid listen address: {}", config.listen_addr))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Signal endpoints listening on http://{addr}{}", config.signal_path);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            server_shutdown.wait_for_shutdown().await;
        })
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Serve { config }) => {
            tracing_setup::init_tracing(&args.log_level, !args.pretty)?;
            serve_command(&config).await
        }
        None => {
            tracing_setup::init_tracing(&args.log_level, !args.pretty)?;
            serve_command(&args.config).await
        }
    }
}
