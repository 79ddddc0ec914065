//! Azure Functions custom handler entry point.

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use funcs_handler::api::{create_router, AppState, HandlerVariant};
use funcs_handler::config::Config;
use funcs_handler::cosmos;
use funcs_handler::metrics;
use funcs_handler::telemetry::{install_panic_hook, TelemetryPipeline};
use funcs_handler::utils::shutdown_signal;

/// Custom handler for HTTP-triggered Azure Functions.
#[derive(Parser, Debug)]
#[command(name = "funcs-handler")]
#[command(about = "Custom handler process for HTTP-triggered Azure Functions")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Listening port (overrides FUNCTIONS_CUSTOMHANDLER_PORT).
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Function to serve (overrides HANDLER_VARIANT).
    #[arg(long, value_enum, global = true)]
    variant: Option<HandlerVariant>,

    /// Route to mount the handler on (overrides HANDLER_ROUTE).
    #[arg(long, global = true)]
    route: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the handler (default).
    Run,

    /// Check configuration validity.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    let filter = if args.verbose {
        EnvFilter::new("funcs_handler=debug,tower_http=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match &args.command {
        Some(Command::CheckConfig) => cmd_check_config(&args),
        Some(Command::Run) | None => cmd_run(&args).await,
    }
}

/// Load configuration and apply command-line overrides.
fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = Config::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    if let Some(port) = args.port {
        config.functions_customhandler_port = port;
    }
    if let Some(variant) = args.variant {
        config.handler_variant = variant;
    }
    if let Some(route) = &args.route {
        config.handler_route = Some(route.clone());
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(anyhow::anyhow!("Configuration validation failed: {}", e));
    }

    Ok(config)
}

/// Check configuration validity.
fn cmd_check_config(args: &Args) -> anyhow::Result<()> {
    println!("======================================================================");
    println!("FUNCS HANDLER - CONFIGURATION CHECK");
    println!("======================================================================");

    let config = load_config(args)?;

    println!("Configuration Summary:");
    println!("  Variant: {}", config.handler_variant);
    println!("  Route: {}", config.route());
    println!("  Listen Address: {}", config.listen_addr());
    println!(
        "  Telemetry: {}",
        match config.ingestion_settings()? {
            Some(settings) => format!("Application Insights ({})", settings.ingestion_endpoint),
            None => "log only".to_string(),
        }
    );
    println!(
        "  Telemetry Status Label: {}",
        if config.telemetry_report_actual_status {
            "actual"
        } else {
            "fixed 200"
        }
    );
    if config.handler_variant.requires_database() {
        println!(
            "  Database: {} at {}",
            config.cosmos_database,
            config.cosmos_endpoint_url().unwrap_or_default()
        );
        println!(
            "  Credential: {}",
            if config.cosmos_access_token().is_some() {
                "static token"
            } else if config.client_secret_identity().is_some() {
                "service principal secret"
            } else if config.app_service_identity().is_some() {
                "App Service managed identity"
            } else {
                "IMDS managed identity"
            }
        );
    }
    match config.metrics_port {
        Some(port) => println!("  Metrics Port: {}", port),
        None => println!("  Metrics: disabled"),
    }
    println!("======================================================================");
    println!("CONFIGURATION CHECK PASSED");
    println!("======================================================================");

    Ok(())
}

/// Serve the configured handler until a shutdown signal arrives.
async fn cmd_run(args: &Args) -> anyhow::Result<()> {
    info!("Loading configuration...");
    let config = load_config(args)?;
    info!(
        variant = %config.handler_variant,
        route = config.route(),
        "Configuration loaded successfully"
    );

    // Metrics
    if let Some(port) = config.metrics_port {
        metrics::install_prometheus_exporter(SocketAddr::from(([0, 0, 0, 0], port)))?;
    }
    metrics::init_metrics();

    let http = reqwest::Client::builder()
        .timeout(Duration::from_millis(config.http_timeout_ms))
        .build()?;

    // Telemetry, including panics from here on
    let pipeline = TelemetryPipeline::from_config(&config, http.clone())?;
    install_panic_hook(pipeline.telemetry());

    // Startup collaborators must succeed before traffic is served
    if config.handler_variant.requires_database() {
        info!(database = %config.cosmos_database, "Ensuring database exists...");
        if let Err(e) = cosmos::ensure_database(&config, http.clone()).await {
            error!("Failed to ensure database: {}", e);
            pipeline.shutdown().await;
            return Err(e.into());
        }
    }

    let state = AppState::from_config(&config, pipeline.telemetry());
    let router = create_router(state);

    let addr = config.listen_addr();
    let listener = TcpListener::bind(addr).await?;
    info!(
        "About to listen on {}. Go to http://127.0.0.1:{}{}",
        addr,
        config.functions_customhandler_port,
        config.route()
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped, flushing telemetry...");
    pipeline.shutdown().await;

    Ok(())
}
