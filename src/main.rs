//! SpeedSqueak web backend.
//!
//! This binary starts the HTTP server and configures all components.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use speedsqueak_web::{
    config::{CheckConfig, Cli, Command, ServeConfig, SignConfig, SignOutputFormat},
    server::{create_router, RouterConfig},
    storage::SasIssuer,
    warehouse::{SnowflakeConnection, Warehouse, EVENTS_QUERY},
};

#[tokio::main]
async fn main() -> ExitCode {
    // Seed the environment from .env before clap reads it
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Sign(config) => run_sign(config),
        Command::Check(config) => run_check(config).await,
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("SpeedSqueak web v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Static dir: {}", config.static_dir.display());
    info!(
        "  Storage: account={} container={}",
        config.storage.account_name.as_deref().unwrap_or("<unset>"),
        config.storage.container
    );
    info!(
        "  Warehouse: account={} database={} schema={}",
        config.warehouse.account.as_deref().unwrap_or("<unset>"),
        config.warehouse.database,
        config.warehouse.schema
    );
    for warning in config.warnings() {
        warn!("  {}", warning);
    }

    let signer = config.storage.signer();

    let connection = match SnowflakeConnection::new(config.warehouse.snowflake_config()) {
        Ok(connection) => connection,
        Err(e) => {
            error!("Failed to create warehouse client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let connection = Arc::new(connection);

    // Login and renewal happen outside the request path
    if connection.config().is_configured() {
        info!("Connecting to Snowflake...");
        match connection.connect().await {
            Ok(()) => info!("  Connected successfully"),
            Err(e) => {
                error!("  Snowflake connection failed: {}", e);
                if config.warehouse_required {
                    return ExitCode::FAILURE;
                }
                warn!("  Retrying in the background; /api/events will answer 500 until connected");
            }
        }
        connection.spawn_session_keeper();
    }

    let router_config = build_router_config(&config);
    let router = create_router(signer, Arc::clone(&connection), router_config);

    let addr = config.bind_address();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    info!("Backend running on http://{}", addr);

    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "speedsqueak_web=debug,tower_http=debug"
    } else {
        "speedsqueak_web=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build RouterConfig from the application ServeConfig.
fn build_router_config(config: &ServeConfig) -> RouterConfig {
    let mut router_config = RouterConfig::new(config.static_dir.clone());

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config.with_tracing(!config.no_tracing)
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("Shutdown signal received");
}

// =============================================================================
// Sign Command
// =============================================================================

fn run_sign(config: SignConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let signer = config.storage.signer();
    let sas = match signer.issue_read_url(&config.blob_name) {
        Ok(sas) => sas,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match config.format {
        SignOutputFormat::Url => println!("{}", sas.url),
        SignOutputFormat::Json => {
            let json = serde_json::json!({
                "sasUrl": sas.url,
                "expiresOn": sas.expires_on.to_rfc3339(),
                "permissions": sas.permissions.to_string(),
            });
            match serde_json::to_string_pretty(&json) {
                Ok(out) => println!("{}", out),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
    }

    ExitCode::SUCCESS
}

// =============================================================================
// Check Command
// =============================================================================

async fn run_check(config: CheckConfig) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    println!("SpeedSqueak Configuration Check");
    println!("═══════════════════════════════");
    println!();

    let mut ok = true;

    // Storage: a signature can only be produced with a usable account key
    let signer = config.storage.signer();
    match signer.issue_read_url("check") {
        Ok(_) => println!(
            "✓ Storage: account key usable for container '{}'",
            signer.container()
        ),
        Err(e) => {
            println!("✗ Storage: {}", e);
            ok = false;
        }
    }

    // Warehouse
    print!("Testing Snowflake login... ");
    let connection = match SnowflakeConnection::new(config.warehouse.snowflake_config()) {
        Ok(connection) => connection,
        Err(e) => {
            println!("✗ failed");
            println!("  Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match connection.connect().await {
        Ok(()) => println!("✓ success"),
        Err(e) => {
            println!("✗ failed");
            println!();
            println!("Error: {}", e);
            println!();
            println!("Please check:");
            println!("  - SNOWFLAKE_ACCOUNT, SNOWFLAKE_USER and SNOWFLAKE_PASS are correct");
            println!("  - The account URL is reachable from this machine");
            return ExitCode::FAILURE;
        }
    }

    if !config.skip_query {
        print!("Running events query... ");
        match connection.query(EVENTS_QUERY).await {
            Ok(rows) => println!("✓ {} row(s)", rows.len()),
            Err(e) => {
                println!("✗ failed");
                println!("  Error: {}", e);
                ok = false;
            }
        }
    }

    println!();
    println!("═══════════════════════════════");
    if ok {
        println!("✓ All checks passed!");
        ExitCode::SUCCESS
    } else {
        println!("✗ Some checks failed");
        ExitCode::FAILURE
    }
}
