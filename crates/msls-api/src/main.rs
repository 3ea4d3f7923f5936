use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use msls_api::observability::init_observability;
use msls_api::{AppState, ConfigBuilder, build_engine, config, run_http, schema};
use msls_tenancy::InMemoryTenantDirectory;

#[derive(Parser, Debug)]
#[command(name = "msls-server")]
#[command(about = "Tenant-isolated API server for the MSLS school ERP", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API (default)
    Serve(ServeArgs),
    /// Print PostgreSQL row-level security DDL for the application tables
    Ddl,
}

#[derive(clap::Args, Debug, Default)]
struct ServeArgs {
    /// HTTP bind host
    #[arg(long)]
    http_host: Option<IpAddr>,

    /// HTTP bind port
    #[arg(long)]
    http_port: Option<u16>,

    /// Storage connection pool size
    #[arg(short, long)]
    pool_size: Option<NonZeroUsize>,

    /// Shared secret for HS256 tokens
    #[arg(long, env = "MSLS_JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,

    /// Enable JSON logging output
    #[arg(long)]
    json_logs: bool,
}

fn cli_builder(args: &ServeArgs, verbose: bool) -> ConfigBuilder {
    let mut builder = ConfigBuilder::new();

    if let Some(host) = args.http_host {
        builder = builder.http_host(host);
    }
    if let Some(port) = args.http_port {
        builder = builder.http_port(port);
    }
    if let Some(size) = args.pool_size {
        builder = builder.pool_size(size);
    }
    if let Some(ref secret) = args.jwt_secret {
        builder = builder.jwt_secret(secret.clone());
    }
    if args.json_logs {
        builder = builder.json_logs(true);
    }
    if verbose {
        builder = builder.log_level("debug".to_string());
    }

    builder
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let serve_args = match args.command {
        Some(Command::Ddl) => {
            for statement in schema::ddl()? {
                println!("{statement};");
            }
            return Ok(());
        }
        Some(Command::Serve(serve_args)) => serve_args,
        None => ServeArgs::default(),
    };

    // Load configuration with precedence: env > file > CLI > defaults
    let builder = config::load_config(
        args.config.as_deref(),
        cli_builder(&serve_args, args.verbose),
    )?;
    let config = builder.build()?;

    init_observability(&config.telemetry)?;

    let directory = InMemoryTenantDirectory::new();
    let state = AppState::new(&config, directory, build_engine())?;

    tracing::info!("Starting {}", config.telemetry.service_name);
    tracing::info!("Tenant header: {}", config.tenancy.tenant_header);
    tracing::info!("Pool size: {}", config.pool_size);
    tracing::info!(
        "Elevation allowlist: {} actors, {} roles",
        config.tenancy.elevated_actors.len(),
        config.tenancy.elevated_roles.len()
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {e}");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
    };

    run_http(&config, state, shutdown).await?;
    Ok(())
}
