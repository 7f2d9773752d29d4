use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use prefetchd::core::hub::{self, DEMO_REPOSITORY};
use prefetchd::core::StatusView;
use prefetchd::logging::{self, LogConfig};
use prefetchd::web::WebServer;
use prefetchd::{config, context};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "prefetchd")]
#[command(about = "Fetch model repository files once and distribute them into projects", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the prefetch API server
    Serve(ServerArgs),
    /// Print the status of a job on a running server
    Status {
        job_id: String,
        /// Server address (defaults to the configured http_bind)
        #[arg(long)]
        addr: Option<SocketAddr>,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Args, Serialize)]
struct ServerArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    data_directory: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    cache_directory: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    http_bind: Option<SocketAddr>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    hub_endpoint: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    verify_copies: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    simulation: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    verbose: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    log_json: Option<bool>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_file = cli.config.as_deref();

    let config = match &cli.command {
        Commands::Serve(args) => config::AppConfig::new(config_file, Some(args))?,
        _ => config::AppConfig::new(config_file, None::<&ServerArgs>)?,
    };

    match cli.command {
        Commands::Serve(_) => run_server(config).await.context("Failed to run server")?,
        Commands::Status { job_id, addr } => {
            let addr = addr.unwrap_or(config.http_bind);
            run_status(addr, &job_id)
                .await
                .context("Failed to query job status")?
        }
        Commands::Config => print!("{}", config.to_toml()?),
    }

    Ok(())
}

async fn run_server(config: config::AppConfig) -> Result<()> {
    logging::init(LogConfig {
        json: config.log_json,
        verbose: config.verbose,
    });

    std::fs::create_dir_all(&config.data_directory).with_context(|| {
        format!(
            "Failed to create data directory {}",
            config.data_directory.display()
        )
    })?;

    if config.simulation {
        tracing::info!(repo_id = DEMO_REPOSITORY, "Simulation mode: serving in-memory hub");
    }

    let hub = hub::create_hub(&config)?;
    let bind_addr = config.http_bind;
    let ctx = context::AppContext::new(config, hub);
    let server = Arc::new(WebServer::new(ctx, bind_addr));

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            signal_server.shutdown();
        }
    });

    server.start().await
}

async fn run_status(addr: SocketAddr, job_id: &str) -> Result<()> {
    let url = format!("http://{}/api/status/{}", addr, job_id);
    let response = reqwest::get(&url).await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        bail!("{} ({})", body.trim(), status);
    }

    let view: StatusView = response.json().await?;
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}
