mod cli;

use streamforged::{
    config::{self, Config},
    conversion::{ConversionExecutor, ConversionManager, JobLedger, ORPHANED_REASON},
    server,
};
use streamforged_av::check_engine;
use streamforged_common::ConversionStatus;
use streamforged_db::pool::{init_pool, DbPool};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;

/// Create the data directories and open the job database.
fn open_pool(config: &Config) -> Result<DbPool> {
    for dir in [
        config.storage.data_dir.clone(),
        config.storage.hls_dir(),
        config.storage.converted_dir(),
    ] {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create data directory {:?}", dir))?;
    }

    let db_path = config.storage.db_path();
    let db_path_str = db_path.to_string_lossy();
    tracing::info!("Initializing database at {}", db_path_str);
    Ok(init_pool(&db_path_str)?)
}

/// Jobs left `pending` by a previous server can never finish, so they are
/// marked failed before the server accepts requests.
fn reset_orphaned(ledger: &JobLedger) {
    match ledger.reset_orphaned() {
        Ok(count) if count > 0 => {
            tracing::info!(
                "Marked {} orphaned conversion jobs as failed ({})",
                count,
                ORPHANED_REASON
            );
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!("Failed to reset orphaned conversion jobs: {}", e);
        }
    }
}

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!("Starting Streamforged server");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    let pool = open_pool(&config)?;
    reset_orphaned(&JobLedger::new(pool.clone()));
    server::start_server(config, pool).await
}

async fn convert(url: &str, config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let ledger = JobLedger::new(open_pool(&config)?);

    let http = reqwest::Client::new();
    let executor = ConversionExecutor::new(&config, ledger.clone(), http);
    let manager = ConversionManager::new(ledger, executor);

    let job = manager.request(url)?;
    println!("Job: {}", job.id);
    manager.wait(job.id).await;

    let job = manager.get(job.id)?;
    match job.status {
        ConversionStatus::Ready => {
            println!("Status: ready");
            if let Some(ref path) = job.output_path {
                println!("Output: {}", path);
            }
            Ok(())
        }
        ConversionStatus::Failed => {
            anyhow::bail!(
                "Conversion failed: {}",
                job.error_message.as_deref().unwrap_or("unknown error")
            )
        }
        ConversionStatus::Pending => {
            anyhow::bail!("Conversion {} is still pending in another process", job.id)
        }
    }
}

fn list_jobs(
    status: Option<ConversionStatus>,
    limit: u32,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let jobs = JobLedger::new(open_pool(&config)?).list(status, limit)?;

    if jobs.is_empty() {
        println!("No conversion jobs.");
        return Ok(());
    }

    for job in &jobs {
        print!("{}  {:<8} {}", job.id, job.status, job.source_url);
        if let Some(ref err) = job.error_message {
            print!("  ({})", err.lines().next().unwrap_or(""));
        }
        println!();
    }

    Ok(())
}

async fn check_tools(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    println!("Checking external tools...\n");

    let tool = check_engine(config.engine.ffmpeg_path.as_deref()).await;
    let status = if tool.available { "✓" } else { "✗" };
    print!("{} {}", status, tool.name);

    if let Some(ref version) = tool.version {
        print!(" ({})", version);
    }
    if let Some(ref path) = tool.path {
        print!(" - {}", path.display());
    }
    println!("\n");

    if tool.available {
        println!("All required tools are available!");
        Ok(())
    } else {
        anyhow::bail!("{} is missing. Install it or set engine.ffmpeg_path.", tool.name)
    }
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Data dir: {}", config.storage.data_dir.display());
            println!("  Ladder renditions: {}", config.streaming.ladder.len());
            println!("  Streaming ingest: {:?}", config.streaming.ingest);
            println!("  Conversion ingest: {:?}", config.conversion.ingest);
        }
        None => {
            println!("No config file specified, using defaults");
            let config = Config::default();
            config::validate_config(&config)?;
            println!("Default config:");
            println!("  Server: {}:{}", config.server.host, config.server.port);
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            concat!(
                "streamforged=trace,streamforged_av=trace,streamforged_db=debug,",
                "streamforged_media=debug,engine=debug,tower_http=debug"
            )
            .to_string()
        } else {
            concat!(
                "streamforged=info,streamforged_av=info,streamforged_db=info,",
                "engine=warn,tower_http=info"
            )
            .to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Convert { url } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(convert(&url, cli.config.as_deref()))
        }
        Commands::Jobs { status, limit } => list_jobs(status, limit, cli.config.as_deref()),
        Commands::CheckTools => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(check_tools(cli.config.as_deref()))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("streamforged {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
