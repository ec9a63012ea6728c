use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audioproxy::cli::{Cli, Commands};
use audioproxy::config::Config;
use audioproxy::storage::Storage;
use audioproxy::{api, output, resolver, utils, AcquisitionService, JobState, StrategyChain};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let load_config = || Config::load(cli.config.as_deref());

    match cli.command {
        Commands::Serve { host, port } => {
            let mut config = load_config()?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            warn_missing_dependencies(&config).await;
            serve(config).await?;
        }
        Commands::Info { url, format } => {
            let config = load_config()?;
            warn_missing_dependencies(&config).await;
            let service = AcquisitionService::from_config(&config)?;

            let info = service.info(&url).await?;
            println!("{}", output::format_info(&info, &format)?);
        }
        Commands::Fetch { url } => {
            let config = load_config()?;
            warn_missing_dependencies(&config).await;
            let service = AcquisitionService::from_config(&config)?;
            fetch(&service, &url).await?;
        }
        Commands::List { format } => {
            let config = load_config()?;
            let service = AcquisitionService::from_config(&config)?;
            let artifacts = service.list_artifacts()?;
            println!("{}", output::format_artifacts(&artifacts, &format)?);
        }
        Commands::Remove { filename } => {
            let config = load_config()?;
            let service = AcquisitionService::from_config(&config)?;
            service.delete_artifact(&filename)?;
            println!("Deleted {}", filename);
        }
        Commands::Resolve { url } => {
            let content_id = resolver::resolve(&url)?;
            println!("{}", content_id);
        }
        Commands::Sweep => {
            let config = load_config()?;
            let removed = Storage::new(&config.storage.output_dir).sweep_intermediates()?;
            println!("Removed {} leftover intermediate(s)", removed);
        }
        Commands::Config { show, init } => {
            if init {
                let path = match &cli.config {
                    Some(path) => path.clone(),
                    None => Config::default_config_path()?,
                };
                if path.exists() {
                    anyhow::bail!("Configuration already exists at {}", path.display());
                }
                Config::default().save(&path)?;
                println!("Configuration written to: {}", path.display());
            }
            if show || !init {
                load_config()?.display();
            }
        }
        Commands::Platforms => {
            let config = load_config()?;
            println!("Supported platforms:");
            for host in resolver::ALLOWED_HOSTS {
                println!("  • {}", host);
            }
            println!();
            println!("Acquisition strategies, in order:");
            for name in StrategyChain::from_config(&config)?.names() {
                println!("  • {}", name);
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool, json: bool) {
    let default_filter = if verbose {
        "audioproxy=debug,tower_http=debug"
    } else {
        "audioproxy=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Missing tools are reported but never fatal: other strategies may still work
async fn warn_missing_dependencies(config: &Config) {
    let missing = utils::check_dependencies(&config.tools.yt_dlp_path, &config.ffmpeg_path()).await;
    if !missing.is_empty() {
        eprintln!("{}", style("⚠️  Dependency check warnings:").yellow());
        for dep in missing {
            eprintln!("   • {}", dep);
        }
        eprintln!("   (Continuing anyway - tools may be available)");
    }
}

async fn serve(config: Config) -> Result<()> {
    let service = AcquisitionService::from_config(&config)?;

    service.storage().sweep_intermediates()?;
    let existing = service.list_artifacts()?.len();
    tracing::info!(
        "Found {} existing download(s) in {}",
        existing,
        service.storage().output_dir().display()
    );

    let ip: IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("Invalid listen address: {}", config.server.host))?;
    let addr = SocketAddr::new(ip, config.server.port);

    let eviction = service.spawn_eviction_task();
    let shutdown_service = service.clone();
    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        shutdown_service.shutdown();
    };

    api::serve(service, addr, shutdown).await?;
    let _ = eviction.await;
    Ok(())
}

async fn fetch(service: &AcquisitionService, url: &str) -> Result<()> {
    let (job_id, handle) = service.submit_watched(url)?;

    let interrupt_service = service.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt_service.shutdown();
        }
    });

    let progress = ProgressBar::new(100);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")?
            .progress_chars("#>-"),
    );

    let tracker = service.tracker().clone();
    while !handle.is_finished() {
        if let Some(job) = tracker.get(&job_id) {
            progress.set_position(job.progress as u64);
            progress.set_message(job.status_message);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let job = service.await_job(&job_id, handle).await?;
    progress.finish_and_clear();
    println!("{}", output::job_summary(&job));

    if job.state != JobState::Succeeded {
        anyhow::bail!("Download did not complete");
    }
    Ok(())
}
