use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sentinel_common::{AlertsConfig, AppConfig};

use sentinel_station::app::{App, StoreSink};
use sentinel_station::opml;
use sentinel_station::scheduler::Scheduler;

/// SentinelPi — self-hosted monitoring station.
#[derive(Parser, Debug)]
#[command(name = "sentinelpi", version, about)]
struct Cli {
    /// Run a single collection cycle and exit
    #[arg(long)]
    once: bool,

    /// Import RSS sources from an OPML file and exit
    #[arg(long, value_name = "FILE")]
    import_opml: Option<PathBuf>,

    /// Export RSS sources to an OPML file and exit
    #[arg(long, value_name = "FILE")]
    export_opml: Option<PathBuf>,

    /// Path to the application configuration
    #[arg(long, default_value = "config/config.yaml")]
    config: PathBuf,

    /// Path to the alert channel configuration
    #[arg(long, default_value = "config/alerts.yaml")]
    alerts: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        // The subscriber may not be installed yet if config loading failed
        eprintln!("fatal: {e}");
        error!(error = %e, "Fatal error");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("sentinel={}", config.logging.level).parse()?),
        )
        .init();

    info!(name = %config.app.name, "Starting SentinelPi");

    let alerts_config = AlertsConfig::load(&cli.alerts)?;
    let app = Arc::new(App::build(config, alerts_config).await?);

    if let Some(path) = &cli.import_opml {
        let stats = opml::import_opml_file(&app.store, path).await?;
        info!(
            imported = stats.imported,
            skipped = stats.skipped,
            "Import finished"
        );
        app.shutdown().await;
        return Ok(());
    }

    if let Some(path) = &cli.export_opml {
        let count = opml::export_opml_file(&app.store, path).await?;
        info!(count, "Export finished");
        app.shutdown().await;
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = Arc::new(Scheduler::new(Arc::clone(&app), shutdown_tx));

    // The dispatcher's window timer runs for the whole process lifetime
    let dispatcher_task = {
        let dispatcher = Arc::clone(&app.dispatcher);
        let sink = Arc::new(StoreSink(app.store.clone()));
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move { dispatcher.run(sink, shutdown_rx).await })
    };

    if cli.once {
        info!("Running single collection cycle");
        let results = scheduler.run_now(None).await;
        let failures = results.iter().filter(|r| !r.success).count();
        info!(
            sources = results.len(),
            failures, "Collection cycle complete"
        );
        scheduler.stop();
        let _ = dispatcher_task.await;
        app.shutdown().await;
        return Ok(());
    }

    if !app.config.scheduler.enabled {
        info!("Scheduler disabled by configuration, nothing to do");
        app.shutdown().await;
        return Ok(());
    }

    let scheduler_task = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run().await })
    };

    info!("SentinelPi is running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    scheduler.stop();
    let _ = scheduler_task.await;
    let _ = dispatcher_task.await;
    app.shutdown().await;

    info!("SentinelPi shutdown complete");
    Ok(())
}
