use anyhow::Context;
use clap::{Parser, Subcommand};
use search_indexer::prelude::*;
use search_indexer::logging;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Mirrors charted registry rows from PostgreSQL into a search backend
#[derive(Debug, Parser)]
#[command(name = "search-indexer", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Install or refresh the notification triggers
    Install(ConfigArgs),
    /// Index every existing row once, then exit
    ///
    /// Every table is swept even when another one fails. The exit status is 1
    /// when any table was left incomplete, so a partial sweep is not mistaken
    /// for a full one.
    Index(ConfigArgs),
    /// Listen for row changes until SIGINT or SIGTERM
    Run(ConfigArgs),
}

#[derive(Debug, clap::Args)]
struct ConfigArgs {
    /// Path to the TOML configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,
}

impl Command {
    fn config_path(&self) -> Option<&PathBuf> {
        match self {
            Command::Install(args) | Command::Index(args) | Command::Run(args) => args.config.as_ref(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match AppConfig::load(cli.command.config_path().map(PathBuf::as_path)) {
        Ok(config) => Arc::new(config),
        Err(err) => {
            eprintln!("search-indexer: invalid configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = logging::init(&config.logging) {
        eprintln!("search-indexer: unable to install logger: {err}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Command::Install(_) => install(&config).await,
        Command::Index(_) => index(&config).await,
        Command::Run(_) => run(config).await,
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            error!("search-indexer failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn install(config: &AppConfig) -> anyhow::Result<ExitCode> {
    let pool = connect_pool(&config.database)
        .await
        .context("unable to connect to database")?;

    install_triggers(&pool, &config.listener.channel)
        .await
        .context("unable to install indexing triggers")?;

    for installed in installed_triggers(&pool).await? {
        info!(table = %installed.table, trigger = %installed.trigger, "trigger present");
    }

    pool.close().await;
    Ok(ExitCode::SUCCESS)
}

async fn index(config: &AppConfig) -> anyhow::Result<ExitCode> {
    let pool = connect_pool(&config.database)
        .await
        .context("unable to connect to database")?;

    let registry = Arc::new(ListenerRegistry::new());
    for listener in build_listeners(config).await? {
        registry.append(listener);
    }
    registry.notify_connected().await;

    let report = BulkIndexer::new(pool.clone(), registry.clone(), &config.bulk)
        .index_all()
        .await;
    registry.dispose_all().await;
    pool.close().await;

    for failed in report.failures() {
        warn!(
            table = %failed.table,
            error = failed.error.as_deref().unwrap_or_default(),
            "table was not fully indexed"
        );
    }

    Ok(if report.is_complete() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run(config: Arc<AppConfig>) -> anyhow::Result<ExitCode> {
    let listeners = build_listeners(&config).await?;
    let indexer = Indexer::new(config);
    for listener in listeners {
        indexer.append_listener(listener);
    }

    indexer.spawn(shutdown_signal()).await?;
    Ok(ExitCode::SUCCESS)
}

/// Resolves on the first SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "unable to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("caught SIGINT"),
        _ = terminate => info!("caught SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_index_help_documents_partial_sweep_status() {
        let cli = Cli::command();
        let index = cli.find_subcommand("index").unwrap();
        let help = index.get_long_about().unwrap().to_string();
        assert!(help.contains("exit status is 1"));
    }

    #[test]
    fn test_config_flag_is_shared() {
        let cli = Cli::try_parse_from(["search-indexer", "index", "-c", "indexer.toml"]).unwrap();
        assert_eq!(
            cli.command.config_path(),
            Some(&PathBuf::from("indexer.toml"))
        );
    }
}
