//! typefig CLI entry point.
//!
//! Scans for definition files, runs the startup rebuild for each, then
//! either exits (deferring until every spawned command has finished) or
//! keeps watching for changes.

use anyhow::Result;
use clap::Parser;
use std::fs::OpenOptions;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use typefig::cli::Cli;
use typefig::scan::scan;
use typefig::source::ConfigSource;
use typefig::supervisor::ProcessSupervisor;
use typefig::watch::{
    RunOptions, WatchOutcome, WatcherConfig, run_cycle_logged, start_source_watcher, watch_source,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let files = scan(&cli.root);
    if files.is_empty() {
        println!(
            "Found no typefig.yaml files in {}",
            cli.root.display()
        );
        return Ok(());
    }

    let opts = Arc::new(RunOptions {
        verbose: cli.verbose,
        watch: cli.watch,
        command: cli.command.clone(),
        base_dir: std::env::current_dir()?,
    });
    let supervisor = ProcessSupervisor::new();

    let sources: Vec<ConfigSource> = files
        .into_iter()
        .enumerate()
        .map(|(id, path)| ConfigSource::from_file(id, path))
        .collect();

    // Startup rebuild for every source, serialized. Watchers attach after
    // this pass, so events from the initial scan never double-trigger.
    for source in &sources {
        if let Err(fatal) = run_cycle_logged(source, &supervisor, &opts).await {
            error!("{fatal}");
            std::process::exit(1);
        }
    }

    if cli.watch {
        run_watch(sources, supervisor, opts).await
    } else {
        // Defer exit until every spawned command has finished, then adopt
        // the last exit code.
        if opts.command.is_some()
            && let Some(code) = supervisor.wait_until_idle().await
            && code != 0
        {
            std::process::exit(code);
        }
        Ok(())
    }
}

/// Watch every source until one is removed (fail-stop) or a fatal error
/// surfaces.
async fn run_watch(
    sources: Vec<ConfigSource>,
    supervisor: ProcessSupervisor,
    opts: Arc<RunOptions>,
) -> Result<()> {
    let watcher_config = WatcherConfig::default();
    let mut watchers = JoinSet::new();

    for source in sources {
        match start_source_watcher(&source.path, &watcher_config) {
            Ok(handle) => {
                info!(source = %source.path.display(), "watching for changes");
                watchers.spawn(watch_source(
                    source,
                    supervisor.clone(),
                    Arc::clone(&opts),
                    handle,
                ));
            }
            Err(watch_error) => {
                warn!(
                    source = %source.path.display(),
                    "failed to start watcher: {watch_error}"
                );
            }
        }
    }

    if watchers.is_empty() {
        warn!("no watchers could be started, exiting");
        return Ok(());
    }

    while let Some(joined) = watchers.join_next().await {
        match joined {
            Ok(Ok(WatchOutcome::SourceRemoved)) => {
                info!("halting watch");
                return Ok(());
            }
            Ok(Ok(WatchOutcome::WatcherClosed)) => continue,
            Ok(Err(fatal)) => {
                error!("{fatal}");
                std::process::exit(1);
            }
            Err(join_error) => {
                error!("watch task failed: {join_error}");
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

/// Initialize logging based on the --log option.
fn init_logging(cli: &Cli) -> Result<()> {
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    match cli.log.as_str() {
        "0" | "off" => {
            // No logging
        }
        "1" | "stdout" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "2" | "stderr" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        filename => {
            // Log to file (append mode)
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(filename)?;
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(file)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}
