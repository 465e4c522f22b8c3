use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use vmdeck::app::{MonitorHost, describe};
use vmdeck::cli::{Cli, Commands, seconds};
use vmdeck::{Dispatcher, EngineConfig, UiLoop, ViewProperty};

/// How long the UI loop pumps between change reports.
const REPORT_INTERVAL: Duration = Duration::from_millis(200);

/// Upper bound for the initial recomputation of `inspect`.
const INSPECT_TIMEOUT: Duration = Duration::from_secs(60);

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Routes all log::info!() etc. to the debug log file.
    // CLI --log-level takes precedence, then RUST_LOG, then DEBUG_LEVEL.
    vmdeck::debug::init_log_bridge(cli.log_level.map(|l| l.to_debug_level()));
    log::info!("Starting vmdeck {}", vmdeck::VERSION);

    let config = match &cli.config {
        Some(path) => EngineConfig::load_from(path),
        None => EngineConfig::load(),
    }
    .context("failed to load engine config")?;

    match cli.command {
        Commands::Watch {
            dirs,
            select_every,
            exit_after,
        } => run_watch(config, dirs, seconds(select_every), seconds(exit_after)),
        Commands::Inspect { dir } => run_inspect(config, &dir),
    }
}

fn run_watch(
    config: EngineConfig,
    dirs: Vec<PathBuf>,
    select_every: Option<Duration>,
    exit_after: Option<Duration>,
) -> Result<()> {
    let (mut ui, dispatcher) = UiLoop::new();
    let mut host = MonitorHost::new(config, dispatcher.clone())?;
    host.add_folders(&dirs);
    host.select(0);

    if let Some(period) = select_every {
        spawn_helper("vmdeck-select", dispatcher.clone(), move |dispatcher| loop {
            thread::sleep(period);
            if dispatcher.post(|host| host.select_next()).is_err() {
                break;
            }
        })?;
    }
    if let Some(delay) = exit_after {
        spawn_helper("vmdeck-exit", dispatcher.clone(), move |dispatcher| {
            thread::sleep(delay);
            log::info!("Exit timer elapsed");
            dispatcher.quit();
        })?;
    }
    drop(dispatcher);

    while !ui.quit_requested() {
        ui.pump_for(&mut host, REPORT_INTERVAL);
        for line in host.changes() {
            println!("{line}");
        }
    }

    log::info!("UI loop exited, shutting down engine");
    host.shutdown();
    Ok(())
}

fn run_inspect(config: EngineConfig, dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }

    let (mut ui, dispatcher) = UiLoop::new();
    let mut host = MonitorHost::new(config, dispatcher)?;
    host.add_folders([dir]);
    host.select(0);

    let started = Instant::now();
    let applied = ui.pump_until(&mut host, INSPECT_TIMEOUT, |h| {
        h.engine().stats().jobs_applied > 0
    });
    if !applied {
        host.shutdown();
        bail!("timed out scanning {}", dir.display());
    }
    log::info!("Inspected {} in {:?}", dir.display(), started.elapsed());

    if let Some(view) = host.selected() {
        let view = view.borrow();
        println!("{}", view.name());
        for property in [
            ViewProperty::Config,
            ViewProperty::Size,
            ViewProperty::PrintTray,
            ViewProperty::Images,
        ] {
            println!("  {}", describe(&view, property));
        }
    }

    host.shutdown();
    Ok(())
}

fn spawn_helper<F>(name: &str, dispatcher: Dispatcher<MonitorHost>, body: F) -> Result<()>
where
    F: FnOnce(Dispatcher<MonitorHost>) + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || body(dispatcher))
        .with_context(|| format!("failed to spawn {name} thread"))?;
    Ok(())
}
