use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use dotenvy::dotenv;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use toggle_sweep::chrome::ChromeEngine;
use toggle_sweep::config::RunConfig;
use toggle_sweep::dispatch::{DispatchEvent, Stage};
use toggle_sweep::runner;
use toggle_sweep::tasks::load_tasks;
use toggle_sweep::types::{RunMode, ToggleState, parse_switch, short_url};

/// Sets or inspects the "In-app event postbacks" toggle across many
/// integration settings pages in one logged-in browser session.
#[derive(Parser)]
#[command(name = "toggle-sweep", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Drive every toggle to the requested state and save it.
    Set {
        /// CSV with url, userid and password columns (optional state column).
        tasks: PathBuf,
        /// Target state, ON or OFF.
        #[arg(long, value_parser = parse_state, action = clap::ArgAction::Set)]
        state: bool,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Report every toggle's current state without changing anything.
    Check {
        tasks: PathBuf,
        #[command(flatten)]
        run: RunArgs,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Run the browser without a window.
    #[arg(long, conflicts_with = "no_headless")]
    headless: bool,
    /// Show the browser window.
    #[arg(long = "no-headless")]
    no_headless: bool,
    /// Pages opened and loaded together.
    #[arg(long)]
    batch_size: Option<usize>,
    /// Report file; `.json` writes the full report, anything else CSV rows.
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Chrome/Chromium executable.
    #[arg(long)]
    chrome: Option<PathBuf>,
    /// DevTools websocket URL of a running Chrome to attach to.
    #[arg(long)]
    attach: Option<String>,
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
}

impl RunArgs {
    fn headless(&self) -> Option<bool> {
        match (self.headless, self.no_headless) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

fn parse_state(raw: &str) -> Result<bool, String> {
    parse_switch(raw).ok_or_else(|| format!("expected ON or OFF, got '{}'", raw))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let (mode, tasks_path, args, default_output) = match cli.command {
        Command::Set { tasks, state, run } => {
            (RunMode::Enforce { desired: state }, tasks, run, "toggle_results.csv")
        }
        Command::Check { tasks, run } => (RunMode::Inspect, tasks, run, "status_report.csv"),
    };

    let _log_guard = init_logging(&args.log_dir)?;
    let config = build_config(&args)?;
    let output = args.output.clone().unwrap_or_else(|| PathBuf::from(default_output));

    match mode {
        RunMode::Enforce { desired } => {
            info!("Target: Set toggle to {}", ToggleState::from(desired))
        }
        RunMode::Inspect => info!("Checking toggle status (read-only)"),
    }
    info!("Headless mode: {}", config.browser.headless);

    if !tasks_path.exists() {
        bail!("File not found: {}", tasks_path.display());
    }
    let tasks = load_tasks(&tasks_path, mode)
        .with_context(|| format!("failed to read {}", tasks_path.display()))?;
    if tasks.is_empty() {
        println!("No URLs found in {}", tasks_path.display());
        return Ok(());
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_progress(rx));

    // The browser driver is synchronous; keep it off the runtime threads.
    let run_config = config.clone();
    let report = tokio::task::spawn_blocking(move || {
        let browser = run_config.browser.clone();
        runner::execute(
            &run_config,
            mode,
            &tasks,
            || ChromeEngine::launch(&browser),
            Some(&tx),
        )
    })
    .await
    .map_err(|e| anyhow::anyhow!("Run panicked: {}", e))?;
    let _ = printer.await;

    println!("\n{}", report.summary(config.summary_message_max_chars));

    if !report.records.is_empty() {
        report
            .write_to(&output)
            .with_context(|| format!("failed to write {}", output.display()))?;
        println!("Results saved to: {}", output.display());
    }

    if let Some(reason) = &report.aborted {
        bail!("Run aborted: {}", reason);
    }
    Ok(())
}

fn build_config(args: &RunArgs) -> Result<RunConfig> {
    let mut config = RunConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    config.apply_env()?;

    if let Some(size) = args.batch_size {
        config.batch_size = size;
    }
    if let Some(headless) = args.headless() {
        config.browser.headless = headless;
    }
    if let Some(path) = &args.chrome {
        config.browser.chrome_path = Some(path.clone());
    }
    if let Some(url) = &args.attach {
        config.browser.attach_url = Some(url.clone());
    }
    config.validate()?;
    Ok(config)
}

/// Console plus a per-run log file. The returned guard flushes the file on drop.
fn init_logging(log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;
    let file_name = format!("toggle_sweep_{}.log", Local::now().format("%Y%m%d_%H%M%S"));
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, &file_name));

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .init();

    info!("Log file: {}", log_dir.join(&file_name).display());
    Ok(guard)
}

async fn print_progress(mut events: UnboundedReceiver<DispatchEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            DispatchEvent::BatchStarted { number, total, size } => {
                println!("\n--- Batch {}/{} ({} URLs) ---", number, total, size);
            }
            DispatchEvent::Task {
                index,
                total,
                url,
                stage: Stage::Finished(status),
            } => {
                let done = index + 1;
                println!(
                    "{} {}/{} ({:>3}%) | {} - {}",
                    progress_bar(done, total),
                    done,
                    total,
                    done * 100 / total.max(1),
                    short_url(&url),
                    status
                );
            }
            DispatchEvent::Task {
                url,
                stage: Stage::Checking,
                ..
            } => println!("  checking {}", short_url(&url)),
            DispatchEvent::Task { .. } => {}
        }
    }
}

fn progress_bar(done: usize, total: usize) -> String {
    const WIDTH: usize = 30;
    let filled = (done * WIDTH / total.max(1)).min(WIDTH);
    format!("[{}{}]", "=".repeat(filled), "-".repeat(WIDTH - filled))
}
