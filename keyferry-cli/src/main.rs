use std::io::IsTerminal;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use keyferry::adapters::{HumbleClient, SteamClient};
use keyferry::auth::{Operator, UnattendedOperator};
use keyferry::ledger::{JsonlLedgerStore, load_legacy_exports};
use keyferry::logging::{LogOptions, Verbosity, init_logging};
use keyferry::session::FileSessionStore;
use keyferry::{ExitStatus, Redeemer, RedeemerParts, RunMode, RunOptions};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod choose;
mod cli;
mod config;
mod output;
#[cfg(feature = "interactive")]
mod prompt;

use choose::GamePicker;
use cli::{Args, ChooseArgs, Commands, RunArgs};
use config::AppConfig;

const SESSIONS_DIR: &str = "sessions";
const LEDGER_FILE: &str = "ledger.jsonl";

fn main() {
    let args = Args::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            output::print_error(&e);
            process::exit(ExitStatus::Failure.code());
        }
    };

    let code = match runtime.block_on(dispatch(args)) {
        Ok(code) => code,
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            ExitStatus::Failure.code()
        }
    };

    // A prompt abandoned on the blocking pool must not hold the process open.
    runtime.shutdown_background();
    process::exit(code);
}

async fn dispatch(args: Args) -> Result<i32> {
    let verbosity = if args.quiet {
        Verbosity::Quiet
    } else if args.verbose {
        Verbosity::Verbose
    } else {
        Verbosity::Normal
    };
    let config_path = args.config.as_deref();

    match args.command {
        Commands::Run(run_args) => {
            let config = AppConfig::load(config_path)?;
            run(run_args, None, config, config_path, verbosity).await
        }
        Commands::Choose(choose_args) => {
            let config = AppConfig::load(config_path)?;
            let run_args = choose_args.run.clone();
            run(run_args, Some(choose_args), config, config_path, verbosity).await
        }
        Commands::Config { reset: true, .. } => {
            let path = AppConfig::reset(config_path)?;
            println!("Configuration reset: {}", path.display());
            Ok(ExitStatus::Success.code())
        }
        Commands::Config { .. } => {
            let config = AppConfig::load(config_path)?;
            let path = match config_path {
                Some(path) => path.to_path_buf(),
                None => AppConfig::default_path()?,
            };
            println!("# {}", path.display());
            print!("{}", config.show()?);
            Ok(ExitStatus::Success.code())
        }
        Commands::Completions { shell } => {
            let mut command = Args::command();
            clap_complete::generate(shell, &mut command, "keyferry", &mut std::io::stdout());
            Ok(ExitStatus::Success.code())
        }
    }
}

fn run_mode(args: &RunArgs) -> RunMode {
    if args.auto || !cfg!(feature = "interactive") || !std::io::stdin().is_terminal() {
        RunMode::Unattended
    } else {
        RunMode::Interactive
    }
}

async fn run(
    args: RunArgs,
    choosing: Option<ChooseArgs>,
    config: AppConfig,
    config_path: Option<&std::path::Path>,
    verbosity: Verbosity,
) -> Result<i32> {
    let state_dir = args.state_dir.clone().unwrap_or_else(|| config.state_dir());
    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("Failed to create state directory {}", state_dir.display()))?;

    let log_to_file = config.log_file && !args.no_log_file;
    let _log_guard = init_logging(&LogOptions {
        verbosity,
        log_dir: log_to_file.then(|| state_dir.join("logs")),
        json: args.json_log || config.json_log,
    })?;

    let mode = run_mode(&args);
    info!(state_dir = %state_dir.display(), ?mode, "Starting run");

    let http = storefronts::default_client().context("Failed to build the HTTP client")?;

    #[cfg(feature = "interactive")]
    let terminal = Arc::new(prompt::TerminalOperator::new());
    let operator: Arc<dyn Operator> = match mode {
        #[cfg(feature = "interactive")]
        RunMode::Interactive => terminal.clone() as Arc<dyn Operator>,
        _ => Arc::new(UnattendedOperator),
    };
    let picker: Option<Arc<dyn GamePicker>> = match mode {
        #[cfg(feature = "interactive")]
        RunMode::Interactive => Some(terminal.clone() as Arc<dyn GamePicker>),
        _ => None,
    };

    let legacy = match load_legacy_exports(&state_dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "Ignoring unreadable legacy exports");
            Vec::new()
        }
    };

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, finishing the current key...");
            signal_cancel.cancel();
        }
    });

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let progress = tokio::spawn(output::drive_progress(events_rx, verbosity == Verbosity::Quiet));

    let redeemer = Redeemer::new(RedeemerParts {
        key_source: Arc::new(HumbleClient::new(http.clone())),
        target: Arc::new(SteamClient::new(http)),
        sessions: Arc::new(FileSessionStore::new(state_dir.join(SESSIONS_DIR))),
        ledger: Arc::new(JsonlLedgerStore::new(state_dir.join(LEDGER_FILE))),
        operator,
        config: config.engine.clone(),
    })
    .with_legacy(legacy)
    .with_events(events_tx);

    let options = RunOptions {
        mode,
        reveal_all: args.reveal_all,
        wait_out_cooldown: args.wait_cooldown,
        api_key: args.steam_api_key.clone().or_else(|| config.steam_api_key.clone()),
        orders: None,
    };

    let result = match &choosing {
        None => redeemer.run(options, &cancel).await.map(Some),
        Some(choose_args) => choose::choose_months(&redeemer, choose_args, picker, options, &cancel).await,
    };
    drop(redeemer);
    let _ = progress.await;

    #[cfg(feature = "interactive")]
    if let Some(key) = terminal.entered_api_key().await {
        let mut updated = config.clone();
        updated.steam_api_key = Some(key);
        match updated.save(config_path) {
            Ok(path) => info!(path = %path.display(), "Saved Steam web API key"),
            Err(e) => warn!(error = %e, "Could not save the Steam web API key"),
        }
    }
    #[cfg(not(feature = "interactive"))]
    let _ = config_path;

    match result {
        Ok(Some(report)) => {
            output::print_report(&report);
            Ok(report.exit_status().code())
        }
        Ok(None) => Ok(ExitStatus::Success.code()),
        Err(e) => {
            output::print_error(&e);
            Ok(e.exit_status().code())
        }
    }
}
