use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

#[derive(Parser, Debug)]
#[command(
    name = "keyferry",
    author,
    version,
    about = "Redeem your Humble Bundle keys on Steam, skipping games you already own",
    long_about = None
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, env = "KEYFERRY_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Quiet mode: only the final summary and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Gather keys, check ownership, reveal and activate
    Run(RunArgs),

    /// Pick games from Humble Choice months, optionally redeeming them
    Choose(ChooseArgs),

    /// Show or reset the configuration file
    Config {
        /// Print the effective configuration
        #[arg(long)]
        show: bool,

        /// Overwrite the configuration file with defaults
        #[arg(long, conflicts_with = "show")]
        reset: bool,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Never prompt; fail if a saved session is missing or expired
    #[arg(long)]
    pub auto: bool,

    /// Reveal keys even when ownership could not be checked
    #[arg(long)]
    pub reveal_all: bool,

    /// Sleep through rate-limit cooldowns instead of stopping
    #[arg(long)]
    pub wait_cooldown: bool,

    /// Directory for sessions, the ledger and logs
    #[arg(long, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    /// Steam web API key used to list owned games
    #[arg(long, env = "STEAM_API_KEY", hide_env_values = true, value_name = "KEY")]
    pub steam_api_key: Option<String>,

    /// Do not write a log file
    #[arg(long)]
    pub no_log_file: bool,

    /// Write the log file as JSON lines
    #[arg(long)]
    pub json_log: bool,
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct ChooseArgs {
    /// Take every game of months whose remaining picks cover them all, without asking
    #[arg(long)]
    pub all: bool,

    /// Redeem the claimed games' keys right away
    #[arg(long)]
    pub redeem: bool,

    #[command(flatten)]
    pub run: RunArgs,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_run_flags() {
        let args = Args::try_parse_from([
            "keyferry",
            "run",
            "--auto",
            "--wait-cooldown",
            "--state-dir",
            "/tmp/kf",
        ])
        .unwrap();
        match args.command {
            Commands::Run(run) => {
                assert!(run.auto);
                assert!(run.wait_cooldown);
                assert!(!run.reveal_all);
                assert_eq!(run.state_dir, Some(PathBuf::from("/tmp/kf")));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_choose_flags() {
        let args = Args::try_parse_from(["keyferry", "choose", "--all", "--redeem", "--auto"]).unwrap();
        match args.command {
            Commands::Choose(choose) => {
                assert!(choose.all);
                assert!(choose.redeem);
                assert!(choose.run.auto);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Args::try_parse_from(["keyferry", "-v", "-q", "run"]).is_err());
    }
}
