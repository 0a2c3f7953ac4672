//! Command-line interface for novapm.
use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

/// Command-line interface for novapm.
#[derive(Parser)]
#[command(name = "nova", version, author)]
#[command(about = "A process manager for long-running applications", long_about = None)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    /// Accepts level names (`info`, `debug`, ...) or `0`-`5`.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LevelFilter>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for nova.
#[derive(Subcommand)]
pub enum Commands {
    /// Start processes from an app file, a script, or by name.
    Start {
        /// App file (nova.yaml), script path, or registered process name.
        target: String,

        /// Process name when starting a bare script.
        #[arg(long)]
        name: Option<String>,

        /// Instance count: a number or 'max'.
        #[arg(short, long)]
        instances: Option<String>,

        /// Port injected into children as PORT.
        #[arg(short, long)]
        port: Option<u16>,

        /// Interpreter the script runs with.
        #[arg(long)]
        interpreter: Option<String>,

        /// Working directory of the children.
        #[arg(long)]
        cwd: Option<String>,

        /// Extra environment entries, KEY=VALUE.
        #[arg(short, long, value_name = "KEY=VALUE")]
        env: Vec<String>,

        /// Restart when RSS exceeds this size (e.g. 512M).
        #[arg(long, value_name = "SIZE")]
        max_memory_restart: Option<String>,

        /// Disable automatic respawn on exit.
        #[arg(long)]
        no_autorestart: bool,
    },

    /// Stop one process or all of them.
    Stop {
        /// Process id, name, or 'all'.
        target: String,

        /// Skip SIGINT and kill immediately.
        #[arg(short, long)]
        force: bool,
    },

    /// Restart one process or all of them.
    Restart {
        /// Process id, name, or 'all'.
        target: String,

        /// Restart all cluster instances at once instead of rolling.
        #[arg(short, long)]
        force: bool,
    },

    /// Stop a process and remove it together with its history.
    Delete {
        /// Process id, name, or 'all'.
        target: String,
    },

    /// List managed processes.
    #[command(aliases = ["ls", "status"])]
    List,

    /// Show details for one process.
    #[command(alias = "show")]
    Info {
        /// Process id or name.
        target: String,
    },

    /// Print recent log lines for a process.
    Logs {
        /// Process id, name, or 'all'.
        target: Option<String>,

        /// Number of lines to show.
        #[arg(short, long, default_value = "50")]
        lines: usize,
    },

    /// Live process and system metrics view.
    Monit,

    /// Snapshot current process definitions to dump.json.
    Save,

    /// Start every process recorded in dump.json.
    Resurrect,

    /// Change a cluster's instance count (absolute, +k, -k, or 'max').
    Scale {
        /// Process id or name.
        target: String,

        /// New instance count.
        instances: String,
    },

    /// Check that the daemon answers on the control channel.
    Ping,

    /// Print the dashboard API address.
    Dashboard,

    /// Diagnose common daemon and environment problems.
    Doctor,

    /// Write a starter nova.yaml into the current directory.
    Init,

    /// Print a systemd unit for starting the daemon at boot.
    Startup,

    /// Run the daemon.
    Daemon {
        /// Detach from the terminal and keep running in the background.
        #[arg(long)]
        daemonize: bool,

        /// Bind address for the HTTP/WebSocket API.
        #[arg(long, value_name = "ADDR")]
        web: Option<String>,

        /// Disable the HTTP/WebSocket API.
        #[arg(long)]
        no_web: bool,
    },
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
