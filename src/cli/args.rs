use clap::{Parser, Subcommand};

/// kapcom - mission-control CLI for a scripted spacecraft console
#[derive(Parser)]
#[command(name = "kapcom")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// JSON output
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one script statement on the remote console (auto-connects)
    #[command(
        after_help = "EXAMPLES:\n    kapcom exec 'PRINT SHIP:ALTITUDE.'\n    kapcom exec --cpu uplink 'STAGE.'\n    kapcom exec --timeout 30000 'RUN circ.'"
    )]
    Exec {
        /// Script text to run, terminated the way the console expects
        script: String,

        /// Per-command timeout in milliseconds
        #[arg(long, default_value_t = 5000)]
        timeout: u64,

        /// CPU to select first: numeric menu id or nameplate tag
        #[arg(long)]
        cpu: Option<String>,
    },

    /// Select a CPU and hold the session open in the daemon
    Connect {
        /// Numeric menu id or nameplate tag; omit for the first listed CPU
        cpu: Option<String>,
    },

    /// Show the daemon's connection state
    Status,

    /// List the CPUs offered by the remote console's selection menu
    Cpus,

    /// Invoke a named daemon handler
    Call {
        /// Handler name, e.g. vessel_info
        handler: String,

        /// Handler arguments as a JSON object
        #[arg(long)]
        args: Option<String>,
    },

    /// Drop the daemon's remote session
    Disconnect,

    /// Manage the background daemon
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

#[derive(Subcommand)]
pub enum DaemonCommand {
    /// Show daemon status
    Status,
    /// Start the daemon manually
    Start,
    /// Stop the daemon
    Stop,
    /// Show daemon logs
    Logs {
        /// Follow log output
        #[arg(short, long)]
        follow: bool,
        /// Number of lines to show
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,
    },
}
