use clap::Parser;
use std::process::ExitCode;

use kapcom::cli::args::{Cli, Commands};
use kapcom::cli::{cpus, daemon, exec};
use kapcom::error::exit_codes;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::from(exit_codes::SUCCESS as u8),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run(cli: Cli) -> kapcom::Result<()> {
    let json = cli.json;

    match cli.command {
        Commands::Exec {
            script,
            timeout,
            cpu,
        } => exec::exec(&script, timeout, cpu.as_deref(), json).await,

        Commands::Connect { cpu } => exec::connect(cpu.as_deref(), json).await,

        Commands::Status => exec::status(json).await,

        Commands::Cpus => cpus::cpus(json).await,

        Commands::Call { handler, args } => exec::call(&handler, args.as_deref(), json).await,

        Commands::Disconnect => exec::disconnect(json).await,

        Commands::Daemon { command } => daemon::daemon(command).await,
    }
}
