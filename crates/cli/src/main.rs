use clap::{Parser, Subcommand};

mod commands;

use commands::{ParseSignalsArgs, RunArgs};

#[derive(Parser)]
#[command(name = "autotrade")]
#[command(about = "Signal-driven binary-options trading sessions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one trading session against the paper broker until a stop boundary or Ctrl-C
    Run(RunArgs),
    /// Parse a signal file and report accepted signals and rejected lines
    ParseSignals(ParseSignalsArgs),
}

impl Commands {
    fn log_file(&self) -> Option<&str> {
        match self {
            Self::Run(args) => args.log_file.as_deref(),
            Self::ParseSignals(_) => None,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match cli.command.log_file() {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    match cli.command {
        Commands::Run(args) => commands::run_session(args).await?,
        Commands::ParseSignals(args) => commands::run_parse_signals(&args)?,
    }

    Ok(())
}
