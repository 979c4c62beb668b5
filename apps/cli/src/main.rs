//! Stylegrow CLI
//!
//! Command-line front end for progressive GAN training runs.

mod commands;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{runs, schedule, train, validate};

/// Stylegrow - progressive GAN training
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a training job from a TOML configuration
    Train(train::TrainArgs),

    /// Print the training schedule at selected kimg values
    Schedule(schedule::ScheduleArgs),

    /// Check that a configuration file parses and is consistent
    Validate {
        /// Path to the configuration file
        config: std::path::PathBuf,
    },

    /// List runs under a results directory
    Runs {
        /// Results directory to scan
        #[arg(long, default_value = "results")]
        results_dir: std::path::PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Train(train_args) => train::execute(train_args).await?,
        Command::Schedule(schedule_args) => schedule::execute(&schedule_args)?,
        Command::Validate { config } => validate::execute(&config)?,
        Command::Runs { results_dir, json } => runs::execute(&results_dir, json)?,
    }

    Ok(())
}
