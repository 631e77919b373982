//! Board Node
//!
//! One-shot command line front end for the rate board controller:
//! - `set` - apply a batch like `A12345,B123`
//! - `status` - print the committed board state
//! - `reset` - zero every module on the board
//! - `history` - print recent submissions

use board_core::{ChannelTable, ControllerConfig, RateController, ResetStatus};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Forex rate board controller
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Board host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Board TCP port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Channel preset: five_currency, four_plus_one, thirty_rate (overrides config)
    #[arg(long)]
    preset: Option<String>,

    /// Directory for the state and submission files (overrides config)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG wins when set
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply comma separated entries, e.g. "A12345, B123"
    Set {
        entries: String,
    },

    /// Print the committed board state
    Status,

    /// Send zero to every main and overflow module
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },

    /// Print recent submissions
    History,
}

fn init_logging(log_level: &str) -> Result<(), Box<dyn std::error::Error>> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
        return Ok(());
    }

    let level = match log_level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn load_config(args: &Args) -> Result<ControllerConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => ControllerConfig::from_file(path)?,
        None => ControllerConfig::default(),
    };

    if args.host.is_some() || args.port.is_some() {
        let host = args.host.clone().unwrap_or_else(|| config.device.host.clone());
        let port = args.port.unwrap_or(config.device.port);
        config = config.with_endpoint(host, port);
    }
    if let Some(preset) = &args.preset {
        config = config.with_channels(ChannelTable::preset(preset)?);
    }
    if let Some(dir) = &args.data_dir {
        config = config.with_data_dir(dir);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let config = load_config(&args)?;
    info!(
        "Board node starting: {} ({} channels)",
        config.device.endpoint(),
        config.channels.len()
    );
    let mut controller = RateController::open(config);

    let code = match &args.command {
        Command::Set { entries } => {
            let record = controller.submit(entries).await;
            for result in &record.results {
                match (&result.error, &result.channel) {
                    (None, Some(channel)) => println!("  ok    {:<8} {}", result.entry, channel),
                    (None, None) => println!("  ok    {}", result.entry),
                    (Some(error), _) => println!("  FAIL  {:<8} {}", result.entry, error),
                }
            }
            println!("{}/{} entries applied", record.success_count, record.total_count);
            if record.all_succeeded() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Command::Status => {
            for line in controller.status_lines() {
                println!("{}", line);
            }
            ExitCode::SUCCESS
        }
        Command::Reset { yes: false } => {
            warn!("Reset not confirmed, pass --yes to zero the board");
            ExitCode::FAILURE
        }
        Command::Reset { yes: true } => {
            let report = controller.reset_all().await?;
            for (target, error) in &report.failed {
                println!("  FAIL  {:<4} {}", target, error);
            }
            println!(
                "Reset {:?}: {} ok, {} failed",
                report.status(),
                report.reset.len(),
                report.failed.len()
            );
            if report.status() == ResetStatus::Complete {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Command::History => {
            let records = controller.submissions();
            if records.is_empty() {
                println!("No submissions yet");
            }
            for record in records.iter().rev() {
                println!(
                    "{}  {}/{}  {}",
                    record.timestamp, record.success_count, record.total_count, record.raw_input
                );
                for result in record.results.iter().filter(|r| !r.success) {
                    println!("    {}: {}", result.entry, result.error.as_deref().unwrap_or("failed"));
                }
            }
            ExitCode::SUCCESS
        }
    };

    controller.shutdown().await;
    Ok(code)
}
