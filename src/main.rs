//! Order book - main entry point
//!
//! This binary provides four subcommands:
//! - serve: Run the broker session (queue -> store -> gateway)
//! - submit: Queue a PLACE command
//! - cancel: Queue a CANCEL command
//! - list: Query the shared order store

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use order_book::Config;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "order-book")]
#[command(about = "Order cache and dispatch engine for a broker gateway", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (defaults apply when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to the gateway and dispatch queued commands until disconnect
    Serve {
        /// Gateway host (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Gateway port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Client id (overrides config)
        #[arg(long)]
        client_id: Option<i32>,

        /// Connection attempts before giving up (overrides config)
        #[arg(short, long)]
        attempts: Option<u32>,
    },

    /// Queue an order for placement
    Submit {
        /// Ticker symbol. E.g., "IBM"
        ticker: String,

        /// Quantity in shares
        quantity: i64,

        /// Order type: MKT, LMT, STP or "STP LMT"
        #[arg(short = 't', long, default_value = "MKT")]
        order_type: String,

        /// Limit price (LMT and STP LMT orders)
        #[arg(long, default_value = "0")]
        price: f64,

        /// BUY, SELL or SSHORT
        #[arg(long, default_value = "BUY")]
        action: String,

        /// Account the order is booked to
        #[arg(long, default_value = "DUC00074")]
        account: String,

        /// Security type
        #[arg(long, default_value = "STK")]
        sec_type: String,

        /// Destination exchange
        #[arg(long, default_value = "SMART")]
        exchange: String,

        /// Contract currency
        #[arg(long, default_value = "USD")]
        currency: String,
    },

    /// Queue a cancel request for a submitted order
    Cancel {
        /// Gateway order id
        order_id: i64,
    },

    /// Print orders held in the shared store
    List {
        /// Only this account
        #[arg(long)]
        account: Option<String>,

        /// Only this ticker (requires --account)
        #[arg(long, requires = "account")]
        ticker: Option<String>,

        /// Only this status. E.g., "SUBMITTED"
        #[arg(long)]
        status: Option<String>,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

fn setup_logging(verbose: bool, command_name: &str, log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)?;

    // {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = log_dir.join(&log_filename);

    let level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_appender = tracing_appender::rolling::never(log_dir, &log_filename);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true)
        .with_writer(std::io::stderr);

    // Same format without ANSI colors
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("Log file: {}", log_path.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    dotenv::dotenv().ok();
    let config = Config::load(cli.config.as_deref())?;

    let command_name = match &cli.command {
        Commands::Serve { .. } => "serve",
        Commands::Submit { .. } => "submit",
        Commands::Cancel { .. } => "cancel",
        Commands::List { .. } => "list",
    };

    setup_logging(cli.verbose, command_name, &config.logging.dir)?;

    match cli.command {
        Commands::Serve {
            host,
            port,
            client_id,
            attempts,
        } => commands::serve::run(config, host, port, client_id, attempts),

        Commands::Submit {
            ticker,
            quantity,
            order_type,
            price,
            action,
            account,
            sec_type,
            exchange,
            currency,
        } => commands::submit::run(
            config,
            commands::submit::OrderArgs {
                ticker,
                quantity,
                order_type,
                price,
                action,
                account,
                sec_type,
                exchange,
                currency,
            },
        ),

        Commands::Cancel { order_id } => commands::submit::cancel(config, order_id),

        Commands::List {
            account,
            ticker,
            status,
            json,
        } => commands::list::run(config, account, ticker, status, json),
    }
}
