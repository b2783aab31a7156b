//! Berth CLI - single entrypoint for the tenant container orchestrator
//!
//! The binary wires logging, parses the command line, and hands control to
//! the selected command.

mod commands;

use clap::{Parser, Subcommand};
use commands::ServeCommand;
use tracing_subscriber::{layer::SubscriberExt, Layer};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "BERTH_LOG_LEVEL", global = true)]
    log_level: String,

    /// Log format: compact, pretty, json
    #[arg(
        long,
        default_value = "compact",
        env = "BERTH_LOG_FORMAT",
        global = true
    )]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the orchestration API server
    Serve(ServeCommand),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = cli.log_level.clone();

    // If RUST_LOG is set, use it as-is (the operator wants full control);
    // otherwise run every workspace crate at the chosen level and pin the
    // noisy dependencies at warn.
    let filter = if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .expect("Invalid RUST_LOG environment variable")
    } else {
        tracing_subscriber::EnvFilter::new(format!(
            "berth_cli={level},\
             berth_core={level},\
             berth_database={level},\
             berth_entities={level},\
             berth_migrations={level},\
             berth_orchestrator={level},\
             berth_ports={level},\
             berth_registry={level},\
             berth_runtime={level},\
             sqlx=warn,\
             sea_orm=warn,\
             hyper=warn,\
             tower=warn,\
             tower_http=warn,\
             bollard=warn,\
             h2=warn",
            level = log_level
        ))
    };

    let fmt_layer = match cli.log_format.as_str() {
        "json" => tracing_subscriber::fmt::layer().json().boxed(),
        "pretty" => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
        _ => tracing_subscriber::fmt::layer() // "compact" or any other value
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set global default subscriber");

    match cli.command {
        Commands::Serve(serve_cmd) => serve_cmd.execute(),
    }
}
