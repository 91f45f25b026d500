//! scopedb - Main entry point.
//!
//! Runs a named query or SQL script against a SQLite store, or starts an
//! interactive prompt when no query is given.

use clap::Parser;
use scopedb::cli::{self, CliError, RunOptions};
use scopedb::config::Config;
use scopedb::db::Database;
use std::process::ExitCode;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn run(config: &Config, database: &Database) -> Result<(), CliError> {
    match config.query_and_params() {
        Some((query, params)) => {
            let options = RunOptions {
                raw: config.raw,
                print_query: config.print_query,
            };
            let output = cli::run_query(database, query, params, options).await?;
            print!("{}", output);
            Ok(())
        }
        None => {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let mut stdout = std::io::stdout();
            cli::repl(database, stdin, &mut stdout).await
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    info!(
        backend = %config.backend,
        database = %config.database.display(),
        "Starting scopedb v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Checked only; no CLI command hashes passwords or mints tokens
    match config.load_secrets().await {
        Ok(Some(_)) => debug!("Secrets file is well-formed"),
        Ok(None) => {}
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    }

    let database = match Database::open(&config.to_database_config()).await {
        Ok(database) => database,
        Err(e) => {
            error!(error = %e, "Failed to open database");
            eprintln!("Error: {}", e);
            if let Some(suggestion) = e.suggestion() {
                eprintln!("Suggestion: {}", suggestion);
            }
            return ExitCode::FAILURE;
        }
    };

    let result = run(&config, &database).await;
    database.close().await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ CliError::UnsupportedQuery(_)) => {
            println!("{}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, "Query failed");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
