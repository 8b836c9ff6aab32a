//! Polish CLI - Main entry point

use clap::Parser;
use polish_cli::{commands, Cli, CliError, Commands};
use polish_common::logging::{init_logging, LogConfig, LogGuard, LogLevel, LogOutput};
use polish_core::PipelineConfig;
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    // A .env next to the working directory may carry POLISH_* settings
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    if cli.markdown_help {
        println!("{}", clap_markdown::help_markdown::<Cli>());
        return;
    }

    let Some(command) = cli.command.as_ref() else {
        eprintln!("Error: A subcommand is required");
        eprintln!();
        eprintln!("For more information, try '--help'.");
        process::exit(2);
    };

    let config = match cli.resolve_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(e.exit_code());
        },
    };

    // Logging is best-effort; the pipeline works without it
    let guard = init_command_logging(command, &config, cli.verbose);

    if let Err(e) = execute_command(command, &config).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        // process::exit skips destructors; flush the file writer first
        drop(guard);
        process::exit(e.exit_code());
    }
}

/// Worker log per fragment, master log for the coordinating commands
fn init_command_logging(
    command: &Commands,
    config: &PipelineConfig,
    verbose: bool,
) -> Option<LogGuard> {
    let logs_dir = config.layout().logs_dir();

    let mut log_config = match command {
        Commands::Work { fragment, .. } => LogConfig::for_worker(*fragment, logs_dir),
        // Bars own the terminal while `run` is in progress
        Commands::Run { .. } => LogConfig {
            output: LogOutput::File,
            ..LogConfig::for_master(logs_dir)
        },
        Commands::Partition { .. } | Commands::Combine { .. } => LogConfig::for_master(logs_dir),
        Commands::Status { .. } => LogConfig::builder()
            .level(LogLevel::Warn)
            .output(LogOutput::Console)
            .build(),
    };
    if verbose {
        log_config.level = LogLevel::Debug;
    }

    let log_config = log_config.with_env_overrides().unwrap_or_else(|e| {
        eprintln!("Warning: ignoring invalid LOG_* setting: {}", e);
        log_config_fallback(command)
    });

    match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {}", e);
            None
        },
    }
}

fn log_config_fallback(command: &Commands) -> LogConfig {
    let level = match command {
        Commands::Status { .. } => LogLevel::Warn,
        _ => LogLevel::Info,
    };
    LogConfig::builder().level(level).output(LogOutput::Console).build()
}

async fn execute_command(command: &Commands, config: &PipelineConfig) -> Result<(), CliError> {
    match command {
        Commands::Partition { .. } => commands::partition::run(config).map(|_| ()),
        Commands::Work { fragment, .. } => commands::work::run(config, *fragment).await.map(|_| ()),
        Commands::Status { watch, json } => commands::status::run(config, *watch, *json).await,
        Commands::Combine { partial, .. } => commands::combine::run(config, *partial).map(|_| ()),
        Commands::Run { .. } => commands::run::run(config).await.map(|_| ()),
    }
}
