pub mod commands;
pub mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

use crate::cli::commands::CrawlOverrides;
use crate::cli::config::{CrawlerConfig, FetchMode};

#[derive(Parser)]
#[command(author, version, about = "Collects user-written text from Vietnamese forums", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log file (defaults to the platform data directory)
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the configured sources until their targets are met
    Crawl {
        /// Documents to collect per source
        #[arg(short, long)]
        target: Option<u64>,

        /// Units processed concurrently per source
        #[arg(short, long)]
        workers: Option<usize>,

        /// Directory for JSONL output and stats files
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Directory for checkpoint files
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,

        /// Minimum words for a document to be kept
        #[arg(long)]
        min_words: Option<usize>,

        /// Ignore and delete existing checkpoints and output
        #[arg(long)]
        fresh: bool,

        /// Only crawl these sources (repeatable)
        #[arg(short, long = "source")]
        sources: Vec<String>,

        /// Page fetching mode
        #[arg(long, value_enum)]
        mode: Option<FetchMode>,
    },

    /// Show checkpoint progress for every configured source
    Status,

    /// Forget a source's progress
    Reset {
        /// Source name
        #[arg(required = true)]
        source: String,

        /// Also delete the source's output file
        #[arg(long)]
        purge_output: bool,
    },

    /// Print the effective configuration
    Config {
        /// Write it as YAML to this path instead
        #[arg(long)]
        write: Option<PathBuf>,
    },
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Load the configuration named on the command line, or the default one
fn load_config(path: Option<&PathBuf>) -> Result<CrawlerConfig> {
    match path {
        Some(path) => CrawlerConfig::load_from_file(path),
        None => CrawlerConfig::load_default(),
    }
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<ExitCode> {
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Crawl {
            target,
            workers,
            output_dir,
            checkpoint_dir,
            min_words,
            fresh,
            sources,
            mode,
        } => {
            let overrides = CrawlOverrides {
                target,
                workers,
                output_dir,
                checkpoint_dir,
                min_words,
                fresh,
                sources,
                mode,
            };

            let all_ok = commands::crawl(config, overrides).await?;
            Ok(if all_ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Commands::Status => {
            commands::status(&config)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Reset { source, purge_output } => {
            info!("Resetting progress for {}", source);
            commands::reset(&config, &source, purge_output)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config { write } => {
            commands::show_config(&config, write.as_deref())?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert()
    }

    #[test]
    fn parses_crawl_overrides() {
        let cli = Cli::try_parse_from([
            "harvester", "crawl", "--target", "100", "-s", "voz", "-s", "tinhte", "--mode", "browser", "--fresh",
        ])
        .unwrap();

        match cli.command {
            Commands::Crawl { target, sources, mode, fresh, .. } => {
                assert_eq!(target, Some(100));
                assert_eq!(sources, vec!["voz", "tinhte"]);
                assert_eq!(mode, Some(FetchMode::Browser));
                assert!(fresh);
            }
            _ => panic!("expected crawl"),
        }
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from(["harvester", "status", "--verbose", "--config", "custom.yaml"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("custom.yaml")));
    }
}
