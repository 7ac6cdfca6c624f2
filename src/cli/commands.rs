//! CLI command definitions using clap.
//!
//! - crawl: fetch pages from seed URLs through the throttled dispatcher
//! - config: print the effective configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Crawlr - a throttled, priority-ordered page crawler
#[derive(Parser, Debug)]
#[command(name = "crawlr")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Crawl from one or more seed URLs
    Crawl {
        /// Seed URLs
        #[arg(required = true)]
        seeds: Vec<String>,

        /// Link hops to follow from each seed
        #[arg(short = 'd', long)]
        max_depth: Option<u32>,

        /// Stop fetching after this many pages
        #[arg(short = 'p', long)]
        max_pages: Option<usize>,

        /// Worker slots
        #[arg(short, long)]
        workers: Option<usize>,

        /// Follow links to other hosts
        #[arg(long)]
        any_host: bool,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as YAML
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["crawlr"]).is_err());
    }

    #[test]
    fn test_cli_verbose_flag() {
        let cli = Cli::try_parse_from(["crawlr", "-v", "config"]).unwrap();
        assert!(cli.is_verbose());
    }

    #[test]
    fn test_cli_config_option() {
        let cli = Cli::try_parse_from(["crawlr", "-c", "/path/to/crawlr.yml", "config"]).unwrap();
        assert_eq!(cli.config.as_ref(), Some(&PathBuf::from("/path/to/crawlr.yml")));
    }

    #[test]
    fn test_crawl_defaults() {
        let cli = Cli::try_parse_from(["crawlr", "crawl", "https://example.com/"]).unwrap();
        match cli.command {
            Commands::Crawl {
                seeds,
                max_depth,
                max_pages,
                workers,
                any_host,
                json,
            } => {
                assert_eq!(seeds, vec!["https://example.com/"]);
                assert!(max_depth.is_none());
                assert!(max_pages.is_none());
                assert!(workers.is_none());
                assert!(!any_host);
                assert!(!json);
            }
            _ => panic!("Expected crawl command"),
        }
    }

    #[test]
    fn test_crawl_options() {
        let cli = Cli::try_parse_from([
            "crawlr",
            "crawl",
            "https://a.example/",
            "https://b.example/",
            "-d",
            "3",
            "--max-pages",
            "50",
            "-w",
            "4",
            "--any-host",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Crawl {
                seeds,
                max_depth,
                max_pages,
                workers,
                any_host,
                json,
            } => {
                assert_eq!(seeds.len(), 2);
                assert_eq!(max_depth, Some(3));
                assert_eq!(max_pages, Some(50));
                assert_eq!(workers, Some(4));
                assert!(any_host);
                assert!(json);
            }
            _ => panic!("Expected crawl command"),
        }
    }

    #[test]
    fn test_crawl_requires_seed() {
        assert!(Cli::try_parse_from(["crawlr", "crawl"]).is_err());
    }

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }
}
