//! CLI module for crawlr - command-line interface and subcommands.
//!
//! Provides the crawl entry point and a config dump.

pub mod commands;

pub use commands::Cli;
