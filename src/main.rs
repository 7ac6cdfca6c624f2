use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crawlr::crawl::{LinkWorker, PageTask};
use crawlr::{DispatchConfig, Manager, StopReport};
use reqwest::Url;

mod cli;
mod config;

use cli::Cli;
use cli::commands::Commands;
use config::Config;

fn setup_logging(level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("crawlr")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("crawlr.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    // RUST_LOG wins over the configured level
    let env = env_logger::Env::default().default_filter_or(level.unwrap_or("info"));
    env_logger::Builder::from_env(env)
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

struct CrawlArgs<'a> {
    seeds: &'a [String],
    max_depth: Option<u32>,
    max_pages: Option<usize>,
    workers: Option<usize>,
    any_host: bool,
    json: bool,
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Crawl {
            seeds,
            max_depth,
            max_pages,
            workers,
            any_host,
            json,
        } => {
            let args = CrawlArgs {
                seeds,
                max_depth: *max_depth,
                max_pages: *max_pages,
                workers: *workers,
                any_host: *any_host,
                json: *json,
            };
            handle_crawl_command(args, config).await
        }
        Commands::Config => handle_config_command(config),
    }
}

async fn handle_crawl_command(args: CrawlArgs<'_>, config: &Config) -> Result<()> {
    let seeds = args
        .seeds
        .iter()
        .map(|s| Url::parse(s).context(format!("Invalid seed URL: {}", s)))
        .collect::<Result<Vec<_>>>()?;

    let mut crawl = config.crawl.clone();
    if let Some(depth) = args.max_depth {
        crawl.max_depth = depth;
    }
    if let Some(pages) = args.max_pages {
        crawl.max_pages = pages;
    }
    if args.any_host {
        crawl.same_host_only = false;
    }

    let mut settings = config.dispatch.clone();
    if let Some(workers) = args.workers {
        settings.max_workers = workers;
    }

    info!("Crawling {} seed(s) with {:?}", seeds.len(), crawl);

    let worker = Arc::new(LinkWorker::new(crawl));
    let seed_tasks = worker.seed_tasks(seeds);

    let mut builder = Manager::<PageTask>::builder_from_arc(worker.clone()).name("crawl");
    if let Some(user_agent) = &worker.config().user_agent {
        builder = builder.user_agent(user_agent.clone());
    }
    let manager = builder.build();

    let started = Instant::now();
    manager
        .start(DispatchConfig::new(settings).with_seeds(seed_tasks))
        .await
        .context("Failed to start crawl")?;

    if !args.json {
        println!("{} {} seed(s)", "Crawling:".green(), args.seeds.len());
    }

    let interrupted = tokio::select! {
        _ = manager.wait_stopped() => None,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping crawl");
            manager.stop().await
        }
    };

    print_summary(&worker, started, interrupted, args.json)
}

fn print_summary(worker: &LinkWorker, started: Instant, interrupted: Option<StopReport>, json: bool) -> Result<()> {
    let summary = worker.summary();
    let elapsed = started.elapsed();

    if json {
        let output = serde_json::json!({
            "summary": summary,
            "elapsed_ms": elapsed.as_millis() as u64,
            "interrupted": interrupted,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    match interrupted {
        Some(report) => println!(
            "{} {} queued page(s) abandoned, {} cancelled",
            "Interrupted:".yellow(),
            report.abandoned,
            report.cancelled
        ),
        None => println!("{} in {:.1}s", "Finished".green(), elapsed.as_secs_f64()),
    }
    println!("  fetched:    {}", summary.fetched);
    println!("  failed:     {}", summary.failed.to_string().red());
    println!("  discovered: {}", summary.discovered);
    println!("  skipped:    {}", summary.skipped);
    Ok(())
}

fn handle_config_command(config: &Config) -> Result<()> {
    print!("{}", config.to_yaml()?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    setup_logging(config.log_level.as_deref()).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
