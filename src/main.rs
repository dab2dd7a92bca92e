use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter};

use relfeed::config::Config;
use relfeed::feed::{Fetcher, Strategy};
use relfeed::output::{build_rss, write_feed};
use relfeed::pipeline;

#[derive(Parser, Debug)]
#[command(
    name = "relfeed",
    version,
    about = "Aggregates release-note announcements from a documentation site into one RSS feed"
)]
struct Args {
    /// Configuration file (TOML); missing file means defaults
    #[arg(long, short, value_name = "FILE", default_value = "relfeed.toml")]
    config: PathBuf,

    /// Where to write the RSS document
    #[arg(long, short, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Only keep entries published within this many days
    #[arg(long, value_name = "DAYS")]
    backfill_days: Option<u32>,

    /// Maximum concurrent requests
    #[arg(long, value_name = "N")]
    workers: Option<usize>,

    /// HEAD-check feed URLs before fetching them
    #[arg(long)]
    validate_feeds: bool,

    /// Discovery strategy to run (repeatable): template, html-autodiscovery, sitemap-filter
    #[arg(long = "strategy", value_name = "NAME")]
    strategies: Vec<Strategy>,

    /// Log filter, e.g. "info" or "relfeed=debug" (RUST_LOG takes precedence)
    #[arg(long, value_name = "FILTER")]
    log_level: Option<String>,
}

impl Args {
    /// Command-line flags win over file and environment settings.
    fn apply(&self, config: &mut Config) {
        if let Some(output) = &self.output {
            config.output_path = output.clone();
        }
        if let Some(days) = self.backfill_days {
            config.backfill_days = days;
        }
        if let Some(workers) = self.workers {
            config.max_workers = workers;
        }
        if self.validate_feeds {
            config.validate_feeds = true;
        }
        if !self.strategies.is_empty() {
            config.strategies = self.strategies.clone();
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
    }
}

fn filter_for(directives: &str) -> EnvFilter {
    EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins; otherwise the configured level is swapped in once the
    // config has been read.
    let rust_log = std::env::var("RUST_LOG").ok().filter(|v| !v.trim().is_empty());
    let initial = rust_log
        .clone()
        .or_else(|| args.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    let (filter, filter_handle) = reload::Layer::new(filter_for(&initial));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                path = %args.config.display(),
                error = %e,
                "Invalid configuration file, using defaults"
            );
            Config::default()
        }
    };
    config.apply_env();
    args.apply(&mut config);

    if rust_log.is_none() {
        if let Err(e) = filter_handle.reload(filter_for(&config.log_level)) {
            tracing::warn!(error = %e, "Failed to apply configured log level");
        }
    }

    tracing::info!(
        strategies = ?config.strategies,
        backfill_days = config.backfill_days,
        workers = config.max_workers,
        validate_feeds = config.validate_feeds,
        "Starting run"
    );

    let fetcher = Fetcher::new(config.max_workers).context("Failed to build HTTP client")?;
    let output = pipeline::run(&config, &fetcher).await;

    let xml = build_rss(&config.channel(), &output.entries, Utc::now())
        .context("Failed to render RSS feed")?;
    write_feed(&config.output_path, &xml)?;

    println!("{}", output.report);
    println!(
        "Wrote {} entries to {}",
        output.report.entries_written,
        config.output_path.display()
    );
    Ok(())
}
