//! `quarterly` command-line entry point.

use clap::Parser;
use quarterly::{
    AssembleOptions, Config, DocumentCache, EdgarSource, Engine, NoopCache, Pipeline,
    QuarterlyError, ReportOptions, Result, Symbol, Taxonomy, XbrlInstanceParser,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Reconstruct quarter-by-quarter financial statements from SEC filings.
#[derive(Debug, Parser)]
#[command(name = "quarterly", version, about)]
struct Cli {
    /// Ticker symbol, e.g. WMT.
    ticker: String,

    /// First calendar year of quarters to include.
    #[arg(default_value_t = 2022)]
    start_year: i32,

    /// Last calendar year of quarters to include.
    #[arg(default_value_t = 2025)]
    end_year: i32,

    /// Output workbook; defaults to `{ticker}_quarterly_{start}_{end}.xlsx`.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// User agent sent to SEC EDGAR (name and contact email).
    #[arg(long)]
    user_agent: Option<String>,

    /// Do not read or write the document cache.
    #[arg(long)]
    no_cache: bool,

    /// SQLite cache file.
    #[arg(long)]
    cache_path: Option<PathBuf>,

    /// Maximum concurrent downloads.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Italicize derived values and add a legend.
    #[arg(long)]
    annotate: bool,

    /// Omit rows for labels that match no canonical concept.
    #[arg(long)]
    skip_unclassified: bool,

    /// Taxonomy file replacing the built-in synonym table.
    #[arg(long)]
    taxonomy: Option<PathBuf>,

    /// Write the reconciliation log as JSON to this path.
    #[arg(long)]
    log_json: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Builds the effective configuration: defaults, file, environment, flags.
    fn config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        }
        .with_env_overrides();

        if let Some(user_agent) = &self.user_agent {
            config.user_agent = user_agent.clone();
        }
        if self.no_cache {
            config.cache.enabled = false;
        }
        if let Some(path) = &self.cache_path {
            config.cache.path = path.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.fetch.concurrency = concurrency;
        }
        if self.annotate {
            config.output.annotate_provenance = true;
        }
        if self.skip_unclassified {
            config.output.include_unclassified = false;
        }
        if let Some(path) = &self.taxonomy {
            config.taxonomy_path = Some(path.clone());
        }
        Ok(config)
    }

    fn output_path(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| {
            PathBuf::from(format!(
                "{}_quarterly_{}_{}.xlsx",
                self.ticker.to_lowercase(),
                self.start_year,
                self.end_year
            ))
        })
    }
}

#[cfg(feature = "cache-sqlite")]
fn disk_cache(config: &Config) -> Result<Arc<dyn DocumentCache>> {
    Ok(Arc::new(quarterly::SqliteCache::new(&config.cache.path)?))
}

#[cfg(not(feature = "cache-sqlite"))]
fn disk_cache(_config: &Config) -> Result<Arc<dyn DocumentCache>> {
    warn!("Built without SQLite support; caching disabled");
    Ok(Arc::new(NoopCache::new()))
}

async fn open_cache(config: &Config) -> Result<Arc<dyn DocumentCache>> {
    if !config.cache.enabled {
        return Ok(Arc::new(NoopCache::new()));
    }
    let cache = disk_cache(config)?;
    if let Some(ttl) = config.cache.ttl() {
        let removed = cache.invalidate_stale(ttl).await?;
        if removed > 0 {
            info!("Removed {} stale cache entries", removed);
        }
    }
    Ok(cache)
}

async fn run(cli: &Cli) -> Result<()> {
    let config = cli.config()?;

    let taxonomy = match &config.taxonomy_path {
        Some(path) => Taxonomy::from_path(path)?,
        None => Taxonomy::builtin()?,
    };
    let engine = Engine::new(taxonomy).with_options(AssembleOptions {
        include_unclassified: config.output.include_unclassified,
    });

    let source = EdgarSource::with_timeout(&config.user_agent, config.fetch.timeout())?;
    let cache = open_cache(&config).await?;

    let pipeline = Pipeline::new(
        Arc::new(source),
        Arc::new(XbrlInstanceParser::new()),
        cache,
        engine,
    )
    .with_fetch_config(config.fetch.clone());

    let output = cli.output_path();
    let extraction = pipeline
        .run_to_file(
            &Symbol::new(&cli.ticker),
            cli.start_year,
            cli.end_year,
            &output,
            ReportOptions {
                annotate_provenance: config.output.annotate_provenance,
            },
        )
        .await?;

    for issue in extraction.log.iter() {
        warn!("{}", issue);
    }

    if let Some(path) = &cli.log_json {
        let json = serde_json::to_string_pretty(&extraction.log)
            .map_err(|e| QuarterlyError::Other(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| {
            QuarterlyError::Other(format!("Failed to write {}: {}", path.display(), e))
        })?;
    }

    info!(
        issues = extraction.log.len(),
        filings = extraction.filings.len(),
        "Wrote {}",
        output.display()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["quarterly", "WMT"]);
        assert_eq!(cli.start_year, 2022);
        assert_eq!(cli.end_year, 2025);
        assert_eq!(
            cli.output_path(),
            PathBuf::from("wmt_quarterly_2022_2025.xlsx")
        );
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "quarterly",
            "AAPL",
            "2023",
            "2024",
            "--user-agent",
            "Desk desk@example.com",
            "--no-cache",
            "--concurrency",
            "8",
            "--annotate",
            "--skip-unclassified",
        ]);
        let config = cli.config().unwrap();
        assert_eq!(config.user_agent, "Desk desk@example.com");
        assert!(!config.cache.enabled);
        assert_eq!(config.fetch.concurrency, 8);
        assert!(config.output.annotate_provenance);
        assert!(!config.output.include_unclassified);
        assert_eq!(
            cli.output_path(),
            PathBuf::from("aapl_quarterly_2023_2024.xlsx")
        );
    }

    #[test]
    fn test_config_file_layer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quarterly.toml");
        std::fs::write(&path, "[fetch]\nconcurrency = 2\n[cache]\nenabled = false\n").unwrap();

        let cli = Cli::parse_from([
            "quarterly",
            "WMT",
            "--config",
            path.to_str().unwrap(),
            "--cache-path",
            "/tmp/other.db",
        ]);
        let config = cli.config().unwrap();
        assert_eq!(config.fetch.concurrency, 2);
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.path, PathBuf::from("/tmp/other.db"));
    }
}
