//! estatetrend CLI: fetch, rank, market and cache management commands.
//!
//! Commands:
//! - `fetch`: fetch transaction records for regions × years into the cache
//! - `rank`: aggregate, estimate trends, and print top/bottom-N with colors
//! - `market`: per-region year-over-year changes, CAGR and trend label
//! - `cache status`: report entry count and size
//! - `cache clear`: remove every cached entry
//!
//! The API key is read from `MLIT_API_KEY`. Log verbosity follows `RUST_LOG`.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use estatetrend_analysis::{
    aggregate, summarize, AggregatedPoint, Algorithm, Metric, Selection, SelectionReport,
    YearWindow,
};
use estatetrend_core::data::{
    BatchOptions, BatchReport, CacheStore, CancelToken, FetchOrchestrator, FileCache,
    LogProgress, MlitTransport,
};
use estatetrend_core::{FetchConfig, RequestKey};

const API_KEY_ENV: &str = "MLIT_API_KEY";

#[derive(Parser)]
#[command(
    name = "estatetrend",
    about = "estatetrend CLI: real-estate transaction ingestion and trend ranking"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct FetchArgs {
    /// Region codes: 2-digit prefecture or 5-digit municipality (e.g., 13 13101).
    #[arg(required = true)]
    regions: Vec<String>,

    /// First year (inclusive).
    #[arg(long)]
    from: i32,

    /// Last year (inclusive).
    #[arg(long)]
    to: i32,

    /// Price classification: 01 (transaction) or 02 (contract). Defaults to the config value.
    #[arg(long)]
    classification: Option<String>,

    /// Path to a TOML fetch config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Ignore cached entries and re-fetch.
    #[arg(long, default_value_t = false)]
    force: bool,

    /// Cache directory. Defaults to ./cache.
    #[arg(long, default_value = "cache")]
    cache_dir: PathBuf,
}

#[derive(Clone, Copy, ValueEnum)]
enum MetricArg {
    Price,
    UnitPrice,
}

impl From<MetricArg> for Metric {
    fn from(arg: MetricArg) -> Self {
        match arg {
            MetricArg::Price => Metric::Price,
            MetricArg::UnitPrice => Metric::UnitPrice,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum AlgorithmArg {
    Ols,
    TheilSen,
    Cagr,
}

impl From<AlgorithmArg> for Algorithm {
    fn from(arg: AlgorithmArg) -> Self {
        match arg {
            AlgorithmArg::Ols => Algorithm::Ols,
            AlgorithmArg::TheilSen => Algorithm::TheilSen,
            AlgorithmArg::Cagr => Algorithm::Cagr,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch transaction records into the cache.
    Fetch {
        #[command(flatten)]
        fetch: FetchArgs,
    },
    /// Rank regions by trend and print top/bottom-N with scaled colors.
    Rank {
        #[command(flatten)]
        fetch: FetchArgs,

        #[arg(long, value_enum, default_value = "price")]
        metric: MetricArg,

        #[arg(long, value_enum, default_value = "ols")]
        algorithm: AlgorithmArg,

        /// Entries in each of the top and bottom lists.
        #[arg(long, default_value_t = 10)]
        top: usize,

        /// Minimum distinct years for a trend.
        #[arg(long, default_value_t = 2)]
        min_years: usize,

        /// Print the full report as JSON instead of a table.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Year-over-year market summary per region.
    Market {
        #[command(flatten)]
        fetch: FetchArgs,

        #[arg(long, value_enum, default_value = "price")]
        metric: MetricArg,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Report cache entry count and size.
    Status {
        /// Cache directory. Defaults to ./cache.
        #[arg(long, default_value = "cache")]
        cache_dir: PathBuf,
    },
    /// Remove every cached entry.
    Clear {
        /// Cache directory. Defaults to ./cache.
        #[arg(long, default_value = "cache")]
        cache_dir: PathBuf,

        /// Actually delete (without this flag, only reports what would be removed).
        #[arg(long, default_value_t = false)]
        confirm: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Fetch { fetch } => run_fetch(&fetch),
        Commands::Rank {
            fetch,
            metric,
            algorithm,
            top,
            min_years,
            json,
        } => run_rank(&fetch, metric.into(), algorithm.into(), top, min_years, json),
        Commands::Market { fetch, metric } => run_market(&fetch, metric.into()),
        Commands::Cache { action } => match action {
            CacheAction::Status { cache_dir } => run_cache_status(&cache_dir),
            CacheAction::Clear { cache_dir, confirm } => run_cache_clear(&cache_dir, confirm),
        },
    }
}

fn load_config(path: Option<&Path>) -> Result<FetchConfig> {
    match path {
        Some(path) => FetchConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(FetchConfig::default()),
    }
}

/// Fetch every key for `args`, reporting per-key failures on stderr.
fn fetch_batch(args: &FetchArgs) -> Result<BatchReport> {
    if args.from > args.to {
        bail!("--from {} is after --to {}", args.from, args.to);
    }
    let config = load_config(args.config.as_deref())?;
    let classification = args
        .classification
        .as_deref()
        .unwrap_or(&config.classification);
    let keys = RequestKey::enumerate(args.from..=args.to, &args.regions, classification)?;

    let api_key = std::env::var(API_KEY_ENV).unwrap_or_else(|_| {
        tracing::warn!("{API_KEY_ENV} is not set; uncached keys will be rejected upstream");
        String::new()
    });
    let transport = MlitTransport::new(&config, api_key)?;
    let cache = FileCache::new(&args.cache_dir)
        .with_context(|| format!("opening cache {}", args.cache_dir.display()))?;
    let orchestrator = FetchOrchestrator::new(Arc::new(transport), Arc::new(cache), &config);

    let options = BatchOptions {
        force_refresh: args.force,
    };
    let report = orchestrator.fetch_batch(&keys, &options, &LogProgress, &CancelToken::new());

    for (key, failure) in report.failures() {
        eprintln!(
            "Error for {key}: {} (after {} attempt(s))",
            failure.error, failure.attempts
        );
    }
    Ok(report)
}

fn run_fetch(args: &FetchArgs) -> Result<()> {
    let report = fetch_batch(args)?;
    println!(
        "Fetched {}/{} key(s) ({} from cache) in {:.1}s, {} record(s).",
        report.succeeded(),
        report.total(),
        report.cache_hits,
        report.elapsed.as_secs_f64(),
        report.records().len()
    );
    if !report.all_succeeded() {
        std::process::exit(1);
    }
    Ok(())
}

fn fetch_points(args: &FetchArgs) -> Result<Vec<AggregatedPoint>> {
    let report = fetch_batch(args)?;
    let points = aggregate(&report.records());
    if points.is_empty() {
        bail!("no transaction records for the requested regions and years");
    }
    Ok(points)
}

fn run_rank(
    args: &FetchArgs,
    metric: Metric,
    algorithm: Algorithm,
    n: usize,
    min_years: usize,
    json: bool,
) -> Result<()> {
    let points = fetch_points(args)?;
    let selection = Selection::new(metric, algorithm, YearWindow::new(args.from, args.to))
        .with_min_years(min_years);
    let report = SelectionReport::build(&points, selection, n);

    if json {
        println!("{}", report.to_json()?);
        return Ok(());
    }

    println!();
    println!(
        "=== {} {} trend, {}-{} ===",
        metric, algorithm, args.from, args.to
    );
    println!("Regions:        {}", report.results.len());
    println!("Excluded:       {}", report.excluded);
    println!("Domain bound:   {:.4}", report.domain_bound);
    print_entries("Top", &report.top, &report);
    print_entries("Bottom", &report.bottom, &report);
    Ok(())
}

fn print_entries(
    title: &str,
    entries: &[estatetrend_analysis::RankedEntry],
    report: &SelectionReport,
) {
    println!();
    println!("--- {title} {} ---", entries.len());
    println!("{:<8} {:<20} {:>16} {:>8}", "Code", "Name", "Value", "Color");
    println!("{}", "-".repeat(55));
    for entry in entries {
        let color = report
            .colors
            .iter()
            .find(|c| c.region_code == entry.region_code)
            .map(|c| c.color.as_str())
            .unwrap_or("-");
        println!(
            "{:<8} {:<20} {:>16.4} {:>8}",
            entry.region_code, entry.region_name, entry.value, color
        );
    }
}

fn run_market(args: &FetchArgs, metric: Metric) -> Result<()> {
    let points = fetch_points(args)?;
    let window = YearWindow::new(args.from, args.to);

    for summary in summarize(&points, metric, window) {
        println!();
        println!(
            "=== {} {} ({}) ===",
            summary.region_code, summary.region_name, metric
        );
        println!("{:<6} {:>18} {:>9}", "Year", "Value", "YoY");
        for change in &summary.yearly {
            let yoy = change
                .yoy
                .map(|y| format!("{:+.2}%", y * 100.0))
                .unwrap_or_else(|| "-".to_string());
            println!("{:<6} {:>18.0} {:>9}", change.year, change.value, yoy);
        }
        let pct = |v: Option<f64>| {
            v.map(|v| format!("{:+.2}%", v * 100.0))
                .unwrap_or_else(|| "-".to_string())
        };
        println!("Average YoY:    {}", pct(summary.average_yoy));
        println!("CAGR:           {}", pct(summary.cagr));
        println!("Trend:          {:?}", summary.trend);
    }
    Ok(())
}

fn run_cache_status(cache_dir: &Path) -> Result<()> {
    if !cache_dir.exists() {
        println!("Cache directory does not exist: {}", cache_dir.display());
        return Ok(());
    }
    let cache = FileCache::new(cache_dir)?;
    let entries = cache.len()?;
    if entries == 0 {
        println!("Cache is empty: {}", cache_dir.display());
        return Ok(());
    }
    println!("Cache: {}", cache_dir.display());
    println!("Entries: {entries}");
    println!("Total size: {}", format_size(dir_size(cache_dir)));
    Ok(())
}

fn run_cache_clear(cache_dir: &Path, confirm: bool) -> Result<()> {
    if !cache_dir.exists() {
        println!("Cache directory does not exist: {}", cache_dir.display());
        return Ok(());
    }
    let cache = FileCache::new(cache_dir)?;
    let entries = cache.len()?;
    if !confirm {
        println!(
            "Would remove {entries} entr{} ({}).",
            if entries == 1 { "y" } else { "ies" },
            format_size(dir_size(cache_dir))
        );
        println!("Dry run: pass --confirm to actually delete.");
        return Ok(());
    }
    cache.clear()?;
    println!("Done. Removed {entries} entr{}.", if entries == 1 { "y" } else { "ies" });
    Ok(())
}

fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(path) else {
        return 0;
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| {
            let path = e.path();
            if path.is_dir() {
                dir_size(&path)
            } else {
                e.metadata().map(|m| m.len()).unwrap_or(0)
            }
        })
        .sum()
}

fn format_size(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}
