use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use tim_the_enchanter::{
    Enchanter, EnchanterConfig, ReportFormat, ReportOptions, SortKey, StopPolicy,
};
use tracing_subscriber::EnvFilter;

mod load_generator;

/// Run a simulated nested workload and print its timing report.
#[derive(Debug, Parser)]
#[command(name = "enchanter-demo", version)]
struct Args {
    /// Concurrent Tokio tasks, each with its own nesting context
    #[arg(long, default_value_t = 8)]
    workers: u32,

    /// Simulated requests per worker
    #[arg(long, default_value_t = 100)]
    iterations: u32,

    /// plain_text, structured, hierarchical or chronological
    #[arg(long, default_value = "plain_text")]
    format: String,

    /// Sort key for tabular output
    #[arg(long, value_enum, default_value_t = SortArg::Total)]
    sort: SortArg,

    /// Keep only the first N rows
    #[arg(long)]
    limit: Option<usize>,

    /// JSON configuration file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Close abandoned inner spans instead of rejecting out-of-order stops
    #[arg(long)]
    auto_close: bool,

    /// Base seed for the per-worker RNGs
    #[arg(long, default_value_t = 1000)]
    seed: u64,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum SortArg {
    Total,
    Mean,
    Count,
    Min,
    Max,
    Name,
}

impl From<SortArg> for SortKey {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Total => SortKey::Total,
            SortArg::Mean => SortKey::Mean,
            SortArg::Count => SortKey::Count,
            SortArg::Min => SortKey::Min,
            SortArg::Max => SortKey::Max,
            SortArg::Name => SortKey::Name,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tim_the_enchanter=info,enchanter_demo=info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    // ── 1. Configuration ─────────────────────────────────────────
    let mut config = match &args.config {
        Some(path) => EnchanterConfig::from_json_str(&std::fs::read_to_string(path)?)?,
        None => EnchanterConfig::default(),
    };
    if args.auto_close {
        config = config.with_stop_policy(StopPolicy::AutoClose);
    }

    // Fail on a bad format before doing any work. Only built-ins exist here.
    let format: ReportFormat = args.format.parse()?;

    // ── 2. Run the workload ──────────────────────────────────────
    let enchanter = Enchanter::new(config)?;
    eprintln!(
        "Timing {} workers × {} requests...",
        args.workers, args.iterations
    );
    load_generator::run(enchanter.clone(), args.workers, args.iterations, args.seed).await?;

    // ── 3. Report ────────────────────────────────────────────────
    let mut options = ReportOptions::default().sorted_by(args.sort.into());
    if let Some(limit) = args.limit {
        options = options.limit(limit);
    }
    let report = enchanter.report(format, &options)?;
    println!("{report}");

    Ok(())
}
