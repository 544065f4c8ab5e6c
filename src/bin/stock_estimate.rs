//! stock_estimate - replay recorded scene captures through the stock engine

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use shelf_stock::{
    EngineConfig, FixtureBackend, ImageOutcome, ModelContext, MultiImageReport, StockPipeline,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Scene fixture (JSON). Repeat for several independent scenes.
    #[arg(long = "fixture", required = true)]
    fixtures: Vec<PathBuf>,
    /// Engine config file (TOML or JSON). Without it, STOCK_CONFIG and the
    /// STOCK_* overrides apply.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print the reports as JSON instead of summary lines.
    #[arg(long)]
    json: bool,
    /// Run scenes on separate threads.
    #[arg(long)]
    parallel: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::load_from(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => EngineConfig::load()?,
    };

    let backend = Arc::new(FixtureBackend::load(&args.fixtures)?);
    let scenes = backend.scenes().to_vec();
    if scenes.iter().all(|s| s.is_empty()) {
        return Err(anyhow!("fixtures contain no images"));
    }

    let ctx = ModelContext::new(backend.clone(), backend.clone(), backend.clone())
        .with_refiner(backend);
    ctx.warm_up()?;

    let pipeline = StockPipeline::new(ctx, config);
    let reports = pipeline.run_batch(&scenes, args.parallel);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for (path, report) in args.fixtures.iter().zip(&reports) {
            print_report(&pipeline, &path.display().to_string(), report);
        }
    }

    let failed: usize = reports.iter().map(|r| r.failed().len()).sum();
    if failed > 0 {
        log::warn!("{} captures failed", failed);
    }
    Ok(())
}

fn print_report(pipeline: &StockPipeline, scene: &str, report: &MultiImageReport) {
    println!("== {}", scene);
    for (key, outcome) in report.iter() {
        match outcome {
            ImageOutcome::Ok(stock) => {
                println!("[{}]", key);
                for line in stock.summary_lines() {
                    println!("  {}", line);
                }
                for summary in pipeline.summarize(stock) {
                    println!(
                        "  {}: {} ({:.0}% stocked, confidence {:.2})",
                        summary.product,
                        summary.level,
                        summary.stock_fraction * 100.0,
                        summary.confidence
                    );
                }
            }
            ImageOutcome::Failed { error } => println!("[{}] FAILED: {}", key, error),
        }
    }
}
