//! calibration-loader: Build the stratified conformal calibration store from
//! validated predictions.
//!
//! Reads validated rows from the `predictions` table, scores them, and appends
//! calibration points to `calibration_points` in fixed-size batches.
//!
//! Usage:
//!   cargo run -p calibration-loader -- --db calibration.db
//!   cargo run -p calibration-loader -- --db calibration.db --dry-run --top 20
//!   cargo run -p calibration-loader -- --model-version v2 --limit 5000
//!   cargo run -p calibration-loader -- --compare v1 v2 --alpha 0.05

use conformal_calibrator::{
    compare_models, CalibrationConfig, CalibrationPointBuilder, CalibrationStore,
    IngestionPipeline, SqlCalibrationStore, SqlRecordSource,
};
use std::collections::HashMap;
use std::sync::Arc;

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

fn database_url(db: &str) -> String {
    if db.starts_with("sqlite:") || db.contains("://") {
        db.to_string()
    } else {
        format!("sqlite:{}?mode=rwc", db)
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  calibration-loader [options]                 Ingest validated predictions");
    eprintln!("  calibration-loader --compare BASE CANDIDATE  Compare two model versions");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db PATH|URL        Database (default: DATABASE_URL)");
    eprintln!("  --limit N            Max records per run (default 10000)");
    eprintln!("  --batch-size N       Points per committed batch (default 100)");
    eprintln!("  --model-version V    Calibration set to write (default \"default\")");
    eprintln!("  --weight W           Importance weight for every point (default 1.0)");
    eprintln!("  --top N              Strata in the summary or comparison (default 10)");
    eprintln!("  --alpha A            Error rate for reported thresholds (default 0.1)");
    eprintln!("  --dry-run            Score without writing");
    eprintln!("  --json               Print the report as JSON");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "calibration_loader=info,conformal_calibrator=info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let dry_run = args.iter().any(|a| a == "--dry-run");
    let json = args.iter().any(|a| a == "--json");

    // CLI flags take precedence over the environment
    let mut overrides: HashMap<&str, String> = HashMap::new();
    if let Some(db) = arg_value(&args, "--db") {
        overrides.insert("DATABASE_URL", database_url(db));
    }
    for (flag, key) in [
        ("--limit", "CALIBRATION_MAX_RECORDS"),
        ("--batch-size", "CALIBRATION_BATCH_SIZE"),
        ("--model-version", "CALIBRATION_MODEL_VERSION"),
        ("--top", "CALIBRATION_TOP_STRATA"),
        ("--alpha", "CALIBRATION_ALPHA"),
    ] {
        if let Some(value) = arg_value(&args, flag) {
            overrides.insert(key, value.to_string());
        }
    }

    let config = CalibrationConfig::from_lookup(|key| {
        overrides
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
    })?;

    let weight: f64 = match arg_value(&args, "--weight") {
        Some(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("--weight expects a number, got '{}'", raw))?,
        None => 1.0,
    };

    sqlx::any::install_default_drivers();
    let pool = sqlx::AnyPool::connect(&config.database_url).await?;

    if let Some(idx) = args.iter().position(|a| a == "--compare") {
        let (Some(base), Some(cand)) = (args.get(idx + 1), args.get(idx + 2)) else {
            print_usage();
            anyhow::bail!("--compare needs a baseline and a candidate model version");
        };

        let baseline = SqlCalibrationStore::new(pool.clone()).with_model_version(base.as_str());
        let candidate = SqlCalibrationStore::new(pool).with_model_version(cand.as_str());
        baseline.init_tables().await?;

        let comparison =
            compare_models(&baseline, &candidate, config.alpha, config.top_strata).await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&comparison)?);
        } else {
            print!("{}", comparison.summary());
        }
        return Ok(());
    }

    tracing::info!(
        "calibration-loader: model_version={}, batch_size={}, max_records={}, dry_run={}",
        config.model_version,
        config.batch_size,
        config.max_records,
        dry_run
    );

    let store = Arc::new(
        SqlCalibrationStore::new(pool.clone())
            .with_model_version(config.model_version.as_str())
            .with_min_samples(config.min_stratum_samples),
    );
    store.init_tables().await?;

    let source = Arc::new(SqlRecordSource::new(pool));
    let pipeline = IngestionPipeline::new(source, store.clone(), config.ingestion(dry_run))
        .with_builder(CalibrationPointBuilder::new().with_importance_weight(weight));

    let report = pipeline.run().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print!("{}", report.summary());

    if !dry_run && !report.top_strata.is_empty() {
        println!("  thresholds at alpha={}:", config.alpha);
        for entry in &report.top_strata {
            match store.threshold(&entry.stratum, config.alpha).await {
                Ok(estimate) => println!(
                    "    {:.4}{}  {}",
                    estimate.value,
                    if estimate.low_confidence { " (low n)" } else { "" },
                    entry.stratum
                ),
                Err(e) if e.is_insufficient_data() => {
                    println!("    -       {}", entry.stratum)
                }
                Err(e) => tracing::warn!("Threshold lookup failed for {}: {}", entry.stratum, e),
            }
        }
    }

    if report.is_partial() {
        tracing::warn!(
            "Partial ingestion: {} batches ({} points) failed",
            report.errors.len(),
            report.failed_points()
        );
    }

    Ok(())
}
