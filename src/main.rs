use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use construction_market::config::PipelineConfig;
use construction_market::pipeline::{IngestionStatus, PipelineRunner, RunReport, TableStatus};
use construction_market::registry::MetricRegistry;
use construction_market::storage;
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser)]
#[command(name = "market-pipeline")]
#[command(about = "Construction market indicator pipeline", long_about = None)]
#[command(version = construction_market::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild every table from the raw indicator files and publish them
    Run {
        /// JSON config file (missing file = defaults)
        #[arg(short, long, default_value = "pipeline.json")]
        config: PathBuf,

        /// Override the database path from the config
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// List the known indicators
    Metrics,
    /// List published tables with row counts and the last run
    Tables {
        #[arg(long, default_value = "market_data.db", env = "MARKET_DB_PATH")]
        db: PathBuf,
    },
    /// Print a published table, or one of its columns
    Show {
        table: String,

        #[arg(short, long)]
        column: Option<String>,

        #[arg(long, default_value = "market_data.db", env = "MARKET_DB_PATH")]
        db: PathBuf,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/market_pipeline.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("market_pipeline.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, db } => run_pipeline(&config, db),
        Commands::Metrics => {
            list_metrics();
            Ok(())
        }
        Commands::Tables { db } => list_tables(&db),
        Commands::Show { table, column, db } => show_table(&db, &table, column.as_deref()),
    }
}

fn run_pipeline(config_path: &Path, db_override: Option<PathBuf>) -> Result<()> {
    let mut config = PipelineConfig::load(config_path)?;
    config.apply_env()?;
    if let Some(db) = db_override {
        config.database_path = db;
    }
    config.validate().context("Invalid pipeline configuration")?;

    info!(
        config = %config_path.display(),
        database = %config.database_path.display(),
        "starting pipeline"
    );

    let report = PipelineRunner::new(config)
        .run()
        .context("Pipeline run aborted")?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("🏗️  Run {}", report.run_id);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    println!("\n📂 Indicators");
    for outcome in &report.ingestion {
        match &outcome.status {
            IngestionStatus::Loaded { observations, .. } => {
                println!("  ✓ {:<22} {} observations", outcome.metric, observations)
            }
            IngestionStatus::Failed { reason, .. } => {
                println!("  ✗ {:<22} {}", outcome.metric, reason)
            }
            IngestionStatus::NotConfigured => println!("  - {:<22} no source", outcome.metric),
        }
    }

    println!("\n💾 Tables");
    for outcome in &report.tables {
        match &outcome.status {
            TableStatus::Published { rows } => println!("  ✓ {:<18} {} rows", outcome.table, rows),
            TableStatus::Unavailable { reason } => {
                println!("  ○ {:<18} cleared: {}", outcome.table, reason)
            }
            TableStatus::Skipped { reason } => println!("  - {:<18} skipped: {}", outcome.table, reason),
            TableStatus::Failed { reason, .. } => {
                println!("  ✗ {:<18} kept previous: {}", outcome.table, reason)
            }
        }
    }

    if let Some(fit) = &report.prediction {
        println!(
            "\n📈 Fit: slope {:.4}, intercept {:.2}, R² {:.3} ({} pairs)",
            fit.fit.slope, fit.fit.intercept, fit.fit.r_squared, fit.fit.n_observations
        );
        if let (Some(mae), Some(rmse)) = (fit.validation_mae, fit.validation_rmse) {
            println!(
                "   validation on {} pairs (seed {}): MAE {:.2}, RMSE {:.2}",
                fit.validation_size, fit.seed, mae, rmse
            );
        }
    }

    println!("\n🔑 Fingerprint {}", report.fingerprint);
}

fn list_metrics() {
    let registry = MetricRegistry::standard();
    println!("📊 {} indicators", registry.len());
    for def in registry.iter() {
        println!(
            "  {:<22} {:<8} {:<10} {:<8} {}",
            def.name(),
            def.unit,
            def.native_frequency,
            def.short_name,
            def.description
        );
    }
}

fn open_read_only(db: &Path) -> Result<Connection> {
    Connection::open_with_flags(db, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("Failed to open database {}", db.display()))
}

fn list_tables(db: &Path) -> Result<()> {
    let conn = open_read_only(db)?;

    let summaries = storage::table_summaries(&conn)?;
    println!("🗄️  {} published tables in {}", summaries.len(), db.display());
    for summary in &summaries {
        println!("  {:<18} {:>6} rows  {}", summary.name, summary.rows, summary.columns.join(", "));
    }

    if let Some(run) = storage::latest_run(&conn)? {
        println!(
            "\n⏱️  Last run {} finished {} (fingerprint {})",
            run.run_id,
            run.finished_at.to_rfc3339(),
            run.fingerprint
        );
    }
    Ok(())
}

fn show_table(db: &Path, table: &str, column: Option<&str>) -> Result<()> {
    let conn = open_read_only(db)?;

    match column {
        Some(column) => {
            let values = storage::read_column(&conn, table, column)
                .with_context(|| format!("Failed to read {}.{}", table, column))?;
            println!("{}", column);
            for value in &values {
                println!("{}", render(value));
            }
        }
        None => {
            let (columns, rows) = storage::read_table(&conn, table)
                .with_context(|| format!("Failed to read {}", table))?;
            println!("{}", columns.join("\t"));
            for row in &rows {
                let cells: Vec<String> = row.iter().map(render).collect();
                println!("{}", cells.join("\t"));
            }
        }
    }
    Ok(())
}

fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Integer(i) => i.to_string(),
        Value::Real(r) => r.to_string(),
        Value::Text(t) => t.clone(),
        Value::Blob(b) => format!("<{} bytes>", b.len()),
    }
}
