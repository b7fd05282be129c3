use construction_market::config::PipelineConfig;
use construction_market::pipeline::{PipelineRunner, TableStatus};
use construction_market::storage;
use construction_market::PipelineError;
use rusqlite::types::Value;
use rusqlite::Connection;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

fn monthly_csv(header: &str, value_for: impl Fn(i32, u32) -> f64) -> String {
    let mut csv = format!("{}\n", header);
    for year in [2023, 2024] {
        for month in 1..=12 {
            writeln!(csv, "{}-{:02}-28,{},", year, month, value_for(year, month)).unwrap();
        }
    }
    csv
}

fn quarterly_csv(values: &[f64]) -> String {
    let mut csv = String::from("datetime,value\n");
    for (i, value) in values.iter().enumerate() {
        let year = 2023 + (i / 4) as i32;
        let month = (i % 4) * 3 + 1;
        writeln!(csv, "{}-{:02}-01,{}", year, month, value).unwrap();
    }
    csv
}

/// Four source files plus a config pointing at them with relative paths
fn write_inputs(dir: &Path, extra_config: &str) -> PipelineConfig {
    fs::write(
        dir.join("permits.csv"),
        monthly_csv("DateTime,Value,note", |year, _| if year == 2023 { 1000.0 } else { 1100.0 }),
    )
    .unwrap();
    fs::write(
        dir.join("output.csv"),
        monthly_csv("LastUpdate,value,note", |_, month| month as f64),
    )
    .unwrap();

    // header row repeated as data
    let mut prices = String::from("datetime,value\ndatetime,value\n");
    prices.push_str(quarterly_csv(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]).trim_start_matches("datetime,value\n"));
    fs::write(dir.join("prices.csv"), prices).unwrap();

    fs::write(
        dir.join("ratio.csv"),
        quarterly_csv(&[80.0, 82.0, 84.0, 86.0, 88.0, 90.0, 92.0, 94.0]),
    )
    .unwrap();

    let config = format!(
        r#"{{
            "database_path": "market.db",
            "sources": {{
                "building_permits": "permits.csv",
                "construction_output": "output.csv",
                "residential_prices": "prices.csv",
                "price_to_rent_ratio": "ratio.csv"
            }}{}
        }}"#,
        extra_config
    );
    let path = dir.join("pipeline.json");
    fs::write(&path, config).unwrap();

    let config = PipelineConfig::load(&path).unwrap();
    config.validate().unwrap();
    config
}

fn staging_files(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| name.ends_with(".staging"))
        .collect()
}

#[test]
fn test_end_to_end_from_csv() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_inputs(dir.path(), "");
    let report = PipelineRunner::new(config).run().unwrap();

    assert!(report.ingestion.iter().all(|o| o.is_loaded()));
    assert_eq!(report.table("unified_monthly"), Some(&TableStatus::Published { rows: 24 }));
    assert_eq!(report.table("unified_quarterly"), Some(&TableStatus::Published { rows: 8 }));
    assert_eq!(report.table("unified_yearly"), Some(&TableStatus::Published { rows: 2 }));
    assert_eq!(report.table("forecast"), Some(&TableStatus::Published { rows: 24 + 8 }));
    assert!(staging_files(dir.path()).is_empty());

    let conn = Connection::open(dir.path().join("market.db")).unwrap();

    let yoy = storage::read_column(&conn, "growth_yoy", "permits_yoy_pct").unwrap();
    assert_eq!(yoy, vec![Value::Null, Value::Real(10.0)]);
    let years = storage::read_column(&conn, "growth_yoy", "year").unwrap();
    assert_eq!(years, vec![Value::Text("2023".to_string()), Value::Text("2024".to_string())]);

    let qoq = storage::read_column(&conn, "growth_qoq", "permits_qoq_pct").unwrap();
    assert_eq!(qoq[0], Value::Null);
    assert_eq!(qoq[3], Value::Real(0.0));
    assert_eq!(qoq[4], Value::Real(10.0));

    // output 1..12 each year: window [10, 11, 12] → 11
    let avg = storage::read_column(&conn, "moving_average", "output_3mo_avg").unwrap();
    assert_eq!(avg[0], Value::Real(1.0));
    assert_eq!(avg[11], Value::Real(11.0));

    let quarter = storage::read_column(&conn, "predictions", "current_quarter").unwrap();
    assert_eq!(quarter, vec![Value::Text("2024Q4".to_string())]);
    let price = storage::read_column(&conn, "predictions", "residential_price").unwrap();
    assert_eq!(price, vec![Value::Real(8.0)]);
    let actual = storage::read_column(&conn, "predictions", "actual_permits").unwrap();
    assert_eq!(actual, vec![Value::Real(1100.0)]);

    let latest = storage::latest_run(&conn).unwrap().unwrap();
    assert_eq!(latest.run_id, report.run_id);
    assert_eq!(latest.fingerprint, report.fingerprint);
}

#[test]
fn test_same_inputs_same_fingerprint_and_prediction() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_inputs(dir.path(), "");

    let first = PipelineRunner::new(config.clone()).run().unwrap();
    let second = PipelineRunner::new(config).run().unwrap();

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.fingerprint, second.fingerprint);
    assert_eq!(first.prediction, second.prediction);
}

#[test]
fn test_failed_stage_keeps_previous_table() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_inputs(dir.path(), "");
    PipelineRunner::new(config.clone()).run().unwrap();

    // one quarter of prices leaves no training pairs
    fs::write(dir.path().join("prices.csv"), "datetime,value\n2024-10-01,5\n").unwrap();
    let report = PipelineRunner::new(config).run().unwrap();

    assert!(matches!(
        report.table("predictions"),
        Some(TableStatus::Failed { kind, .. }) if kind == "insufficient_data"
    ));
    assert_eq!(report.table("growth_qoq"), Some(&TableStatus::Published { rows: 8 }));

    let conn = Connection::open(dir.path().join("market.db")).unwrap();
    let price = storage::read_column(&conn, "predictions", "residential_price").unwrap();
    assert_eq!(price, vec![Value::Real(8.0)]);

    let prices = storage::read_column(&conn, "unified_quarterly", "residential_prices").unwrap();
    assert_eq!(prices[7], Value::Real(5.0));
    assert_eq!(prices[0], Value::Null);
    assert_eq!(storage::row_count(&conn, "pipeline_runs").unwrap(), 2);
}

#[test]
fn test_required_indicator_failure_leaves_database_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_inputs(dir.path(), r#", "required_metrics": ["building_permits"]"#);
    PipelineRunner::new(config.clone()).run().unwrap();
    let before = fs::read(dir.path().join("market.db")).unwrap();

    fs::write(dir.path().join("permits.csv"), "datetime,amount\n2024-01-01,5\n").unwrap();
    let err = PipelineRunner::new(config).run().unwrap_err();

    assert!(matches!(err, PipelineError::MalformedSource { .. }));
    assert_eq!(fs::read(dir.path().join("market.db")).unwrap(), before);
    assert!(staging_files(dir.path()).is_empty());
}

#[test]
fn test_optional_indicator_failure_is_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_inputs(dir.path(), "");
    fs::remove_file(dir.path().join("ratio.csv")).unwrap();

    let report = PipelineRunner::new(config).run().unwrap();
    assert_eq!(report.ingestion.iter().filter(|o| o.is_loaded()).count(), 3);

    let conn = Connection::open(dir.path().join("market.db")).unwrap();
    let ratio = storage::read_column(&conn, "growth_qoq", "ratio_qoq_pct").unwrap();
    assert!(ratio.iter().all(|v| *v == Value::Null));
    let permits = storage::read_column(&conn, "unified_yearly", "building_permits").unwrap();
    assert_eq!(permits, vec![Value::Real(1000.0), Value::Real(1100.0)]);
}

#[test]
fn test_config_controls_window_and_forecast() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_inputs(dir.path(), "");
    PipelineRunner::new(config).run().unwrap();

    let config = write_inputs(
        dir.path(),
        r#", "moving_average_window": 2, "forecast": {"enabled": false}"#,
    );
    let report = PipelineRunner::new(config).run().unwrap();

    assert!(matches!(report.table("forecast"), Some(TableStatus::Unavailable { .. })));
    assert_eq!(report.moving_average_window, 2);

    let conn = Connection::open(dir.path().join("market.db")).unwrap();
    // last run's forecast rows are gone, the layout stays
    assert_eq!(storage::row_count(&conn, "forecast").unwrap(), 0);
    assert_eq!(storage::table_columns(&conn, "forecast").unwrap().len(), 6);

    // published column name does not follow the window
    let columns = storage::table_columns(&conn, "moving_average").unwrap();
    assert_eq!(columns, vec!["date", "current_output", "output_3mo_avg"]);
    let avg = storage::read_column(&conn, "moving_average", "output_3mo_avg").unwrap();
    assert_eq!(avg[1], Value::Real(1.5));
}
