//! End-to-end tests: CSV inputs and model artifacts in, forecast CSVs out.

use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use drug_forecast::{
    EngineConfig, ForecastEngine, ForecastRunner, ForecastStore, ModelKind, ModelRegistry, PersistedModel,
    RunnerConfig, SalesHistory, WeatherHistory, YearMonth,
    ml::{Aggregation, Estimator, RegressionTree, TreeNode, artifact_path},
};
use tempfile::tempdir;

const SALES: &str = "\
datum,M01AB,N02BE,Year,Month,Weekday Name
1/1/2024,4.0,30.1,2024,1,Monday
1/2/2024,3.0,,2024,1,Tuesday
1/3/2024,5.0,28.0,2024,1,Wednesday
1/4/2024,2.5,31.5,2024,1,Thursday
1/5/2024,6.0,35.0,2024,1,Friday
1/6/2024,1.0,40.2,2024,1,Saturday
1/7/2024,3.5,22.0,2024,1,Sunday
1/8/2024,4.0,29.0,2024,1,Monday
";

const WEATHER: &str = "\
date,max_temp,min_temp,weather_type
2024-01-01,31,23,Rain
2024-01-02,33,24,Cloudy
";

fn series() -> Vec<String> {
    ["M01AB", "N02BE", "R06"].iter().map(|s| s.to_string()).collect()
}

/// A single stump on lag1: low sales predict 2, high sales predict 5.
fn save_models(dir: &Path) {
    let names: Vec<String> = ["M01AB_lag1", "max_temp"].iter().map(|s| s.to_string()).collect();
    let stump = RegressionTree {
        nodes: vec![
            TreeNode::Split {
                feature: 0,
                threshold: 3.0,
                left: 1,
                right: 2,
            },
            TreeNode::Leaf { value: 2.0 },
            TreeNode::Leaf { value: 5.0 },
        ],
    };
    PersistedModel::new(
        ModelKind::Rf,
        "M01AB",
        Some(names),
        Estimator::TreeEnsemble {
            trees: vec![stump],
            aggregation: Aggregation::Mean,
            base_score: 0.0,
        },
    )
    .save(&artifact_path(dir, ModelKind::Rf, "M01AB"))
    .unwrap();

    let names: Vec<String> = ["N02BE_roll7_mean"].iter().map(|s| s.to_string()).collect();
    PersistedModel::new(
        ModelKind::Rf,
        "N02BE",
        Some(names),
        Estimator::Linear {
            intercept: 1.0,
            coefficients: vec![1.0],
        },
    )
    .save(&artifact_path(dir, ModelKind::Rf, "N02BE"))
    .unwrap();
}

fn engine(models_dir: &Path) -> ForecastEngine {
    let sales = SalesHistory::from_reader(SALES.as_bytes(), "datum").unwrap();
    let weather = WeatherHistory::from_reader(WEATHER.as_bytes()).unwrap();
    let models = ModelRegistry::load_dir(models_dir, ModelKind::Rf, &series());
    let config = EngineConfig {
        series: series(),
        ..EngineConfig::default()
    };
    ForecastEngine::new(config, sales, &weather, models)
}

#[test]
fn test_daily_pipeline_writes_both_layouts() {
    let dir = tempdir().unwrap();
    save_models(dir.path());
    let engine = engine(dir.path());
    let store = ForecastStore::new(dir.path().join("out"), ModelKind::Rf);
    let start = NaiveDate::from_ymd_opt(2024, 1, 9).unwrap();

    let forecast = engine.forecast_daily_all(start, 7).unwrap();
    let long = store.save_daily(&forecast).unwrap();
    let pivot = store.save_pivot(&forecast).unwrap();

    assert!(long.ends_with("daily_forecast_rf_20240109.csv"));
    let predictions = ForecastStore::load_daily(&long).unwrap();
    assert_eq!(predictions.len(), 14);

    // lag1 = 4.0 on the first day, then the stump feeds itself 5.0.
    let m01ab: Vec<f64> = forecast.for_series("M01AB").map(|p| p.value).collect();
    assert_eq!(m01ab, vec![5.0; 7]);

    let table = ForecastStore::load_pivot(&pivot).unwrap();
    assert_eq!(table.series, vec!["M01AB".to_string(), "N02BE".to_string()]);
    assert_eq!(table.rows.len(), 7);

    assert_eq!(forecast.skipped.len(), 1);
    assert_eq!(forecast.skipped[0].series_id, "R06");
}

#[test]
fn test_monthly_and_yearly_tables_keep_every_series() {
    let dir = tempdir().unwrap();
    save_models(dir.path());
    let engine = engine(dir.path());
    let store = ForecastStore::new(dir.path().join("out"), ModelKind::Rf);

    let rt = tokio::runtime::Runtime::new().unwrap();
    let runner = ForecastRunner::new(
        engine,
        RunnerConfig {
            max_concurrent_series: 2,
            series_timeout: Duration::from_secs(60),
        },
    );

    let monthly = rt
        .block_on(runner.forecast_monthly(YearMonth::new(2024, 2).unwrap(), 2))
        .unwrap();
    let path = store.save_monthly(&monthly).unwrap();
    assert!(path.ends_with("monthly_forecast_rf_202402.csv"));

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("Year,Month,Month_Label,M01AB,N02BE,R06\n2024,2,2024-02,145,"));

    let rows = ForecastStore::load_monthly(&path).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].label(), "2024-03");
    assert_eq!(rows[1].total("M01AB"), Some(155.0));
    assert_eq!(rows[1].total("R06"), Some(0.0));

    let yearly = rt.block_on(runner.forecast_yearly(2025, 1)).unwrap();
    let path = store.save_yearly(&yearly).unwrap();
    let rows = ForecastStore::load_yearly(&path).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].total("M01AB"), Some(5.0 * 365.0));
    assert_eq!(rows[0].total("R06"), Some(0.0));
}

#[test]
fn test_unreadable_sales_history_is_fatal() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("missing.csv");

    assert!(SalesHistory::load_csv(&missing, "datum").is_err());

    let bad = "datum,M01AB\nnot-a-date,1.0\n";
    assert!(SalesHistory::from_reader(bad.as_bytes(), "datum").is_err());
}
