use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, ValueEnum};
use drug_forecast::{
    AppConfig, DailyForecast, ForecastEngine, ForecastRunner, ForecastStore, ModelKind, ModelRegistry,
    MonthlyAggregator, MonthlyForecast, PivotTable, RunnerConfig, SalesHistory, SystemClock, WeatherApiClient,
    WeatherHistory, YearMonth, YearlyAggregator, YearlyForecast, default_daily_start, default_start_year,
    weather_api::{WeatherRefresh, ensure_weather},
};
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Rows shown per table after each horizon.
const PREVIEW_ROWS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Horizon {
    Daily,
    Monthly,
    Yearly,
    All,
}

impl Horizon {
    fn includes(self, other: Horizon) -> bool {
        self == Horizon::All || self == other
    }
}

#[derive(Parser, Debug)]
#[command(name = "drug-forecast")]
#[command(about = "Daily, monthly and yearly drug sales forecasts from trained models")]
struct Args {
    /// Forecast horizon to produce
    #[arg(value_enum)]
    horizon: Horizon,

    /// Daily sales CSV
    #[arg(long)]
    data: Option<PathBuf>,

    /// Weather CSV
    #[arg(long)]
    weather: Option<PathBuf>,

    /// Directory of trained model artifacts
    #[arg(long)]
    models: Option<PathBuf>,

    /// Directory for forecast CSVs
    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long, value_enum)]
    model_type: Option<ModelKind>,

    /// First forecast day (YYYY-MM-DD), defaults to today
    #[arg(long)]
    start_date: Option<NaiveDate>,

    #[arg(long)]
    days: Option<usize>,

    /// First forecast month (YYYY-MM)
    #[arg(long)]
    start_month: Option<YearMonth>,

    #[arg(long)]
    months: Option<usize>,

    #[arg(long)]
    start_year: Option<i32>,

    #[arg(long)]
    years: Option<usize>,

    /// Refresh the weather forecast first if the cached file is stale
    #[arg(long)]
    refresh_weather: bool,

    /// Evaluate series one at a time on the current thread
    #[arg(long)]
    sequential: bool,
}

impl Args {
    /// Command-line values take precedence over configuration.
    fn apply(&self, config: &mut AppConfig) {
        if let Some(path) = &self.data {
            config.data.sales_path = path.clone();
        }
        if let Some(path) = &self.weather {
            config.data.weather_path = path.clone();
        }
        if let Some(dir) = &self.models {
            config.models.dir = dir.clone();
        }
        if let Some(dir) = &self.output {
            config.forecast.output_dir = dir.clone();
        }
        if let Some(kind) = self.model_type {
            config.models.kind = kind;
        }
        if let Some(days) = self.days {
            config.forecast.days = days;
        }
        if let Some(months) = self.months {
            config.forecast.months = months;
        }
        if let Some(years) = self.years {
            config.forecast.years = years;
        }
    }
}

/// INFO for dependencies, DEBUG for this crate.
fn log_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .parse_lossy("drug_forecast=debug")
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(log_filter())
        .init();

    let mut config = AppConfig::load().context("Failed to load configuration")?;
    args.apply(&mut config);

    let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    rt.block_on(run(args, config))
}

async fn run(args: Args, config: AppConfig) -> Result<()> {
    let started = Instant::now();
    let clock = SystemClock;

    if args.refresh_weather {
        refresh_weather(&config, &clock).await;
    }

    let sales = SalesHistory::load_csv(&config.data.sales_path, &config.data.date_column)
        .with_context(|| format!("Failed to load sales data from {}", config.data.sales_path.display()))?;
    let weather = WeatherHistory::load_or_empty(&config.data.weather_path);
    let models = ModelRegistry::load_dir(&config.models.dir, config.models.kind, &config.data.series);

    let engine = ForecastEngine::new(config.engine_config(), sales, &weather, models);
    let store = ForecastStore::new(&config.forecast.output_dir, config.models.kind);
    let runner = (!args.sequential).then(|| ForecastRunner::new(engine.clone(), RunnerConfig::from(&config.runtime)));

    if args.horizon.includes(Horizon::Daily) {
        let start = args.start_date.unwrap_or_else(|| default_daily_start(&clock));
        let days = config.forecast.days;
        let forecast = match &runner {
            Some(runner) => runner.forecast_daily(start, days).await,
            None => engine.forecast_daily_all(start, days),
        }
        .context("Daily forecast failed")?;

        let long = store.save_daily(&forecast)?;
        let pivot = store.save_pivot(&forecast)?;
        print_daily(&forecast);
        println!("Daily forecast saved to {} and {}", long.display(), pivot.display());
    }

    if args.horizon.includes(Horizon::Monthly) {
        let start = args.start_month.unwrap_or_else(|| YearMonth::default_start(&clock));
        let months = config.forecast.months;
        let forecast = match &runner {
            Some(runner) => runner.forecast_monthly(start, months).await,
            None => MonthlyAggregator::new(&engine).forecast_monthly(start, months),
        }
        .context("Monthly forecast failed")?;

        let path = store.save_monthly(&forecast)?;
        print_monthly(&forecast);
        println!("Monthly forecast saved to {}", path.display());
    }

    if args.horizon.includes(Horizon::Yearly) {
        let start_year = args.start_year.unwrap_or_else(|| default_start_year(&clock));
        let years = config.forecast.years;
        let forecast = match &runner {
            Some(runner) => runner.forecast_yearly(start_year, years).await,
            None => YearlyAggregator::new(&engine).forecast_yearly(start_year, years),
        }
        .context("Yearly forecast failed")?;

        let path = store.save_yearly(&forecast)?;
        print_yearly(&forecast);
        println!("Yearly forecast saved to {}", path.display());
    }

    println!("Total time: {:.2}s", started.elapsed().as_secs_f64());
    Ok(())
}

/// A failed refresh is not fatal; forecasting uses whatever weather exists.
async fn refresh_weather(config: &AppConfig, clock: &SystemClock) {
    let client = match WeatherApiClient::new(&config.weather_api) {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "Weather refresh skipped");
            return;
        }
    };

    let max_age = Duration::from_secs(config.weather_api.max_age_hours * 3600);
    match ensure_weather(&client, &config.data.weather_path, max_age, false, clock).await {
        Ok(WeatherRefresh::Refreshed { rows }) => info!(rows, "Weather refreshed"),
        Ok(WeatherRefresh::Cached) => {}
        Err(e) => warn!(error = %e, "Weather refresh failed, using existing weather data"),
    }
}

// ==================== Previews ====================

fn print_daily(forecast: &DailyForecast) {
    let table = PivotTable::from_daily(forecast);
    println!("\nDaily forecast from {} ({} days)", forecast.start, forecast.num_days);
    println!("{}", header_line("Date", &table.series));
    for row in table.rows.iter().take(PREVIEW_ROWS) {
        println!("{}", value_line(&row.date.to_string(), &row.values));
    }
    print_skipped(forecast.skipped.iter().map(|s| (&s.series_id, &s.reason)));
}

fn print_monthly(forecast: &MonthlyForecast) {
    println!("\nMonthly forecast from {} ({} months)", forecast.start, forecast.rows.len());
    println!("{}", header_line("Month", &forecast.series));
    for row in forecast.rows.iter().take(PREVIEW_ROWS) {
        let values: Vec<f64> = row.totals.iter().map(|(_, v)| *v).collect();
        println!("{}", value_line(&row.label(), &values));
    }
    print_skipped(forecast.skipped.iter().map(|s| (&s.series_id, &s.reason)));
}

fn print_yearly(forecast: &YearlyForecast) {
    println!("\nYearly forecast from {} ({} years)", forecast.start_year, forecast.rows.len());
    println!("{}", header_line("Year", &forecast.series));
    for row in forecast.rows.iter().take(PREVIEW_ROWS) {
        let values: Vec<f64> = row.totals.iter().map(|(_, v)| *v).collect();
        println!("{}", value_line(&row.year.to_string(), &values));
    }
    print_skipped(forecast.skipped.iter().map(|s| (&s.series_id, &s.reason)));
}

fn header_line(first: &str, series: &[String]) -> String {
    let mut line = format!("{first:<12}");
    for s in series {
        line.push_str(&format!("{s:>12}"));
    }
    line
}

fn value_line(label: &str, values: &[f64]) -> String {
    let mut line = format!("{label:<12}");
    for v in values {
        line.push_str(&format!("{v:>12.2}"));
    }
    line
}

fn print_skipped<'a>(skipped: impl Iterator<Item = (&'a String, &'a String)>) {
    for (series, reason) in skipped {
        println!("  skipped {series}: {reason}");
    }
}
