use std::path::PathBuf;

use anyhow::Result;
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::forecast::{DEFAULT_RECENT_WINDOW, DEFAULT_SERIES, EngineConfig};
use crate::ml::ModelKind;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    pub data: DataConfig,
    pub models: ModelsConfig,
    pub forecast: ForecastConfig,
    pub runtime: RuntimeConfig,
    pub weather_api: WeatherApiConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    pub sales_path: PathBuf,
    pub weather_path: PathBuf,
    /// Header of the date column in the sales file
    pub date_column: String,
    pub series: Vec<String>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            sales_path: PathBuf::from("dataset/salesdaily.csv"),
            weather_path: PathBuf::from("dataset/weather/perlis_7day.csv"),
            date_column: "datum".to_string(),
            series: DEFAULT_SERIES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelsConfig {
    pub dir: PathBuf,
    pub kind: ModelKind,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("saved_models"),
            kind: ModelKind::Rf,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ForecastConfig {
    pub days: usize,
    pub months: usize,
    pub years: usize,
    pub recent_window: usize,
    pub output_dir: PathBuf,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            days: 7,
            months: 12,
            years: 3,
            recent_window: DEFAULT_RECENT_WINDOW,
            output_dir: PathBuf::from("forecasts"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    pub max_concurrent_series: usize,
    pub series_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_series: 4,
            series_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WeatherApiConfig {
    pub base_url: String,
    pub location_id: String,
    pub retries: u32,
    pub retry_delay_secs: u64,
    /// A weather file younger than this is not refreshed
    pub max_age_hours: u64,
    pub request_timeout_secs: u64,
}

impl Default for WeatherApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.data.gov.my".to_string(),
            location_id: "St001".to_string(),
            retries: 3,
            retry_delay_secs: 2,
            max_age_hours: 3,
            request_timeout_secs: 10,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        // Load .env file (silently ignore if not present)
        let _ = dotenvy::dotenv();

        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("drug-forecast");

        let builder = Config::builder()
            // 1. Load default values
            // Data
            .set_default("data.sales_path", "dataset/salesdaily.csv")?
            .set_default("data.weather_path", "dataset/weather/perlis_7day.csv")?
            .set_default("data.date_column", "datum")?
            .set_default(
                "data.series",
                DEFAULT_SERIES.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            )?
            // Models
            .set_default("models.dir", "saved_models")?
            .set_default("models.kind", "rf")?
            // Forecast
            .set_default("forecast.days", 7)?
            .set_default("forecast.months", 12)?
            .set_default("forecast.years", 3)?
            .set_default("forecast.recent_window", DEFAULT_RECENT_WINDOW as u64)?
            .set_default("forecast.output_dir", "forecasts")?
            // Runtime
            .set_default("runtime.max_concurrent_series", 4)?
            .set_default("runtime.series_timeout_secs", 300)?
            // Weather API
            .set_default("weather_api.base_url", "https://api.data.gov.my")?
            .set_default("weather_api.location_id", "St001")?
            .set_default("weather_api.retries", 3)?
            .set_default("weather_api.retry_delay_secs", 2)?
            .set_default("weather_api.max_age_hours", 3)?
            .set_default("weather_api.request_timeout_secs", 10)?

            // 2. Load from local config file (optional, lowest priority)
            .add_source(File::from(PathBuf::from("config.toml")).required(false))

            // 3. Load from user config directory (optional, overrides local)
            .add_source(File::from(config_dir.join("config.toml")).required(false))

            // 4. Load from Environment variables (DRUG_FORECAST__FORECAST__DAYS=...)
            .add_source(
                Environment::with_prefix("DRUG_FORECAST")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("data.series")
                    .try_parsing(true),
            );

        let s = builder.build()?;
        Ok(s.try_deserialize()?)
    }

    /// Engine settings derived from this configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            series: self.data.series.clone(),
            model_kind: self.models.kind,
            recent_window: self.forecast.recent_window,
        }
    }
}
