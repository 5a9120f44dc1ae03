//! Weather forecast refresh from the public forecast API.
//!
//! The API returns a JSON list of daily forecasts; entries with a date and
//! both temperatures are classified and written as the weather CSV consumed
//! by [`crate::weather::WeatherHistory`].

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::WeatherApiConfig;
use crate::data::parse_date;
use crate::error::{ForecastError, Result};
use crate::traits::Clock;

/// Map a free-text (Malay) forecast summary to a weather category.
pub fn classify_summary(summary: &str) -> &'static str {
    let summary = summary.to_lowercase();
    let has_any = |words: &[&str]| words.iter().any(|w| summary.contains(w));

    if has_any(&["ribut", "petir", "kilat"]) {
        "Thunderstorm"
    } else if has_any(&["hujan lebat", "hujan cats"]) {
        "Heavy Rain"
    } else if summary.contains("hujan") {
        "Rain"
    } else if has_any(&["cerah", "panas", "terang"]) {
        "Clear"
    } else if has_any(&["berawan", "mendung"]) {
        "Cloudy"
    } else if summary.contains("berjerebu") {
        "Hazy"
    } else {
        "no rain"
    }
}

/// One usable daily entry from the API.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastEntry {
    pub date: NaiveDate,
    pub min_temp: f64,
    pub max_temp: f64,
    pub summary: String,
}

impl ForecastEntry {
    /// Extract an entry; `None` when the date or a temperature is missing.
    pub fn from_json(entry: &Value) -> Option<Self> {
        let obj = entry.as_object()?;
        let date = obj.get("date")?.as_str().and_then(parse_date)?;
        let temp = |key: &str| match obj.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };

        Some(Self {
            date,
            min_temp: temp("min_temp")?,
            max_temp: temp("max_temp")?,
            summary: obj
                .get("summary_forecast")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }
}

/// A row of the weather CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    pub date: NaiveDate,
    pub min_temp: f64,
    pub max_temp: f64,
    pub weather_type: String,
    pub last_updated: String,
}

impl WeatherRecord {
    pub fn from_entry(entry: &ForecastEntry, fetched_at: DateTime<Local>) -> Self {
        Self {
            date: entry.date,
            min_temp: entry.min_temp,
            max_temp: entry.max_temp,
            weather_type: classify_summary(&entry.summary).to_string(),
            last_updated: fetched_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// Write records sorted by date, creating parent directories.
pub fn save_records(path: &Path, records: &[WeatherRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut sorted = records.to_vec();
    sorted.sort_by_key(|r| r.date);

    let mut wtr = csv::Writer::from_path(path)?;
    for record in &sorted {
        wtr.serialize(record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Whether the file at `path` was modified less than `max_age` ago.
pub fn is_fresh(path: &Path, max_age: Duration) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age < max_age)
}

/// API client for daily weather forecasts of one location.
#[derive(Clone, Debug)]
pub struct WeatherApiClient {
    client: reqwest::Client,
    base_url: String,
    location_id: String,
    retries: u32,
    retry_delay: Duration,
}

impl WeatherApiClient {
    pub fn new(config: &WeatherApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("drug-forecast/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ForecastError::Weather(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            location_id: config.location_id.clone(),
            retries: config.retries.max(1),
            retry_delay: Duration::from_secs(config.retry_delay_secs),
        })
    }

    /// Override the delay between attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Fetch usable entries, retrying on errors and on empty results.
    pub async fn fetch_forecast(&self) -> Result<Vec<ForecastEntry>> {
        let mut last_error = String::new();

        for attempt in 1..=self.retries {
            match self.fetch_once().await {
                Ok(entries) if !entries.is_empty() => {
                    info!(location = %self.location_id, entries = entries.len(), "Weather forecast fetched");
                    return Ok(entries);
                }
                Ok(_) => {
                    last_error = "no usable weather entries".to_string();
                    warn!(attempt, retries = self.retries, "Weather API returned no usable entries");
                }
                Err(e) => {
                    warn!(attempt, retries = self.retries, error = %e, "Weather API request failed");
                    last_error = e.to_string();
                }
            }

            if attempt < self.retries {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(ForecastError::Weather(format!(
            "all {} attempts failed: {last_error}",
            self.retries
        )))
    }

    async fn fetch_once(&self) -> Result<Vec<ForecastEntry>> {
        let url = format!("{}/weather/forecast", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("contains", format!("{}@location__location_id", self.location_id))])
            .send()
            .await
            .map_err(|e| ForecastError::Weather(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ForecastError::Weather(format!("API returned error status: {status}")));
        }

        let data = response
            .json::<Vec<Value>>()
            .await
            .map_err(|e| ForecastError::Weather(format!("failed to parse response: {e}")))?;

        let entries: Vec<ForecastEntry> = data.iter().filter_map(ForecastEntry::from_json).collect();
        debug!(raw = data.len(), usable = entries.len(), "Weather payload parsed");
        Ok(entries)
    }

    /// Fetch and write the weather CSV; returns the number of rows written.
    pub async fn refresh<C: Clock>(&self, path: &Path, clock: &C) -> Result<usize> {
        let entries = self.fetch_forecast().await?;
        let fetched_at = clock.now_local();
        let records: Vec<WeatherRecord> = entries
            .iter()
            .map(|e| WeatherRecord::from_entry(e, fetched_at))
            .collect();

        save_records(path, &records)?;
        info!(path = %path.display(), rows = records.len(), "Weather data saved");
        Ok(records.len())
    }
}

/// What [`ensure_weather`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeatherRefresh {
    /// The cached file was recent enough.
    Cached,
    Refreshed { rows: usize },
}

/// Refresh the weather file if forced or stale.
pub async fn ensure_weather<C: Clock>(
    client: &WeatherApiClient,
    path: &Path,
    max_age: Duration,
    force: bool,
    clock: &C,
) -> Result<WeatherRefresh> {
    if !force && is_fresh(path, max_age) {
        info!(path = %path.display(), "Using cached weather data");
        return Ok(WeatherRefresh::Cached);
    }

    let rows = client.refresh(path, clock).await?;
    Ok(WeatherRefresh::Refreshed { rows })
}
