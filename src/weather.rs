//! Weather history and the per-date weather feature fallback chain.

use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::Path;

use chrono::{Datelike, NaiveDate};
use tracing::{info, warn};

use crate::data::parse_date;
use crate::error::{ForecastError, Result};

/// Categories every codebook starts with, in code order.
pub const DEFAULT_WEATHER_CATEGORIES: [&str; 7] = [
    "Clear",
    "Cloudy",
    "Rain",
    "Heavy Rain",
    "Thunderstorm",
    "Hazy",
    "Other",
];

/// Append-only mapping from weather category name to integer code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeatherCodebook {
    names: Vec<String>,
}

impl Default for WeatherCodebook {
    fn default() -> Self {
        Self {
            names: DEFAULT_WEATHER_CATEGORIES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl WeatherCodebook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Code for a known category.
    pub fn lookup(&self, category: &str) -> Option<u32> {
        let category = category.trim();
        self.names.iter().position(|n| n == category).map(|i| i as u32)
    }

    /// Code for `category`, appending a new code if it has not been seen.
    pub fn code_for(&mut self, category: &str) -> u32 {
        if let Some(code) = self.lookup(category) {
            return code;
        }
        self.names.push(category.trim().to_string());
        (self.names.len() - 1) as u32
    }

    pub fn name(&self, code: u32) -> Option<&str> {
        self.names.get(code as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// One day of observed (or forecast) weather.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeatherObservation {
    pub date: NaiveDate,
    pub max_temp: f64,
    pub min_temp: f64,
    pub weather_code: u32,
}

/// The weather inputs of one feature vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeatherFeatures {
    pub max_temp: f64,
    pub min_temp: f64,
    pub weather_code: u32,
}

impl WeatherFeatures {
    /// Used when no weather history is available at all.
    pub const FALLBACK: WeatherFeatures = WeatherFeatures {
        max_temp: 30.0,
        min_temp: 24.0,
        weather_code: 0,
    };
}

impl From<&WeatherObservation> for WeatherFeatures {
    fn from(obs: &WeatherObservation) -> Self {
        Self {
            max_temp: obs.max_temp,
            min_temp: obs.min_temp,
            weather_code: obs.weather_code,
        }
    }
}

/// Per-calendar-month weather summary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonthlyWeatherAverage {
    pub month: u32,
    pub max_temp: f64,
    pub min_temp: f64,
    pub weather_code: u32,
}

/// Weather observations in file order plus the codebook used to encode them.
#[derive(Debug, Clone, Default)]
pub struct WeatherHistory {
    observations: Vec<WeatherObservation>,
    codebook: WeatherCodebook,
}

impl WeatherHistory {
    pub fn new(observations: Vec<WeatherObservation>, codebook: WeatherCodebook) -> Self {
        Self {
            observations,
            codebook,
        }
    }

    /// An empty history; every date resolves to [`WeatherFeatures::FALLBACK`].
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load the weather CSV, degrading to an empty history if it is unreadable.
    pub fn load_or_empty(path: &Path) -> Self {
        let loaded = std::fs::File::open(path)
            .map_err(ForecastError::from)
            .and_then(Self::from_reader);

        match loaded {
            Ok(history) if !history.is_empty() => {
                info!(path = %path.display(), rows = history.len(), "Weather history loaded");
                history
            }
            Ok(_) => {
                warn!(path = %path.display(), "Weather history is empty, using default weather features");
                Self::empty()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not load weather data, using default weather features");
                Self::empty()
            }
        }
    }

    /// Parse weather CSV content (`date, max_temp, min_temp, weather_type`).
    ///
    /// Unknown categories get new codes; rows with unparsable cells are skipped.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().replace(' ', "_").to_lowercase())
            .collect();

        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| ForecastError::Weather(format!("weather column {name:?} not found")))
        };
        let date_idx = column("date")?;
        let max_idx = column("max_temp")?;
        let min_idx = column("min_temp")?;
        let type_idx = column("weather_type")?;

        let mut codebook = WeatherCodebook::new();
        let mut observations = Vec::new();

        for (row, record) in reader.records().enumerate() {
            let record = record?;
            let cell = |idx: usize| record.get(idx).map(str::trim).unwrap_or_default();

            let parsed = parse_date(cell(date_idx)).zip(
                cell(max_idx)
                    .parse::<f64>()
                    .ok()
                    .zip(cell(min_idx).parse::<f64>().ok()),
            );
            let category = cell(type_idx);

            match parsed {
                Some((date, (max_temp, min_temp))) if !category.is_empty() => {
                    observations.push(WeatherObservation {
                        date,
                        max_temp,
                        min_temp,
                        weather_code: codebook.code_for(category),
                    });
                }
                _ => warn!(row = row + 1, "Skipping malformed weather row"),
            }
        }

        Ok(Self {
            observations,
            codebook,
        })
    }

    pub fn observations(&self) -> &[WeatherObservation] {
        &self.observations
    }

    pub fn codebook(&self) -> &WeatherCodebook {
        &self.codebook
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// One row per calendar month present in the history, ordered by month.
    pub fn monthly_averages(&self) -> Vec<MonthlyWeatherAverage> {
        let mut by_month: BTreeMap<u32, Vec<&WeatherObservation>> = BTreeMap::new();
        for obs in &self.observations {
            by_month.entry(obs.date.month()).or_default().push(obs);
        }

        by_month
            .into_iter()
            .map(|(month, rows)| {
                let summary = summarize(rows.iter().copied());
                MonthlyWeatherAverage {
                    month,
                    max_temp: summary.max_temp,
                    min_temp: summary.min_temp,
                    weather_code: summary.weather_code,
                }
            })
            .collect()
    }
}

/// Resolves weather features for any date: exact match, then the calendar
/// month's average, then the global average (or fixed defaults).
#[derive(Debug, Clone)]
pub struct WeatherResolver {
    exact: HashMap<NaiveDate, WeatherFeatures>,
    monthly: HashMap<u32, WeatherFeatures>,
    global: WeatherFeatures,
}

impl WeatherResolver {
    pub fn new(history: &WeatherHistory) -> Self {
        let mut exact = HashMap::with_capacity(history.len());
        for obs in history.observations() {
            // First row for a date wins.
            exact.entry(obs.date).or_insert_with(|| WeatherFeatures::from(obs));
        }

        let monthly = history
            .monthly_averages()
            .into_iter()
            .map(|avg| {
                (
                    avg.month,
                    WeatherFeatures {
                        max_temp: avg.max_temp,
                        min_temp: avg.min_temp,
                        weather_code: avg.weather_code,
                    },
                )
            })
            .collect();

        let global = if history.is_empty() {
            WeatherFeatures::FALLBACK
        } else {
            summarize(history.observations().iter())
        };

        Self {
            exact,
            monthly,
            global,
        }
    }

    pub fn resolve(&self, date: NaiveDate) -> WeatherFeatures {
        self.exact
            .get(&date)
            .or_else(|| self.monthly.get(&date.month()))
            .copied()
            .unwrap_or(self.global)
    }

    /// The last-resort features used for months absent from the history.
    pub fn global(&self) -> WeatherFeatures {
        self.global
    }
}

/// Mean temperatures and modal weather code of a non-empty set of rows.
fn summarize<'a>(rows: impl Iterator<Item = &'a WeatherObservation>) -> WeatherFeatures {
    let mut count = 0usize;
    let mut max_sum = 0.0;
    let mut min_sum = 0.0;
    let mut codes: BTreeMap<u32, usize> = BTreeMap::new();

    for obs in rows {
        count += 1;
        max_sum += obs.max_temp;
        min_sum += obs.min_temp;
        *codes.entry(obs.weather_code).or_default() += 1;
    }

    if count == 0 {
        return WeatherFeatures::FALLBACK;
    }

    WeatherFeatures {
        max_temp: max_sum / count as f64,
        min_temp: min_sum / count as f64,
        weather_code: modal_code(&codes),
    }
}

/// Most frequent code; ties go to the smallest code.
fn modal_code(counts: &BTreeMap<u32, usize>) -> u32 {
    let mut best: Option<(u32, usize)> = None;
    for (&code, &n) in counts {
        if best.is_none_or(|(_, best_n)| n > best_n) {
            best = Some((code, n));
        }
    }
    best.map(|(code, _)| code).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn obs(d: NaiveDate, max_temp: f64, min_temp: f64, code: u32) -> WeatherObservation {
        WeatherObservation {
            date: d,
            max_temp,
            min_temp,
            weather_code: code,
        }
    }

    #[test]
    fn test_codebook_defaults_and_append() {
        let mut codebook = WeatherCodebook::new();
        assert_eq!(codebook.lookup("Clear"), Some(0));
        assert_eq!(codebook.lookup("Other"), Some(6));
        assert_eq!(codebook.lookup("no rain"), None);

        assert_eq!(codebook.code_for("no rain"), 7);
        assert_eq!(codebook.code_for("no rain"), 7);
        assert_eq!(codebook.code_for("Heavy Rain"), 3);
        assert_eq!(codebook.name(7), Some("no rain"));
        assert_eq!(codebook.len(), 8);
    }

    #[test]
    fn test_from_reader_normalizes_headers() {
        let csv = "Date, Max Temp ,Min Temp,Weather Type,last_updated\n\
                   2025-04-29,33,25,Rain,2025-04-29 08:00:00\n\
                   2025-04-30,34,26,Sunny spells,2025-04-29 08:00:00\n\
                   2025-05-01,bad,26,Rain,2025-04-29 08:00:00\n";
        let history = WeatherHistory::from_reader(csv.as_bytes()).unwrap();

        assert_eq!(history.len(), 2);
        assert_eq!(history.observations()[0].weather_code, 2);
        assert_eq!(history.observations()[1].weather_code, 7);
        assert_eq!(history.codebook().name(7), Some("Sunny spells"));
    }

    #[test]
    fn test_missing_file_degrades_to_empty() {
        let history = WeatherHistory::load_or_empty(Path::new("/nonexistent/weather.csv"));
        assert!(history.is_empty());

        let resolver = WeatherResolver::new(&history);
        assert_eq!(resolver.resolve(date(2025, 1, 1)), WeatherFeatures::FALLBACK);
    }

    #[test]
    fn test_resolve_exact_match_first() {
        let history = WeatherHistory::new(
            vec![
                obs(date(2025, 5, 1), 35.0, 27.0, 4),
                obs(date(2025, 5, 2), 31.0, 23.0, 1),
            ],
            WeatherCodebook::new(),
        );
        let resolver = WeatherResolver::new(&history);

        let resolved = resolver.resolve(date(2025, 5, 1));
        assert_eq!(resolved.max_temp, 35.0);
        assert_eq!(resolved.weather_code, 4);
    }

    #[test]
    fn test_resolve_falls_back_to_monthly_average() {
        let history = WeatherHistory::new(
            vec![
                obs(date(2025, 5, 1), 34.0, 26.0, 2),
                obs(date(2025, 5, 2), 32.0, 24.0, 2),
                obs(date(2025, 6, 1), 20.0, 10.0, 0),
            ],
            WeatherCodebook::new(),
        );
        let resolver = WeatherResolver::new(&history);

        let resolved = resolver.resolve(date(2026, 5, 20));
        assert_relative_eq!(resolved.max_temp, 33.0);
        assert_relative_eq!(resolved.min_temp, 25.0);
        assert_eq!(resolved.weather_code, 2);
    }

    #[test]
    fn test_resolve_falls_back_to_global_average() {
        let history = WeatherHistory::new(
            vec![
                obs(date(2025, 5, 1), 34.0, 26.0, 1),
                obs(date(2025, 6, 1), 30.0, 22.0, 1),
                obs(date(2025, 6, 2), 29.0, 21.0, 3),
            ],
            WeatherCodebook::new(),
        );
        let resolver = WeatherResolver::new(&history);

        let resolved = resolver.resolve(date(2025, 12, 25));
        assert_relative_eq!(resolved.max_temp, 31.0);
        assert_relative_eq!(resolved.min_temp, 23.0);
        assert_eq!(resolved.weather_code, 1);
        assert_eq!(resolved, resolver.global());
    }

    #[test]
    fn test_monthly_mode_ties_break_to_smallest_code() {
        let history = WeatherHistory::new(
            vec![
                obs(date(2025, 3, 1), 30.0, 20.0, 4),
                obs(date(2025, 3, 2), 30.0, 20.0, 1),
                obs(date(2025, 3, 3), 30.0, 20.0, 4),
                obs(date(2025, 3, 4), 30.0, 20.0, 1),
            ],
            WeatherCodebook::new(),
        );

        let averages = history.monthly_averages();
        assert_eq!(averages.len(), 1);
        assert_eq!(averages[0].month, 3);
        assert_eq!(averages[0].weather_code, 1);
    }

    #[test]
    fn test_duplicate_dates_first_row_wins() {
        let history = WeatherHistory::new(
            vec![
                obs(date(2025, 5, 1), 35.0, 27.0, 4),
                obs(date(2025, 5, 1), 20.0, 10.0, 0),
            ],
            WeatherCodebook::new(),
        );
        let resolver = WeatherResolver::new(&history);
        assert_eq!(resolver.resolve(date(2025, 5, 1)).weather_code, 4);
    }

    // ==================== Property-Based Tests ====================

    mod proptest_tests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn resolve_is_deterministic(
                temps in prop::collection::vec((15.0f64..40.0, 10.0f64..30.0, 0u32..7), 0..40),
                offset in 0i64..800
            ) {
                let start = date(2024, 1, 1);
                let observations = temps
                    .iter()
                    .enumerate()
                    .map(|(i, (max_t, min_t, code))| obs(start + chrono::Duration::days(i as i64 * 9), *max_t, *min_t, *code))
                    .collect();
                let resolver = WeatherResolver::new(&WeatherHistory::new(observations, WeatherCodebook::new()));

                let target = start + chrono::Duration::days(offset);
                let first = resolver.resolve(target);
                let second = resolver.resolve(target);
                prop_assert_eq!(first, second);
                prop_assert!(first.max_temp.is_finite() && first.min_temp.is_finite());
            }
        }
    }
}
