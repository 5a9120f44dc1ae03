//! Sales history loading.
//!
//! The sales CSV carries one date column and one numeric column per series.
//! Histories are validated once at load time and then shared read-only.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use tracing::{debug, info};

use crate::error::{ForecastError, Result};

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];
const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%m/%d/%Y %H:%M", "%Y-%m-%dT%H:%M:%S"];

/// Normalize a sales column header: trim and replace spaces with underscores.
pub fn normalize_column(name: &str) -> String {
    name.trim().replace(' ', "_")
}

/// Parse a date cell in any of the accepted formats.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
                .map(|dt| dt.date())
        })
}

/// Ordered daily observations for one series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesHistory {
    series_id: String,
    points: Vec<(NaiveDate, f64)>,
}

impl SeriesHistory {
    /// Build a history, enforcing strictly increasing dates and finite values >= 0.
    pub fn new(series_id: impl Into<String>, points: Vec<(NaiveDate, f64)>) -> Result<Self> {
        let series_id = series_id.into();

        if let Some(window) = points.windows(2).find(|w| w[1].0 <= w[0].0) {
            return Err(ForecastError::Data(format!(
                "series {series_id}: dates not strictly increasing at {}",
                window[1].0
            )));
        }
        if let Some((date, value)) = points.iter().find(|(_, v)| !v.is_finite() || *v < 0.0) {
            return Err(ForecastError::Data(format!(
                "series {series_id}: invalid value {value} on {date}"
            )));
        }

        Ok(Self { series_id, points })
    }

    pub fn series_id(&self) -> &str {
        &self.series_id
    }

    pub fn points(&self) -> &[(NaiveDate, f64)] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.last().map(|(d, _)| *d)
    }

    /// The most recent `count` values in chronological order.
    pub fn recent_values(&self, count: usize) -> Vec<f64> {
        let start = self.points.len().saturating_sub(count);
        self.points[start..].iter().map(|(_, v)| *v).collect()
    }
}

/// All series loaded from one sales file.
#[derive(Debug, Clone, Default)]
pub struct SalesHistory {
    series: BTreeMap<String, SeriesHistory>,
}

impl SalesHistory {
    /// Assemble from already validated per-series histories.
    pub fn from_series(histories: impl IntoIterator<Item = SeriesHistory>) -> Self {
        Self {
            series: histories
                .into_iter()
                .map(|h| (h.series_id.clone(), h))
                .collect(),
        }
    }

    /// Load the sales CSV at `path`.
    pub fn load_csv(path: &Path, date_column: &str) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| {
            ForecastError::Data(format!("cannot read sales history {}: {e}", path.display()))
        })?;
        let history = Self::from_reader(file, date_column)?;

        if let Some((first, last)) = history.date_range() {
            info!(path = %path.display(), %first, %last, series = history.series.len(), "Sales history loaded");
        }
        Ok(history)
    }

    /// Parse sales CSV content. Rows are sorted by date; duplicate dates,
    /// unparsable dates, and negative values are fatal.
    pub fn from_reader<R: Read>(reader: R, date_column: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers: Vec<String> = reader.headers()?.iter().map(normalize_column).collect();
        let wanted = normalize_column(date_column);

        let date_idx = headers
            .iter()
            .position(|h| *h == wanted)
            .ok_or_else(|| ForecastError::Data(format!("date column {wanted:?} not found")))?;

        let mut rows: Vec<(NaiveDate, csv::StringRecord)> = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record?;
            let cell = record.get(date_idx).unwrap_or_default();
            let date = parse_date(cell).ok_or_else(|| ForecastError::DateParse {
                value: cell.to_string(),
                row: row + 1,
            })?;
            rows.push((date, record));
        }

        rows.sort_by_key(|(date, _)| *date);
        if let Some(window) = rows.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(ForecastError::Data(format!(
                "duplicate date {} in sales history",
                window[0].0
            )));
        }

        let mut series = BTreeMap::new();
        for (idx, name) in headers.iter().enumerate() {
            if idx == date_idx {
                continue;
            }
            match numeric_column(&rows, idx) {
                Some(points) => {
                    let history = SeriesHistory::new(name.clone(), points)?;
                    series.insert(name.clone(), history);
                }
                None => debug!(column = %name, "Skipping non-numeric column"),
            }
        }

        Ok(Self { series })
    }

    pub fn series(&self, series_id: &str) -> Option<&SeriesHistory> {
        self.series.get(series_id)
    }

    pub fn series_ids(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    /// Earliest and latest observation date across all series.
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let first = self.series.values().filter_map(|h| h.points.first()).map(|p| p.0).min()?;
        let last = self.series.values().filter_map(SeriesHistory::last_date).max()?;
        Some((first, last))
    }
}

/// Parse one column; `None` when any non-empty cell is not a number.
fn numeric_column(rows: &[(NaiveDate, csv::StringRecord)], idx: usize) -> Option<Vec<(NaiveDate, f64)>> {
    let mut points = Vec::with_capacity(rows.len());
    for (date, record) in rows {
        let cell = record.get(idx).map(str::trim).unwrap_or_default();
        if cell.is_empty() {
            continue;
        }
        let value = cell.parse::<f64>().ok()?;
        points.push((*date, value));
    }
    Some(points)
}
