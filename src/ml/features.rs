//! Feature assembly for the daily sales model.
//!
//! The engine fills a fixed-schema [`FeatureRow`] per forecast day. A
//! [`FeatureSchema`] built once per series maps the model's ordered input
//! names onto that row, so reconciling the two is a table lookup rather than
//! string matching inside the recursive loop.

use std::collections::HashSet;

use chrono::{Datelike, NaiveDate, Weekday};

use crate::weather::WeatherFeatures;

/// Weekday names as they appear in one-hot feature names, Monday first.
pub const WEEKDAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// Prefix of the weekday one-hot columns.
pub const WEEKDAY_PREFIX: &str = "Weekday_Name_";

/// All weekdays, Monday first.
pub const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

pub fn weekday_name(weekday: Weekday) -> &'static str {
    WEEKDAY_NAMES[weekday.num_days_from_monday() as usize]
}

/// An ordered set of named model inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    names: Vec<String>,
    values: Vec<f64>,
}

impl FeatureVector {
    pub fn new(names: Vec<String>, values: Vec<f64>) -> Self {
        debug_assert_eq!(names.len(), values.len());
        Self { names, values }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of the named input, if present.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.values[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.names.iter().map(String::as_str).zip(self.values.iter().copied())
    }
}

/// Lag and rolling-mean inputs for one forecast day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LagFeatures {
    pub lag1: f64,
    pub lag2: f64,
    pub lag3: f64,
    pub lag7: f64,
    pub roll3_mean: f64,
    pub roll7_mean: f64,
}

/// Every input the engine knows how to compute for one day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureRow {
    pub date: NaiveDate,
    pub weather: WeatherFeatures,
    pub lags: LagFeatures,
}

impl FeatureRow {
    pub fn new(date: NaiveDate, weather: WeatherFeatures, lags: LagFeatures) -> Self {
        Self { date, weather, lags }
    }

    /// Monday = 0 ... Sunday = 6.
    pub fn day_of_week(&self) -> u32 {
        self.date.weekday().num_days_from_monday()
    }

    pub fn is_weekend(&self) -> bool {
        self.day_of_week() >= 5
    }

    fn value(&self, slot: FeatureSlot) -> f64 {
        match slot {
            FeatureSlot::Year => self.date.year() as f64,
            FeatureSlot::Month => self.date.month() as f64,
            // Daily granularity.
            FeatureSlot::Hour => 0.0,
            FeatureSlot::DayOfWeek => self.day_of_week() as f64,
            FeatureSlot::IsWeekend => flag(self.is_weekend()),
            FeatureSlot::WeekdayFlag(weekday) => flag(self.date.weekday() == weekday),
            FeatureSlot::MaxTemp => self.weather.max_temp,
            FeatureSlot::MinTemp => self.weather.min_temp,
            FeatureSlot::WeatherCode => self.weather.weather_code as f64,
            FeatureSlot::Lag1 => self.lags.lag1,
            FeatureSlot::Lag2 => self.lags.lag2,
            FeatureSlot::Lag3 => self.lags.lag3,
            FeatureSlot::Lag7 => self.lags.lag7,
            FeatureSlot::Roll3Mean => self.lags.roll3_mean,
            FeatureSlot::Roll7Mean => self.lags.roll7_mean,
            FeatureSlot::Absent => 0.0,
        }
    }
}

fn flag(on: bool) -> f64 {
    if on { 1.0 } else { 0.0 }
}

/// Where a named model input comes from in a [`FeatureRow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureSlot {
    Year,
    Month,
    Hour,
    DayOfWeek,
    IsWeekend,
    WeekdayFlag(Weekday),
    MaxTemp,
    MinTemp,
    WeatherCode,
    Lag1,
    Lag2,
    Lag3,
    Lag7,
    Roll3Mean,
    Roll7Mean,
    /// The engine cannot compute this input; it is fed as 0.
    Absent,
}

impl FeatureSlot {
    /// Resolve a model input name for `series_id`.
    pub fn resolve(name: &str, series_id: &str) -> Self {
        match name {
            "Year" => return FeatureSlot::Year,
            "Month" => return FeatureSlot::Month,
            "Hour" => return FeatureSlot::Hour,
            "DayOfWeek" => return FeatureSlot::DayOfWeek,
            "Is_Weekend" => return FeatureSlot::IsWeekend,
            "max_temp" => return FeatureSlot::MaxTemp,
            "min_temp" => return FeatureSlot::MinTemp,
            "weather_code" => return FeatureSlot::WeatherCode,
            _ => {}
        }

        if let Some(day) = name.strip_prefix(WEEKDAY_PREFIX) {
            return WEEKDAY_NAMES
                .iter()
                .position(|n| *n == day)
                .map_or(FeatureSlot::Absent, |i| FeatureSlot::WeekdayFlag(WEEKDAYS[i]));
        }

        match name.strip_prefix(series_id).and_then(|rest| rest.strip_prefix('_')) {
            Some("lag1") => FeatureSlot::Lag1,
            Some("lag2") => FeatureSlot::Lag2,
            Some("lag3") => FeatureSlot::Lag3,
            Some("lag7") => FeatureSlot::Lag7,
            Some("roll3_mean") => FeatureSlot::Roll3Mean,
            Some("roll7_mean") => FeatureSlot::Roll7Mean,
            _ => FeatureSlot::Absent,
        }
    }
}

/// The ordered input list of one series' model, resolved to row slots.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSchema {
    names: Vec<String>,
    slots: Vec<FeatureSlot>,
}

impl FeatureSchema {
    /// Schema for names declared by the model itself.
    pub fn from_names(series_id: &str, names: &[String]) -> Self {
        Self {
            names: names.to_vec(),
            slots: names
                .iter()
                .map(|n| FeatureSlot::resolve(n, series_id))
                .collect(),
        }
    }

    /// The training-time recipe: calendar fields, weather, one-hot weekdays
    /// (alphabetical, only those present in the training dates), then lags.
    pub fn recipe(series_id: &str, weekdays_present: &HashSet<Weekday>) -> Self {
        let mut names: Vec<String> = [
            "Year",
            "Month",
            "Hour",
            "Is_Weekend",
            "max_temp",
            "min_temp",
            "weather_code",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let mut weekday_columns: Vec<String> = weekdays_present
            .iter()
            .map(|w| format!("{WEEKDAY_PREFIX}{}", weekday_name(*w)))
            .collect();
        weekday_columns.sort();
        names.extend(weekday_columns);

        names.extend(
            ["lag1", "lag2", "lag3", "lag7", "roll3_mean", "roll7_mean"]
                .iter()
                .map(|suffix| format!("{series_id}_{suffix}")),
        );

        Self::from_names(series_id, &names)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Names the engine cannot compute (they are fed as 0).
    pub fn absent_names(&self) -> Vec<&str> {
        self.names
            .iter()
            .zip(&self.slots)
            .filter(|(_, slot)| **slot == FeatureSlot::Absent)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Project a row onto this schema, in schema order.
    pub fn assemble(&self, row: &FeatureRow) -> FeatureVector {
        FeatureVector::new(
            self.names.clone(),
            self.slots.iter().map(|slot| row.value(*slot)).collect(),
        )
    }
}
