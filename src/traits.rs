//! Abstractions for time and model evaluation to enable testing.
//!
//! This module provides traits for:
//! - `Clock`: Abstracting "today" so default start points are deterministic
//! - `Predictor`: The trained point-prediction model seen by the engine

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local, NaiveDate, Utc};

use crate::error::Result;
use crate::ml::FeatureVector;

// ==================== Clock Trait ====================

/// Trait for abstracting time access.
///
/// This allows injecting mock clocks during testing to create
/// deterministic, reproducible tests for time-dependent logic.
pub trait Clock: Send + Sync {
    /// Get the current time in UTC.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Get the current time in the local timezone.
    fn now_local(&self) -> DateTime<Local>;

    /// Today's calendar date in the local timezone.
    fn today(&self) -> NaiveDate {
        self.now_local().date_naive()
    }
}

/// System clock implementation using real time.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn now_local(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Mock clock for testing with controllable time.
#[derive(Debug, Clone)]
pub struct MockClock {
    utc_time: Arc<Mutex<DateTime<Utc>>>,
}

impl MockClock {
    /// Create a new mock clock set to the given UTC time.
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            utc_time: Arc::new(Mutex::new(time)),
        }
    }

    /// Set the mock clock to a new time.
    pub fn set_time(&self, time: DateTime<Utc>) {
        *self.utc_time.lock().unwrap() = time;
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, duration: chrono::Duration) {
        let mut time = self.utc_time.lock().unwrap();
        *time += duration;
    }
}

impl Clock for MockClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.utc_time.lock().unwrap()
    }

    fn now_local(&self) -> DateTime<Local> {
        self.now_utc().with_timezone(&Local)
    }

    // The UTC date keeps tests independent of the host timezone.
    fn today(&self) -> NaiveDate {
        self.now_utc().date_naive()
    }
}

// ==================== Predictor Trait ====================

/// A trained model that maps one feature vector to one scalar.
///
/// The engine never branches on the concrete model type: it asks for the
/// declared feature names and falls back to its own recipe when there are
/// none.
pub trait Predictor: Send + Sync {
    /// Ordered feature names the model was trained with, if it declares them.
    fn expected_feature_names(&self) -> Option<&[String]>;

    /// Number of inputs the model consumes, when known.
    fn input_width(&self) -> Option<usize> {
        self.expected_feature_names().map(<[String]>::len)
    }

    /// Evaluate the model on a single feature vector.
    fn predict(&self, features: &FeatureVector) -> Result<f64>;
}

type Responder = dyn Fn(&FeatureVector) -> f64 + Send + Sync;

/// Mock predictor for testing that records every feature vector it sees.
#[derive(Clone)]
pub struct MockPredictor {
    feature_names: Option<Vec<String>>,
    responder: Arc<Responder>,
    calls: Arc<Mutex<Vec<FeatureVector>>>,
}

impl MockPredictor {
    /// Create a mock whose output is computed from the feature vector.
    pub fn new(responder: impl Fn(&FeatureVector) -> f64 + Send + Sync + 'static) -> Self {
        Self {
            feature_names: None,
            responder: Arc::new(responder),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always predicts `value`.
    pub fn constant(value: f64) -> Self {
        Self::new(move |_| value)
    }

    /// Declare feature names, as a model persisted with its training schema would.
    pub fn with_feature_names<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.feature_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Get all feature vectors passed to `predict`, in call order.
    pub fn calls(&self) -> Vec<FeatureVector> {
        self.calls.lock().unwrap().clone()
    }

    /// Get the number of `predict` calls.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Clear all recorded calls.
    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

impl fmt::Debug for MockPredictor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockPredictor")
            .field("feature_names", &self.feature_names)
            .field("calls", &self.call_count())
            .finish()
    }
}

impl Predictor for MockPredictor {
    fn expected_feature_names(&self) -> Option<&[String]> {
        self.feature_names.as_deref()
    }

    fn predict(&self, features: &FeatureVector) -> Result<f64> {
        self.calls.lock().unwrap().push(features.clone());
        Ok((self.responder)(features))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_system_clock_returns_current_time() {
        let clock = SystemClock;
        let before = Utc::now();
        let clock_time = clock.now_utc();
        let after = Utc::now();

        assert!(clock_time >= before);
        assert!(clock_time <= after);
    }

    #[test]
    fn test_mock_clock_today() {
        let clock = MockClock::new(Utc.with_ymd_and_hms(2025, 4, 29, 23, 30, 0).unwrap());
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2025, 4, 29).unwrap());

        clock.advance(chrono::Duration::hours(1));
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2025, 4, 30).unwrap());
    }

    #[test]
    fn test_mock_clock_can_be_updated() {
        let time1 = Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 0).unwrap();
        let time2 = Utc.with_ymd_and_hms(2024, 12, 31, 14, 0, 0).unwrap();

        let clock = MockClock::new(time1);
        assert_eq!(clock.now_utc(), time1);

        clock.set_time(time2);
        assert_eq!(clock.now_utc(), time2);
    }

    #[test]
    fn test_mock_predictor_records_calls() {
        let predictor = MockPredictor::new(|fv| fv.get("x").unwrap_or(0.0) * 2.0);
        let vector = FeatureVector::new(vec!["x".to_string()], vec![21.0]);

        assert_eq!(predictor.call_count(), 0);
        assert_eq!(predictor.predict(&vector).unwrap(), 42.0);
        assert_eq!(predictor.call_count(), 1);
        assert_eq!(predictor.calls()[0], vector);

        predictor.clear();
        assert_eq!(predictor.call_count(), 0);
    }

    #[test]
    fn test_mock_predictor_clones_share_call_log() {
        let predictor = MockPredictor::constant(1.0);
        let observer = predictor.clone();
        let vector = FeatureVector::new(vec![], vec![]);

        predictor.predict(&vector).unwrap();
        assert_eq!(observer.call_count(), 1);
    }

    #[test]
    fn test_mock_predictor_feature_names() {
        let predictor = MockPredictor::constant(0.0);
        assert!(predictor.expected_feature_names().is_none());
        assert_eq!(predictor.input_width(), None);

        let predictor = predictor.with_feature_names(["Year", "Month"]);
        assert_eq!(predictor.input_width(), Some(2));
        assert_eq!(predictor.expected_feature_names().unwrap()[1], "Month");
    }
}
