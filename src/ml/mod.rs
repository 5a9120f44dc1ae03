//! Machine learning module for sales prediction
//!
//! Models are trained offline and loaded from per-series artifacts. The
//! forecasting engine only sees them through the [`Predictor`] trait, looked
//! up by series in a [`ModelRegistry`].

pub mod features;
pub mod model;
pub mod persistence;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{ForecastError, Result};
use crate::traits::Predictor;

pub use features::{FeatureRow, FeatureSchema, FeatureSlot, FeatureVector, LagFeatures};
pub use model::{Aggregation, Estimator, KnnPoint, KnnWeighting, ModelKind, RegressionTree, TrainedModel, TreeNode};
pub use persistence::{PersistedModel, artifact_path};

/// Why a series has no usable model.
#[derive(Debug, Clone)]
enum Unavailable {
    Missing(PathBuf),
    Broken(String),
}

/// Trained models by series id, plus the reason for every series without one.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    models: HashMap<String, Arc<dyn Predictor>>,
    unavailable: HashMap<String, Unavailable>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model for `series_id`.
    pub fn with_model(mut self, series_id: impl Into<String>, model: Arc<dyn Predictor>) -> Self {
        self.insert(series_id, model);
        self
    }

    pub fn insert(&mut self, series_id: impl Into<String>, model: Arc<dyn Predictor>) {
        let series_id = series_id.into();
        self.unavailable.remove(&series_id);
        self.models.insert(series_id, model);
    }

    /// Load `<dir>/<kind>_model_<series>.json` for every series.
    ///
    /// Missing or unreadable artifacts are logged and remembered so later
    /// lookups report them as per-series skips.
    pub fn load_dir(dir: &Path, kind: ModelKind, series_ids: &[String]) -> Self {
        let mut registry = Self::new();

        for series_id in series_ids {
            let path = artifact_path(dir, kind, series_id);
            match PersistedModel::load(&path, series_id).and_then(PersistedModel::into_trained) {
                Ok(model) => {
                    debug!(series = %series_id, info = %model.info(), "Model loaded");
                    registry.insert(series_id.clone(), Arc::new(model));
                }
                Err(ForecastError::MissingModel { path, .. }) => {
                    warn!(series = %series_id, %kind, path = %path.display(), "Model not found, series will be skipped");
                    registry
                        .unavailable
                        .insert(series_id.clone(), Unavailable::Missing(path));
                }
                Err(e) => {
                    warn!(series = %series_id, %kind, error = %e, "Model unusable, series will be skipped");
                    registry
                        .unavailable
                        .insert(series_id.clone(), Unavailable::Broken(e.to_string()));
                }
            }
        }

        registry
    }

    /// The model for `series_id`, or the skip reason.
    pub fn get(&self, series_id: &str) -> Result<Arc<dyn Predictor>> {
        if let Some(model) = self.models.get(series_id) {
            return Ok(Arc::clone(model));
        }

        Err(match self.unavailable.get(series_id) {
            Some(Unavailable::Broken(reason)) => ForecastError::Model(reason.clone()),
            Some(Unavailable::Missing(path)) => ForecastError::MissingModel {
                series: series_id.to_string(),
                path: path.clone(),
            },
            None => ForecastError::MissingModel {
                series: series_id.to_string(),
                path: PathBuf::new(),
            },
        })
    }

    pub fn contains(&self, series_id: &str) -> bool {
        self.models.contains_key(series_id)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut loaded: Vec<&String> = self.models.keys().collect();
        loaded.sort();
        f.debug_struct("ModelRegistry")
            .field("loaded", &loaded)
            .field("unavailable", &self.unavailable)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::traits::MockPredictor;

    #[test]
    fn test_registry_with_model() {
        let registry = ModelRegistry::new().with_model("A", Arc::new(MockPredictor::constant(1.0)));

        assert!(registry.contains("A"));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("A").is_ok());
        assert!(matches!(registry.get("B"), Err(ForecastError::MissingModel { .. })));
    }

    #[test]
    fn test_load_dir_records_missing_and_broken() {
        let dir = tempdir().unwrap();
        let series = vec!["A".to_string(), "B".to_string(), "C".to_string()];

        PersistedModel::new(
            ModelKind::Rf,
            "A",
            None,
            Estimator::Linear {
                intercept: 1.0,
                coefficients: vec![],
            },
        )
        .save(&artifact_path(dir.path(), ModelKind::Rf, "A"))
        .unwrap();
        std::fs::write(artifact_path(dir.path(), ModelKind::Rf, "C"), "{}").unwrap();

        let registry = ModelRegistry::load_dir(dir.path(), ModelKind::Rf, &series);

        assert!(registry.contains("A"));
        match registry.get("B") {
            Err(ForecastError::MissingModel { series, path }) => {
                assert_eq!(series, "B");
                assert!(path.ends_with("rf_model_B.json"));
            }
            Err(other) => panic!("expected MissingModel, got {other:?}"),
            Ok(_) => panic!("expected MissingModel, got a model"),
        }
        assert!(matches!(registry.get("C"), Err(ForecastError::Model(_))));
    }

    #[test]
    fn test_load_dir_respects_kind() {
        let dir = tempdir().unwrap();
        PersistedModel::new(
            ModelKind::Knn,
            "A",
            None,
            Estimator::Linear {
                intercept: 1.0,
                coefficients: vec![],
            },
        )
        .save(&artifact_path(dir.path(), ModelKind::Knn, "A"))
        .unwrap();

        let series = vec!["A".to_string()];
        assert!(ModelRegistry::load_dir(dir.path(), ModelKind::Knn, &series).contains("A"));
        assert!(!ModelRegistry::load_dir(dir.path(), ModelKind::Xgboost, &series).contains("A"));
    }
}
