//! Model persistence - save and load trained model artifacts

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::model::{Estimator, ModelKind, TrainedModel};
use crate::error::{ForecastError, Result};

/// Artifact location for a (kind, series) pair: `<dir>/<kind>_model_<series>.json`.
pub fn artifact_path(dir: &Path, kind: ModelKind, series_id: &str) -> PathBuf {
    dir.join(format!("{kind}_model_{series_id}.json"))
}

/// Serializable trained model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedModel {
    /// Version for backward compatibility
    pub version: u32,
    pub kind: ModelKind,
    pub series_id: String,
    /// When the model was trained, if the exporter recorded it
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Input names in training order; absent for models exported without them
    #[serde(default)]
    pub feature_names: Option<Vec<String>>,
    pub estimator: Estimator,
}

impl PersistedModel {
    /// Current version number
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(
        kind: ModelKind,
        series_id: impl Into<String>,
        feature_names: Option<Vec<String>>,
        estimator: Estimator,
    ) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            kind,
            series_id: series_id.into(),
            created_at: Some(Utc::now()),
            feature_names,
            estimator,
        }
    }

    /// Save as JSON, creating parent directories as needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load the artifact for `series_id`; a missing file is a `MissingModel` skip.
    pub fn load(path: &Path, series_id: &str) -> Result<Self> {
        if !path.exists() {
            return Err(ForecastError::MissingModel {
                series: series_id.to_string(),
                path: path.to_path_buf(),
            });
        }

        let bytes = fs::read(path)?;
        let model: Self = serde_json::from_slice(&bytes).map_err(|e| {
            ForecastError::Model(format!("cannot decode {}: {e}", path.display()))
        })?;

        if model.version > Self::CURRENT_VERSION {
            return Err(ForecastError::Model(format!(
                "model version mismatch: expected v{}, found v{}",
                Self::CURRENT_VERSION,
                model.version
            )));
        }

        Ok(model)
    }

    pub fn into_trained(self) -> Result<TrainedModel> {
        TrainedModel::new(self.kind, self.series_id, self.feature_names, self.estimator)
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "Model v{}: {} for {}, features={}, created {}",
            self.version,
            self.kind,
            self.series_id,
            self.feature_names
                .as_ref()
                .map(|n| n.len().to_string())
                .unwrap_or_else(|| "undeclared".to_string()),
            self.created_at
                .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                .unwrap_or_else(|| "N/A".to_string())
        )
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn create_test_model() -> PersistedModel {
        PersistedModel::new(
            ModelKind::Rf,
            "N05B",
            Some(vec!["Year".to_string(), "N05B_lag1".to_string()]),
            Estimator::Linear {
                intercept: 1.5,
                coefficients: vec![0.0, 0.9],
            },
        )
    }

    #[test]
    fn test_artifact_path_convention() {
        let path = artifact_path(Path::new("saved_models"), ModelKind::Xgboost, "R06");
        assert_eq!(path, PathBuf::from("saved_models/xgboost_model_R06.json"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = artifact_path(dir.path(), ModelKind::Rf, "N05B");

        let model = create_test_model();
        model.save(&path).unwrap();

        let loaded = PersistedModel::load(&path, "N05B").unwrap();
        assert_eq!(loaded.version, PersistedModel::CURRENT_VERSION);
        assert_eq!(loaded.series_id, "N05B");
        assert_eq!(loaded.feature_names, model.feature_names);
        assert_eq!(loaded.estimator, model.estimator);
    }

    #[test]
    fn test_load_nonexistent_is_missing_model() {
        let path = Path::new("/nonexistent/path/rf_model_A.json");
        let result = PersistedModel::load(path, "A");

        assert!(matches!(result, Err(ForecastError::MissingModel { .. })));
        assert!(result.unwrap_err().is_series_skip());
    }

    #[test]
    fn test_load_rejects_newer_version() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rf_model_A.json");

        let mut model = create_test_model();
        model.version = PersistedModel::CURRENT_VERSION + 1;
        model.save(&path).unwrap();

        assert!(matches!(PersistedModel::load(&path, "A"), Err(ForecastError::Model(_))));
    }

    #[test]
    fn test_load_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rf_model_A.json");
        fs::write(&path, b"not json").unwrap();

        assert!(matches!(PersistedModel::load(&path, "A"), Err(ForecastError::Model(_))));
    }

    #[test]
    fn test_minimal_artifact_without_optional_fields() {
        let json = r#"{
            "version": 1,
            "kind": "knn",
            "series_id": "A",
            "estimator": {"type": "linear", "intercept": 2.0, "coefficients": []}
        }"#;
        let model: PersistedModel = serde_json::from_str(json).unwrap();

        assert!(model.feature_names.is_none());
        assert!(model.created_at.is_none());
        assert!(model.summary().contains("undeclared"));
        assert!(model.into_trained().is_ok());
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("dirs").join("rf_model_N05B.json");

        let result = create_test_model().save(&path);

        assert!(result.is_ok());
        assert!(path.exists());
    }
}
