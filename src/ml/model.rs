//! Trained point-prediction models.
//!
//! Models are trained elsewhere and exported as JSON artifacts; this module
//! only evaluates them. Three estimator families cover the model kinds the
//! forecaster is run with: linear models, regression-tree ensembles (random
//! forests average their trees, gradient boosting sums them) and k-nearest
//! neighbours.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::features::FeatureVector;
use crate::error::{ForecastError, Result};
use crate::traits::Predictor;

/// Which trained model family to forecast with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Random forest
    #[default]
    Rf,
    /// K-nearest neighbours
    Knn,
    /// Gradient-boosted trees
    Xgboost,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Rf => "rf",
            ModelKind::Knn => "knn",
            ModelKind::Xgboost => "xgboost",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "rf" => Ok(ModelKind::Rf),
            "knn" => Ok(ModelKind::Knn),
            "xgboost" | "xgb" => Ok(ModelKind::Xgboost),
            other => Err(ForecastError::Model(format!("unknown model kind {other:?}"))),
        }
    }
}

/// How a tree ensemble combines its trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Average of tree outputs (bagging).
    Mean,
    /// Base score plus the sum of tree outputs (boosting).
    Sum,
}

/// One node of a regression tree; nodes reference children by index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum TreeNode {
    /// Go left when `features[feature] <= threshold`.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf { value: f64 },
}

/// A regression tree whose root is node 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    pub nodes: Vec<TreeNode>,
}

impl RegressionTree {
    pub fn evaluate(&self, features: &[f64]) -> Result<f64> {
        let mut index = 0;
        // A well-formed tree reaches a leaf in fewer steps than it has nodes.
        for _ in 0..self.nodes.len() {
            match self.nodes.get(index) {
                Some(TreeNode::Leaf { value }) => return Ok(*value),
                Some(TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let x = features.get(*feature).ok_or_else(|| {
                        ForecastError::Model(format!(
                            "tree splits on input {feature} but only {} inputs given",
                            features.len()
                        ))
                    })?;
                    index = if *x <= *threshold { *left } else { *right };
                }
                None => {
                    return Err(ForecastError::Model(format!("tree node {index} does not exist")));
                }
            }
        }
        Err(ForecastError::Model("tree does not terminate in a leaf".to_string()))
    }
}

/// Weighting of neighbour targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnnWeighting {
    #[default]
    Uniform,
    Distance,
}

/// A stored training example of a KNN model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnnPoint {
    pub features: Vec<f64>,
    pub target: f64,
}

/// The evaluable part of a trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Estimator {
    Linear {
        intercept: f64,
        coefficients: Vec<f64>,
    },
    TreeEnsemble {
        trees: Vec<RegressionTree>,
        aggregation: Aggregation,
        #[serde(default)]
        base_score: f64,
    },
    Knn {
        k: usize,
        points: Vec<KnnPoint>,
        #[serde(default)]
        weighting: KnnWeighting,
    },
}

impl Estimator {
    /// Number of inputs, when the estimator pins it down.
    pub fn input_width(&self) -> Option<usize> {
        match self {
            Estimator::Linear { coefficients, .. } => Some(coefficients.len()),
            Estimator::Knn { points, .. } => points.first().map(|p| p.features.len()),
            Estimator::TreeEnsemble { .. } => None,
        }
    }

    pub fn evaluate(&self, features: &[f64]) -> Result<f64> {
        if let Some(width) = self.input_width()
            && width != features.len()
        {
            return Err(ForecastError::Model(format!(
                "estimator expects {width} inputs, got {}",
                features.len()
            )));
        }

        match self {
            Estimator::Linear {
                intercept,
                coefficients,
            } => Ok(intercept
                + coefficients
                    .iter()
                    .zip(features)
                    .map(|(c, x)| c * x)
                    .sum::<f64>()),
            Estimator::TreeEnsemble {
                trees,
                aggregation,
                base_score,
            } => {
                if trees.is_empty() {
                    return Err(ForecastError::Model("tree ensemble has no trees".to_string()));
                }
                let outputs = trees
                    .iter()
                    .map(|t| t.evaluate(features))
                    .collect::<Result<Vec<f64>>>()?;
                let total: f64 = outputs.iter().sum();
                Ok(match aggregation {
                    Aggregation::Mean => total / outputs.len() as f64,
                    Aggregation::Sum => base_score + total,
                })
            }
            Estimator::Knn {
                k,
                points,
                weighting,
            } => knn_predict(*k, points, *weighting, features),
        }
    }
}

fn knn_predict(k: usize, points: &[KnnPoint], weighting: KnnWeighting, features: &[f64]) -> Result<f64> {
    if k == 0 || points.is_empty() {
        return Err(ForecastError::Model("knn model has no neighbours".to_string()));
    }

    let mut distances: Vec<(f64, f64)> = points
        .iter()
        .map(|p| {
            let d2: f64 = p
                .features
                .iter()
                .zip(features)
                .map(|(a, b)| (a - b).powi(2))
                .sum();
            (d2.sqrt(), p.target)
        })
        .collect();
    distances.sort_by(|a, b| a.0.total_cmp(&b.0));
    let nearest = &distances[..k.min(distances.len())];

    match weighting {
        KnnWeighting::Uniform => {
            Ok(nearest.iter().map(|(_, t)| t).sum::<f64>() / nearest.len() as f64)
        }
        KnnWeighting::Distance => {
            // Exact matches dominate, as with inverse-distance weighting in the limit.
            let exact: Vec<f64> = nearest
                .iter()
                .filter(|(d, _)| *d == 0.0)
                .map(|(_, t)| *t)
                .collect();
            if !exact.is_empty() {
                return Ok(exact.iter().sum::<f64>() / exact.len() as f64);
            }
            let (weighted, weights) = nearest
                .iter()
                .fold((0.0, 0.0), |(sum, w), (d, t)| (sum + t / d, w + 1.0 / d));
            Ok(weighted / weights)
        }
    }
}

/// A loaded model for one (kind, series) pair.
#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub kind: ModelKind,
    pub series_id: String,
    feature_names: Option<Vec<String>>,
    estimator: Estimator,
}

impl TrainedModel {
    /// Create a model; declared feature names must agree with the estimator's width.
    pub fn new(
        kind: ModelKind,
        series_id: impl Into<String>,
        feature_names: Option<Vec<String>>,
        estimator: Estimator,
    ) -> Result<Self> {
        let series_id = series_id.into();
        if let (Some(names), Some(width)) = (&feature_names, estimator.input_width())
            && names.len() != width
        {
            return Err(ForecastError::FeatureMismatch {
                series: series_id,
                expected: width,
                got: names.len(),
            });
        }

        Ok(Self {
            kind,
            series_id,
            feature_names,
            estimator,
        })
    }

    pub fn estimator(&self) -> &Estimator {
        &self.estimator
    }

    /// Get model information as a string
    pub fn info(&self) -> String {
        let family = match &self.estimator {
            Estimator::Linear { .. } => "linear".to_string(),
            Estimator::TreeEnsemble { trees, .. } => format!("{} trees", trees.len()),
            Estimator::Knn { k, points, .. } => format!("knn k={k} n={}", points.len()),
        };
        format!(
            "TrainedModel(kind={}, series={}, {}, declared_features={})",
            self.kind,
            self.series_id,
            family,
            self.feature_names
                .as_ref()
                .map(|n| n.len().to_string())
                .unwrap_or_else(|| "N/A".to_string())
        )
    }
}

impl Predictor for TrainedModel {
    fn expected_feature_names(&self) -> Option<&[String]> {
        self.feature_names.as_deref()
    }

    fn input_width(&self) -> Option<usize> {
        self.feature_names
            .as_ref()
            .map(Vec::len)
            .or_else(|| self.estimator.input_width())
    }

    fn predict(&self, features: &FeatureVector) -> Result<f64> {
        let value = self.estimator.evaluate(features.values())?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(ForecastError::Model(format!(
                "model for {} produced non-finite output",
                self.series_id
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn vector(values: &[f64]) -> FeatureVector {
        let names = (0..values.len()).map(|i| format!("f{i}")).collect();
        FeatureVector::new(names, values.to_vec())
    }

    fn stump(threshold: f64, low: f64, high: f64) -> RegressionTree {
        RegressionTree {
            nodes: vec![
                TreeNode::Split {
                    feature: 0,
                    threshold,
                    left: 1,
                    right: 2,
                },
                TreeNode::Leaf { value: low },
                TreeNode::Leaf { value: high },
            ],
        }
    }

    #[test]
    fn test_model_kind_parsing() {
        assert_eq!("rf".parse::<ModelKind>().unwrap(), ModelKind::Rf);
        assert_eq!(" KNN ".parse::<ModelKind>().unwrap(), ModelKind::Knn);
        assert_eq!("xgb".parse::<ModelKind>().unwrap(), ModelKind::Xgboost);
        assert!("svm".parse::<ModelKind>().is_err());
        assert_eq!(ModelKind::Xgboost.to_string(), "xgboost");
        assert_eq!(ModelKind::default(), ModelKind::Rf);
    }

    #[test]
    fn test_linear_evaluation() {
        let estimator = Estimator::Linear {
            intercept: 1.0,
            coefficients: vec![2.0, -0.5],
        };
        assert_relative_eq!(estimator.evaluate(&[3.0, 4.0]).unwrap(), 5.0);
        assert!(estimator.evaluate(&[3.0]).is_err());
    }

    #[test]
    fn test_forest_averages_trees() {
        let estimator = Estimator::TreeEnsemble {
            trees: vec![stump(10.0, 1.0, 5.0), stump(20.0, 3.0, 9.0)],
            aggregation: Aggregation::Mean,
            base_score: 0.0,
        };
        assert_relative_eq!(estimator.evaluate(&[15.0]).unwrap(), 4.0);
        assert_relative_eq!(estimator.evaluate(&[10.0]).unwrap(), 2.0);
    }

    #[test]
    fn test_boosting_sums_trees() {
        let estimator = Estimator::TreeEnsemble {
            trees: vec![stump(10.0, 1.0, 5.0), stump(20.0, 3.0, 9.0)],
            aggregation: Aggregation::Sum,
            base_score: 0.5,
        };
        assert_relative_eq!(estimator.evaluate(&[25.0]).unwrap(), 14.5);
    }

    #[test]
    fn test_cyclic_tree_is_an_error() {
        let tree = RegressionTree {
            nodes: vec![TreeNode::Split {
                feature: 0,
                threshold: 0.0,
                left: 0,
                right: 0,
            }],
        };
        assert!(matches!(tree.evaluate(&[1.0]), Err(ForecastError::Model(_))));
    }

    #[test]
    fn test_knn_uniform_and_distance() {
        let points = vec![
            KnnPoint { features: vec![0.0], target: 10.0 },
            KnnPoint { features: vec![1.0], target: 20.0 },
            KnnPoint { features: vec![10.0], target: 100.0 },
        ];

        let uniform = Estimator::Knn {
            k: 2,
            points: points.clone(),
            weighting: KnnWeighting::Uniform,
        };
        assert_relative_eq!(uniform.evaluate(&[0.25]).unwrap(), 15.0);

        let weighted = Estimator::Knn {
            k: 2,
            points,
            weighting: KnnWeighting::Distance,
        };
        // weights 1/0.25 = 4 and 1/0.75 = 4/3
        assert_relative_eq!(weighted.evaluate(&[0.25]).unwrap(), 12.5, epsilon = 1e-9);
        assert_relative_eq!(weighted.evaluate(&[1.0]).unwrap(), 20.0);
    }

    #[test]
    fn test_trained_model_rejects_mismatched_names() {
        let result = TrainedModel::new(
            ModelKind::Rf,
            "A",
            Some(vec!["x".to_string()]),
            Estimator::Linear {
                intercept: 0.0,
                coefficients: vec![1.0, 2.0],
            },
        );
        assert!(matches!(result, Err(ForecastError::FeatureMismatch { expected: 2, got: 1, .. })));
    }

    #[test]
    fn test_trained_model_predict() {
        let model = TrainedModel::new(
            ModelKind::Knn,
            "A",
            None,
            Estimator::Linear {
                intercept: -100.0,
                coefficients: vec![1.0],
            },
        )
        .unwrap();

        assert_eq!(model.input_width(), Some(1));
        assert!(model.expected_feature_names().is_none());
        // Negative outputs are returned as-is; the engine clamps them.
        assert_relative_eq!(model.predict(&vector(&[40.0])).unwrap(), -60.0);
        assert!(model.info().contains("kind=knn"));
    }

    #[test]
    fn test_estimator_json_shape() {
        let json = r#"{
            "type": "tree_ensemble",
            "aggregation": "mean",
            "trees": [{"nodes": [{"node": "leaf", "value": 3.5}]}]
        }"#;
        let estimator: Estimator = serde_json::from_str(json).unwrap();
        assert_relative_eq!(estimator.evaluate(&[]).unwrap(), 3.5);
    }
}
