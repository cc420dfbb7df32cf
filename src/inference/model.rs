//! Model collaborator interface and the bundled linear model.

use crate::core::FeatureVector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Outcome of one prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: bool,
    /// Raw model score
    pub score: f64,
    /// Per-feature contributions, largest magnitude first
    pub explanation: Vec<Contribution>,
}

/// How much one feature moved the score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub feature: String,
    pub value: f64,
}

/// A loaded, ready-to-use model.
pub trait Model: Send {
    fn predict(&self, features: &FeatureVector) -> Result<Prediction, ModelError>;
}

/// Produces a model for a user. May be slow and may fail.
pub trait ModelLoader: Send {
    fn load(&self, user_id: &str) -> Result<Box<dyn Model>, ModelError>;
}

/// Model load and prediction errors.
#[derive(Debug)]
pub enum ModelError {
    NotFound { user_id: String },
    IoError(String),
    ParseError(String),
    MissingFeature(String),
    PredictError(String),
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::NotFound { user_id } => write!(f, "no model for user {user_id}"),
            ModelError::IoError(e) => write!(f, "IO error: {e}"),
            ModelError::ParseError(e) => write!(f, "Parse error: {e}"),
            ModelError::MissingFeature(name) => write!(f, "feature {name} not provided"),
            ModelError::PredictError(e) => write!(f, "Prediction failed: {e}"),
        }
    }
}

impl std::error::Error for ModelError {}

/// Default number of contributions kept in an explanation.
const DEFAULT_EXPLAIN_TOP: usize = 5;

fn default_explain_top() -> usize {
    DEFAULT_EXPLAIN_TOP
}

/// Weighted sum of named features plus bias; label is `score > threshold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub bias: f64,
    #[serde(default)]
    pub threshold: f64,
    #[serde(default = "default_explain_top")]
    pub explain_top: usize,
}

impl LinearModel {
    pub fn new(weights: BTreeMap<String, f64>, bias: f64) -> Self {
        Self {
            weights,
            bias,
            threshold: 0.0,
            explain_top: DEFAULT_EXPLAIN_TOP,
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ModelError::IoError(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| ModelError::ParseError(e.to_string()))
    }
}

impl Model for LinearModel {
    fn predict(&self, features: &FeatureVector) -> Result<Prediction, ModelError> {
        let mut contributions = Vec::with_capacity(self.weights.len());
        for (name, weight) in &self.weights {
            let value = features
                .get(name)
                .ok_or_else(|| ModelError::MissingFeature(name.clone()))?;
            contributions.push(Contribution {
                feature: name.clone(),
                value: weight * value,
            });
        }

        let score = self.bias + contributions.iter().map(|c| c.value).sum::<f64>();
        if !score.is_finite() {
            return Err(ModelError::PredictError(format!("non-finite score {score}")));
        }

        contributions.sort_by(|a, b| b.value.abs().total_cmp(&a.value.abs()));
        contributions.truncate(self.explain_top);

        Ok(Prediction {
            label: score > self.threshold,
            score,
            explanation: contributions,
        })
    }
}

/// Loads `<dir>/<user_id>.json`, falling back to `<dir>/default.json`.
#[derive(Debug, Clone)]
pub struct FileModelLoader {
    dir: PathBuf,
}

impl FileModelLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn candidates(&self, user_id: &str) -> [PathBuf; 2] {
        [
            self.dir.join(format!("{user_id}.json")),
            self.dir.join("default.json"),
        ]
    }
}

impl ModelLoader for FileModelLoader {
    fn load(&self, user_id: &str) -> Result<Box<dyn Model>, ModelError> {
        let path = self
            .candidates(user_id)
            .into_iter()
            .find(|p| p.exists())
            .ok_or_else(|| ModelError::NotFound {
                user_id: user_id.to_string(),
            })?;
        tracing::info!(user_id, path = %path.display(), "loading model");
        Ok(Box::new(LinearModel::from_file(&path)?))
    }
}
