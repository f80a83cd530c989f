use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Dimensionality K of the latent space.
    pub embedding_dim: usize,
    /// Number of geographic neighbors k1 kept per POI. Must be at least
    /// `embedding_dim`.
    pub neighbor_count: usize,
    /// Incompatibility margin epsilon.
    pub margin: f64,
    /// L2-ball radius C for user-preference and item rows.
    pub norm_bound: f64,
    /// Geo-affinity norm scale alpha; U2 rows are bounded by C * alpha.
    pub geo_influence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Learning rate gamma.
    pub learning_rate: f64,
    pub max_iterations: usize,
    pub seed: u64,
    pub variant: Variant,
    /// Cutoff n for the validation precision/recall pass.
    pub validation_top_n: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub model_dir: PathBuf,
}

/// Which form of the rank-weighted loss drives the gradient step. The paper
/// form scales the harmonic weight by the sigmoid indicator approximation;
/// the reference form uses the harmonic weight alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Paper,
    Reference,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: ModelConfig {
                embedding_dim: 100,
                neighbor_count: 300,
                margin: 0.3,
                norm_bound: 1.0,
                geo_influence: 0.2,
            },
            training: TrainingConfig {
                learning_rate: 0.0001,
                max_iterations: 1000,
                seed: 34,
                variant: Variant::Reference,
                validation_top_n: 10,
            },
            storage: StorageConfig {
                model_dir: PathBuf::from("model"),
            },
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("GEORANK"))
            .build()?;

        let parsed: Self = settings.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.embedding_dim == 0 {
            return Err(EngineError::InvalidConfig(
                "embedding_dim must be positive".into(),
            ));
        }
        if self.model.neighbor_count < self.model.embedding_dim {
            return Err(EngineError::NeighborCountBelowDimension {
                k1: self.model.neighbor_count,
                k: self.model.embedding_dim,
            });
        }
        if self.model.norm_bound <= 0.0 {
            return Err(EngineError::InvalidConfig(
                "norm_bound must be positive".into(),
            ));
        }
        if self.model.geo_influence <= 0.0 {
            return Err(EngineError::InvalidConfig(
                "geo_influence must be positive".into(),
            ));
        }
        if self.model.margin < 0.0 {
            return Err(EngineError::InvalidConfig(
                "margin must be non-negative".into(),
            ));
        }
        if self.training.learning_rate <= 0.0 {
            return Err(EngineError::InvalidConfig(
                "learning_rate must be positive".into(),
            ));
        }
        if self.training.validation_top_n == 0 {
            return Err(EngineError::InvalidConfig(
                "validation_top_n must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Norm bound applied to geo-affinity rows.
    pub fn geo_norm_bound(&self) -> f64 {
        self.model.norm_bound * self.model.geo_influence
    }
}
