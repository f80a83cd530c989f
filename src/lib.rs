pub mod algorithms;
pub mod config;
pub mod error;
pub mod geo;
pub mod models;
pub mod storage;
pub mod utils;

pub use algorithms::{
    GeoInfluence, LatentFactorStore, OptimizerState, RankGeoFm, RankingOptimizer, ScoringService,
    TrainingReport,
};
pub use config::{Config, Variant};
pub use error::{EngineError, Result};
pub use geo::GeoNeighborIndex;
pub use models::{Feedback, FeedbackSet, Poi};
pub use storage::{Artifact, ModelStore};

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}
