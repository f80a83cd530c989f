pub mod factors;
pub mod influence;
pub mod ranking;
pub mod scoring;

pub use factors::{project_row, LatentFactorStore};
pub use influence::GeoInfluence;
pub use ranking::{
    harmonic_weights, incompatible, IterationStats, OptimizerState, RankingOptimizer,
    TrainingReport,
};
pub use scoring::ScoringService;

use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::geo::{self, GeoNeighborIndex};
use crate::models::{FeedbackSet, Poi};
use crate::storage::{Artifact, ModelStore};
use crate::utils::worker_pool;
use rayon::ThreadPool;
use std::collections::HashSet;
use tracing::info;

/// The full geographical factorization recommender: preprocessing, the
/// ranking optimizer and the scoring surface behind one façade. Construction
/// reuses whatever the model directory already holds; anything missing is
/// computed and cached there.
pub struct RankGeoFm {
    config: Config,
    store: ModelStore,
    pool: ThreadPool,
    optimizer: RankingOptimizer,
}

impl RankGeoFm {
    pub fn new(
        config: Config,
        pois: &[Poi],
        num_users: usize,
        feedback: &FeedbackSet,
    ) -> Result<Self> {
        config.validate()?;
        if pois.is_empty() {
            return Err(EngineError::EmptyItems);
        }
        if num_users == 0 {
            return Err(EngineError::EmptyUsers);
        }

        let store = ModelStore::new(&config.storage.model_dir)?;
        let pool = worker_pool()?;
        let num_items = pois.len();

        let geo = GeoNeighborIndex::build_or_load(&store, pois, config.model.neighbor_count, &pool)?;

        let weights = if store.contains(Artifact::Weights) {
            info!("loading cached weight matrix");
            store.load(Artifact::Weights)?
        } else {
            let weights = geo::weight_matrix(&geo, config.model.embedding_dim, &pool)?;
            store.save(Artifact::Weights, &weights)?;
            weights
        };

        let factors = if store.contains(Artifact::U1) {
            info!("loading latent factor matrices");
            LatentFactorStore::load(&store)?
        } else {
            info!("creating latent factor matrices");
            LatentFactorStore::initialize(
                num_users,
                num_items,
                config.model.embedding_dim,
                config.training.seed,
            )
        };

        let uif = if store.contains(Artifact::Uif) {
            info!("loading user-item frequency matrix");
            store.load(Artifact::Uif)?
        } else {
            let uif = feedback.frequency_matrix(num_users, num_items)?;
            store.save(Artifact::Uif, &uif)?;
            uif
        };

        let mut optimizer = RankingOptimizer::new(config.clone(), factors, geo, weights, uif)?;

        // A previously trained model can serve predictions immediately.
        if store.contains(Artifact::Fg) {
            let fg = store.load(Artifact::Fg)?;
            let snapshot = if store.contains(Artifact::Ul) && store.contains(Artifact::Ufg) {
                GeoInfluence {
                    ul: store.load(Artifact::Ul)?,
                    ufg: store.load(Artifact::Ufg)?,
                    fg,
                }
            } else {
                let (ul, ufg) = influence::recompute_scores(optimizer.factors(), &fg);
                GeoInfluence { fg, ul, ufg }
            };
            optimizer.attach_influence(snapshot);
        }

        Ok(Self {
            config,
            store,
            pool,
            optimizer,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> OptimizerState {
        self.optimizer.state()
    }

    pub fn factors(&self) -> &LatentFactorStore {
        self.optimizer.factors()
    }

    pub fn neighbor_index(&self) -> &GeoNeighborIndex {
        self.optimizer.geo()
    }

    pub fn train(
        &mut self,
        feedback: &FeedbackSet,
        validation: Option<&FeedbackSet>,
    ) -> Result<TrainingReport> {
        self.optimizer
            .train(feedback, validation, &self.pool, &self.store)
    }

    /// Recommendation score for one (user, item) pair.
    pub fn predict(&self, user: usize, item: usize) -> Result<f32> {
        self.optimizer.scorer()?.predict(user, item)
    }

    /// Top-n unseen items for a user, best first.
    pub fn recommend(
        &self,
        user: usize,
        exclude: &HashSet<usize>,
        n: usize,
    ) -> Result<Vec<(usize, f32)>> {
        self.optimizer.scorer()?.rank_items(user, exclude, n)
    }
}
