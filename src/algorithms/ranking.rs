use super::factors::{project_row, LatentFactorStore};
use super::influence::{self, GeoInfluence};
use super::scoring::ScoringService;
use crate::config::{Config, Variant};
use crate::error::{EngineError, Result};
use crate::geo::GeoNeighborIndex;
use crate::models::{Feedback, FeedbackSet};
use crate::storage::ModelStore;
use crate::utils::metrics::MetricsCalculator;
use crate::utils::{shuffled_indices, sigmoid};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::ThreadPool;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Training lifecycle. Iteration count is the only stop condition; the
/// terminal state reads `Converged` when the final sweep had nothing left
/// to correct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OptimizerState {
    Idle,
    Preparing,
    Iterating { iteration: usize },
    Converged,
    MaxIterationsReached,
}

/// What one outer iteration did. Skipped and faulted pairs are counted here
/// rather than silently discarded.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IterationStats {
    pub iteration: usize,
    pub updates: usize,
    pub sampling_exhausted: usize,
    pub faults: usize,
    pub latent_delta: f64,
    pub precision_at_n: Option<f64>,
    pub recall_at_n: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub iterations: Vec<IterationStats>,
    pub final_state: OptimizerState,
    pub best_iteration: Option<usize>,
    pub best_precision: Option<f64>,
}

/// Harmonic partial sums indexed by rank estimate: w[r] = sum of 1/i for
/// i in 1..=r, so w[0] = 0.
pub fn harmonic_weights(num_items: usize) -> Vec<f64> {
    let mut weights = vec![0.0; num_items.max(1)];
    for rank in 1..weights.len() {
        weights[rank] = weights[rank - 1] + 1.0 / rank as f64;
    }
    weights
}

/// True when the relevant item is visited more often than the candidate yet
/// not scored sufficiently above it, i.e. the current ranking is wrong
/// enough to be worth a correction.
pub fn incompatible(x_freq: f64, x_score: f64, y_freq: f64, y_score: f64, margin: f64) -> bool {
    x_freq > y_freq && x_score < y_score + margin
}

// Smooth indicator approximation from the paper form of the loss.
fn indicator_weight(x_score: f64, y_score: f64, margin: f64) -> f64 {
    let s = sigmoid(y_score + margin - x_score);
    s * (1.0 - s)
}

enum PairOutcome {
    Updated,
    Exhausted,
}

struct BestModel {
    iteration: usize,
    precision: f64,
    factors: LatentFactorStore,
    influence: GeoInfluence,
}

/// Pairwise-ranking SGD over the latent factors. Owns the three factor
/// matrices for the duration of training; the sweep is strictly sequential
/// because consecutive samples may touch the same rows.
pub struct RankingOptimizer {
    config: Config,
    factors: LatentFactorStore,
    geo: GeoNeighborIndex,
    weights: Array2<f64>,
    uif: Array2<f64>,
    loss_weight: Vec<f64>,
    rng: StdRng,
    state: OptimizerState,
    influence: Option<GeoInfluence>,
    best: Option<BestModel>,
}

impl RankingOptimizer {
    pub fn new(
        config: Config,
        factors: LatentFactorStore,
        geo: GeoNeighborIndex,
        weights: Array2<f64>,
        uif: Array2<f64>,
    ) -> Result<Self> {
        config.validate()?;

        let num_items = factors.num_items();
        let num_users = factors.num_users();
        if geo.num_items() != num_items || weights.nrows() != num_items {
            return Err(EngineError::InvalidConfig(format!(
                "inconsistent item counts: factors={}, neighbors={}, weights={}",
                num_items,
                geo.num_items(),
                weights.nrows()
            )));
        }
        if weights.ncols() != geo.neighbor_count() {
            return Err(EngineError::InvalidConfig(format!(
                "weight matrix has {} columns, neighbor index has {}",
                weights.ncols(),
                geo.neighbor_count()
            )));
        }
        if uif.dim() != (num_users, num_items) {
            return Err(EngineError::InvalidConfig(format!(
                "frequency matrix is {}x{}, expected {}x{}",
                uif.nrows(),
                uif.ncols(),
                num_users,
                num_items
            )));
        }

        let loss_weight = harmonic_weights(num_items);
        let rng = StdRng::seed_from_u64(config.training.seed);

        Ok(Self {
            config,
            factors,
            geo,
            weights,
            uif,
            loss_weight,
            rng,
            state: OptimizerState::Idle,
            influence: None,
            best: None,
        })
    }

    pub fn state(&self) -> OptimizerState {
        self.state
    }

    pub fn factors(&self) -> &LatentFactorStore {
        &self.factors
    }

    pub fn geo(&self) -> &GeoNeighborIndex {
        &self.geo
    }

    pub fn influence(&self) -> Option<&GeoInfluence> {
        self.influence.as_ref()
    }

    /// Adopts a previously persisted score snapshot, e.g. after loading a
    /// trained model from disk.
    pub fn attach_influence(&mut self, influence: GeoInfluence) {
        self.influence = Some(influence);
    }

    /// Scoring over the latest snapshot.
    pub fn scorer(&self) -> Result<ScoringService<'_>> {
        let influence = self.influence.as_ref().ok_or(EngineError::ScoresUnavailable)?;
        Ok(ScoringService::new(&self.factors, influence))
    }

    /// Runs the full training loop and persists the final model (and the
    /// best-validation checkpoint, when one exists) into the store.
    pub fn train(
        &mut self,
        feedback: &FeedbackSet,
        validation: Option<&FeedbackSet>,
        pool: &ThreadPool,
        store: &ModelStore,
    ) -> Result<TrainingReport> {
        if feedback.is_empty() {
            return Err(EngineError::EmptyFeedback);
        }

        self.state = OptimizerState::Preparing;
        let max_iterations = self.config.training.max_iterations;
        info!(
            variant = ?self.config.training.variant,
            iterations = max_iterations,
            pairs = feedback.len(),
            "training"
        );

        let train_items = feedback.items_by_user();
        let validation_items = validation.map(|split| split.items_by_user());
        let mut iterations = Vec::with_capacity(max_iterations);
        let mut last_updates = None;

        for iteration in 0..max_iterations {
            self.state = OptimizerState::Iterating { iteration };

            // Phase barrier: clamp U2, rebuild FG, then the score products.
            let snapshot = influence::rebuild(
                &mut self.factors,
                &self.geo,
                &self.weights,
                self.config.geo_norm_bound(),
                pool,
            );

            let mut stats = IterationStats {
                iteration,
                ..IterationStats::default()
            };

            if let Some(relevant_by_user) = &validation_items {
                let (precision, recall) = self.evaluate(&snapshot, relevant_by_user, &train_items)?;
                stats.precision_at_n = Some(precision);
                stats.recall_at_n = Some(recall);

                let improved = self
                    .best
                    .as_ref()
                    .map_or(precision > 0.0, |best| precision > best.precision);
                if improved {
                    self.best = Some(BestModel {
                        iteration,
                        precision,
                        factors: self.factors.clone(),
                        influence: snapshot.clone(),
                    });
                }
            }

            let u1_before = self.factors.u1.clone();
            let u2_before = self.factors.u2.clone();
            let l1_before = self.factors.l1.clone();

            self.sweep(feedback, &snapshot, &mut stats);

            stats.latent_delta = frobenius(&self.factors.u1, &u1_before)
                + frobenius(&self.factors.u2, &u2_before)
                + frobenius(&self.factors.l1, &l1_before);

            info!(
                iteration,
                updates = stats.updates,
                skipped = stats.sampling_exhausted,
                faults = stats.faults,
                latent_delta = stats.latent_delta,
                precision = stats.precision_at_n,
                "iteration finished"
            );

            last_updates = Some(stats.updates);
            iterations.push(stats);
            self.influence = Some(snapshot);
        }

        self.state = match last_updates {
            Some(0) => OptimizerState::Converged,
            _ => OptimizerState::MaxIterationsReached,
        };

        self.factors.save(store)?;
        if let Some(snapshot) = &self.influence {
            snapshot.save(store)?;
        }
        if let Some(best) = &self.best {
            let best_store = store.subdir("best")?;
            best.factors.save(&best_store)?;
            best.influence.save(&best_store)?;
            info!(
                iteration = best.iteration,
                precision = best.precision,
                "best checkpoint saved"
            );
        }

        let report = TrainingReport {
            iterations,
            final_state: self.state,
            best_iteration: self.best.as_ref().map(|best| best.iteration),
            best_precision: self.best.as_ref().map(|best| best.precision),
        };
        store.save_report(&report)?;

        Ok(report)
    }

    /// One sequential pass over a fresh permutation of the feedback pairs.
    fn sweep(&mut self, feedback: &FeedbackSet, snapshot: &GeoInfluence, stats: &mut IterationStats) {
        let order = shuffled_indices(feedback.len(), &mut self.rng);

        for index in order {
            let pair = feedback.pairs()[index];
            match self.update_pair(pair, snapshot) {
                Ok(PairOutcome::Updated) => stats.updates += 1,
                Ok(PairOutcome::Exhausted) => {
                    stats.sampling_exhausted += 1;
                    debug!(user = pair.user, item = pair.item, "no incompatible candidate");
                }
                Err(fault) => {
                    stats.faults += 1;
                    warn!(user = pair.user, item = pair.item, %fault, "pair update failed");
                }
            }
        }
    }

    /// Samples a negative candidate for one positive pair and applies the
    /// gradient step plus row projections. Faults are returned, not raised.
    fn update_pair(
        &mut self,
        pair: Feedback,
        snapshot: &GeoInfluence,
    ) -> Result<PairOutcome> {
        let num_users = self.factors.num_users();
        let num_items = self.factors.num_items();
        let Feedback { user, item } = pair;

        if user >= num_users {
            return Err(EngineError::UserOutOfRange { user, num_users });
        }
        if item >= num_items {
            return Err(EngineError::ItemOutOfRange { item, num_items });
        }

        let x_score = snapshot.ul[[user, item]] + snapshot.ufg[[user, item]];
        let x_freq = self.uif[[user, item]];

        // Bounded rejection sampling for a mis-ranked candidate.
        let mut accepted = None;
        let mut attempts = 0;
        while attempts < num_items {
            let candidate = self.rng.gen_range(0..num_items);
            attempts += 1;

            let y_score = snapshot.ul[[user, candidate]] + snapshot.ufg[[user, candidate]];
            let y_freq = self.uif[[user, candidate]];
            if incompatible(x_freq, x_score, y_freq, y_score, self.config.model.margin) {
                accepted = Some((candidate, y_score));
                break;
            }
        }
        let Some((candidate, y_score)) = accepted else {
            return Ok(PairOutcome::Exhausted);
        };

        // Fewer attempts means the candidate pool is dense with violations,
        // i.e. the relevant item sits low in the ranking.
        let rank = (num_items - 1) / attempts;
        let mut eta = self.loss_weight[rank];
        if self.config.training.variant == Variant::Paper {
            eta *= indicator_weight(x_score, y_score, self.config.model.margin);
        }
        let step = self.config.training.learning_rate * eta;
        if !step.is_finite() {
            return Err(EngineError::NonFiniteUpdate {
                user,
                item,
                candidate,
            });
        }

        let delta_l = &self.factors.l1.row(candidate) - &self.factors.l1.row(item);
        let mut u1_row = self.factors.u1.row_mut(user);
        u1_row.scaled_add(-step, &delta_l);

        let delta_g = &snapshot.fg.row(candidate) - &snapshot.fg.row(item);
        let mut u2_row = self.factors.u2.row_mut(user);
        u2_row.scaled_add(-step, &delta_g);

        // Item rows move along the just-updated user row.
        let scaled_u1 = self.factors.u1.row(user).mapv(|v| v * step);
        let mut relevant_row = self.factors.l1.row_mut(item);
        relevant_row += &scaled_u1;
        let mut candidate_row = self.factors.l1.row_mut(candidate);
        candidate_row -= &scaled_u1;

        let bound = self.config.model.norm_bound;
        project_row(&mut self.factors.u1, user, bound);
        project_row(&mut self.factors.u2, user, self.config.geo_norm_bound());
        project_row(&mut self.factors.l1, item, bound);
        project_row(&mut self.factors.l1, candidate, bound);

        Ok(PairOutcome::Updated)
    }

    /// Ranking quality of the current snapshot against a validation split.
    fn evaluate(
        &self,
        snapshot: &GeoInfluence,
        relevant_by_user: &HashMap<usize, HashSet<usize>>,
        train_items: &HashMap<usize, HashSet<usize>>,
    ) -> Result<(f64, f64)> {
        let scorer = ScoringService::new(&self.factors, snapshot);
        let metrics = MetricsCalculator::new(self.config.training.validation_top_n);
        let empty = HashSet::new();

        let mut users: Vec<usize> = relevant_by_user.keys().copied().collect();
        users.sort_unstable();

        let mut precision_sum = 0.0;
        let mut recall_sum = 0.0;
        let mut evaluated = 0usize;
        for user in users {
            if user >= self.factors.num_users() {
                warn!(user, "validation user outside the trained range");
                continue;
            }
            let relevant = &relevant_by_user[&user];
            let exclude = train_items.get(&user).unwrap_or(&empty);
            let recommended: Vec<usize> = scorer
                .rank_items(user, exclude, self.config.training.validation_top_n)?
                .into_iter()
                .map(|(item, _)| item)
                .collect();

            precision_sum += metrics.calculate_precision_at_k(&recommended, relevant);
            recall_sum += metrics.calculate_recall_at_k(&recommended, relevant);
            evaluated += 1;
        }

        if evaluated == 0 {
            return Ok((0.0, 0.0));
        }
        Ok((
            precision_sum / evaluated as f64,
            recall_sum / evaluated as f64,
        ))
    }
}

fn frobenius(after: &Array2<f64>, before: &Array2<f64>) -> f64 {
    (after - before).mapv(|v| v * v).sum().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Poi;
    use crate::utils::{l2_norm, worker_pool};
    use std::path::PathBuf;

    fn small_config(dir: PathBuf) -> Config {
        let mut config = Config::default();
        config.model.embedding_dim = 2;
        config.model.neighbor_count = 3;
        config.training.max_iterations = 3;
        config.storage.model_dir = dir;
        config
    }

    fn small_setup(name: &str) -> (Config, RankingOptimizer, FeedbackSet, ModelStore, ThreadPool) {
        let dir = std::env::temp_dir().join(format!("georank-ranking-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let config = small_config(dir.clone());
        let store = ModelStore::new(dir).unwrap();
        let pool = worker_pool().unwrap();

        let pois: Vec<Poi> = (0..5)
            .map(|i| Poi::new(i as u32, i as f64 * 0.02, i as f64 * 0.015))
            .collect();
        let feedback = FeedbackSet::from_pairs([
            (0, 0),
            (0, 0),
            (0, 1),
            (1, 2),
            (1, 2),
            (1, 3),
            (2, 4),
            (2, 0),
            (2, 4),
            (0, 2),
        ]);

        let geo = GeoNeighborIndex::build(&pois, 3, &pool).unwrap();
        let weights = crate::geo::weight_matrix(&geo, 2, &pool).unwrap();
        let factors = LatentFactorStore::initialize(3, 5, 2, config.training.seed);
        let uif = feedback.frequency_matrix(3, 5).unwrap();

        let optimizer = RankingOptimizer::new(config.clone(), factors, geo, weights, uif).unwrap();
        (config, optimizer, feedback, store, pool)
    }

    #[test]
    fn test_harmonic_weights_partial_sums() {
        let weights = harmonic_weights(5);
        assert_eq!(weights[0], 0.0);
        assert!((weights[1] - 1.0).abs() < 1e-12);
        assert!((weights[2] - 1.5).abs() < 1e-12);
        assert!((weights[4] - (1.0 + 0.5 + 1.0 / 3.0 + 0.25)).abs() < 1e-12);
    }

    #[test]
    fn test_incompatibility_predicate() {
        // More visits, score not sufficiently above: worth correcting.
        assert!(incompatible(5.0, 1.0, 2.0, 1.2, 0.3));
        // Frequencies reversed: never incompatible, whatever the scores.
        assert!(!incompatible(2.0, 1.0, 5.0, 1.2, 0.3));
        assert!(!incompatible(2.0, -10.0, 5.0, 10.0, 0.3));
        // Score already clears the margin.
        assert!(!incompatible(5.0, 2.0, 2.0, 1.0, 0.3));
    }

    #[test]
    fn test_train_keeps_rows_inside_norm_balls() {
        let (config, mut optimizer, feedback, store, pool) = small_setup("norms");
        optimizer.train(&feedback, None, &pool, &store).unwrap();

        let bound = config.model.norm_bound + 1e-9;
        let geo_bound = config.geo_norm_bound() + 1e-9;
        for row in optimizer.factors().u1.rows() {
            assert!(l2_norm(row) <= bound);
        }
        for row in optimizer.factors().u2.rows() {
            assert!(l2_norm(row) <= geo_bound);
        }
        for row in optimizer.factors().l1.rows() {
            assert!(l2_norm(row) <= bound);
        }
    }

    #[test]
    fn test_every_pair_is_accounted_for() {
        let (_, mut optimizer, feedback, store, pool) = small_setup("accounting");
        let report = optimizer.train(&feedback, None, &pool, &store).unwrap();

        assert_eq!(report.iterations.len(), 3);
        for stats in &report.iterations {
            assert_eq!(
                stats.updates + stats.sampling_exhausted + stats.faults,
                feedback.len()
            );
        }
        assert!(matches!(
            report.final_state,
            OptimizerState::Converged | OptimizerState::MaxIterationsReached
        ));
    }

    #[test]
    fn test_train_persists_model_and_report() {
        let (_, mut optimizer, feedback, store, pool) = small_setup("persist");
        optimizer.train(&feedback, None, &pool, &store).unwrap();

        let loaded = LatentFactorStore::load(&store).unwrap();
        assert_eq!(&loaded, optimizer.factors());
        assert!(GeoInfluence::load(&store).is_ok());
    }

    #[test]
    fn test_validation_retains_best_checkpoint() {
        let (_, mut optimizer, feedback, store, pool) = small_setup("validation");
        let validation = FeedbackSet::from_pairs([(0, 3), (1, 4), (2, 1)]);
        let report = optimizer
            .train(&feedback, Some(&validation), &pool, &store)
            .unwrap();

        for stats in &report.iterations {
            assert!(stats.precision_at_n.is_some());
            assert!(stats.recall_at_n.is_some());
        }
        if let Some(best) = report.best_iteration {
            assert!(best < report.iterations.len());
            let best_store = store.subdir("best").unwrap();
            assert!(LatentFactorStore::load(&best_store).is_ok());
        }
    }

    #[test]
    fn test_empty_feedback_is_fatal() {
        let (_, mut optimizer, _, store, pool) = small_setup("empty");
        assert!(matches!(
            optimizer.train(&FeedbackSet::default(), None, &pool, &store),
            Err(EngineError::EmptyFeedback)
        ));
    }

    #[test]
    fn test_scorer_unavailable_before_training() {
        let (_, optimizer, _, _, _) = small_setup("scorer");
        assert!(matches!(
            optimizer.scorer(),
            Err(EngineError::ScoresUnavailable)
        ));
    }
}
