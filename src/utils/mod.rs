use crate::error::Result;
use ndarray::ArrayView1;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::{ThreadPool, ThreadPoolBuilder};

pub mod metrics;

/// Fraction of available cores handed to the per-row worker pool.
pub const WORKER_CORE_FRACTION: f64 = 0.95;

/// Builds the bounded pool used for the embarrassingly-parallel row phases.
pub fn worker_pool() -> Result<ThreadPool> {
    let threads = ((num_cpus::get() as f64 * WORKER_CORE_FRACTION).ceil() as usize).max(1);
    Ok(ThreadPoolBuilder::new().num_threads(threads).build()?)
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

pub fn l2_norm(row: ArrayView1<'_, f64>) -> f64 {
    row.iter().map(|x| x * x).sum::<f64>().sqrt()
}

pub fn top_k_indices(scores: &[f64], k: usize) -> Vec<usize> {
    let mut indexed_scores: Vec<(usize, f64)> = scores
        .iter()
        .enumerate()
        .map(|(i, &score)| (i, score))
        .collect();

    indexed_scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    indexed_scores.into_iter().take(k).map(|(i, _)| i).collect()
}

/// One training epoch visits a permutation of all feedback records; the
/// permutation is drawn from the optimizer's seeded generator.
pub fn shuffled_indices(n: usize, rng: &mut StdRng) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);
    indices
}
