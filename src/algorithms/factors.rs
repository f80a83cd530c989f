use crate::error::Result;
use crate::storage::{Artifact, ModelStore};
use crate::utils::l2_norm;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

/// Standard deviation of the zero-mean Gaussian used for fresh factors.
pub const INIT_STD_DEV: f64 = 0.01;

/// The three dense factor matrices: U1 models user preference, U2 the
/// user-geography interaction, L1 item preference. Mutated in place by
/// training; every row stays inside its configured L2 ball.
#[derive(Debug, Clone, PartialEq)]
pub struct LatentFactorStore {
    pub u1: Array2<f64>,
    pub u2: Array2<f64>,
    pub l1: Array2<f64>,
}

impl LatentFactorStore {
    /// Fresh factors from a fixed-seed Gaussian so runs are reproducible.
    pub fn initialize(num_users: usize, num_items: usize, embedding_dim: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let u1 = gaussian_matrix(num_users, embedding_dim, &mut rng);
        let u2 = gaussian_matrix(num_users, embedding_dim, &mut rng);
        let l1 = gaussian_matrix(num_items, embedding_dim, &mut rng);

        Self { u1, u2, l1 }
    }

    pub fn num_users(&self) -> usize {
        self.u1.nrows()
    }

    pub fn num_items(&self) -> usize {
        self.l1.nrows()
    }

    pub fn embedding_dim(&self) -> usize {
        self.u1.ncols()
    }

    pub fn save(&self, store: &ModelStore) -> Result<()> {
        store.save(Artifact::U1, &self.u1)?;
        store.save(Artifact::U2, &self.u2)?;
        store.save(Artifact::L1, &self.l1)?;
        Ok(())
    }

    pub fn load(store: &ModelStore) -> Result<Self> {
        Ok(Self {
            u1: store.load(Artifact::U1)?,
            u2: store.load(Artifact::U2)?,
            l1: store.load(Artifact::L1)?,
        })
    }
}

/// Rescales one row onto the L2 ball of the given radius if it escaped.
pub fn project_row(matrix: &mut Array2<f64>, row: usize, bound: f64) {
    let norm = l2_norm(matrix.row(row));
    if norm > bound {
        let scale = bound / norm;
        matrix.row_mut(row).mapv_inplace(|v| v * scale);
    }
}

fn gaussian_matrix(rows: usize, cols: usize, rng: &mut StdRng) -> Array2<f64> {
    Array2::from_shape_fn((rows, cols), |_| standard_gaussian(rng) * INIT_STD_DEV)
}

// Box-Muller transform over the seeded generator.
fn standard_gaussian(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen();
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_shapes_and_seed_determinism() {
        let a = LatentFactorStore::initialize(4, 7, 3, 34);
        let b = LatentFactorStore::initialize(4, 7, 3, 34);
        let c = LatentFactorStore::initialize(4, 7, 3, 35);

        assert_eq!(a.u1.dim(), (4, 3));
        assert_eq!(a.u2.dim(), (4, 3));
        assert_eq!(a.l1.dim(), (7, 3));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_initial_values_are_small() {
        let factors = LatentFactorStore::initialize(20, 20, 10, 34);
        for &v in factors.u1.iter().chain(factors.u2.iter()).chain(factors.l1.iter()) {
            assert!(v.is_finite());
            assert!(v.abs() < 0.1, "initial value {v} far outside 0.01-sigma range");
        }
    }

    #[test]
    fn test_project_row_rescales_only_escaped_rows() {
        let mut matrix = ndarray::arr2(&[[3.0, 4.0], [0.3, 0.4]]);

        project_row(&mut matrix, 0, 1.0);
        let norm0 = l2_norm(matrix.row(0));
        assert!((norm0 - 1.0).abs() < 1e-12);
        // Direction preserved.
        assert!((matrix[[0, 0]] / matrix[[0, 1]] - 0.75).abs() < 1e-12);

        let before = matrix.row(1).to_owned();
        project_row(&mut matrix, 1, 1.0);
        assert_eq!(matrix.row(1), before.view());
    }

    #[test]
    fn test_project_row_respects_custom_bound() {
        let mut matrix = ndarray::arr2(&[[6.0, 8.0]]);
        project_row(&mut matrix, 0, 0.2);
        assert!((l2_norm(matrix.row(0)) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = std::env::temp_dir().join(format!("georank-factors-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let store = ModelStore::new(dir).unwrap();

        let factors = LatentFactorStore::initialize(3, 5, 2, 34);
        factors.save(&store).unwrap();
        let loaded = LatentFactorStore::load(&store).unwrap();

        assert_eq!(factors, loaded);
    }
}
