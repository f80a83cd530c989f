use super::factors::LatentFactorStore;
use crate::error::Result;
use crate::geo::GeoNeighborIndex;
use crate::storage::{Artifact, ModelStore};
use ndarray::parallel::prelude::*;
use ndarray::{Array2, Axis};
use rayon::ThreadPool;

/// Per-iteration snapshot of the geography-derived matrices: FG holds each
/// item's neighbor-weighted sum of L1 rows, UL and UFG the dense score
/// products. Rebuilt as a whole because L1 moves underneath FG every sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoInfluence {
    pub fg: Array2<f64>,
    pub ul: Array2<f64>,
    pub ufg: Array2<f64>,
}

impl GeoInfluence {
    pub fn save(&self, store: &ModelStore) -> Result<()> {
        store.save(Artifact::Fg, &self.fg)?;
        store.save(Artifact::Ul, &self.ul)?;
        store.save(Artifact::Ufg, &self.ufg)?;
        Ok(())
    }

    pub fn load(store: &ModelStore) -> Result<Self> {
        Ok(Self {
            fg: store.load(Artifact::Fg)?,
            ul: store.load(Artifact::Ul)?,
            ufg: store.load(Artifact::Ufg)?,
        })
    }
}

/// Clamps every U2 row onto the geo-affinity ball. Runs as a parallel
/// per-row phase with a barrier before FG is rebuilt.
pub fn clamp_u2_rows(u2: &mut Array2<f64>, bound: f64, pool: &ThreadPool) {
    pool.install(|| {
        u2.axis_iter_mut(Axis(0)).into_par_iter().for_each(|mut row| {
            let norm = row.iter().map(|x| x * x).sum::<f64>().sqrt();
            if norm > bound {
                let scale = bound / norm;
                row.mapv_inplace(|v| v * scale);
            }
        });
    });
}

/// FG[l] = sum over the k1 neighbors j of W[l,j] * L1[neighbor(l,j)].
pub fn recompute_fg(
    geo: &GeoNeighborIndex,
    weights: &Array2<f64>,
    l1: &Array2<f64>,
    pool: &ThreadPool,
) -> Array2<f64> {
    let neighbor_count = geo.neighbor_count();
    let neighbors = geo.neighbors();
    let mut fg = Array2::zeros((geo.num_items(), l1.ncols()));

    pool.install(|| {
        fg.axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(item, mut row)| {
                for j in 0..neighbor_count {
                    let neighbor = neighbors[[item, j]];
                    row.scaled_add(weights[[item, j]], &l1.row(neighbor));
                }
            });
    });

    fg
}

/// Dense score products UL = U1 * L1^T and UFG = U2 * FG^T.
pub fn recompute_scores(
    factors: &LatentFactorStore,
    fg: &Array2<f64>,
) -> (Array2<f64>, Array2<f64>) {
    let ul = factors.u1.dot(&factors.l1.t());
    let ufg = factors.u2.dot(&fg.t());
    (ul, ufg)
}

/// One full rebuild: U2 clamp phase, FG aggregation, then the score
/// products. Called once per outer training iteration, never per SGD step.
pub fn rebuild(
    factors: &mut LatentFactorStore,
    geo: &GeoNeighborIndex,
    weights: &Array2<f64>,
    geo_norm_bound: f64,
    pool: &ThreadPool,
) -> GeoInfluence {
    clamp_u2_rows(&mut factors.u2, geo_norm_bound, pool);
    let fg = recompute_fg(geo, weights, &factors.l1, pool);
    let (ul, ufg) = recompute_scores(factors, &fg);
    GeoInfluence { fg, ul, ufg }
}
