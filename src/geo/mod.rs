use crate::error::{EngineError, Result};
use crate::models::Poi;
use crate::storage::{Artifact, ModelStore};
use ndarray::{Array2, ArrayView1};
use rayon::prelude::*;
use rayon::ThreadPool;
use std::cmp::Ordering;
use tracing::info;

pub const EARTH_RADIUS_KM: f64 = 6371.004;

/// Distances below this (km) are clamped before inverse-distance weighting.
const MIN_WEIGHT_DISTANCE_KM: f64 = 0.5;

/// Self-distance marker so a POI never selects itself as a neighbor.
const SELF_DISTANCE: f64 = f64::MAX;

/// Great-circle distance in kilometers between two coordinates in degrees.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let rad_lat1 = lat1.to_radians();
    let rad_lat2 = lat2.to_radians();
    let half_dlat = (rad_lat1 - rad_lat2) / 2.0;
    let half_dlon = (lon1.to_radians() - lon2.to_radians()) / 2.0;

    let h = half_dlat.sin().powi(2) + rad_lat1.cos() * rad_lat2.cos() * half_dlon.sin().powi(2);
    2.0 * h.sqrt().asin() * EARTH_RADIUS_KM
}

/// For every POI, the k1 nearest other POIs by great-circle distance and the
/// distances themselves, rows sorted ascending. The all-pairs build is the
/// dominant preprocessing cost and runs one row per worker-pool task.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoNeighborIndex {
    distances: Array2<f64>,
    neighbors: Array2<usize>,
}

impl GeoNeighborIndex {
    pub fn build(pois: &[Poi], neighbor_count: usize, pool: &ThreadPool) -> Result<Self> {
        if pois.is_empty() {
            return Err(EngineError::EmptyItems);
        }
        let num_items = pois.len();
        if num_items - 1 < neighbor_count {
            return Err(EngineError::InsufficientNeighbors {
                available: num_items - 1,
                required: neighbor_count,
            });
        }

        let mut sorted: Vec<Poi> = pois.to_vec();
        sorted.sort_by_key(|poi| poi.id);

        info!(items = num_items, k1 = neighbor_count, "computing distance matrix");

        let rows: Vec<(Vec<f64>, Vec<usize>)> = pool.install(|| {
            (0..num_items)
                .into_par_iter()
                .map(|item| nearest_row(&sorted, item, neighbor_count))
                .collect()
        });

        let mut distances = Array2::zeros((num_items, neighbor_count));
        let mut neighbors = Array2::zeros((num_items, neighbor_count));
        for (item, (dist_row, index_row)) in rows.into_iter().enumerate() {
            for (j, (dist, neighbor)) in dist_row.into_iter().zip(index_row).enumerate() {
                distances[[item, j]] = dist;
                neighbors[[item, j]] = neighbor;
            }
        }

        Ok(Self {
            distances,
            neighbors,
        })
    }

    /// Loads the cached index from the model directory when present,
    /// otherwise builds and persists it.
    pub fn build_or_load(
        store: &ModelStore,
        pois: &[Poi],
        neighbor_count: usize,
        pool: &ThreadPool,
    ) -> Result<Self> {
        if store.contains(Artifact::Distances) && store.has_neighbor_index() {
            info!("loading cached distance matrix");
            let distances = store.load(Artifact::Distances)?;
            let neighbors = store.load_neighbor_index()?;
            return Self::from_parts(distances, neighbors, neighbor_count);
        }

        let index = Self::build(pois, neighbor_count, pool)?;
        store.save(Artifact::Distances, &index.distances)?;
        store.save_neighbor_index(&index.neighbors)?;
        Ok(index)
    }

    fn from_parts(
        distances: Array2<f64>,
        neighbors: Array2<usize>,
        neighbor_count: usize,
    ) -> Result<Self> {
        if distances.dim() != neighbors.dim() || distances.ncols() != neighbor_count {
            return Err(EngineError::InvalidConfig(format!(
                "cached neighbor index is {}x{}, expected k1={}",
                distances.nrows(),
                distances.ncols(),
                neighbor_count
            )));
        }
        Ok(Self {
            distances,
            neighbors,
        })
    }

    pub fn num_items(&self) -> usize {
        self.distances.nrows()
    }

    pub fn neighbor_count(&self) -> usize {
        self.distances.ncols()
    }

    pub fn distances(&self) -> &Array2<f64> {
        &self.distances
    }

    pub fn neighbors(&self) -> &Array2<usize> {
        &self.neighbors
    }

    /// Neighbor ids and distances of one POI, nearest first.
    pub fn neighbors_of(&self, item: usize) -> Result<(ArrayView1<'_, usize>, ArrayView1<'_, f64>)> {
        if item >= self.num_items() {
            return Err(EngineError::ItemOutOfRange {
                item,
                num_items: self.num_items(),
            });
        }
        Ok((self.neighbors.row(item), self.distances.row(item)))
    }
}

fn nearest_row(pois: &[Poi], item: usize, neighbor_count: usize) -> (Vec<f64>, Vec<usize>) {
    let origin = &pois[item];
    let mut all: Vec<(f64, usize)> = pois
        .iter()
        .enumerate()
        .map(|(other, poi)| {
            if other == item {
                (SELF_DISTANCE, other)
            } else {
                (
                    haversine_km(origin.latitude, origin.longitude, poi.latitude, poi.longitude),
                    other,
                )
            }
        })
        .collect();

    // Stable sort keeps enumeration order on ties.
    all.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
    all.truncate(neighbor_count);

    all.into_iter().unzip()
}

/// Row-normalized inverse-distance weights over each POI's neighbors. Pure
/// per row and parallelized across rows; every row sums to 1.
pub fn weight_matrix(
    index: &GeoNeighborIndex,
    embedding_dim: usize,
    pool: &ThreadPool,
) -> Result<Array2<f64>> {
    let neighbor_count = index.neighbor_count();
    if neighbor_count < embedding_dim {
        return Err(EngineError::NeighborCountBelowDimension {
            k1: neighbor_count,
            k: embedding_dim,
        });
    }

    let num_items = index.num_items();
    let distances = index.distances();

    let rows: Vec<Vec<f64>> = pool.install(|| {
        (0..num_items)
            .into_par_iter()
            .map(|item| weight_row(distances.row(item)))
            .collect()
    });

    let mut weights = Array2::zeros((num_items, neighbor_count));
    for (item, row) in rows.into_iter().enumerate() {
        for (j, weight) in row.into_iter().enumerate() {
            weights[[item, j]] = weight;
        }
    }
    Ok(weights)
}

fn weight_row(distances: ArrayView1<'_, f64>) -> Vec<f64> {
    let clamped: Vec<f64> = distances
        .iter()
        .map(|&d| if d < MIN_WEIGHT_DISTANCE_KM { MIN_WEIGHT_DISTANCE_KM } else { d })
        .collect();
    let total: f64 = clamped.iter().map(|d| 1.0 / d).sum();
    clamped.into_iter().map(|d| (1.0 / d) / total).collect()
}
