use super::factors::LatentFactorStore;
use super::influence::GeoInfluence;
use crate::error::{EngineError, Result};
use ndarray::Array2;
use std::collections::HashSet;

/// Read-only scoring over a factor/influence snapshot. Uses the cached
/// UL/UFG matrices when attached, otherwise falls back to the dot products
/// against U1/L1 and U2/FG directly. Reads the latest completed snapshot;
/// a sweep in progress does not refresh it.
#[derive(Debug, Clone, Copy)]
pub struct ScoringService<'a> {
    factors: &'a LatentFactorStore,
    fg: &'a Array2<f64>,
    cached: Option<(&'a Array2<f64>, &'a Array2<f64>)>,
}

impl<'a> ScoringService<'a> {
    pub fn new(factors: &'a LatentFactorStore, influence: &'a GeoInfluence) -> Self {
        Self {
            factors,
            fg: &influence.fg,
            cached: Some((&influence.ul, &influence.ufg)),
        }
    }

    /// Scoring without the precomputed score matrices, one pair at a time.
    pub fn direct(factors: &'a LatentFactorStore, fg: &'a Array2<f64>) -> Self {
        Self {
            factors,
            fg,
            cached: None,
        }
    }

    /// Recommendation score for one (user, item) pair. Overflow past f32
    /// range is clamped instead of propagating infinities.
    pub fn predict(&self, user: usize, item: usize) -> Result<f32> {
        self.check_bounds(user, item)?;
        Ok(clamp_to_f32(self.raw_score(user, item)))
    }

    /// Top-n unseen items for a user, best first.
    pub fn rank_items(
        &self,
        user: usize,
        exclude: &HashSet<usize>,
        n: usize,
    ) -> Result<Vec<(usize, f32)>> {
        if user >= self.factors.num_users() {
            return Err(EngineError::UserOutOfRange {
                user,
                num_users: self.factors.num_users(),
            });
        }

        let mut ranked: Vec<(usize, f32)> = (0..self.factors.num_items())
            .filter(|item| !exclude.contains(item))
            .map(|item| (item, clamp_to_f32(self.raw_score(user, item))))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(n);
        Ok(ranked)
    }

    fn raw_score(&self, user: usize, item: usize) -> f64 {
        match self.cached {
            Some((ul, ufg)) => ul[[user, item]] + ufg[[user, item]],
            None => {
                self.factors.u1.row(user).dot(&self.factors.l1.row(item))
                    + self.factors.u2.row(user).dot(&self.fg.row(item))
            }
        }
    }

    fn check_bounds(&self, user: usize, item: usize) -> Result<()> {
        if user >= self.factors.num_users() {
            return Err(EngineError::UserOutOfRange {
                user,
                num_users: self.factors.num_users(),
            });
        }
        if item >= self.factors.num_items() {
            return Err(EngineError::ItemOutOfRange {
                item,
                num_items: self.factors.num_items(),
            });
        }
        Ok(())
    }
}

fn clamp_to_f32(score: f64) -> f32 {
    let narrowed = score as f32;
    if narrowed == f32::INFINITY {
        f32::MAX
    } else if narrowed == f32::NEG_INFINITY {
        f32::MIN
    } else {
        narrowed
    }
}
