use crate::error::{EngineError, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A recommendable location. The engine addresses POIs by their dense index
/// (position after sorting by id); mapping sparse id spaces down to dense
/// indices is the data-loading layer's job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Poi {
    pub id: u32,
    pub latitude: f64,
    pub longitude: f64,
}

impl Poi {
    pub fn new(id: u32, latitude: f64, longitude: f64) -> Self {
        Self {
            id,
            latitude,
            longitude,
        }
    }
}

/// One positive implicit interaction, already mapped to dense indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub user: usize,
    pub item: usize,
}

impl Feedback {
    pub fn new(user: usize, item: usize) -> Self {
        Self { user, item }
    }
}

/// Ordered collection of positive feedback pairs. Order is irrelevant to the
/// model; each training epoch visits a permutation of the whole set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSet {
    pairs: Vec<Feedback>,
}

impl FeedbackSet {
    pub fn new(pairs: Vec<Feedback>) -> Self {
        Self { pairs }
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (usize, usize)>) -> Self {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(user, item)| Feedback::new(user, item))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> &[Feedback] {
        &self.pairs
    }

    /// Per-user view of the visited items, used for ranking exclusion and
    /// validation relevance sets.
    pub fn items_by_user(&self) -> HashMap<usize, HashSet<usize>> {
        let mut by_user: HashMap<usize, HashSet<usize>> = HashMap::new();
        for pair in &self.pairs {
            by_user.entry(pair.user).or_default().insert(pair.item);
        }
        by_user
    }

    /// Builds the users x items visit-count matrix. Built once per run and
    /// read-only afterward.
    pub fn frequency_matrix(&self, num_users: usize, num_items: usize) -> Result<Array2<f64>> {
        let mut counts = Array2::zeros((num_users, num_items));
        for pair in &self.pairs {
            if pair.user >= num_users {
                return Err(EngineError::UserOutOfRange {
                    user: pair.user,
                    num_users,
                });
            }
            if pair.item >= num_items {
                return Err(EngineError::ItemOutOfRange {
                    item: pair.item,
                    num_items,
                });
            }
            counts[[pair.user, pair.item]] += 1.0;
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_matrix_counts_repeat_visits() {
        let feedback = FeedbackSet::from_pairs([(0, 1), (0, 1), (1, 0), (0, 2)]);
        let uif = feedback.frequency_matrix(2, 3).unwrap();

        assert_eq!(uif[[0, 1]], 2.0);
        assert_eq!(uif[[1, 0]], 1.0);
        assert_eq!(uif[[0, 2]], 1.0);
        assert_eq!(uif[[1, 2]], 0.0);
    }

    #[test]
    fn test_frequency_matrix_rejects_out_of_range() {
        let feedback = FeedbackSet::from_pairs([(5, 0)]);
        assert!(matches!(
            feedback.frequency_matrix(2, 3),
            Err(EngineError::UserOutOfRange { user: 5, .. })
        ));

        let feedback = FeedbackSet::from_pairs([(0, 9)]);
        assert!(matches!(
            feedback.frequency_matrix(2, 3),
            Err(EngineError::ItemOutOfRange { item: 9, .. })
        ));
    }

    #[test]
    fn test_items_by_user() {
        let feedback = FeedbackSet::from_pairs([(0, 1), (0, 2), (1, 1), (0, 1)]);
        let by_user = feedback.items_by_user();

        assert_eq!(by_user[&0], [1, 2].into_iter().collect());
        assert_eq!(by_user[&1], [1].into_iter().collect());
    }
}
