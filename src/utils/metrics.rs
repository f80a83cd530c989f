use std::collections::HashSet;

/// Top-n ranking quality over a validation split. Only what the training
/// loop needs to decide whether an iteration produced the best model so far.
#[derive(Debug, Clone)]
pub struct MetricsCalculator {
    k: usize,
}

impl MetricsCalculator {
    pub fn new(k: usize) -> Self {
        Self { k }
    }

    pub fn calculate_precision_at_k(&self, recommended: &[usize], relevant: &HashSet<usize>) -> f64 {
        if recommended.is_empty() {
            return 0.0;
        }

        let relevant_recommended = recommended
            .iter()
            .take(self.k)
            .filter(|item| relevant.contains(item))
            .count();

        relevant_recommended as f64 / self.k.min(recommended.len()) as f64
    }

    pub fn calculate_recall_at_k(&self, recommended: &[usize], relevant: &HashSet<usize>) -> f64 {
        if relevant.is_empty() {
            return 0.0;
        }

        let relevant_recommended = recommended
            .iter()
            .take(self.k)
            .filter(|item| relevant.contains(item))
            .count();

        relevant_recommended as f64 / relevant.len() as f64
    }

    pub fn calculate_f1_score(&self, precision: f64, recall: f64) -> f64 {
        if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precision_at_k() {
        let calculator = MetricsCalculator::new(3);
        let recommended = vec![4, 7, 9];
        let relevant: HashSet<usize> = [4, 9].into_iter().collect();

        let precision = calculator.calculate_precision_at_k(&recommended, &relevant);
        assert!((precision - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_recall_at_k() {
        let calculator = MetricsCalculator::new(3);
        let recommended = vec![4, 7, 9];
        let relevant: HashSet<usize> = [4, 9].into_iter().collect();

        let recall = calculator.calculate_recall_at_k(&recommended, &relevant);
        assert!((recall - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_f1_score() {
        let calculator = MetricsCalculator::new(3);
        let f1 = calculator.calculate_f1_score(0.5, 1.0);
        assert!((f1 - 2.0 * 0.5 / 1.5).abs() < 1e-6);
        assert_eq!(calculator.calculate_f1_score(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_empty_inputs() {
        let calculator = MetricsCalculator::new(5);
        let relevant: HashSet<usize> = [1].into_iter().collect();
        assert_eq!(calculator.calculate_precision_at_k(&[], &relevant), 0.0);
        assert_eq!(calculator.calculate_recall_at_k(&[2], &HashSet::new()), 0.0);
    }
}
