//! Classification metrics for model comparison
//!
//! Precision, recall and F1 are averaged across classes weighted by class
//! support; a class with no predicted (or no true) samples scores 0.

use crate::models::ModelScores;
use serde::{Deserialize, Serialize};

/// Per-class precision/recall/F1 and support
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassReport {
    pub class: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Full evaluation of a model on a labelled partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub scores: ModelScores,
    /// Rows are true classes, columns predicted classes, both in `classes` order
    pub confusion_matrix: Vec<Vec<usize>>,
    pub classes: Vec<usize>,
    pub report: Vec<ClassReport>,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Score predictions against ground truth.
///
/// The label set is the union of labels seen in either sequence. Extra
/// entries in the longer sequence are ignored.
pub fn evaluate(y_true: &[usize], y_pred: &[usize]) -> Evaluation {
    let n = y_true.len().min(y_pred.len());
    let (y_true, y_pred) = (&y_true[..n], &y_pred[..n]);

    let mut classes: Vec<usize> = y_true.iter().chain(y_pred.iter()).copied().collect();
    classes.sort_unstable();
    classes.dedup();

    let index = |label: usize| classes.binary_search(&label).unwrap_or(0);
    let k = classes.len();
    let mut confusion_matrix = vec![vec![0usize; k]; k];
    for (&t, &p) in y_true.iter().zip(y_pred) {
        confusion_matrix[index(t)][index(p)] += 1;
    }

    let mut report = Vec::with_capacity(k);
    for (i, &class) in classes.iter().enumerate() {
        let tp = confusion_matrix[i][i];
        let support: usize = confusion_matrix[i].iter().sum();
        let predicted: usize = confusion_matrix.iter().map(|row| row[i]).sum();

        let precision = ratio(tp, predicted);
        let recall = ratio(tp, support);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        report.push(ClassReport {
            class,
            precision,
            recall,
            f1,
            support,
        });
    }

    let correct: usize = (0..k).map(|i| confusion_matrix[i][i]).sum();
    let weighted = |metric: fn(&ClassReport) -> f64| -> f64 {
        if n == 0 {
            return 0.0;
        }
        report
            .iter()
            .map(|r| metric(r) * r.support as f64)
            .sum::<f64>()
            / n as f64
    };

    let scores = ModelScores {
        accuracy: ratio(correct, n),
        precision: weighted(|r| r.precision),
        recall: weighted(|r| r.recall),
        f1: weighted(|r| r.f1),
    };

    Evaluation {
        scores,
        confusion_matrix,
        classes,
        report,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_predictions() {
        let y = [0, 1, 2, 2, 1, 0];
        let eval = evaluate(&y, &y);
        assert_eq!(eval.scores.accuracy, 1.0);
        assert_eq!(eval.scores.precision, 1.0);
        assert_eq!(eval.scores.f1, 1.0);
        assert_eq!(eval.confusion_matrix, vec![vec![2, 0, 0], vec![0, 2, 0], vec![0, 0, 2]]);
    }

    #[test]
    fn test_weighted_metrics() {
        // class 0: 2 true, both right; class 1: 2 true, one predicted as 2
        let y_true = [0, 0, 1, 1];
        let y_pred = [0, 0, 1, 2];
        let eval = evaluate(&y_true, &y_pred);

        assert!((eval.scores.accuracy - 0.75).abs() < 1e-12);
        // recall weighted: (1.0*2 + 0.5*2 + 0*0) / 4
        assert!((eval.scores.recall - 0.75).abs() < 1e-12);
        // precision: class 2 has no true samples and precision 0
        assert!((eval.scores.precision - 1.0).abs() < 1e-12);
        assert_eq!(eval.classes, vec![0, 1, 2]);
        assert_eq!(eval.report[2].support, 0);
    }

    #[test]
    fn test_zero_division_is_zero() {
        let eval = evaluate(&[0, 0], &[1, 1]);
        assert_eq!(eval.scores.accuracy, 0.0);
        assert_eq!(eval.scores.precision, 0.0);
        assert_eq!(eval.report[1].precision, 0.0);
    }

    #[test]
    fn test_empty_input() {
        let eval = evaluate(&[], &[]);
        assert_eq!(eval.scores, ModelScores::default());
        assert!(eval.classes.is_empty());
    }
}
