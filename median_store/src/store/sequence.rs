//! Append-only sample sequence with an on-demand median.

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Ordered samples for one key, kept in insertion order.
///
/// Appends are O(1) amortised; the median sorts a snapshot on every query.
/// Samples are never removed individually, only by dropping the whole
/// sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleSequence {
    samples: Vec<f64>,
}

impl SampleSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a batch and returns the new total sample count.
    ///
    /// The batch is validated as a whole before anything is written, so a
    /// rejected batch leaves the sequence untouched.
    pub fn append(&mut self, values: &[f64]) -> StoreResult<usize> {
        validate_batch(values)?;
        self.samples.extend_from_slice(values);
        Ok(self.samples.len())
    }

    /// Median of the current samples. `key` names the sequence in the
    /// `EmptySequence` error.
    pub fn median(&self, key: &str) -> StoreResult<f64> {
        median_of(self.samples.clone(), key)
    }

    /// Snapshot copy of the samples in insertion order.
    pub fn export(&self) -> Vec<f64> {
        self.samples.clone()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl From<Vec<f64>> for SampleSequence {
    fn from(samples: Vec<f64>) -> Self {
        Self { samples }
    }
}

/// Rejects empty batches and non-finite samples.
pub fn validate_batch(values: &[f64]) -> StoreResult<()> {
    if values.is_empty() {
        return Err(StoreError::InvalidInput("empty values list".to_string()));
    }
    if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
        return Err(StoreError::InvalidInput(format!(
            "sample {bad} is not a finite number"
        )));
    }
    Ok(())
}

/// Median of an owned snapshot: middle element for odd counts, mean of the
/// two middle elements for even counts.
pub fn median_of(mut samples: Vec<f64>, key: &str) -> StoreResult<f64> {
    if samples.is_empty() {
        return Err(StoreError::EmptySequence(key.to_string()));
    }
    samples.sort_by(|a, b| a.total_cmp(b));
    let mid = samples.len() / 2;
    if samples.len() % 2 == 1 {
        Ok(samples[mid])
    } else {
        // halve first: the sum of two finite samples can overflow to infinity
        Ok(samples[mid - 1] / 2.0 + samples[mid] / 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn odd_count_takes_middle() {
        let mut seq = SampleSequence::new();
        seq.append(&[1.0, 3.0, 2.0]).unwrap();
        assert_eq!(seq.median("k").unwrap(), 2.0);
    }

    #[test]
    fn even_count_averages_middle_pair() {
        let seq = SampleSequence::from(vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(seq.median("k").unwrap(), 2.5);
    }

    #[test]
    fn empty_has_no_median() {
        let err = SampleSequence::new().median("k").unwrap_err();
        assert!(matches!(err, StoreError::EmptySequence(ref key) if key == "k"));
    }

    #[test]
    fn extreme_middle_pair_stays_finite() {
        assert_eq!(median_of(vec![f64::MAX, f64::MAX], "k").unwrap(), f64::MAX);
        assert_eq!(median_of(vec![-f64::MAX, f64::MAX], "k").unwrap(), 0.0);
    }

    #[test]
    fn append_preserves_insertion_order() {
        let mut seq = SampleSequence::new();
        assert_eq!(seq.append(&[5.0, -1.0]).unwrap(), 2);
        assert_eq!(seq.append(&[3.5]).unwrap(), 3);
        assert_eq!(seq.export(), vec![5.0, -1.0, 3.5]);
        // median must not reorder the stored samples
        let _ = seq.median("k");
        assert_eq!(seq.export(), vec![5.0, -1.0, 3.5]);
    }

    #[test]
    fn rejects_empty_batch() {
        let mut seq = SampleSequence::new();
        let err = seq.append(&[]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
        assert!(seq.is_empty());
    }

    #[test]
    fn rejects_non_finite_without_partial_write() {
        let mut seq = SampleSequence::from(vec![1.0]);
        let err = seq.append(&[2.0, f64::NAN]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
        assert_eq!(seq.len(), 1);
        assert!(seq.append(&[f64::INFINITY]).is_err());
    }

    proptest! {
        #[test]
        fn median_splits_samples_in_half(values in prop::collection::vec(-1.0e6f64..1.0e6, 1..200)) {
            let median = median_of(values.clone(), "k").unwrap();
            let below = values.iter().filter(|v| **v < median).count();
            let above = values.iter().filter(|v| **v > median).count();
            prop_assert!(below <= values.len() / 2);
            prop_assert!(above <= values.len() / 2);
        }

        #[test]
        fn median_is_within_range(values in prop::collection::vec(-1.0e6f64..1.0e6, 1..200)) {
            let median = median_of(values.clone(), "k").unwrap();
            let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            prop_assert!(median >= min && median <= max);
        }
    }
}
