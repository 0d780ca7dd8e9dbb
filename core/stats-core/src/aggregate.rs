//! FILENAME: core/stats-core/src/aggregate.rs
//! Streaming accumulator for the chart reductions.
//!
//! One accumulator collects every statistic a reduction can ask for, so a
//! group's value list is walked exactly once regardless of aggregation type.

use crate::dataset::AggregationType;

/// Running sum / count / min / max over finite values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Accumulator {
    pub sum: f64,
    pub count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Accumulator {
    pub fn new() -> Self {
        Accumulator {
            sum: 0.0,
            count: 0,
            min: None,
            max: None,
        }
    }

    /// Adds a value. Non-finite values carry no information and are ignored.
    pub fn add(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.count += 1;
        self.sum += value;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    pub fn extend<I: IntoIterator<Item = f64>>(&mut self, values: I) {
        for value in values {
            self.add(value);
        }
    }

    /// Merges another accumulator into this one.
    pub fn merge(&mut self, other: &Accumulator) {
        if other.count == 0 {
            return;
        }
        self.sum += other.sum;
        self.count += other.count;
        if let Some(other_min) = other.min {
            self.min = Some(self.min.map_or(other_min, |m| m.min(other_min)));
        }
        if let Some(other_max) = other.max {
            self.max = Some(self.max.map_or(other_max, |m| m.max(other_max)));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Computes the final value. `None` when nothing was accumulated.
    ///
    /// `Divisor` yields the sum: the ratio is formed by the caller once both
    /// the dividend and the divisor sums are known.
    pub fn compute(&self, aggregation: AggregationType) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        match aggregation {
            AggregationType::Sum | AggregationType::Divisor => Some(self.sum),
            AggregationType::Mean => Some(self.sum / self.count as f64),
            AggregationType::Min => self.min,
            AggregationType::Max => self.max,
        }
    }
}

/// Reduces a value list with one aggregation.
pub fn aggregate(values: &[f64], aggregation: AggregationType) -> Option<f64> {
    let mut acc = Accumulator::new();
    acc.extend(values.iter().copied());
    acc.compute(aggregation)
}
