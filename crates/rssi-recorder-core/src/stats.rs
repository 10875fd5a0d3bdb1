//! Per-source reduction of a closed window's samples.
//!
//! Every sample weighs the same regardless of when it arrived. Values are
//! sorted before summing so the result does not depend on arrival order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ingest::Sample;

/// Statistics for one source over one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStatistics {
    pub source_id: String,
    pub sample_count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl SourceStatistics {
    /// Mean rounded to the two decimals that get persisted.
    pub fn rounded_mean(&self) -> f64 {
        round2(self.mean)
    }
}

/// Aggregate over every sample in the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSummary {
    pub samples: usize,
    pub min: f64,
    pub max: f64,
}

/// Result of reducing a window.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Reduction {
    /// Keyed and ordered by source id.
    pub per_source: BTreeMap<String, SourceStatistics>,
    /// `None` when there were no samples.
    pub summary: Option<WindowSummary>,
}

impl Reduction {
    pub fn is_empty(&self) -> bool {
        self.per_source.is_empty()
    }

    pub fn total_samples(&self) -> usize {
        self.summary.as_ref().map_or(0, |s| s.samples)
    }
}

/// Group samples by source and compute count, mean, min and max.
pub fn reduce(samples: &[Sample]) -> Reduction {
    let mut groups: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for sample in samples {
        groups
            .entry(sample.source_id.as_str())
            .or_default()
            .push(sample.value);
    }

    let per_source: BTreeMap<String, SourceStatistics> = groups
        .into_iter()
        .map(|(source_id, mut values)| {
            values.sort_by(f64::total_cmp);
            let stats = SourceStatistics {
                source_id: source_id.to_string(),
                sample_count: values.len(),
                mean: mean_sorted(&values),
                min: values[0],
                max: values[values.len() - 1],
            };
            (source_id.to_string(), stats)
        })
        .collect();

    let summary = (!per_source.is_empty()).then(|| WindowSummary {
        samples: samples.len(),
        min: per_source.values().map(|s| s.min).fold(f64::INFINITY, f64::min),
        max: per_source
            .values()
            .map(|s| s.max)
            .fold(f64::NEG_INFINITY, f64::max),
    });

    Reduction {
        per_source,
        summary,
    }
}

/// Mean of sorted values, clamped into `[min, max]` so float error can never
/// break `min <= mean <= max`.
fn mean_sorted(values: &[f64]) -> f64 {
    let sum: f64 = values.iter().sum();
    let mean = sum / values.len() as f64;
    mean.clamp(values[0], values[values.len() - 1])
}

/// Round half away from zero to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
