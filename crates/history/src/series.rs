//! Per-key series and the read-only snapshots handed to chart code.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::buffer::RingBuffer;

/// One reading of a metric key: a value per dimension, e.g.
/// `{temp: 64.0, util: 91.0}`. Dimensions absent from a sample are left
/// untouched when it is ingested.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Sample {
    values: BTreeMap<String, f64>,
}

impl Sample {
    /// Empty sample.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets one dimension, builder style.
    pub fn with(mut self, dimension: impl Into<String>, value: f64) -> Self {
        self.values.insert(dimension.into(), value);
        self
    }

    /// Value of a dimension, if present.
    pub fn get(&self, dimension: &str) -> Option<f64> {
        self.values.get(dimension).copied()
    }

    /// Whether the sample carries no dimensions.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of dimensions carried.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Dimensions and values, sorted by dimension name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// True when both samples carry the same dimensions with bit-for-bit
    /// identical values (so `NaN == NaN` and `0.0 != -0.0`).
    pub fn bitwise_eq(&self, other: &Sample) -> bool {
        self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(other.values.iter())
                .all(|((ka, va), (kb, vb))| ka == kb && va.to_bits() == vb.to_bits())
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for Sample {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// History of one metric key.
#[derive(Debug, Clone)]
pub(crate) struct MetricSeries {
    dimensions: BTreeMap<String, RingBuffer<f64>>,
    last: Option<Sample>,
    capacity: usize,
}

impl MetricSeries {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            dimensions: BTreeMap::new(),
            last: None,
            capacity,
        }
    }

    /// Whether `sample` repeats the previous accepted sample exactly.
    pub(crate) fn is_repeat(&self, sample: &Sample) -> bool {
        self.last.as_ref().is_some_and(|prev| prev.bitwise_eq(sample))
    }

    pub(crate) fn push(&mut self, sample: Sample) {
        for (dim, value) in sample.iter() {
            self.dimensions
                .entry(dim.to_owned())
                .or_insert_with(|| RingBuffer::new(self.capacity))
                .push(value);
        }
        self.last = Some(sample);
    }

    pub(crate) fn snapshot(&self) -> SeriesSnapshot {
        SeriesSnapshot {
            dimensions: self
                .dimensions
                .iter()
                .map(|(name, buf)| (name.clone(), buf.to_vec()))
                .collect(),
        }
    }
}

/// Read-only copy of a series, oldest sample first in every dimension.
///
/// Dimensions that were missing from some samples can be shorter than the
/// rest. Call [`aligned`](Self::aligned) before plotting them against each
/// other.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SeriesSnapshot {
    dimensions: BTreeMap<String, Vec<f64>>,
}

impl SeriesSnapshot {
    /// Values of one dimension, oldest first.
    pub fn dimension(&self, name: &str) -> Option<&[f64]> {
        self.dimensions.get(name).map(Vec::as_slice)
    }

    /// Dimension names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.dimensions.keys().map(String::as_str)
    }

    /// Newest value of a dimension.
    pub fn latest(&self, name: &str) -> Option<f64> {
        self.dimensions.get(name).and_then(|v| v.last().copied())
    }

    /// Length every dimension shares once aligned.
    pub fn len(&self) -> usize {
        self.dimensions.values().map(Vec::len).min().unwrap_or(0)
    }

    /// Whether no aligned sample exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether all dimensions already have the same length.
    pub fn is_aligned(&self) -> bool {
        let mut lens = self.dimensions.values().map(Vec::len);
        match lens.next() {
            Some(first) => lens.all(|l| l == first),
            None => true,
        }
    }

    /// Trims every dimension to the shortest one, keeping the newest samples.
    pub fn aligned(&self) -> SeriesSnapshot {
        let len = self.len();
        SeriesSnapshot {
            dimensions: self
                .dimensions
                .iter()
                .map(|(name, values)| {
                    let skip = values.len() - len;
                    (name.clone(), values[skip..].to_vec())
                })
                .collect(),
        }
    }
}
