//! Similarity metrics and index optimization modes.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};
use crate::util::simd;

/// How vectors are compared.
///
/// `L2` scores are squared Euclidean distances (lower is better);
/// `DotProduct` and `Cosine` scores are inner products (higher is better).
/// Cosine vectors are normalized when indexed and queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum VectorMetric {
    #[default]
    L2,
    DotProduct,
    Cosine,
}

impl VectorMetric {
    /// Score `b` against query `a` under this metric.
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            VectorMetric::L2 => simd::squared_l2(a, b),
            VectorMetric::DotProduct | VectorMetric::Cosine => simd::dot_product(a, b),
        }
    }

    /// Whether lower scores rank first.
    pub fn lower_is_better(&self) -> bool {
        matches!(self, VectorMetric::L2)
    }

    /// Order two scores best first.
    pub fn compare(&self, a: f32, b: f32) -> Ordering {
        let ord = a.partial_cmp(&b).unwrap_or(Ordering::Equal);
        if self.lower_is_better() {
            ord
        } else {
            ord.reverse()
        }
    }

    /// Whether score `a` ranks strictly ahead of score `b`.
    pub fn is_better(&self, a: f32, b: f32) -> bool {
        self.compare(a, b) == Ordering::Less
    }

    /// Whether vectors must be normalized before use.
    pub fn normalizes(&self) -> bool {
        matches!(self, VectorMetric::Cosine)
    }

    /// Prepare a vector for indexing or querying under this metric.
    pub fn prepare(&self, vector: &[f32]) -> Vec<f32> {
        let mut out = vector.to_vec();
        if self.normalizes() {
            normalize(&mut out);
        }
        out
    }

    pub fn name(&self) -> &'static str {
        match self {
            VectorMetric::L2 => "l2",
            VectorMetric::DotProduct => "dot_product",
            VectorMetric::Cosine => "cosine",
        }
    }
}

impl fmt::Display for VectorMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VectorMetric {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "l2" | "euclidean" | "l2_norm" => Ok(VectorMetric::L2),
            "dot_product" | "dot" => Ok(VectorMetric::DotProduct),
            "cosine" => Ok(VectorMetric::Cosine),
            _ => Err(StrataError::invalid_argument(format!(
                "unknown vector metric: {s}"
            ))),
        }
    }
}

/// Normalize a vector to unit length in place; zero vectors are left alone.
pub fn normalize(vector: &mut [f32]) {
    let norm = simd::norm(vector);
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// What a vector field's index trades off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum IndexOptimization {
    /// Full-precision clustered index, full probe count.
    #[default]
    Recall,
    /// Full-precision clustered index, half the probe count.
    Latency,
    /// Clustered index with 8-bit scalar quantized lists.
    MemoryEfficient,
}

impl IndexOptimization {
    pub fn code(&self) -> u64 {
        match self {
            IndexOptimization::Recall => 0,
            IndexOptimization::Latency => 1,
            IndexOptimization::MemoryEfficient => 2,
        }
    }

    pub fn from_code(code: u64) -> Result<Self> {
        match code {
            0 => Ok(IndexOptimization::Recall),
            1 => Ok(IndexOptimization::Latency),
            2 => Ok(IndexOptimization::MemoryEfficient),
            _ => Err(StrataError::corrupt(format!(
                "unknown vector index optimization {code}"
            ))),
        }
    }
}

impl FromStr for IndexOptimization {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "recall" => Ok(IndexOptimization::Recall),
            "latency" => Ok(IndexOptimization::Latency),
            "memory-efficient" | "memory_efficient" => Ok(IndexOptimization::MemoryEfficient),
            _ => Err(StrataError::invalid_argument(format!(
                "unknown index optimization: {s}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_ordering() {
        assert!(VectorMetric::L2.is_better(1.0, 2.0));
        assert!(VectorMetric::DotProduct.is_better(2.0, 1.0));
        assert!(!VectorMetric::Cosine.is_better(1.0, 1.0));
    }

    #[test]
    fn test_scores() {
        let a = [1.0, 0.0];
        let b = [0.0, 2.0];
        assert_eq!(VectorMetric::L2.score(&a, &b), 5.0);
        assert_eq!(VectorMetric::DotProduct.score(&a, &b), 0.0);

        let prepared = VectorMetric::Cosine.prepare(&b);
        assert_eq!(prepared, vec![0.0, 1.0]);
    }

    #[test]
    fn test_parse() {
        assert_eq!("Cosine".parse::<VectorMetric>().unwrap(), VectorMetric::Cosine);
        assert!("manhattan".parse::<VectorMetric>().is_err());
        assert_eq!(
            IndexOptimization::from_code(IndexOptimization::Latency.code()).unwrap(),
            IndexOptimization::Latency
        );
        assert!(IndexOptimization::from_code(9).is_err());
    }
}
