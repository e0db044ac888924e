//! Vector search results.

use ahash::AHashSet;
use roaring::RoaringBitmap;
use serde::Serialize;

use crate::vector::distance::VectorMetric;
use crate::vector::index::Neighbor;

/// One matching vector and the document owning it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VecPosting {
    pub vec_id: i64,
    pub doc_num: u64,
    pub score: f32,
}

/// Search hits of one field, best first, at most one per document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VecPostingsList {
    metric: VectorMetric,
    postings: Vec<VecPosting>,
}

impl VecPostingsList {
    pub fn empty(metric: VectorMetric) -> Self {
        VecPostingsList {
            metric,
            postings: Vec::new(),
        }
    }

    /// Collapse best-first `neighbors` to the best hit per document.
    ///
    /// `owner` maps a vector id to its document; vectors it does not know
    /// are skipped.
    pub fn from_neighbors<F>(metric: VectorMetric, neighbors: &[Neighbor], k: usize, owner: F) -> Self
    where
        F: Fn(i64) -> Option<u64>,
    {
        let mut seen = AHashSet::new();
        let mut postings = Vec::with_capacity(k.min(neighbors.len()));
        for neighbor in neighbors {
            if postings.len() >= k {
                break;
            }
            let Some(doc_num) = owner(neighbor.vec_id) else {
                continue;
            };
            if seen.insert(doc_num) {
                postings.push(VecPosting {
                    vec_id: neighbor.vec_id,
                    doc_num,
                    score: neighbor.score,
                });
            }
        }
        VecPostingsList { metric, postings }
    }

    pub fn metric(&self) -> VectorMetric {
        self.metric
    }

    pub fn len(&self) -> usize {
        self.postings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, VecPosting> {
        self.postings.iter()
    }

    pub fn postings(&self) -> &[VecPosting] {
        &self.postings
    }

    pub fn doc_numbers(&self) -> RoaringBitmap {
        self.postings.iter().map(|p| p.doc_num as u32).collect()
    }

    pub fn vec_ids(&self) -> Vec<i64> {
        self.postings.iter().map(|p| p.vec_id).collect()
    }
}

impl<'a> IntoIterator for &'a VecPostingsList {
    type Item = &'a VecPosting;
    type IntoIter = std::slice::Iter<'a, VecPosting>;

    fn into_iter(self) -> Self::IntoIter {
        self.postings.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_keeps_best_per_doc() {
        let neighbors = [
            Neighbor { vec_id: 0, score: 0.1 },
            Neighbor { vec_id: 1, score: 0.2 },
            Neighbor { vec_id: 2, score: 0.3 },
            Neighbor { vec_id: 3, score: 0.4 },
        ];
        // Vectors 0 and 1 belong to doc 7, vector 2 to doc 8.
        let owner = |id: i64| match id {
            0 | 1 => Some(7),
            2 => Some(8),
            _ => None,
        };
        let list = VecPostingsList::from_neighbors(VectorMetric::L2, &neighbors, 5, owner);
        assert_eq!(list.len(), 2);
        assert_eq!(list.postings()[0].vec_id, 0);
        assert_eq!(list.postings()[1].doc_num, 8);
        assert_eq!(list.doc_numbers().len(), 2);

        let list = VecPostingsList::from_neighbors(VectorMetric::L2, &neighbors, 1, owner);
        assert_eq!(list.vec_ids(), vec![0]);
    }
}
