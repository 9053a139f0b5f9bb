//! Score fusion and bounded top-k selection.
//!
//! Hybrid search fuses the vector and lexical result lists by min-max
//! normalizing each list to [0, 1] and combining with configurable weights.
//! A document present in only one mode keeps that mode's contribution and
//! takes a 0 floor in the other, so hybrid search is a union of both modes,
//! not an intersection.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::collections::HashMap;

use crate::types::Document;

/// Smallest contribution kept for a result present in a mode, so the
/// worst-ranked result of a list is not erased by normalization.
const PRESENCE_FLOOR: f32 = 1e-6;

/// Weights for hybrid score fusion.
///
/// Equal weighting is a policy default, not a derived constant; tune per
/// workload via configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FusionConfig {
    #[serde(default = "default_weight")]
    pub vector_weight: f32,

    #[serde(default = "default_weight")]
    pub text_weight: f32,
}

fn default_weight() -> f32 {
    0.5
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            vector_weight: 0.5,
            text_weight: 0.5,
        }
    }
}

impl FusionConfig {
    /// Candidates to fetch per mode so fusion is not starved of cross-modal
    /// matches; `k` applies only to the fused list.
    pub fn candidate_count(&self, k: usize) -> usize {
        (k * 2).max(20)
    }
}

/// Fuse vector and lexical result lists into a single ranked list of at most
/// `k` documents.
///
/// Input documents carry their raw per-mode score in `score`. The returned
/// documents carry the composite score; ties break toward the more recently
/// updated document.
pub fn fuse(
    vector_results: Vec<Document>,
    text_results: Vec<Document>,
    config: &FusionConfig,
    k: usize,
) -> Vec<Document> {
    let vector_norms = normalize(&vector_results);
    let text_norms = normalize(&text_results);

    // id -> (document, composite score)
    let mut fused: HashMap<String, (Document, f32)> =
        HashMap::with_capacity(vector_results.len() + text_results.len());

    for (doc, norm) in vector_results.into_iter().zip(vector_norms) {
        let contribution = config.vector_weight * norm.max(PRESENCE_FLOOR);
        fused.insert(doc.id.clone(), (doc, contribution));
    }

    for (doc, norm) in text_results.into_iter().zip(text_norms) {
        let contribution = config.text_weight * norm.max(PRESENCE_FLOOR);
        match fused.get_mut(&doc.id) {
            Some((_, score)) => *score += contribution,
            None => {
                fused.insert(doc.id.clone(), (doc, contribution));
            }
        }
    }

    let mut ranked: Vec<(Document, f32)> = fused.into_values().collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.0.updated_at.cmp(&a.0.updated_at))
            .then_with(|| a.0.id.cmp(&b.0.id))
    });
    ranked.truncate(k);

    ranked
        .into_iter()
        .map(|(mut doc, score)| {
            doc.score = Some(score);
            doc
        })
        .collect()
}

/// Min-max normalize raw scores to [0, 1]. A single-valued list maps to 1.
fn normalize(results: &[Document]) -> Vec<f32> {
    let Some((min, max)) = min_max(results) else {
        return Vec::new();
    };
    let range = max - min;
    results
        .iter()
        .map(|doc| {
            let score = doc.score.unwrap_or(0.0);
            if range < f32::EPSILON {
                1.0
            } else {
                (score - min) / range
            }
        })
        .collect()
}

/// Single-pass min/max over raw scores.
fn min_max(results: &[Document]) -> Option<(f32, f32)> {
    if results.is_empty() {
        return None;
    }
    let mut min = f32::MAX;
    let mut max = f32::MIN;
    for doc in results {
        let s = doc.score.unwrap_or(0.0);
        if s < min {
            min = s;
        }
        if s > max {
            max = s;
        }
    }
    Some((min, max))
}

/// Bounded top-k selection: a fixed-size min-heap keyed by score.
///
/// Keeps memory at O(k) while scanning arbitrarily many candidates, O(n log k)
/// total. Equal scores keep insertion order.
pub struct TopK<T> {
    k: usize,
    seq: u64,
    heap: BinaryHeap<Reverse<Entry<T>>>,
}

struct Entry<T> {
    score: OrderedFloat<f32>,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Later insertions compare smaller on ties, so the earliest-seen
        // candidate survives eviction.
        self.score
            .cmp(&other.score)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> TopK<T> {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            seq: 0,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    /// Offer a candidate. Evicts the current minimum when over capacity.
    pub fn push(&mut self, score: f32, item: T) {
        if self.k == 0 {
            return;
        }
        let entry = Entry {
            score: OrderedFloat(score),
            seq: self.seq,
            item,
        };
        self.seq += 1;
        if self.heap.len() < self.k {
            self.heap.push(Reverse(entry));
        } else if let Some(Reverse(min)) = self.heap.peek() {
            if entry > *min {
                self.heap.pop();
                self.heap.push(Reverse(entry));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Consume the heap, yielding `(score, item)` in descending score order.
    pub fn into_sorted_vec(self) -> Vec<(f32, T)> {
        let mut entries: Vec<Entry<T>> = self.heap.into_iter().map(|Reverse(e)| e).collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries.into_iter().map(|e| (e.score.0, e.item)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DocumentType;

    fn doc(id: &str, score: f32, updated_at: u64) -> Document {
        let mut d = Document::new("c", "conn", DocumentType::Query, id).with_id(id);
        d.score = Some(score);
        d.updated_at = updated_at;
        d
    }

    #[test]
    fn test_fuse_overlap_ranks_first() {
        let vector = vec![doc("a", 0.9, 0), doc("b", 0.5, 0)];
        let text = vec![doc("a", 3.0, 0), doc("c", 1.0, 0)];
        let fused = fuse(vector, text, &FusionConfig::default(), 10);
        assert_eq!(fused[0].id, "a");
        assert!(fused[0].score.unwrap() > fused[1].score.unwrap());
    }

    #[test]
    fn test_fuse_union_keeps_single_mode_results() {
        let vector = vec![doc("a", 0.9, 0), doc("b", 0.5, 0)];
        let text = vec![doc("c", 4.0, 0), doc("d", 1.0, 0)];
        let fused = fuse(vector, text, &FusionConfig::default(), 10);
        assert_eq!(fused.len(), 4);
        // Even the worst-ranked text-only result keeps a nonzero composite.
        let d = fused.iter().find(|f| f.id == "d").unwrap();
        assert!(d.score.unwrap() > 0.0);
    }

    #[test]
    fn test_fuse_k_applies_to_fused_list() {
        let vector = vec![doc("a", 0.9, 0), doc("b", 0.8, 0), doc("c", 0.7, 0)];
        let text = vec![doc("d", 2.0, 0), doc("e", 1.0, 0)];
        let fused = fuse(vector, text, &FusionConfig::default(), 2);
        assert_eq!(fused.len(), 2);
    }

    #[test]
    fn test_fuse_tie_breaks_on_updated_at() {
        // Identical contributions, different recency.
        let vector = vec![doc("old", 1.0, 100), doc("new", 1.0, 200)];
        let fused = fuse(vector, Vec::new(), &FusionConfig::default(), 10);
        assert_eq!(fused[0].id, "new");
        assert_eq!(fused[1].id, "old");
    }

    #[test]
    fn test_fuse_weights_shift_ranking() {
        let vector = vec![doc("v", 1.0, 0), doc("x", 0.1, 0)];
        let text = vec![doc("t", 5.0, 0), doc("x", 0.5, 0)];
        let vector_heavy = FusionConfig {
            vector_weight: 1.0,
            text_weight: 0.0,
        };
        let fused = fuse(vector.clone(), text.clone(), &vector_heavy, 1);
        assert_eq!(fused[0].id, "v");

        let text_heavy = FusionConfig {
            vector_weight: 0.0,
            text_weight: 1.0,
        };
        let fused = fuse(vector, text, &text_heavy, 1);
        assert_eq!(fused[0].id, "t");
    }

    #[test]
    fn test_fuse_empty_inputs() {
        let fused = fuse(Vec::new(), Vec::new(), &FusionConfig::default(), 5);
        assert!(fused.is_empty());
    }

    #[test]
    fn test_single_result_normalizes_to_one() {
        let fused = fuse(vec![doc("a", 0.3, 0)], Vec::new(), &FusionConfig::default(), 5);
        assert!((fused[0].score.unwrap() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_topk_orders_descending() {
        let mut top = TopK::new(3);
        for (i, s) in [0.1f32, 0.9, 0.5, 0.7, 0.3].iter().enumerate() {
            top.push(*s, i);
        }
        let out = top.into_sorted_vec();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].1, 1); // 0.9
        assert_eq!(out[1].1, 3); // 0.7
        assert_eq!(out[2].1, 2); // 0.5
        assert!(out[0].0 >= out[1].0 && out[1].0 >= out[2].0);
    }

    #[test]
    fn test_topk_matches_full_sort_oracle() {
        // Deterministic pseudo-random scores, no external RNG needed.
        let mut state = 0x2545F4914F6CDD1Du64;
        let mut scores = Vec::with_capacity(600);
        for _ in 0..600 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            scores.push((state % 100_000) as f32 / 100_000.0);
        }

        for k in [1usize, 5, 50] {
            let mut top = TopK::new(k);
            for (i, s) in scores.iter().enumerate() {
                top.push(*s, i);
            }
            let got: Vec<usize> = top.into_sorted_vec().into_iter().map(|(_, i)| i).collect();

            let mut oracle: Vec<(f32, usize)> =
                scores.iter().cloned().zip(0..scores.len()).collect();
            oracle.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
            let expected: Vec<usize> = oracle.into_iter().take(k).map(|(_, i)| i).collect();

            assert_eq!(got, expected, "k={k}");
        }
    }

    #[test]
    fn test_topk_zero_k() {
        let mut top: TopK<u32> = TopK::new(0);
        top.push(1.0, 7);
        assert!(top.is_empty());
        assert!(top.into_sorted_vec().is_empty());
    }
}
