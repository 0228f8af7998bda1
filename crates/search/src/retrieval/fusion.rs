//! Reciprocal Rank Fusion (RRF) for combining sparse and dense results
//!
//! Each list contributes `1/(k + rank)` for the ids it contains and exactly
//! zero for the ones it lacks. Native scores are only used to rank within a
//! list, so the two score distributions never need normalizing.

use super::{FusedCandidate, Metadata, RankedMatch};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Conventional RRF constant
pub const DEFAULT_RRF_K: u32 = 60;

/// Per-id entry while fusing
#[derive(Default)]
struct Slot {
    sparse: Option<(usize, f32)>,
    dense: Option<(usize, f32)>,
    sparse_metadata: Option<Metadata>,
    dense_metadata: Option<Metadata>,
}

fn score_key(score: f32) -> f32 {
    if score.is_nan() {
        f32::NEG_INFINITY
    } else {
        score
    }
}

/// Rank a list by native score descending, ties by id ascending.
///
/// Ranks are 1-based and dense; a duplicated id keeps its best entry and
/// does not take up a rank of its own.
fn ranked(mut list: Vec<RankedMatch>) -> Vec<(usize, RankedMatch)> {
    list.sort_by(|a, b| {
        score_key(b.score)
            .total_cmp(&score_key(a.score))
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut seen = HashSet::new();
    list.into_iter()
        .filter(|m| seen.insert(m.id.clone()))
        .enumerate()
        .map(|(i, m)| (i + 1, m))
        .collect()
}

/// Fuse the sparse and dense lists into candidates sorted by RRF score
/// descending, ties by id ascending.
///
/// When an id is in both lists its metadata comes from the sparse match.
pub fn merge(sparse: Vec<RankedMatch>, dense: Vec<RankedMatch>, k: u32) -> Vec<FusedCandidate> {
    let mut slots: HashMap<String, Slot> = HashMap::new();

    for (rank, m) in ranked(sparse) {
        let slot = slots.entry(m.id).or_default();
        slot.sparse = Some((rank, m.score));
        slot.sparse_metadata = Some(m.metadata);
    }

    for (rank, m) in ranked(dense) {
        let slot = slots.entry(m.id).or_default();
        slot.dense = Some((rank, m.score));
        slot.dense_metadata = Some(m.metadata);
    }

    let k = f64::from(k);
    let term = |entry: Option<(usize, f32)>| entry.map_or(0.0, |(rank, _)| 1.0 / (k + rank as f64));

    let mut fused: Vec<FusedCandidate> = slots
        .into_iter()
        .map(|(id, slot)| FusedCandidate {
            rrf_score: term(slot.sparse) + term(slot.dense),
            sparse_rank: slot.sparse.map(|(rank, _)| rank),
            dense_rank: slot.dense.map(|(rank, _)| rank),
            sparse_score: slot.sparse.map(|(_, score)| score),
            dense_score: slot.dense.map(|(_, score)| score),
            metadata: slot
                .sparse_metadata
                .or(slot.dense_metadata)
                .unwrap_or_default(),
            id,
        })
        .collect();

    fused.sort_by(|a, b| {
        b.rrf_score
            .partial_cmp(&a.rrf_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });

    fused
}
