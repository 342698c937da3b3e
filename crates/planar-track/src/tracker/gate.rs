//! Ratio-test filtering of k-nearest-neighbour matches.

use planar_track_core::Neighbor;

use crate::TrackerParams;

/// A frame descriptor paired with its best template descriptor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MatchCandidate {
    /// Index into the frame features.
    pub query_index: usize,
    /// Index into the template features.
    pub train_index: usize,
    pub distance: f32,
}

/// Keep the best neighbour of every query whose match is distinctive.
///
/// With two neighbours `m, n` the match is kept when
/// `m.distance <= ratio * n.distance`; with a single neighbour when
/// `m.distance < single_neighbor_max_distance`. Queries are scanned in
/// order and the scan stops once `max_candidates` are collected, so which
/// matches survive the cap depends on the matcher's query order.
pub fn ratio_test(knn: &[Vec<Neighbor>], params: &TrackerParams) -> Vec<MatchCandidate> {
    let mut out = Vec::new();
    for (query_index, neighbors) in knn.iter().enumerate() {
        if out.len() >= params.max_candidates {
            break;
        }
        let keep = match neighbors.as_slice() {
            [] => None,
            [m] => (m.distance < params.single_neighbor_max_distance).then_some(m),
            [m, n, ..] => (m.distance <= params.ratio * n.distance).then_some(m),
        };
        if let Some(m) = keep {
            out.push(MatchCandidate {
                query_index,
                train_index: m.train_index,
                distance: m.distance,
            });
        }
    }
    out
}
