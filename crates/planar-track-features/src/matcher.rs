//! Brute-force k-nearest-neighbour matching of binary descriptors.

use planar_track_core::{CapabilityError, DescriptorMatcher, Descriptors, Neighbor};

/// Exhaustive Hamming-distance matcher.
///
/// Implementation note: every query row is compared against every train row.
/// For a single template of a few hundred descriptors this is fast enough
/// and keeps the scan order (and therefore any downstream truncation)
/// identical to the query order.
#[derive(Clone, Debug, Default)]
pub struct HammingMatcher;

impl HammingMatcher {
    pub fn new() -> Self {
        Self
    }
}

#[inline]
pub fn hamming_distance(a: &[u8], b: &[u8]) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}

impl DescriptorMatcher for HammingMatcher {
    fn knn_match(
        &mut self,
        query: &Descriptors,
        train: &Descriptors,
        k: usize,
    ) -> Result<Vec<Vec<Neighbor>>, CapabilityError> {
        if query.rows() > 0 && train.rows() > 0 && query.row_len() != train.row_len() {
            return Err(CapabilityError::new(format!(
                "descriptor length mismatch: query {} bytes, train {} bytes",
                query.row_len(),
                train.row_len()
            )));
        }

        let mut out = Vec::with_capacity(query.rows());
        for q in query.iter() {
            let mut best: Vec<Neighbor> = Vec::with_capacity(k + 1);
            if k == 0 {
                out.push(best);
                continue;
            }
            for (train_index, t) in train.iter().enumerate() {
                let distance = hamming_distance(q, t) as f32;
                if best.len() == k && distance >= best[k - 1].distance {
                    continue;
                }
                let pos = best
                    .iter()
                    .position(|n| distance < n.distance)
                    .unwrap_or(best.len());
                best.insert(
                    pos,
                    Neighbor {
                        train_index,
                        distance,
                    },
                );
                best.truncate(k);
            }
            out.push(best);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_two_nearest_in_ascending_order() {
        let train = Descriptors::from_rows(&[[0xFFu8, 0xFF], [0x00, 0x00], [0x0F, 0x00]]);
        let query = Descriptors::from_rows(&[[0x01u8, 0x00]]);
        let res = HammingMatcher::new()
            .knn_match(&query, &train, 2)
            .expect("match");
        assert_eq!(res.len(), 1);
        let nn = &res[0];
        assert_eq!(nn.len(), 2);
        assert_eq!(nn[0].train_index, 1);
        assert_eq!(nn[0].distance, 1.0);
        assert_eq!(nn[1].train_index, 2);
        assert_eq!(nn[1].distance, 3.0);
    }

    #[test]
    fn single_train_row_yields_one_neighbor() {
        let train = Descriptors::from_rows(&[[0xAAu8; 4]]);
        let query = Descriptors::from_rows(&[[0xAAu8; 4], [0x55; 4]]);
        let res = HammingMatcher::new()
            .knn_match(&query, &train, 2)
            .expect("match");
        assert_eq!(res[0].len(), 1);
        assert_eq!(res[0][0].distance, 0.0);
        assert_eq!(res[1][0].distance, 32.0);
    }

    #[test]
    fn length_mismatch_is_an_error() {
        let train = Descriptors::from_rows(&[[0u8; 4]]);
        let query = Descriptors::from_rows(&[[0u8; 8]]);
        assert!(HammingMatcher::new().knn_match(&query, &train, 2).is_err());
    }
}
