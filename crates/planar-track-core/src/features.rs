//! Keypoints, binary descriptor matrices and matcher/solver outputs.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::Homography;

/// A salient image location. Its descriptor lives in the row with the same
/// index of the owning [`Features`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub position: Point2<f32>,
    /// Detector response, larger is stronger.
    pub response: f32,
    /// Dominant orientation in radians.
    pub angle: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            position: Point2::new(x, y),
            response: 0.0,
            angle: 0.0,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FeatureError {
    #[error("descriptor buffer of {len} bytes is not a multiple of row length {row_len}")]
    RaggedDescriptors { len: usize, row_len: usize },
    #[error("keypoint count {keypoints} does not match descriptor rows {descriptors}")]
    CountMismatch { keypoints: usize, descriptors: usize },
}

/// Row-major matrix of fixed-size binary descriptors.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Descriptors {
    row_len: usize,
    data: Vec<u8>,
}

impl Descriptors {
    pub fn new(row_len: usize, data: Vec<u8>) -> Result<Self, FeatureError> {
        if row_len == 0 {
            if !data.is_empty() {
                return Err(FeatureError::RaggedDescriptors {
                    len: data.len(),
                    row_len,
                });
            }
        } else if data.len() % row_len != 0 {
            return Err(FeatureError::RaggedDescriptors {
                len: data.len(),
                row_len,
            });
        }
        Ok(Self { row_len, data })
    }

    pub fn from_rows<const N: usize>(rows: &[[u8; N]]) -> Self {
        Self {
            row_len: N,
            data: rows.iter().flatten().copied().collect(),
        }
    }

    #[inline]
    pub fn row_len(&self) -> usize {
        self.row_len
    }

    #[inline]
    pub fn rows(&self) -> usize {
        if self.row_len == 0 {
            0
        } else {
            self.data.len() / self.row_len
        }
    }

    #[inline]
    pub fn row(&self, i: usize) -> &[u8] {
        &self.data[i * self.row_len..(i + 1) * self.row_len]
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> + '_ {
        (0..self.rows()).map(move |i| self.row(i))
    }
}

/// Keypoints together with their descriptors. Keypoint count always equals
/// the descriptor row count.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Features {
    keypoints: Vec<Keypoint>,
    descriptors: Descriptors,
}

impl Features {
    pub fn new(keypoints: Vec<Keypoint>, descriptors: Descriptors) -> Result<Self, FeatureError> {
        if keypoints.len() != descriptors.rows() {
            return Err(FeatureError::CountMismatch {
                keypoints: keypoints.len(),
                descriptors: descriptors.rows(),
            });
        }
        Ok(Self {
            keypoints,
            descriptors,
        })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    #[inline]
    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }

    #[inline]
    pub fn descriptors(&self) -> &Descriptors {
        &self.descriptors
    }
}

/// One of the k nearest train descriptors for a query descriptor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Neighbor {
    pub train_index: usize,
    /// Distance in the matcher's native units (bits for Hamming matchers).
    pub distance: f32,
}

/// Output of a robust homography fit: the model (if any) and one inlier flag
/// per input correspondence.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HomographyEstimate {
    pub homography: Option<Homography>,
    pub inlier_mask: Vec<bool>,
}

impl HomographyEstimate {
    pub fn rejected(n: usize) -> Self {
        Self {
            homography: None,
            inlier_mask: vec![false; n],
        }
    }

    pub fn inlier_count(&self) -> usize {
        self.inlier_mask.iter().filter(|&&m| m).count()
    }
}

/// Output of sparse optical flow: new positions and one validity flag per
/// seeded point.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlowResult {
    pub points: Vec<Point2<f32>>,
    pub valid: Vec<bool>,
}
