//! Interfaces of the stateless capability providers the tracking pipeline
//! calls into: feature extraction, descriptor matching, homography solving,
//! sparse optical flow, frame rasterization and template fetching.

use nalgebra::Point2;

use crate::{
    Descriptors, Features, FlowResult, GrayImage, GrayImageView, HomographyEstimate, Neighbor,
    RgbaFrame,
};

/// Failure reported by a capability provider.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CapabilityError {
    message: String,
}

impl CapabilityError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Detects keypoints and computes their descriptors.
pub trait FeatureExtractor {
    fn extract(&mut self, image: &GrayImageView<'_>) -> Result<Features, CapabilityError>;
}

/// k-nearest-neighbour search from query descriptors into train descriptors.
pub trait DescriptorMatcher {
    /// One list per query row, at most `k` entries, ascending distance.
    fn knn_match(
        &mut self,
        query: &Descriptors,
        train: &Descriptors,
        k: usize,
    ) -> Result<Vec<Vec<Neighbor>>, CapabilityError>;
}

/// Robust estimation of `dst ~ H * src`.
pub trait HomographySolver {
    /// `tolerance` is the maximal reprojection error (pixels) for an inlier.
    fn estimate(
        &mut self,
        src: &[Point2<f32>],
        dst: &[Point2<f32>],
        tolerance: f32,
    ) -> Result<HomographyEstimate, CapabilityError>;
}

/// Sparse point tracking between two consecutive grayscale frames.
pub trait OpticalFlowTracker {
    fn track(
        &mut self,
        prev: &GrayImageView<'_>,
        curr: &GrayImageView<'_>,
        points: &[Point2<f32>],
    ) -> Result<FlowResult, CapabilityError>;
}

/// Turns a raw video frame into a grayscale buffer of the processing size.
pub trait FrameRasterizer {
    fn rasterize(
        &mut self,
        frame: &RgbaFrame,
        width: u32,
        height: u32,
    ) -> Result<GrayImage, CapabilityError>;
}

/// Fetches and decodes the reference image named by a URL.
pub trait TemplateSource {
    fn fetch(&mut self, url: &str) -> Result<RgbaFrame, CapabilityError>;
}
