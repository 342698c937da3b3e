//! Core types and utilities for planar target tracking.
//!
//! This crate is intentionally small: images, homographies, keypoint and
//! descriptor containers, and the capability traits the tracking pipeline
//! calls into. It does *not* depend on any concrete detector, matcher or
//! image library.

mod capability;
mod features;
mod homography;
mod image;
mod logger;

pub use capability::{
    CapabilityError, DescriptorMatcher, FeatureExtractor, FrameRasterizer, HomographySolver,
    OpticalFlowTracker, TemplateSource,
};
pub use features::{
    Descriptors, FeatureError, Features, FlowResult, HomographyEstimate, Keypoint, Neighbor,
};
pub use homography::{estimate_homography, homography_from_4pt, Homography};
pub use image::{sample_bilinear, GrayImage, GrayImageView, RgbaFrame};

#[cfg(feature = "tracing")]
pub use logger::{init_tracing, TraceFormat};

pub use logger::init_stderr_logger;
