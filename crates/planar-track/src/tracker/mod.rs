//! Detection/tracking controller.
//!
//! This module wires together feature matching, the inlier acceptance gate,
//! optical-flow tracking of the previous inliers, and projection of the
//! template outline into the frame.

mod capabilities;
mod corners;
mod error;
mod gate;
mod params;
mod pipeline;
mod result;
mod tracking;

pub use capabilities::{Capabilities, ProviderParams};
pub use corners::project_corners;
pub use error::TrackError;
pub use gate::{ratio_test, MatchCandidate};
pub use params::TrackerParams;
pub use pipeline::TargetTracker;
pub use result::{Branch, FrameReport, PipelineMode, TrackResult};
pub use tracking::{ActiveTrack, TrackingPoints, TrackingState};
