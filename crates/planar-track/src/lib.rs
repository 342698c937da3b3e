//! Follow a planar reference image through a video stream.
//!
//! The crate is organised around [`TargetTracker`], a two-state controller:
//!
//! - **Detection**: extract features of the frame, match them against the
//!   template with a ratio test, and fit a robust homography.
//! - **Tracking**: move the previous inliers with sparse optical flow and
//!   refit the homography, which is far cheaper than re-detection.
//!
//! Each frame yields a [`TrackResult`]: match and inlier counts plus the four
//! template corners in frame coordinates when a pose was accepted.
//!
//! The heavy lifting is delegated to capability providers (traits from
//! [`planar_track_core`]). [`Capabilities::builtin`] wires up the CPU
//! implementations from [`planar_track_features`].
//!
//! ## Quickstart
//!
//! ```no_run
//! use planar_track::{Capabilities, TargetTracker, TrackerParams};
//! use planar_track::raster::{load_rgba_frame, FileTemplateSource, ImageRasterizer};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let caps = Capabilities::builtin(ImageRasterizer::default(), FileTemplateSource::new());
//! let mut tracker = TargetTracker::new(TrackerParams::default(), caps);
//! tracker.init("poster.png", 640, 480)?;
//!
//! let frame = load_rgba_frame("frame_0001.png")?;
//! let report = tracker.process_frame(&frame);
//! println!("{}", serde_json::to_string(&report.result)?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Hosting
//!
//! [`session::spawn_worker`] moves a tracker onto its own thread and speaks
//! the JSON message protocol in [`session::InMessage`] and
//! [`session::OutMessage`].

pub mod io;
pub mod session;
pub mod template;
mod tracker;

#[cfg(feature = "image")]
pub mod raster;

pub use planar_track_core as core;
pub use planar_track_features as features;

pub use template::{Template, TemplateStore};
pub use tracker::{
    project_corners, ratio_test, ActiveTrack, Branch, Capabilities, FrameReport, MatchCandidate,
    PipelineMode, ProviderParams, TargetTracker, TrackError, TrackResult, TrackerParams,
    TrackingPoints, TrackingState,
};
