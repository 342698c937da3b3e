use planar_track_core::CapabilityError;

/// Errors of the tracking pipeline.
///
/// Only [`TargetTracker::init`](crate::TargetTracker::init) and
/// [`TargetTracker::resize`](crate::TargetTracker::resize) return them.
/// Failures inside a frame cycle are logged and reported as diagnostics.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TrackError {
    #[error("failed to load template `{url}`: {reason}")]
    TemplateLoadFailed { url: String, reason: String },
    #[error("feature extraction failed: {0}")]
    ExtractorFailure(CapabilityError),
    #[error("descriptor matching failed: {0}")]
    MatcherFailure(CapabilityError),
    #[error("homography estimation failed: {0}")]
    SolverFailure(CapabilityError),
    #[error("optical flow failed: {0}")]
    TrackerFailure(CapabilityError),
    #[error("frame rasterization failed: {0}")]
    RasterizeFailure(CapabilityError),
    #[error("invalid processing resolution {width}x{height}")]
    InvalidResolution { width: u32, height: u32 },
}

impl TrackError {
    pub(crate) fn template(url: &str, reason: impl ToString) -> Self {
        Self::TemplateLoadFailed {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}
