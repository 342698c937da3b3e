use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Outcome of one frame, as sent to the caller.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackResult {
    /// Correspondences the pose was fitted to (candidates in detection,
    /// surviving points in tracking).
    pub matches: usize,
    pub inliers: usize,
    /// Template corners in processing-resolution frame coordinates, in the
    /// order top-left, top-right, bottom-right, bottom-left of the template.
    pub corners: Option<[Point2<f32>; 4]>,
}

impl TrackResult {
    /// No template, no features, or a failed step.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn rejected(matches: usize, inliers: usize) -> Self {
        Self {
            matches,
            inliers,
            corners: None,
        }
    }

    pub fn is_detected(&self) -> bool {
        self.corners.is_some()
    }
}

/// Which strategy the controller is using for the next frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    #[default]
    Detection,
    Tracking,
}

/// Branch that produced a frame's result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    /// Nothing ran: no template or the frame could not be rasterized.
    Idle,
    Detection,
    Tracking,
}

/// Result of one pipeline cycle plus what the controller did to get it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameReport {
    pub result: TrackResult,
    pub branch: Branch,
    /// Mode after this frame.
    pub mode: PipelineMode,
    /// Failures and mode transitions, already logged.
    pub diagnostics: Vec<String>,
}
