use serde::{Deserialize, Serialize};

/// Thresholds of the detection/tracking loop.
///
/// The defaults reproduce the behaviour the pipeline was tuned for on
/// ORB features at VGA-class processing resolutions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerParams {
    /// Lowe ratio: the best neighbour is kept when its distance is at most
    /// `ratio` times the second best.
    pub ratio: f32,
    /// With a single neighbour available, keep it only below this distance.
    pub single_neighbor_max_distance: f32,
    /// Upper bound on the candidates handed to the homography solver.
    pub max_candidates: usize,
    /// Fewer candidates than this skip pose estimation.
    pub min_match_count: usize,
    /// Minimal point count that can seed or sustain tracking.
    pub min_tracking_points: usize,
    /// Absolute floor of the inlier acceptance gate.
    pub min_inliers: usize,
    /// Proportional floor of the gate in detection mode.
    pub detection_inlier_ratio: f64,
    /// Proportional floor of the gate in tracking mode.
    pub tracking_inlier_ratio: f64,
    /// Maximal reprojection error of an inlier, in template pixels.
    pub reprojection_tolerance: f32,
    /// Allow the controller to enter tracking mode at all.
    pub enable_tracking: bool,
    /// Force a re-detection once tracking has lasted this long (seconds).
    pub max_tracking_dwell_s: Option<f64>,
    /// Longest side of the stored template. `None` uses the longest side of
    /// the processing resolution.
    pub template_max_dimension: Option<u32>,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            ratio: 0.9,
            single_neighbor_max_distance: 40.0,
            max_candidates: 500,
            min_match_count: 6,
            min_tracking_points: 6,
            min_inliers: 4,
            detection_inlier_ratio: 0.2,
            tracking_inlier_ratio: 0.25,
            reprojection_tolerance: 5.0,
            enable_tracking: true,
            max_tracking_dwell_s: Some(2.5),
            template_max_dimension: None,
        }
    }
}

impl TrackerParams {
    /// Inliers needed to accept a pose fitted to `n` correspondences in
    /// detection mode.
    pub fn detection_gate(&self, n: usize) -> usize {
        inlier_gate(self.min_inliers, self.detection_inlier_ratio, n)
    }

    /// Inliers needed to accept a pose fitted to `n` tracked points.
    pub fn tracking_gate(&self, n: usize) -> usize {
        inlier_gate(self.min_inliers, self.tracking_inlier_ratio, n)
    }
}

fn inlier_gate(floor: usize, ratio: f64, n: usize) -> usize {
    let proportional = (ratio * n as f64).floor();
    if proportional.is_finite() && proportional > 0.0 {
        floor.max(proportional as usize)
    } else {
        floor
    }
}
