use std::time::Instant;

use nalgebra::Point2;
use planar_track_core::{
    CapabilityError, Features, GrayImage, Homography, HomographyEstimate, HomographySolver,
    RgbaFrame,
};

#[cfg(feature = "tracing")]
use tracing::instrument;

use super::corners::project_corners;
use super::gate::{ratio_test, MatchCandidate};
use super::tracking::{TrackingPoints, TrackingState};
use super::{
    Branch, Capabilities, FrameReport, PipelineMode, TrackError, TrackResult, TrackerParams,
};
use crate::template::{load_template, Template, TemplateStore};

/// Follows one planar template through a stream of frames.
///
/// Every frame runs either the detection branch (features, ratio-test
/// matching, robust homography) or the tracking branch (optical flow of the
/// previous inliers, robust homography). A rejected or lost track falls back
/// to detection on the same frame.
pub struct TargetTracker {
    params: TrackerParams,
    caps: Capabilities,
    template: TemplateStore,
    tracking: TrackingState,
    mode: PipelineMode,
    resolution: Option<(u32, u32)>,
}

/// Failures and transitions collected during one frame.
#[derive(Default)]
struct Diagnostics {
    lines: Vec<String>,
}

impl Diagnostics {
    fn failure(&mut self, err: TrackError) {
        log::warn!("{err}");
        self.lines.push(err.to_string());
    }

    fn event(&mut self, msg: String) {
        log::debug!("{msg}");
        self.lines.push(msg);
    }
}

enum TrackStep {
    Accepted {
        result: TrackResult,
        points: TrackingPoints,
    },
    /// Too few points survived or the flow provider failed.
    Lost,
    /// The pose did not pass the gate; the track itself is kept.
    Rejected,
}

struct DetectStep {
    result: TrackResult,
    seed: Option<TrackingPoints>,
}

impl DetectStep {
    fn without_pose(result: TrackResult) -> Self {
        Self { result, seed: None }
    }
}

fn check_resolution(width: u32, height: u32) -> Result<(), TrackError> {
    if width == 0 || height == 0 {
        return Err(TrackError::InvalidResolution { width, height });
    }
    Ok(())
}

impl TargetTracker {
    pub fn new(params: TrackerParams, caps: Capabilities) -> Self {
        Self {
            params,
            caps,
            template: TemplateStore::new(),
            tracking: TrackingState::default(),
            mode: PipelineMode::Detection,
            resolution: None,
        }
    }

    #[inline]
    pub fn params(&self) -> &TrackerParams {
        &self.params
    }

    #[inline]
    pub fn mode(&self) -> PipelineMode {
        self.mode
    }

    pub fn template(&self) -> Option<&Template> {
        self.template.get()
    }

    /// Processing resolution, set by [`init`](Self::init) or
    /// [`resize`](Self::resize).
    pub fn resolution(&self) -> Option<(u32, u32)> {
        self.resolution
    }

    /// Points carried to the next frame, if a track is live.
    pub fn tracking_points(&self) -> Option<&TrackingPoints> {
        self.tracking.active().map(|t| &t.points)
    }

    /// Tracking is both allowed and possible.
    pub fn tracking_enabled(&self) -> bool {
        self.params.enable_tracking && self.caps.flow.is_some()
    }

    /// Load the template at `url` and set the processing resolution.
    ///
    /// Any previous template and track are dropped first, so a failed load
    /// leaves the tracker empty but ready for another `init`.
    #[cfg_attr(feature = "tracing", instrument(level = "info", skip(self)))]
    pub fn init(&mut self, url: &str, width: u32, height: u32) -> Result<&Template, TrackError> {
        check_resolution(width, height)?;
        self.template.clear();
        self.reset_tracking();
        self.resolution = Some((width, height));

        let max_dimension = self
            .params
            .template_max_dimension
            .unwrap_or(width.max(height));
        let Capabilities {
            source,
            rasterizer,
            extractor,
            ..
        } = &mut self.caps;
        let template = load_template(
            &mut **source,
            &mut **rasterizer,
            &mut **extractor,
            url,
            max_dimension,
        )
        .inspect_err(|e| log::warn!("{e}"))?;
        Ok(self.template.install(template))
    }

    /// Change the processing resolution. Returns `false` when it is
    /// unchanged, in which case nothing else happens either.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<bool, TrackError> {
        check_resolution(width, height)?;
        if self.resolution == Some((width, height)) {
            return Ok(false);
        }
        log::info!("processing resolution set to {width}x{height}");
        self.resolution = Some((width, height));
        self.reset_tracking();
        Ok(true)
    }

    /// Drop the live track, if any, and return to detection.
    pub fn reset_tracking(&mut self) {
        self.tracking.clear();
        self.mode = PipelineMode::Detection;
    }

    /// Run one cycle on `frame`, timestamped now.
    pub fn process_frame(&mut self, frame: &RgbaFrame) -> FrameReport {
        self.process_frame_at(frame, Instant::now())
    }

    /// Run one cycle on `frame` captured at `now`. The timestamp only drives
    /// the re-detection cadence.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(w = frame.width, h = frame.height))
    )]
    pub fn process_frame_at(&mut self, frame: &RgbaFrame, now: Instant) -> FrameReport {
        let mut diag = Diagnostics::default();
        let (result, branch) = self.run_cycle(frame, now, &mut diag);
        log::trace!(
            "{branch:?}: matches={} inliers={} detected={}",
            result.matches,
            result.inliers,
            result.is_detected()
        );
        FrameReport {
            result,
            branch,
            mode: self.mode,
            diagnostics: diag.lines,
        }
    }

    fn run_cycle(
        &mut self,
        frame: &RgbaFrame,
        now: Instant,
        diag: &mut Diagnostics,
    ) -> (TrackResult, Branch) {
        let tracking_enabled = self.tracking_enabled();
        let TargetTracker {
            params,
            caps,
            template,
            tracking,
            mode,
            resolution,
        } = self;
        let (Some(template), Some((w, h))) = (template.get(), *resolution) else {
            return (TrackResult::empty(), Branch::Idle);
        };

        let gray = match caps.rasterizer.rasterize(frame, w, h) {
            Ok(gray) if gray.data.len() == gray.width * gray.height && !gray.is_empty() => gray,
            Ok(gray) => {
                diag.failure(TrackError::RasterizeFailure(CapabilityError::new(format!(
                    "{}x{} buffer with {} bytes",
                    gray.width,
                    gray.height,
                    gray.data.len()
                ))));
                return (TrackResult::empty(), Branch::Idle);
            }
            Err(e) => {
                diag.failure(TrackError::RasterizeFailure(e));
                return (TrackResult::empty(), Branch::Idle);
            }
        };

        if *mode == PipelineMode::Tracking {
            if tracking.dwell_expired(now, params.max_tracking_dwell_s) {
                diag.event("tracking dwell elapsed, re-detecting".to_string());
                tracking.clear();
                *mode = PipelineMode::Detection;
            } else {
                match track_step(params, caps, template, tracking, &gray, diag) {
                    TrackStep::Accepted { result, points } => {
                        tracking.advance(gray, points);
                        return (result, Branch::Tracking);
                    }
                    TrackStep::Lost => {
                        tracking.clear();
                        *mode = PipelineMode::Detection;
                    }
                    TrackStep::Rejected => {
                        *mode = PipelineMode::Detection;
                    }
                }
            }
        }

        let step = detect_step(params, caps, template, &gray, tracking_enabled, diag);
        match step.seed {
            Some(points) => {
                diag.event(format!("tracking {} points", points.len()));
                tracking.seed(gray, points, now);
                *mode = PipelineMode::Tracking;
            }
            None => {
                tracking.clear();
                *mode = PipelineMode::Detection;
            }
        }
        (step.result, Branch::Detection)
    }
}

/// Run the solver and validate the shape of its answer.
fn solve(
    solver: &mut dyn HomographySolver,
    src: &[Point2<f32>],
    dst: &[Point2<f32>],
    tolerance: f32,
    diag: &mut Diagnostics,
) -> Option<HomographyEstimate> {
    match solver.estimate(src, dst, tolerance) {
        Ok(est) if est.inlier_mask.len() == src.len() => Some(est),
        Ok(est) => {
            diag.failure(TrackError::SolverFailure(CapabilityError::new(format!(
                "inlier mask has {} entries for {} correspondences",
                est.inlier_mask.len(),
                src.len()
            ))));
            None
        }
        Err(e) => {
            diag.failure(TrackError::SolverFailure(e));
            None
        }
    }
}

/// The estimate's homography if it is usable and has at least `required`
/// inliers.
fn gated_pose(est: &HomographyEstimate, required: usize) -> Option<Homography> {
    est.homography
        .filter(|h| !h.is_degenerate())
        .filter(|_| est.inlier_count() >= required)
}

/// Frame and template positions of the candidates, index-aligned.
fn candidate_points(
    candidates: &[MatchCandidate],
    frame: &Features,
    template: &Features,
) -> Option<(Vec<Point2<f32>>, Vec<Point2<f32>>)> {
    let mut frame_pts = Vec::with_capacity(candidates.len());
    let mut template_pts = Vec::with_capacity(candidates.len());
    for c in candidates {
        frame_pts.push(frame.keypoints().get(c.query_index)?.position);
        template_pts.push(template.keypoints().get(c.train_index)?.position);
    }
    Some((frame_pts, template_pts))
}

fn track_step(
    params: &TrackerParams,
    caps: &mut Capabilities,
    template: &Template,
    tracking: &TrackingState,
    gray: &GrayImage,
    diag: &mut Diagnostics,
) -> TrackStep {
    let (Some(track), Some(flow)) = (tracking.active(), caps.flow.as_deref_mut()) else {
        return TrackStep::Lost;
    };
    let seeds = track.points.frame();
    let flowed = match flow.track(&track.previous.view(), &gray.view(), seeds) {
        Ok(f) if f.points.len() == seeds.len() && f.valid.len() == seeds.len() => f,
        Ok(f) => {
            diag.failure(TrackError::TrackerFailure(CapabilityError::new(format!(
                "{} points and {} flags for {} seeds",
                f.points.len(),
                f.valid.len(),
                seeds.len()
            ))));
            return TrackStep::Lost;
        }
        Err(e) => {
            diag.failure(TrackError::TrackerFailure(e));
            return TrackStep::Lost;
        }
    };

    let (frame_pts, template_pts): (Vec<Point2<f32>>, Vec<Point2<f32>>) = flowed
        .points
        .iter()
        .zip(&flowed.valid)
        .zip(track.points.template())
        .filter(|((p, valid), _)| **valid && p.x.is_finite() && p.y.is_finite())
        .map(|((&p, _), &t)| (p, t))
        .unzip();
    let n = frame_pts.len();
    if n < params.min_tracking_points {
        diag.event(format!(
            "tracking lost: {n} of {} points survived",
            seeds.len()
        ));
        return TrackStep::Lost;
    }

    let Some(est) = solve(
        &mut *caps.solver,
        &frame_pts,
        &template_pts,
        params.reprojection_tolerance,
        diag,
    ) else {
        return TrackStep::Rejected;
    };
    let inliers = est.inlier_count();
    let corners = gated_pose(&est, params.tracking_gate(n))
        .and_then(|pose| project_corners(&pose, template.width(), template.height()));
    let Some(corners) = corners else {
        diag.event(format!("tracking rejected: {inliers} of {n} inliers"));
        return TrackStep::Rejected;
    };

    TrackStep::Accepted {
        result: TrackResult {
            matches: n,
            inliers,
            corners: Some(corners),
        },
        points: TrackingPoints::from_mask(&frame_pts, &template_pts, &est.inlier_mask),
    }
}

fn detect_step(
    params: &TrackerParams,
    caps: &mut Capabilities,
    template: &Template,
    gray: &GrayImage,
    tracking_enabled: bool,
    diag: &mut Diagnostics,
) -> DetectStep {
    let features = caps.extractor.extract(&gray.view()).unwrap_or_else(|e| {
        diag.failure(TrackError::ExtractorFailure(e));
        Features::empty()
    });
    if features.is_empty() || template.features().is_empty() {
        return DetectStep::without_pose(TrackResult::empty());
    }

    let knn = caps
        .matcher
        .knn_match(features.descriptors(), template.features().descriptors(), 2)
        .unwrap_or_else(|e| {
            diag.failure(TrackError::MatcherFailure(e));
            Vec::new()
        });
    let candidates = ratio_test(&knn, params);
    let Some((frame_pts, template_pts)) =
        candidate_points(&candidates, &features, template.features())
    else {
        diag.failure(TrackError::MatcherFailure(CapabilityError::new(
            "neighbour index out of range",
        )));
        return DetectStep::without_pose(TrackResult::empty());
    };
    let n = candidates.len();
    if n < params.min_match_count {
        return DetectStep::without_pose(TrackResult::rejected(n, 0));
    }

    let Some(est) = solve(
        &mut *caps.solver,
        &frame_pts,
        &template_pts,
        params.reprojection_tolerance,
        diag,
    ) else {
        return DetectStep::without_pose(TrackResult::rejected(n, 0));
    };
    let inliers = est.inlier_count();
    let corners = gated_pose(&est, params.detection_gate(n))
        .and_then(|pose| project_corners(&pose, template.width(), template.height()));
    let Some(corners) = corners else {
        return DetectStep::without_pose(TrackResult::rejected(n, inliers));
    };

    let seed = (tracking_enabled && inliers >= params.min_tracking_points)
        .then(|| TrackingPoints::from_mask(&frame_pts, &template_pts, &est.inlier_mask));
    DetectStep {
        result: TrackResult {
            matches: n,
            inliers,
            corners: Some(corners),
        },
        seed,
    }
}
