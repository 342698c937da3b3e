//! Scripted capability providers for driving the controller frame by frame.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use nalgebra::{Matrix3, Point2};
use planar_track::core::{
    CapabilityError, DescriptorMatcher, Descriptors, FeatureExtractor, Features, FlowResult,
    FrameRasterizer, GrayImage, GrayImageView, Homography, HomographyEstimate, HomographySolver,
    Keypoint, Neighbor, OpticalFlowTracker, RgbaFrame, TemplateSource,
};
use planar_track::{Capabilities, TargetTracker, TrackerParams};

pub const TEMPLATE_URL: &str = "mem://template";
pub const TEMPLATE_W: u32 = 200;
pub const TEMPLATE_H: u32 = 100;

/// FIFO of canned responses shared between a test and a provider it no
/// longer owns.
pub struct Script<T>(Arc<Mutex<VecDeque<T>>>);

impl<T> Clone for Script<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Default for Script<T> {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(VecDeque::new())))
    }
}

impl<T> Script<T> {
    pub fn push(&self, v: T) {
        self.0.lock().expect("script lock").push_back(v);
    }

    pub fn pop(&self) -> Option<T> {
        self.0.lock().expect("script lock").pop_front()
    }

    pub fn len(&self) -> usize {
        self.0.lock().expect("script lock").len()
    }
}

/// Call log shared the same way.
pub struct Calls<T>(Arc<Mutex<Vec<T>>>);

impl<T> Clone for Calls<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Default for Calls<T> {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }
}

impl<T: Clone> Calls<T> {
    fn record(&self, v: T) {
        self.0.lock().expect("calls lock").push(v);
    }

    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.0.lock().expect("calls lock"))
    }
}

struct ScriptedSource(Script<Result<RgbaFrame, CapabilityError>>);

impl TemplateSource for ScriptedSource {
    fn fetch(&mut self, url: &str) -> Result<RgbaFrame, CapabilityError> {
        self.0
            .pop()
            .unwrap_or_else(|| Err(CapabilityError::new(format!("nothing at {url}"))))
    }
}

/// Red channel at the frame's own size; fails when a failure is queued.
struct ChannelRasterizer(Script<CapabilityError>);

impl FrameRasterizer for ChannelRasterizer {
    fn rasterize(
        &mut self,
        frame: &RgbaFrame,
        _width: u32,
        _height: u32,
    ) -> Result<GrayImage, CapabilityError> {
        if let Some(err) = self.0.pop() {
            return Err(err);
        }
        let data = frame.data.chunks_exact(4).map(|px| px[0]).collect();
        GrayImage::from_raw(frame.width as usize, frame.height as usize, data)
            .ok_or_else(|| CapabilityError::new("bad frame"))
    }
}

struct ScriptedExtractor(Script<Result<Features, CapabilityError>>);

impl FeatureExtractor for ScriptedExtractor {
    fn extract(&mut self, _image: &GrayImageView<'_>) -> Result<Features, CapabilityError> {
        self.0.pop().unwrap_or_else(|| Ok(Features::empty()))
    }
}

struct ScriptedMatcher(Script<Result<Vec<Vec<Neighbor>>, CapabilityError>>);

impl DescriptorMatcher for ScriptedMatcher {
    fn knn_match(
        &mut self,
        _query: &Descriptors,
        _train: &Descriptors,
        _k: usize,
    ) -> Result<Vec<Vec<Neighbor>>, CapabilityError> {
        self.0.pop().unwrap_or_else(|| Ok(Vec::new()))
    }
}

struct ScriptedSolver {
    script: Script<Result<HomographyEstimate, CapabilityError>>,
    calls: Calls<usize>,
}

impl HomographySolver for ScriptedSolver {
    fn estimate(
        &mut self,
        src: &[Point2<f32>],
        _dst: &[Point2<f32>],
        _tolerance: f32,
    ) -> Result<HomographyEstimate, CapabilityError> {
        self.calls.record(src.len());
        self.script
            .pop()
            .unwrap_or_else(|| Ok(HomographyEstimate::rejected(src.len())))
    }
}

struct ScriptedFlow {
    script: Script<Result<FlowResult, CapabilityError>>,
    calls: Calls<Vec<Point2<f32>>>,
}

impl OpticalFlowTracker for ScriptedFlow {
    fn track(
        &mut self,
        _prev: &GrayImageView<'_>,
        _curr: &GrayImageView<'_>,
        points: &[Point2<f32>],
    ) -> Result<FlowResult, CapabilityError> {
        self.calls.record(points.to_vec());
        self.script.pop().unwrap_or_else(|| {
            Ok(FlowResult {
                points: points.to_vec(),
                valid: vec![true; points.len()],
            })
        })
    }
}

/// Handles to every scripted provider of one tracker.
#[derive(Clone, Default)]
pub struct Harness {
    pub source: Script<Result<RgbaFrame, CapabilityError>>,
    pub raster_failures: Script<CapabilityError>,
    pub extractor: Script<Result<Features, CapabilityError>>,
    pub matcher: Script<Result<Vec<Vec<Neighbor>>, CapabilityError>>,
    pub solver: Script<Result<HomographyEstimate, CapabilityError>>,
    pub solver_calls: Calls<usize>,
    pub flow: Script<Result<FlowResult, CapabilityError>>,
    pub flow_calls: Calls<Vec<Point2<f32>>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capabilities(&self, with_flow: bool) -> Capabilities {
        Capabilities {
            extractor: Box::new(ScriptedExtractor(self.extractor.clone())),
            matcher: Box::new(ScriptedMatcher(self.matcher.clone())),
            solver: Box::new(ScriptedSolver {
                script: self.solver.clone(),
                calls: self.solver_calls.clone(),
            }),
            flow: with_flow.then(|| {
                Box::new(ScriptedFlow {
                    script: self.flow.clone(),
                    calls: self.flow_calls.clone(),
                }) as Box<dyn OpticalFlowTracker + Send>
            }),
            rasterizer: Box::new(ChannelRasterizer(self.raster_failures.clone())),
            source: Box::new(ScriptedSource(self.source.clone())),
        }
    }

    /// Tracker with flow and a template of `template_keypoints` points
    /// already installed at 640x480.
    pub fn ready_tracker(&self, params: TrackerParams, template_keypoints: usize) -> TargetTracker {
        let mut tracker = TargetTracker::new(params, self.capabilities(true));
        self.source.push(Ok(blank_frame(TEMPLATE_W, TEMPLATE_H)));
        self.extractor.push(Ok(grid_features(template_keypoints, 0.0, 0.0)));
        tracker
            .init(TEMPLATE_URL, 640, 480)
            .expect("template install");
        tracker
    }

    /// Queue a detection frame: `n` frame keypoints each matching the
    /// template keypoint of the same index, and a solver answer with
    /// `inliers` inliers for `h`.
    pub fn queue_detection(&self, n: usize, inliers: usize, h: Homography) {
        self.extractor.push(Ok(grid_features(n, 30.0, 20.0)));
        self.matcher.push(Ok(distinct_matches(n)));
        self.solver.push(Ok(estimate(n, inliers, h)));
    }
}

pub fn blank_frame(w: u32, h: u32) -> RgbaFrame {
    RgbaFrame::new(w, h, vec![0; (w * h * 4) as usize]).expect("frame size")
}

/// `n` keypoints on a 10-column grid, shifted by `(ox, oy)`, with one-byte
/// descriptors.
pub fn grid_features(n: usize, ox: f32, oy: f32) -> Features {
    let keypoints: Vec<Keypoint> = (0..n)
        .map(|i| Keypoint::new(ox + 15.0 * (i % 10) as f32 + 5.0, oy + 15.0 * (i / 10) as f32 + 5.0))
        .collect();
    let descriptors = Descriptors::new(1, (0..n).map(|i| i as u8).collect()).expect("rows");
    Features::new(keypoints, descriptors).expect("features")
}

/// Every query `i` matched to train `i` with a clear second best.
pub fn distinct_matches(n: usize) -> Vec<Vec<Neighbor>> {
    (0..n)
        .map(|i| {
            vec![
                Neighbor {
                    train_index: i,
                    distance: 5.0,
                },
                Neighbor {
                    train_index: (i + 1) % n.max(1),
                    distance: 60.0,
                },
            ]
        })
        .collect()
}

/// First `inliers` of `n` correspondences marked as inliers.
pub fn estimate(n: usize, inliers: usize, h: Homography) -> HomographyEstimate {
    HomographyEstimate {
        homography: Some(h),
        inlier_mask: (0..n).map(|i| i < inliers).collect(),
    }
}

/// Frame-to-template homography of a template placed at `(dx, dy)` in the
/// frame.
pub fn placed_at(dx: f64, dy: f64) -> Homography {
    Homography::new(Matrix3::new(1.0, 0.0, -dx, 0.0, 1.0, -dy, 0.0, 0.0, 1.0))
}

/// `valid` flags for `n` points, all moved by `(dx, dy)`.
pub fn flow_shift(points: &[Point2<f32>], dx: f32, dy: f32, valid: &[bool]) -> FlowResult {
    FlowResult {
        points: points.iter().map(|p| Point2::new(p.x + dx, p.y + dy)).collect(),
        valid: valid.to_vec(),
    }
}

pub const BACKGROUND: u8 = 128;

/// Random 8x8 blocks in six gray levels.
pub fn block_texture(w: usize, h: usize, seed: u64) -> GrayImage {
    let mut state = seed;
    let mut next = move || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (state >> 33) as u32
    };
    let bw = w.div_ceil(8);
    let bh = h.div_ceil(8);
    let levels: Vec<u8> = (0..bw * bh).map(|_| (next() % 6) as u8 * 50).collect();
    let data = (0..w * h)
        .map(|i| levels[(i / w / 8) * bw + (i % w) / 8])
        .collect();
    GrayImage::from_raw(w, h, data).expect("size")
}

/// `template` pasted at `(ox, oy)` on a flat canvas.
pub fn scene(template: &GrayImage, w: usize, h: usize, ox: usize, oy: usize) -> GrayImage {
    let mut img = GrayImage::from_raw(w, h, vec![BACKGROUND; w * h]).expect("size");
    for y in 0..template.height {
        for x in 0..template.width {
            img.data[(y + oy) * w + x + ox] = template.data[y * template.width + x];
        }
    }
    img
}
