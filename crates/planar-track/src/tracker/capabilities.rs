use planar_track_core::{
    DescriptorMatcher, FeatureExtractor, FrameRasterizer, HomographySolver, OpticalFlowTracker,
    TemplateSource,
};
use planar_track_features::{
    HammingMatcher, LucasKanadeParams, LucasKanadeTracker, OrbExtractor, OrbParams,
    RansacHomographySolver, RansacParams,
};
use serde::{Deserialize, Serialize};

/// The provider implementations a [`TargetTracker`](crate::TargetTracker)
/// calls into. Optical flow is optional; without it the tracker stays in
/// detection mode.
pub struct Capabilities {
    pub extractor: Box<dyn FeatureExtractor + Send>,
    pub matcher: Box<dyn DescriptorMatcher + Send>,
    pub solver: Box<dyn HomographySolver + Send>,
    pub flow: Option<Box<dyn OpticalFlowTracker + Send>>,
    pub rasterizer: Box<dyn FrameRasterizer + Send>,
    pub source: Box<dyn TemplateSource + Send>,
}

/// Settings of the built-in providers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderParams {
    pub orb: OrbParams,
    pub ransac: RansacParams,
    /// `None` (JSON `null`) disables optical flow.
    pub flow: Option<LucasKanadeParams>,
}

impl Default for ProviderParams {
    fn default() -> Self {
        Self {
            orb: OrbParams::default(),
            ransac: RansacParams::default(),
            flow: Some(LucasKanadeParams::default()),
        }
    }
}

impl Capabilities {
    /// ORB extraction, Hamming matching, RANSAC and pyramidal Lucas-Kanade,
    /// around the given frame rasterizer and template source.
    pub fn builtin(
        rasterizer: impl FrameRasterizer + Send + 'static,
        source: impl TemplateSource + Send + 'static,
    ) -> Self {
        Self::from_params(
            &ProviderParams::default(),
            Box::new(rasterizer),
            Box::new(source),
        )
    }

    /// Built-in providers configured by `params`. The rasterizer and source
    /// are taken boxed so callers can pick them at runtime.
    pub fn from_params(
        params: &ProviderParams,
        rasterizer: Box<dyn FrameRasterizer + Send>,
        source: Box<dyn TemplateSource + Send>,
    ) -> Self {
        Self {
            extractor: Box::new(OrbExtractor::new(params.orb.clone())),
            matcher: Box::new(HammingMatcher::new()),
            solver: Box::new(RansacHomographySolver::new(params.ransac.clone())),
            flow: params.flow.clone().map(|lk| {
                Box::new(LucasKanadeTracker::new(lk)) as Box<dyn OpticalFlowTracker + Send>
            }),
            rasterizer,
            source,
        }
    }

    /// Drop the optical-flow provider.
    pub fn without_flow(mut self) -> Self {
        self.flow = None;
        self
    }
}
