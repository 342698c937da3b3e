//! Reference image storage: fetch, downsample, convert, extract.

use planar_track_core::{
    FeatureExtractor, Features, FrameRasterizer, GrayImage, RgbaFrame, TemplateSource,
};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::TrackError;

/// The reference image the pipeline searches for, with its features.
///
/// Keypoint positions are in the coordinates of the stored (downsampled)
/// grayscale image, which are also the coordinates the reported corners are
/// derived from.
#[derive(Clone, Debug)]
pub struct Template {
    image: GrayImage,
    features: Features,
    source_size: (u32, u32),
}

impl Template {
    pub fn new(image: GrayImage, features: Features, source_size: (u32, u32)) -> Self {
        Self {
            image,
            features,
            source_size,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width as u32
    }

    pub fn height(&self) -> u32 {
        self.image.height as u32
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    pub fn features(&self) -> &Features {
        &self.features
    }

    /// Size of the decoded image before downsampling.
    pub fn source_size(&self) -> (u32, u32) {
        self.source_size
    }
}

/// Holds at most one template. Installing replaces, clearing releases.
#[derive(Debug, Default)]
pub struct TemplateStore {
    current: Option<Template>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<&Template> {
        self.current.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.current.is_some()
    }

    pub fn clear(&mut self) {
        self.current = None;
    }

    pub fn install(&mut self, template: Template) -> &Template {
        self.current.insert(template)
    }
}

/// Size that fits `width x height` into a `max_dimension` square, keeping
/// the aspect ratio. Never upsamples; `0` means unbounded.
pub fn fit_within(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let longest = width.max(height);
    if max_dimension == 0 || longest <= max_dimension {
        return (width, height);
    }
    let scale = max_dimension as f64 / longest as f64;
    let side = |v: u32| ((v as f64 * scale).round() as u32).clamp(1, max_dimension);
    (side(width), side(height))
}

/// Fetch the image named by `url` and build a [`Template`] from it.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(source, rasterizer, extractor))
)]
pub fn load_template(
    source: &mut dyn TemplateSource,
    rasterizer: &mut dyn FrameRasterizer,
    extractor: &mut dyn FeatureExtractor,
    url: &str,
    max_dimension: u32,
) -> Result<Template, TrackError> {
    let rgba: RgbaFrame = source.fetch(url).map_err(|e| TrackError::template(url, e))?;
    if rgba.is_empty() {
        return Err(TrackError::template(url, "decoded image is empty"));
    }
    let source_size = (rgba.width, rgba.height);
    let (w, h) = fit_within(rgba.width, rgba.height, max_dimension);
    let image = rasterizer
        .rasterize(&rgba, w, h)
        .map_err(|e| TrackError::template(url, e))?;
    drop(rgba);

    let features = extractor
        .extract(&image.view())
        .map_err(|e| TrackError::template(url, e))?;
    if features.is_empty() {
        return Err(TrackError::template(url, "no keypoints found"));
    }
    log::info!(
        "template {}x{} (decoded {}x{}), {} keypoints",
        image.width,
        image.height,
        source_size.0,
        source_size.1,
        features.len()
    );
    Ok(Template::new(image, features, source_size))
}
