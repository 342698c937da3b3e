//! ORB-style features: FAST-9 corners, intensity-centroid orientation and
//! steered 256-bit BRIEF descriptors.
//!
//! The extractor is single scale. Corners closer than `edge_margin` pixels to
//! the border are discarded so every descriptor sample stays inside the
//! image.

use planar_track_core::{
    CapabilityError, Descriptors, FeatureError, FeatureExtractor, Features, GrayImage,
    GrayImageView, Keypoint,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Descriptor length in bytes.
pub const ORB_DESCRIPTOR_BYTES: usize = 32;

const PATTERN_SEED: u64 = 0x0B1E_F0B5;
const PATTERN_RADIUS: i32 = 13;
const ORIENTATION_RADIUS: i32 = 15;

/// Bresenham circle of radius 3 used by FAST.
const CIRCLE: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// ORB extractor settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OrbParams {
    /// FAST intensity threshold.
    pub fast_threshold: u8,
    /// Keep at most this many keypoints, strongest first.
    pub max_features: usize,
    /// Minimal distance from the image border, in pixels.
    pub edge_margin: usize,
    /// Half-width of the box filter applied before sampling descriptors.
    pub blur_radius: usize,
}

impl Default for OrbParams {
    fn default() -> Self {
        Self {
            fast_threshold: 20,
            max_features: 500,
            edge_margin: 16,
            blur_radius: 2,
        }
    }
}

/// FAST + steered BRIEF feature extractor.
#[derive(Clone, Debug)]
pub struct OrbExtractor {
    params: OrbParams,
    pattern: Vec<[(i32, i32); 2]>,
}

impl Default for OrbExtractor {
    fn default() -> Self {
        Self::new(OrbParams::default())
    }
}

impl OrbExtractor {
    pub fn new(mut params: OrbParams) -> Self {
        params.edge_margin = params.edge_margin.max(ORIENTATION_RADIUS as usize + 1);
        Self {
            params,
            pattern: sampling_pattern(),
        }
    }

    pub fn params(&self) -> &OrbParams {
        &self.params
    }

    /// Detect and describe features of `image`.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, image), fields(w = image.width, h = image.height))
    )]
    pub fn detect_and_describe(&self, image: &GrayImageView<'_>) -> Result<Features, FeatureError> {
        let mut corners = fast_corners(image, self.params.fast_threshold, self.params.edge_margin);
        // stable sort: equal responses keep raster order
        corners.sort_by(|a, b| b.response.total_cmp(&a.response));
        corners.truncate(self.params.max_features);

        let smooth = box_blur(image, self.params.blur_radius);
        let smooth = smooth.view();

        let mut data = Vec::with_capacity(corners.len() * ORB_DESCRIPTOR_BYTES);
        for kp in &mut corners {
            kp.angle = intensity_centroid_angle(image, kp.position.x as i32, kp.position.y as i32);
            data.extend_from_slice(&self.describe(&smooth, kp));
        }

        let descriptors = Descriptors::new(ORB_DESCRIPTOR_BYTES, data)?;
        Features::new(corners, descriptors)
    }

    fn describe(&self, smooth: &GrayImageView<'_>, kp: &Keypoint) -> [u8; ORB_DESCRIPTOR_BYTES] {
        let (sin, cos) = kp.angle.sin_cos();
        let cx = kp.position.x as i32;
        let cy = kp.position.y as i32;
        let at = |(dx, dy): (i32, i32)| -> u8 {
            let rx = (dx as f32 * cos - dy as f32 * sin).round() as i32;
            let ry = (dx as f32 * sin + dy as f32 * cos).round() as i32;
            pixel(smooth, cx + rx, cy + ry)
        };

        let mut out = [0u8; ORB_DESCRIPTOR_BYTES];
        for (bit, [p, q]) in self.pattern.iter().enumerate() {
            if at(*p) < at(*q) {
                out[bit / 8] |= 1 << (bit % 8);
            }
        }
        out
    }
}

impl FeatureExtractor for OrbExtractor {
    fn extract(&mut self, image: &GrayImageView<'_>) -> Result<Features, CapabilityError> {
        if image.data.len() != image.width * image.height {
            return Err(CapabilityError::new(format!(
                "image buffer of {} bytes does not match {}x{}",
                image.data.len(),
                image.width,
                image.height
            )));
        }
        self.detect_and_describe(image)
            .map_err(|e| CapabilityError::new(e.to_string()))
    }
}

/// 256 point pairs inside a disk of radius `PATTERN_RADIUS`, fixed by seed.
fn sampling_pattern() -> Vec<[(i32, i32); 2]> {
    let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
    let mut point = || loop {
        let x = rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS);
        let y = rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS);
        if x * x + y * y <= PATTERN_RADIUS * PATTERN_RADIUS {
            return (x, y);
        }
    };
    let mut pattern = Vec::with_capacity(ORB_DESCRIPTOR_BYTES * 8);
    while pattern.len() < ORB_DESCRIPTOR_BYTES * 8 {
        let p = point();
        let q = point();
        if p != q {
            pattern.push([p, q]);
        }
    }
    pattern
}

#[inline]
fn pixel(img: &GrayImageView<'_>, x: i32, y: i32) -> u8 {
    let x = x.clamp(0, img.width as i32 - 1) as usize;
    let y = y.clamp(0, img.height as i32 - 1) as usize;
    img.data[y * img.width + x]
}

/// Length of the longest circular run of `true` in `flags`.
fn longest_circular_run(flags: &[bool; 16]) -> usize {
    let mut best = 0;
    let mut run = 0;
    for i in 0..32 {
        if flags[i % 16] {
            run += 1;
            best = best.max(run);
        } else {
            run = 0;
        }
    }
    best.min(16)
}

/// FAST-9 response at (x, y): sum of absolute differences of the circle
/// pixels that pass the threshold, or `None` if the pixel is not a corner.
fn fast_score(img: &GrayImageView<'_>, x: i32, y: i32, threshold: i16) -> Option<f32> {
    let c = pixel(img, x, y) as i16;
    let mut brighter = [false; 16];
    let mut darker = [false; 16];
    let mut diffs = [0i16; 16];
    for (k, (dx, dy)) in CIRCLE.iter().enumerate() {
        let d = pixel(img, x + dx, y + dy) as i16 - c;
        diffs[k] = d;
        brighter[k] = d > threshold;
        darker[k] = d < -threshold;
    }
    let is_corner = longest_circular_run(&brighter) >= 9 || longest_circular_run(&darker) >= 9;
    if !is_corner {
        return None;
    }
    let score = diffs
        .iter()
        .filter(|d| d.abs() > threshold)
        .map(|d| (d.abs() - threshold) as f32)
        .sum();
    Some(score)
}

/// FAST-9 corners with 3x3 non-maximum suppression.
fn fast_corners(img: &GrayImageView<'_>, threshold: u8, margin: usize) -> Vec<Keypoint> {
    let (w, h) = (img.width, img.height);
    if w <= 2 * margin || h <= 2 * margin {
        return Vec::new();
    }
    let threshold = threshold as i16;
    let mut scores = vec![0.0f32; w * h];
    for y in margin..h - margin {
        for x in margin..w - margin {
            if let Some(s) = fast_score(img, x as i32, y as i32, threshold) {
                scores[y * w + x] = s;
            }
        }
    }

    let mut out = Vec::new();
    for y in margin..h - margin {
        for x in margin..w - margin {
            let s = scores[y * w + x];
            if s <= 0.0 {
                continue;
            }
            let mut is_max = true;
            'nbh: for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let n = scores[(y as i32 + dy) as usize * w + (x as i32 + dx) as usize];
                    // ties go to the earlier pixel in raster order
                    let earlier = dy < 0 || (dy == 0 && dx < 0);
                    if n > s || (earlier && n == s) {
                        is_max = false;
                        break 'nbh;
                    }
                }
            }
            if is_max {
                out.push(Keypoint {
                    position: nalgebra::Point2::new(x as f32, y as f32),
                    response: s,
                    angle: 0.0,
                });
            }
        }
    }
    out
}

/// Orientation from the intensity centroid of a disk around (x, y).
fn intensity_centroid_angle(img: &GrayImageView<'_>, x: i32, y: i32) -> f32 {
    let r = ORIENTATION_RADIUS;
    let mut m10 = 0.0f32;
    let mut m01 = 0.0f32;
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy > r * r {
                continue;
            }
            let v = pixel(img, x + dx, y + dy) as f32;
            m10 += dx as f32 * v;
            m01 += dy as f32 * v;
        }
    }
    m01.atan2(m10)
}

/// Separable box filter of half-width `radius` with clamped borders.
pub fn box_blur(img: &GrayImageView<'_>, radius: usize) -> GrayImage {
    let (w, h) = (img.width, img.height);
    if radius == 0 || w == 0 || h == 0 {
        return GrayImage {
            width: w,
            height: h,
            data: img.data.to_vec(),
        };
    }
    let r = radius as i32;
    let norm = (2 * r + 1) as u32;

    let mut tmp = vec![0u8; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0u32;
            for k in -r..=r {
                acc += pixel(img, x as i32 + k, y as i32) as u32;
            }
            tmp[y * w + x] = ((acc + norm / 2) / norm) as u8;
        }
    }
    let tmp_view = GrayImageView {
        width: w,
        height: h,
        data: &tmp,
    };
    let mut out = vec![0u8; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0u32;
            for k in -r..=r {
                acc += pixel(&tmp_view, x as i32, y as i32 + k) as u32;
            }
            out[y * w + x] = ((acc + norm / 2) / norm) as u8;
        }
    }
    GrayImage {
        width: w,
        height: h,
        data: out,
    }
}
