//! Pyramidal Lucas-Kanade sparse optical flow.
//!
//! Forward-additive formulation: for each point the displacement is refined
//! coarse to fine, with Gauss-Newton iterations on a square window at every
//! pyramid level. A point is reported invalid when its structure tensor is
//! too weak, the solve diverges, or it leaves the image.

use nalgebra::{Matrix2, Point2, Vector2};
use planar_track_core::{
    sample_bilinear, CapabilityError, FlowResult, GrayImage, GrayImageView, OpticalFlowTracker,
};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Lucas-Kanade settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LucasKanadeParams {
    /// Half-width of the integration window (window is `2r+1` square).
    pub window_radius: usize,
    /// Number of pyramid levels above the base image.
    pub max_level: usize,
    /// Gauss-Newton iterations per level.
    pub max_iterations: usize,
    /// Stop iterating when the update is shorter than this (pixels).
    pub epsilon: f32,
    /// Minimal smallest eigenvalue of the per-pixel averaged structure tensor.
    pub min_eigenvalue: f32,
    /// Reject points whose mean absolute residual exceeds this (gray levels).
    pub max_residual: f32,
}

impl Default for LucasKanadeParams {
    fn default() -> Self {
        Self {
            window_radius: 7,
            max_level: 3,
            max_iterations: 30,
            epsilon: 0.01,
            min_eigenvalue: 1.0,
            max_residual: 40.0,
        }
    }
}

/// CPU pyramidal Lucas-Kanade tracker.
#[derive(Clone, Debug, Default)]
pub struct LucasKanadeTracker {
    params: LucasKanadeParams,
}

/// 2x downsampling by 2x2 averaging until either side would drop below
/// `min_side`.
pub fn build_pyramid(base: &GrayImageView<'_>, levels: usize, min_side: usize) -> Vec<GrayImage> {
    let mut out = vec![GrayImage {
        width: base.width,
        height: base.height,
        data: base.data.to_vec(),
    }];
    for _ in 0..levels {
        let Some(prev) = out.last() else {
            break;
        };
        let (w, h) = (prev.width / 2, prev.height / 2);
        if w < min_side || h < min_side {
            break;
        }
        let mut data = vec![0u8; w * h];
        for y in 0..h {
            for x in 0..w {
                let i = 2 * y * prev.width + 2 * x;
                let s = prev.data[i] as u32
                    + prev.data[i + 1] as u32
                    + prev.data[i + prev.width] as u32
                    + prev.data[i + prev.width + 1] as u32;
                data[y * w + x] = ((s + 2) / 4) as u8;
            }
        }
        out.push(GrayImage {
            width: w,
            height: h,
            data,
        });
    }
    out
}

impl LucasKanadeTracker {
    pub fn new(params: LucasKanadeParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &LucasKanadeParams {
        &self.params
    }

    /// Track one point through the pyramids. Returns the new position or
    /// `None` if the point was lost.
    fn track_point(
        &self,
        prev: &[GrayImage],
        curr: &[GrayImage],
        p: Point2<f32>,
    ) -> Option<Point2<f32>> {
        let r = self.params.window_radius as i32;
        let npix = ((2 * r + 1) * (2 * r + 1)) as f32;
        let levels = prev.len().min(curr.len());
        let mut guess = Vector2::<f32>::zeros();

        for level in (0..levels).rev() {
            let scale = (1u32 << level) as f32;
            let i_img = prev[level].view();
            let j_img = curr[level].view();
            let pl = Vector2::new(p.x / scale, p.y / scale);

            // template patch and gradients, fixed for this level
            let mut patch = Vec::with_capacity(npix as usize);
            let mut g = Matrix2::<f32>::zeros();
            for dy in -r..=r {
                for dx in -r..=r {
                    let x = pl.x + dx as f32;
                    let y = pl.y + dy as f32;
                    let ix = 0.5 * (sample_bilinear(&i_img, x + 1.0, y) - sample_bilinear(&i_img, x - 1.0, y));
                    let iy = 0.5 * (sample_bilinear(&i_img, x, y + 1.0) - sample_bilinear(&i_img, x, y - 1.0));
                    let v = sample_bilinear(&i_img, x, y);
                    g[(0, 0)] += ix * ix;
                    g[(0, 1)] += ix * iy;
                    g[(1, 1)] += iy * iy;
                    patch.push((v, ix, iy));
                }
            }
            g[(1, 0)] = g[(0, 1)];

            let (a, b, c) = (g[(0, 0)] / npix, g[(0, 1)] / npix, g[(1, 1)] / npix);
            let min_eig = 0.5 * (a + c) - ((0.5 * (a - c)).powi(2) + b * b).sqrt();
            if !min_eig.is_finite() || min_eig < self.params.min_eigenvalue {
                return None;
            }
            let g_inv = g.try_inverse()?;

            let mut v = Vector2::<f32>::zeros();
            for _ in 0..self.params.max_iterations {
                let mut rhs = Vector2::<f32>::zeros();
                let mut k = 0;
                for dy in -r..=r {
                    for dx in -r..=r {
                        let (iv, ix, iy) = patch[k];
                        k += 1;
                        let x = pl.x + guess.x + v.x + dx as f32;
                        let y = pl.y + guess.y + v.y + dy as f32;
                        let diff = iv - sample_bilinear(&j_img, x, y);
                        rhs.x += diff * ix;
                        rhs.y += diff * iy;
                    }
                }
                let eta = g_inv * rhs;
                if !eta.x.is_finite() || !eta.y.is_finite() {
                    return None;
                }
                v += eta;
                if eta.norm() < self.params.epsilon {
                    break;
                }
            }

            if level > 0 {
                guess = 2.0 * (guess + v);
            } else {
                guess += v;
                let residual = mean_abs_residual(&patch, &j_img, pl + guess, r);
                if residual > self.params.max_residual {
                    return None;
                }
            }
        }

        let q = Point2::new(p.x + guess.x, p.y + guess.y);
        let base = &curr[0];
        let inside = q.x >= 0.0
            && q.y >= 0.0
            && q.x <= (base.width as f32 - 1.0)
            && q.y <= (base.height as f32 - 1.0);
        (q.x.is_finite() && q.y.is_finite() && inside).then_some(q)
    }
}

fn mean_abs_residual(
    patch: &[(f32, f32, f32)],
    j_img: &GrayImageView<'_>,
    at: Vector2<f32>,
    r: i32,
) -> f32 {
    let mut sum = 0.0;
    let mut k = 0;
    for dy in -r..=r {
        for dx in -r..=r {
            let (iv, _, _) = patch[k];
            k += 1;
            sum += (iv - sample_bilinear(j_img, at.x + dx as f32, at.y + dy as f32)).abs();
        }
    }
    sum / patch.len().max(1) as f32
}

impl OpticalFlowTracker for LucasKanadeTracker {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(n = points.len()))
    )]
    fn track(
        &mut self,
        prev: &GrayImageView<'_>,
        curr: &GrayImageView<'_>,
        points: &[Point2<f32>],
    ) -> Result<FlowResult, CapabilityError> {
        if prev.width != curr.width || prev.height != curr.height {
            return Err(CapabilityError::new(format!(
                "frame size changed between calls: {}x{} -> {}x{}",
                prev.width, prev.height, curr.width, curr.height
            )));
        }
        let min_side = 2 * self.params.window_radius + 1;
        let prev_pyr = build_pyramid(prev, self.params.max_level, min_side);
        let curr_pyr = build_pyramid(curr, self.params.max_level, min_side);

        let mut out = FlowResult {
            points: Vec::with_capacity(points.len()),
            valid: Vec::with_capacity(points.len()),
        };
        for &p in points {
            match self.track_point(&prev_pyr, &curr_pyr, p) {
                Some(q) => {
                    out.points.push(q);
                    out.valid.push(true);
                }
                None => {
                    out.points.push(p);
                    out.valid.push(false);
                }
            }
        }
        Ok(out)
    }
}
