//! RANSAC homography estimation over 4-point minimal samples.

use nalgebra::Point2;
use planar_track_core::{
    estimate_homography, homography_from_4pt, CapabilityError, Homography, HomographyEstimate,
    HomographySolver,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// RANSAC settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacParams {
    /// Upper bound on the number of minimal samples drawn.
    pub max_iterations: usize,
    /// Desired probability of drawing at least one all-inlier sample; drives
    /// early termination.
    pub confidence: f64,
    /// Seed of the sampler. Every `estimate` call restarts from it, so equal
    /// inputs give equal outputs.
    pub seed: u64,
    /// Refit the model on the consensus set with the DLT.
    pub refine: bool,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            max_iterations: 2000,
            confidence: 0.995,
            seed: 0x5EED_0F_4A11,
            refine: true,
        }
    }
}

/// Robust homography solver.
#[derive(Clone, Debug, Default)]
pub struct RansacHomographySolver {
    params: RansacParams,
}

impl RansacHomographySolver {
    pub fn new(params: RansacParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &RansacParams {
        &self.params
    }
}

fn inlier_mask(h: &Homography, src: &[Point2<f32>], dst: &[Point2<f32>], tol_sq: f32) -> Vec<bool> {
    src.iter()
        .zip(dst)
        .map(|(&s, &d)| h.transfer_error_sq(s, d) <= tol_sq)
        .collect()
}

fn count(mask: &[bool]) -> usize {
    mask.iter().filter(|&&m| m).count()
}

#[inline]
fn twice_area(a: Point2<f32>, b: Point2<f32>, c: Point2<f32>) -> f32 {
    ((b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)).abs()
}

/// True when any three of the four points are (nearly) collinear.
fn has_collinear_triple(p: &[Point2<f32>; 4]) -> bool {
    const EPS: f32 = 1e-3;
    twice_area(p[0], p[1], p[2]) < EPS
        || twice_area(p[0], p[1], p[3]) < EPS
        || twice_area(p[0], p[2], p[3]) < EPS
        || twice_area(p[1], p[2], p[3]) < EPS
}

fn draw_sample(rng: &mut StdRng, n: usize) -> [usize; 4] {
    let mut idx = [0usize; 4];
    let mut k = 0;
    while k < 4 {
        let i = rng.gen_range(0..n);
        if !idx[..k].contains(&i) {
            idx[k] = i;
            k += 1;
        }
    }
    idx
}

/// Number of samples needed to hit an all-inlier sample with `confidence`
/// given the current inlier ratio.
fn required_iterations(confidence: f64, inlier_ratio: f64, cap: usize) -> usize {
    let w4 = inlier_ratio.powi(4);
    if w4 >= 1.0 - f64::EPSILON {
        return 1;
    }
    if w4 <= f64::EPSILON {
        return cap;
    }
    let n = (1.0 - confidence).ln() / (1.0 - w4).ln();
    if !n.is_finite() {
        return cap;
    }
    (n.ceil() as usize).clamp(1, cap)
}

impl HomographySolver for RansacHomographySolver {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, src, dst), fields(n = src.len()))
    )]
    fn estimate(
        &mut self,
        src: &[Point2<f32>],
        dst: &[Point2<f32>],
        tolerance: f32,
    ) -> Result<HomographyEstimate, CapabilityError> {
        if src.len() != dst.len() {
            return Err(CapabilityError::new(format!(
                "point count mismatch: {} source vs {} destination",
                src.len(),
                dst.len()
            )));
        }
        let n = src.len();
        if n < 4 {
            return Ok(HomographyEstimate::rejected(n));
        }

        let tol_sq = tolerance * tolerance;
        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let mut best: Option<(Homography, Vec<bool>, usize)> = None;
        let mut budget = self.params.max_iterations.max(1);
        let mut iter = 0;

        while iter < budget {
            iter += 1;
            let idx = if n == 4 { [0, 1, 2, 3] } else { draw_sample(&mut rng, n) };
            let s = idx.map(|i| src[i]);
            let d = idx.map(|i| dst[i]);
            if has_collinear_triple(&s) || has_collinear_triple(&d) {
                if n == 4 {
                    break;
                }
                continue;
            }
            let Some(h) = homography_from_4pt(&s, &d) else {
                continue;
            };
            if h.is_degenerate() {
                continue;
            }
            let mask = inlier_mask(&h, src, dst, tol_sq);
            let c = count(&mask);
            if best.as_ref().is_none_or(|(_, _, bc)| c > *bc) {
                budget = required_iterations(
                    self.params.confidence,
                    c as f64 / n as f64,
                    self.params.max_iterations.max(1),
                );
                best = Some((h, mask, c));
            }
            if n == 4 {
                break;
            }
        }

        let Some((mut h, mut mask, mut c)) = best else {
            log::debug!("ransac: no valid minimal sample among {n} correspondences");
            return Ok(HomographyEstimate::rejected(n));
        };

        if self.params.refine && c > 4 {
            let (s_in, d_in): (Vec<_>, Vec<_>) = src
                .iter()
                .zip(dst)
                .zip(&mask)
                .filter(|(_, m)| **m)
                .map(|((&s, &d), _)| (s, d))
                .unzip();
            if let Some(refit) = estimate_homography(&s_in, &d_in).filter(|r| !r.is_degenerate()) {
                let refit_mask = inlier_mask(&refit, src, dst, tol_sq);
                let refit_count = count(&refit_mask);
                if refit_count >= c {
                    h = refit;
                    mask = refit_mask;
                    c = refit_count;
                }
            }
        }

        log::trace!("ransac: {c}/{n} inliers after {iter} iterations");
        Ok(HomographyEstimate {
            homography: Some(h),
            inlier_mask: mask,
        })
    }
}
