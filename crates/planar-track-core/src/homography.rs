//! Plane-to-plane projective mappings and their estimation from point
//! correspondences.

use nalgebra::{Matrix3, Point2, SMatrix, SVector, SymmetricEigen, Vector3};

/// Smallest normalised determinant of a usable mapping.
const MIN_NORMALIZED_DET: f64 = 1e-8;

/// 3x3 projective transform mapping `src` onto `dst` as `dst ~ H * src`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    pub fn identity() -> Self {
        Self::new(Matrix3::identity())
    }

    /// All-zero matrix; never a valid mapping.
    pub fn zero() -> Self {
        Self::new(Matrix3::zeros())
    }

    #[inline]
    pub fn apply(&self, p: Point2<f32>) -> Point2<f32> {
        let q = self.h * Vector3::new(f64::from(p.x), f64::from(p.y), 1.0);
        Point2::new((q.x / q.z) as f32, (q.y / q.z) as f32)
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().map(Self::new)
    }

    /// Non-finite entries, a vanishing matrix, or a determinant close to zero
    /// after scaling to unit Frobenius norm.
    pub fn is_degenerate(&self) -> bool {
        if !self.h.iter().all(|v| v.is_finite()) {
            return true;
        }
        let norm = self.h.norm();
        if norm < 1e-12 {
            return true;
        }
        let det = (self.h / norm).determinant();
        !(det.is_finite() && det.abs() >= MIN_NORMALIZED_DET)
    }

    /// Squared distance between `H * src` and `dst`; infinite when the
    /// projection falls on the line at infinity.
    #[inline]
    pub fn transfer_error_sq(&self, src: Point2<f32>, dst: Point2<f32>) -> f32 {
        let e = (self.apply(src) - dst).norm_squared();
        if e.is_finite() {
            e
        } else {
            f32::INFINITY
        }
    }
}

/// Similarity moving the centroid of `pts` to the origin with mean distance
/// `sqrt(2)` from it.
fn conditioning(pts: &[Point2<f32>]) -> Matrix3<f64> {
    let n = pts.len().max(1) as f64;
    let (sx, sy) = pts
        .iter()
        .fold((0.0, 0.0), |(x, y), p| (x + f64::from(p.x), y + f64::from(p.y)));
    let (cx, cy) = (sx / n, sy / n);
    let spread = pts
        .iter()
        .map(|p| (f64::from(p.x) - cx).hypot(f64::from(p.y) - cy))
        .sum::<f64>()
        / n;
    let s = if spread > 1e-12 {
        std::f64::consts::SQRT_2 / spread
    } else {
        1.0
    };
    Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0)
}

#[inline]
fn condition(t: &Matrix3<f64>, p: Point2<f32>) -> (f64, f64) {
    let q = t * Vector3::new(f64::from(p.x), f64::from(p.y), 1.0);
    (q.x, q.y)
}

/// Undo both conditionings and scale so that `h33 == 1`.
fn uncondition(
    hn: Matrix3<f64>,
    t_src: &Matrix3<f64>,
    t_dst: &Matrix3<f64>,
) -> Option<Homography> {
    let h = t_dst.try_inverse()? * hn * t_src;
    let w = h[(2, 2)];
    (w.abs() >= 1e-12).then(|| Homography::new(h / w))
}

/// Least-squares DLT estimate of `dst ~ H * src` over every correspondence.
///
/// No outlier rejection. Exactly four correspondences take the closed-form
/// path of [`homography_from_4pt`].
pub fn estimate_homography(src: &[Point2<f32>], dst: &[Point2<f32>]) -> Option<Homography> {
    if src.len() != dst.len() || src.len() < 4 {
        return None;
    }
    if let (Ok(s4), Ok(d4)) = (<&[_; 4]>::try_from(src), <&[_; 4]>::try_from(dst)) {
        return homography_from_4pt(s4, d4);
    }

    let t_src = conditioning(src);
    let t_dst = conditioning(dst);

    // Accumulate A^T A of the 2N x 9 DLT system; its eigenvector of the
    // smallest eigenvalue minimises |A h| over unit h.
    let mut ata = SMatrix::<f64, 9, 9>::zeros();
    for (&s, &d) in src.iter().zip(dst) {
        let (x, y) = condition(&t_src, s);
        let (u, v) = condition(&t_dst, d);
        let rows = [
            SVector::<f64, 9>::from([-x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u]),
            SVector::<f64, 9>::from([0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v]),
        ];
        for r in &rows {
            ata += r * r.transpose();
        }
    }

    let eig = SymmetricEigen::new(ata);
    let (smallest, _) = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let h: SVector<f64, 9> = eig.eigenvectors.column(smallest).into_owned();
    let hn = Matrix3::from_row_slice(h.as_slice());
    uncondition(hn, &t_src, &t_dst)
}

/// Exact `H` with `dst[i] ~ H * src[i]` for four correspondences, by fixing
/// `h33 = 1` and solving the resulting 8x8 linear system.
pub fn homography_from_4pt(src: &[Point2<f32>; 4], dst: &[Point2<f32>; 4]) -> Option<Homography> {
    let t_src = conditioning(src);
    let t_dst = conditioning(dst);

    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();
    for (k, (&s, &d)) in src.iter().zip(dst).enumerate() {
        let (x, y) = condition(&t_src, s);
        let (u, v) = condition(&t_dst, d);
        a.row_mut(2 * k)
            .copy_from_slice(&[x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y]);
        a.row_mut(2 * k + 1)
            .copy_from_slice(&[0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y]);
        b[2 * k] = u;
        b[2 * k + 1] = v;
    }

    let p = a.lu().solve(&b)?;
    let hn = Matrix3::new(p[0], p[1], p[2], p[3], p[4], p[5], p[6], p[7], 1.0);
    uncondition(hn, &t_src, &t_dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn perspective() -> Homography {
        Homography::new(Matrix3::new(
            0.85, 0.07, 110.0, //
            -0.03, 1.05, 70.0, //
            0.0008, -0.0003, 1.0,
        ))
    }

    fn assert_maps_like(a: &Homography, b: &Homography, probes: &[Point2<f32>]) {
        for &p in probes {
            let (qa, qb) = (a.apply(p), b.apply(p));
            assert_abs_diff_eq!(qa.x, qb.x, epsilon = 1e-3);
            assert_abs_diff_eq!(qa.y, qb.y, epsilon = 1e-3);
        }
    }

    #[test]
    fn inverse_undoes_apply() {
        let h = perspective();
        let inv = h.inverse().expect("invertible");
        for p in [Point2::new(0.0_f32, 0.0), Point2::new(-15.0, 42.0), Point2::new(300.0, 210.0)] {
            let back = inv.apply(h.apply(p));
            assert_abs_diff_eq!(back.x, p.x, epsilon = 1e-3);
            assert_abs_diff_eq!(back.y, p.y, epsilon = 1e-3);
        }
    }

    #[test]
    fn closed_form_recovers_rectangle_mapping() {
        let gt = perspective();
        let src = [
            Point2::new(0.0_f32, 0.0),
            Point2::new(200.0, 0.0),
            Point2::new(200.0, 100.0),
            Point2::new(0.0, 100.0),
        ];
        let dst = src.map(|p| gt.apply(p));
        let h = homography_from_4pt(&src, &dst).expect("solvable");
        assert_abs_diff_eq!(h.h[(2, 2)], 1.0, epsilon = 1e-12);
        assert_maps_like(&h, &gt, &[Point2::new(50.0, 25.0), Point2::new(170.0, 90.0)]);
    }

    #[test]
    fn dlt_fits_many_exact_correspondences() {
        let gt = perspective();
        let src: Vec<Point2<f32>> = (0..4)
            .flat_map(|y| (0..5).map(move |x| Point2::new(x as f32 * 35.0, y as f32 * 30.0)))
            .collect();
        let dst: Vec<Point2<f32>> = src.iter().map(|&p| gt.apply(p)).collect();
        let h = estimate_homography(&src, &dst).expect("estimate");
        assert!(!h.is_degenerate());
        assert_maps_like(&h, &gt, &[Point2::new(12.0, 7.0), Point2::new(130.0, 85.0)]);
    }

    #[test]
    fn too_few_or_unequal_inputs_have_no_estimate() {
        let pts = [Point2::new(0.0_f32, 0.0), Point2::new(1.0, 0.0), Point2::new(0.0, 1.0)];
        assert!(estimate_homography(&pts, &pts).is_none());
        let four = [Point2::new(0.0_f32, 0.0); 4];
        assert!(estimate_homography(&four, &pts).is_none());
    }

    #[test]
    fn degenerate_matrices_are_flagged() {
        assert!(!Homography::identity().is_degenerate());
        assert!(Homography::zero().is_degenerate());
        let rank_one = Homography::new(Matrix3::new(1.0, 2.0, 3.0, 2.0, 4.0, 6.0, 1.0, 2.0, 3.0));
        assert!(rank_one.is_degenerate());
        let mut inf = Homography::identity();
        inf.h[(1, 2)] = f64::INFINITY;
        assert!(inf.is_degenerate());
    }

    #[test]
    fn transfer_error_is_squared_pixel_distance() {
        let h = Homography::new(Matrix3::new(1.0, 0.0, 3.0, 0.0, 1.0, 4.0, 0.0, 0.0, 1.0));
        let e = h.transfer_error_sq(Point2::new(0.0, 0.0), Point2::new(0.0, 0.0));
        assert_abs_diff_eq!(e, 25.0, epsilon = 1e-5);
        let at_infinity = Homography::new(Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0));
        assert!(at_infinity
            .transfer_error_sq(Point2::new(0.0, 0.0), Point2::new(0.0, 0.0))
            .is_infinite());
    }
}
