use nalgebra::Point2;
use planar_track_core::Homography;

/// Template corners in frame coordinates.
///
/// `frame_to_template` maps frame points onto the template; its inverse
/// carries `(0,0), (w,0), (w,h), (0,h)` into the frame, returned in that
/// winding order. `None` when the homography is singular or a corner lands
/// at infinity.
pub fn project_corners(
    frame_to_template: &Homography,
    width: u32,
    height: u32,
) -> Option<[Point2<f32>; 4]> {
    let inv = frame_to_template.inverse()?;
    let (w, h) = (width as f32, height as f32);
    let corners = [
        Point2::new(0.0, 0.0),
        Point2::new(w, 0.0),
        Point2::new(w, h),
        Point2::new(0.0, h),
    ]
    .map(|p| inv.apply(p));
    corners
        .iter()
        .all(|p| p.x.is_finite() && p.y.is_finite())
        .then_some(corners)
}
