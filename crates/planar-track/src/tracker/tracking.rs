//! State carried between frames while the target is being tracked.

use std::time::Instant;

use nalgebra::Point2;
use planar_track_core::GrayImage;

/// Index-aligned pairs of frame points and the template points they show.
///
/// Built wholesale from an inlier set and never edited in place.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackingPoints {
    frame: Vec<Point2<f32>>,
    template: Vec<Point2<f32>>,
}

impl TrackingPoints {
    /// `None` when the two sequences differ in length.
    pub fn new(frame: Vec<Point2<f32>>, template: Vec<Point2<f32>>) -> Option<Self> {
        (frame.len() == template.len()).then_some(Self { frame, template })
    }

    /// Keep the pairs whose `mask` entry is true.
    pub fn from_mask(frame: &[Point2<f32>], template: &[Point2<f32>], mask: &[bool]) -> Self {
        let (frame, template) = frame
            .iter()
            .zip(template)
            .zip(mask)
            .filter(|(_, keep)| **keep)
            .map(|((&f, &t), _)| (f, t))
            .unzip();
        Self { frame, template }
    }

    pub fn len(&self) -> usize {
        self.frame.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }

    pub fn frame(&self) -> &[Point2<f32>] {
        &self.frame
    }

    pub fn template(&self) -> &[Point2<f32>] {
        &self.template
    }
}

/// The previous grayscale frame and the points tracked on it.
#[derive(Clone, Debug)]
pub struct ActiveTrack {
    pub previous: GrayImage,
    pub points: TrackingPoints,
    /// When tracking was entered from detection.
    pub since: Instant,
}

/// Empty outside tracking mode.
#[derive(Debug, Default)]
pub struct TrackingState {
    active: Option<ActiveTrack>,
}

impl TrackingState {
    pub fn active(&self) -> Option<&ActiveTrack> {
        self.active.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Start a new track from a fresh detection.
    pub fn seed(&mut self, previous: GrayImage, points: TrackingPoints, now: Instant) {
        self.active = Some(ActiveTrack {
            previous,
            points,
            since: now,
        });
    }

    /// Replace buffer and points after an accepted tracking step. The dwell
    /// clock keeps running.
    pub fn advance(&mut self, previous: GrayImage, points: TrackingPoints) {
        if let Some(track) = self.active.as_mut() {
            track.previous = previous;
            track.points = points;
        }
    }

    pub fn clear(&mut self) {
        self.active = None;
    }

    /// Tracking has lasted at least `dwell_s` seconds at `now`.
    pub fn dwell_expired(&self, now: Instant, dwell_s: Option<f64>) -> bool {
        match (self.active.as_ref(), dwell_s) {
            (Some(track), Some(limit)) => {
                now.saturating_duration_since(track.since).as_secs_f64() >= limit
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pts(n: usize) -> Vec<Point2<f32>> {
        (0..n).map(|i| Point2::new(i as f32, 2.0 * i as f32)).collect()
    }

    #[test]
    fn points_require_equal_lengths() {
        assert!(TrackingPoints::new(pts(3), pts(2)).is_none());
        assert_eq!(TrackingPoints::new(pts(3), pts(3)).map(|p| p.len()), Some(3));
    }

    #[test]
    fn mask_keeps_alignment() {
        let frame = pts(4);
        let template: Vec<_> = pts(4).iter().map(|p| Point2::new(p.x + 100.0, p.y)).collect();
        let kept = TrackingPoints::from_mask(&frame, &template, &[true, false, false, true]);
        assert_eq!(kept.frame(), &[frame[0], frame[3]]);
        assert_eq!(kept.template(), &[template[0], template[3]]);
    }

    #[test]
    fn dwell_is_measured_from_seed_time() {
        let t0 = Instant::now();
        let mut state = TrackingState::default();
        assert!(!state.dwell_expired(t0, Some(1.0)));
        state.seed(GrayImage::new(2, 2), TrackingPoints::from_mask(&[], &[], &[]), t0);
        state.advance(GrayImage::new(2, 2), TrackingPoints::from_mask(&[], &[], &[]));
        assert!(!state.dwell_expired(t0 + Duration::from_millis(900), Some(1.0)));
        assert!(state.dwell_expired(t0 + Duration::from_millis(1000), Some(1.0)));
        assert!(!state.dwell_expired(t0 + Duration::from_secs(60), None));
        state.clear();
        assert!(!state.is_active());
    }
}
