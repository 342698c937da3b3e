//! Default capability providers for the `planar-track` pipeline.
//!
//! - [`OrbExtractor`]: FAST-9 + steered BRIEF binary features.
//! - [`HammingMatcher`]: brute-force kNN over binary descriptors.
//! - [`RansacHomographySolver`]: robust homography with a seeded sampler.
//! - [`LucasKanadeTracker`]: pyramidal sparse optical flow.
//!
//! Each type implements the matching trait from `planar-track-core` and
//! holds no per-frame state, so any of them can be swapped for a different
//! backend without touching the pipeline.

mod lk;
mod matcher;
mod orb;
mod ransac;

pub use lk::{build_pyramid, LucasKanadeParams, LucasKanadeTracker};
pub use matcher::{hamming_distance, HammingMatcher};
pub use orb::{box_blur, OrbExtractor, OrbParams, ORB_DESCRIPTOR_BYTES};
pub use ransac::{RansacHomographySolver, RansacParams};
