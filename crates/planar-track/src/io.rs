//! JSON configuration and report helpers for offline tracking runs.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{FrameReport, ProviderParams, TrackError, TrackerParams};

#[derive(thiserror::Error, Debug)]
pub enum TrackIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("no frames to process")]
    NoFrames,
    #[error("frame rate must be positive and finite, got {0}")]
    InvalidFrameRate(f64),
    #[error(transparent)]
    Track(#[from] TrackError),
}

fn default_proc_width() -> u32 {
    640
}

fn default_proc_height() -> u32 {
    480
}

fn default_frame_rate() -> f64 {
    30.0
}

/// Configuration of a tracking run over a sequence of frame images.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Path or URL of the reference image.
    pub template: String,
    /// Frame image paths, in playback order.
    pub frames: Vec<String>,
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default = "default_proc_width")]
    pub proc_width: u32,
    #[serde(default = "default_proc_height")]
    pub proc_height: u32,
    /// Playback rate used to timestamp frames for the re-detection cadence.
    #[serde(default = "default_frame_rate")]
    pub frame_rate: f64,
    #[serde(default)]
    pub tracker: Option<TrackerParams>,
    #[serde(default)]
    pub providers: Option<ProviderParams>,
}

impl TrackerConfig {
    pub fn new(template: impl Into<String>, frames: Vec<String>) -> Self {
        Self {
            template: template.into(),
            frames,
            output_path: None,
            proc_width: default_proc_width(),
            proc_height: default_proc_height(),
            frame_rate: default_frame_rate(),
            tracker: None,
            providers: None,
        }
    }

    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, TrackIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), TrackIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Resolve the output report path.
    pub fn output_path(&self) -> PathBuf {
        self.output_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("planar_track_report.json"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frames.is_empty() {
            return Err(ConfigError::NoFrames);
        }
        if !self.frame_rate.is_finite() || self.frame_rate <= 0.0 {
            return Err(ConfigError::InvalidFrameRate(self.frame_rate));
        }
        if self.proc_width == 0 || self.proc_height == 0 {
            return Err(TrackError::InvalidResolution {
                width: self.proc_width,
                height: self.proc_height,
            }
            .into());
        }
        Ok(())
    }

    /// Tracker thresholds, defaults unless overridden.
    pub fn build_params(&self) -> TrackerParams {
        self.tracker.clone().unwrap_or_default()
    }

    /// Provider settings; optical flow is on unless the config says otherwise.
    pub fn build_providers(&self) -> ProviderParams {
        self.providers.clone().unwrap_or_default()
    }

    /// Time between consecutive frames.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate)
    }
}

/// One processed frame of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameRecord {
    pub index: usize,
    pub path: String,
    #[serde(default)]
    pub report: Option<FrameReport>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackReport {
    pub template: String,
    #[serde(default)]
    pub config_path: Option<String>,
    /// Stored template size after downsampling.
    #[serde(default)]
    pub template_size: Option<[u32; 2]>,
    #[serde(default)]
    pub frames: Vec<FrameRecord>,
    #[serde(default)]
    pub error: Option<String>,
}

impl TrackReport {
    pub fn new(cfg: &TrackerConfig, config_path: Option<&Path>) -> Self {
        Self {
            template: cfg.template.clone(),
            config_path: config_path.map(|p| p.to_string_lossy().into_owned()),
            template_size: None,
            frames: Vec::with_capacity(cfg.frames.len()),
            error: None,
        }
    }

    /// Record a failure that stopped the run.
    pub fn set_error(&mut self, err: impl ToString) {
        self.error = Some(err.to_string());
    }

    /// Frames with a projected outline.
    pub fn detected_frames(&self) -> usize {
        self.frames
            .iter()
            .filter(|f| f.report.as_ref().is_some_and(|r| r.result.is_detected()))
            .count()
    }

    /// Load a report from JSON on disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, TrackIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this report to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), TrackIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_defaults() {
        let cfg: TrackerConfig =
            serde_json::from_str(r#"{ "template": "ref.png", "frames": ["a.png", "b.png"] }"#)
                .expect("json");
        assert_eq!((cfg.proc_width, cfg.proc_height), (640, 480));
        assert_eq!(cfg.frame_rate, 30.0);
        assert_eq!(cfg.build_params(), TrackerParams::default());
        assert!(cfg.build_providers().flow.is_some());
        assert_eq!(cfg.output_path(), PathBuf::from("planar_track_report.json"));
        cfg.validate().expect("valid");
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut cfg = TrackerConfig::new("ref.png", Vec::new());
        assert!(matches!(cfg.validate(), Err(ConfigError::NoFrames)));
        cfg.frames.push("a.png".into());
        cfg.frame_rate = 0.0;
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidFrameRate(_))));
        cfg.frame_rate = 25.0;
        cfg.proc_height = 0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Track(TrackError::InvalidResolution { .. }))
        ));
    }

    #[test]
    fn config_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cfg.json");
        let mut cfg = TrackerConfig::new("ref.png", vec!["f0.png".into()]);
        cfg.tracker = Some(TrackerParams {
            max_tracking_dwell_s: None,
            ..TrackerParams::default()
        });
        cfg.write_json(&path).expect("write");
        let back = TrackerConfig::load_json(&path).expect("load");
        assert_eq!(back.frames, cfg.frames);
        assert_eq!(back.build_params().max_tracking_dwell_s, None);
        assert_eq!(back.frame_interval(), cfg.frame_interval());
    }

    #[test]
    fn null_flow_disables_tracking_provider() {
        let cfg: TrackerConfig = serde_json::from_str(
            r#"{ "template": "t.png", "frames": ["f.png"], "providers": { "flow": null } }"#,
        )
        .expect("json");
        assert!(cfg.build_providers().flow.is_none());
        let cfg: TrackerConfig = serde_json::from_str(
            r#"{ "template": "t.png", "frames": ["f.png"], "providers": { "orb": { "max_features": 100 } } }"#,
        )
        .expect("json");
        let providers = cfg.build_providers();
        assert_eq!(providers.orb.max_features, 100);
        assert!(providers.flow.is_some());
    }

    #[test]
    fn report_counts_detected_frames() {
        let cfg = TrackerConfig::new("t.png", vec!["a.png".into(), "b.png".into()]);
        let mut report = TrackReport::new(&cfg, None);
        let detected = FrameReport {
            result: crate::TrackResult {
                matches: 10,
                inliers: 8,
                corners: Some([nalgebra::Point2::new(0.0, 0.0); 4]),
            },
            branch: crate::Branch::Detection,
            mode: crate::PipelineMode::Tracking,
            diagnostics: Vec::new(),
        };
        report.frames.push(FrameRecord {
            index: 0,
            path: "a.png".into(),
            report: Some(detected),
            error: None,
        });
        report.frames.push(FrameRecord {
            index: 1,
            path: "b.png".into(),
            report: None,
            error: Some("unreadable".into()),
        });
        report.set_error("stopped");
        assert_eq!(report.detected_frames(), 1);

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("report.json");
        report.write_json(&path).expect("write");
        let back = TrackReport::load_json(&path).expect("load");
        assert_eq!(back.detected_frames(), 1);
        assert_eq!(back.error.as_deref(), Some("stopped"));
    }
}
