use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::snapshot::FlushPolicy;
use crate::Species;

const DEFAULT_DB_PATH: &str = "entomon.db";
const DEFAULT_FRAME_WIDTH: u32 = 640;
const DEFAULT_FRAME_HEIGHT: u32 = 480;
const DEFAULT_TARGET_FPS: u32 = 10;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
const DEFAULT_MIN_BOX_PX: f32 = 10.0;
const DEFAULT_REAL_WIDTH_M: f64 = 0.08;
const DEFAULT_FOCAL_LENGTH_PX: f64 = 1200.0;
const DEFAULT_FIELD_OF_VIEW_DEG: f64 = 62.2;
const DEFAULT_OVERLAP_THRESHOLD: f32 = 0.45;
const DEFAULT_MAX_MATCH_DISTANCE_PX: f32 = 80.0;
const DEFAULT_CONFIRM_AFTER_FRAMES: u32 = 1;
const DEFAULT_RETIRE_AFTER_FRAMES: u32 = 15;
const DEFAULT_TRAJECTORY_CAPACITY: usize = 30;
const DEFAULT_METERS_PER_PIXEL: f64 = 0.02;
const DEFAULT_FLUSH_FRAMES: u64 = 30;

// -------------------- Core pipeline configuration --------------------

/// Configuration consumed by the core pipeline.
///
/// Every value is required at construction; there are no hidden defaults
/// inside the pipeline itself. `Session::new` refuses to start on an
/// invalid configuration rather than produce silently wrong geometry.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Candidates below this confidence are discarded in fusion.
    pub confidence_threshold: f32,
    /// Minimum box side in pixels; smaller boxes are noise.
    pub min_box_px: f32,
    /// Real-world width per recognized species, in meters. The key set is
    /// also the species allow-list.
    pub real_widths_m: BTreeMap<Species, f64>,
    pub focal_length_px: f64,
    pub field_of_view_deg: f64,
    /// IoU at or above which same-species candidates are duplicates.
    pub overlap_threshold: f32,
    /// Association gate: candidate/track pairs farther apart than this are
    /// never matched.
    pub max_match_distance_px: f32,
    /// Matches in subsequent frames required before a track is Confirmed.
    pub confirm_after_frames: u32,
    /// Consecutive missed frames after which a Stale track retires.
    pub retire_after_frames: u32,
    /// Bounded trajectory history length per track.
    pub trajectory_capacity: usize,
    /// Image-plane displacement scale for speed estimates.
    pub meters_per_pixel: f64,
    pub flush: FlushPolicy,
}

impl PipelineConfig {
    /// Defaults matching the reference bench setup: Raspberry Pi HQ camera
    /// ranging 8 cm insects, snapshot every 30 frames.
    pub fn demo_defaults() -> Self {
        let mut real_widths_m = BTreeMap::new();
        for species in Species::ALL {
            real_widths_m.insert(species, DEFAULT_REAL_WIDTH_M);
        }
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            min_box_px: DEFAULT_MIN_BOX_PX,
            real_widths_m,
            focal_length_px: DEFAULT_FOCAL_LENGTH_PX,
            field_of_view_deg: DEFAULT_FIELD_OF_VIEW_DEG,
            overlap_threshold: DEFAULT_OVERLAP_THRESHOLD,
            max_match_distance_px: DEFAULT_MAX_MATCH_DISTANCE_PX,
            confirm_after_frames: DEFAULT_CONFIRM_AFTER_FRAMES,
            retire_after_frames: DEFAULT_RETIRE_AFTER_FRAMES,
            trajectory_capacity: DEFAULT_TRAJECTORY_CAPACITY,
            meters_per_pixel: DEFAULT_METERS_PER_PIXEL,
            flush: FlushPolicy::EveryFrames(DEFAULT_FLUSH_FRAMES),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(anyhow!("confidence_threshold must be within 0..=1"));
        }
        if self.min_box_px <= 0.0 {
            return Err(anyhow!("min_box_px must be positive"));
        }
        if self.real_widths_m.is_empty() {
            return Err(anyhow!("species allow-list must not be empty"));
        }
        for (species, width) in &self.real_widths_m {
            if *width <= 0.0 {
                return Err(anyhow!("real width for '{}' must be positive", species));
            }
        }
        if self.focal_length_px <= 0.0 {
            return Err(anyhow!("focal_length_px must be positive"));
        }
        if self.field_of_view_deg <= 0.0 || self.field_of_view_deg > 360.0 {
            return Err(anyhow!("field_of_view_deg must be within (0, 360]"));
        }
        if self.overlap_threshold <= 0.0 || self.overlap_threshold > 1.0 {
            return Err(anyhow!("overlap_threshold must be within (0, 1]"));
        }
        if self.max_match_distance_px <= 0.0 {
            return Err(anyhow!("max_match_distance_px must be positive"));
        }
        if self.confirm_after_frames == 0 {
            return Err(anyhow!("confirm_after_frames must be >= 1"));
        }
        if self.retire_after_frames == 0 {
            return Err(anyhow!("retire_after_frames must be >= 1"));
        }
        if self.trajectory_capacity < 2 {
            return Err(anyhow!(
                "trajectory_capacity must be >= 2 (speed needs two points)"
            ));
        }
        if self.meters_per_pixel <= 0.0 {
            return Err(anyhow!("meters_per_pixel must be positive"));
        }
        self.flush.validate()?;
        Ok(())
    }
}

// -------------------- Daemon configuration --------------------

#[derive(Debug, Deserialize, Default)]
struct EntomondConfigFile {
    db_path: Option<String>,
    camera: Option<CameraConfigFile>,
    detection: Option<DetectionConfigFile>,
    tracking: Option<TrackingConfigFile>,
    snapshot: Option<SnapshotConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    focal_length_px: Option<f64>,
    field_of_view_deg: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    confidence_threshold: Option<f32>,
    min_box_px: Option<f32>,
    overlap_threshold: Option<f32>,
    /// Species label -> real-world width in meters.
    species: Option<BTreeMap<String, f64>>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackingConfigFile {
    max_match_distance_px: Option<f32>,
    confirm_after_frames: Option<u32>,
    retire_after_frames: Option<u32>,
    trajectory_capacity: Option<usize>,
    meters_per_pixel: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct SnapshotConfigFile {
    flush_frames: Option<u64>,
    flush_secs: Option<u64>,
}

/// Configuration for the `entomond` daemon: the core pipeline settings
/// plus the archive path and synthetic camera shape.
#[derive(Clone, Debug)]
pub struct EntomondConfig {
    pub db_path: String,
    pub camera: CameraSettings,
    pub pipeline: PipelineConfig,
}

#[derive(Clone, Debug)]
pub struct CameraSettings {
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

impl EntomondConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ENTOMON_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: EntomondConfigFile) -> Result<Self> {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let camera_file = file.camera.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let tracking = file.tracking.unwrap_or_default();
        let snapshot = file.snapshot.unwrap_or_default();

        let camera = CameraSettings {
            width: camera_file.width.unwrap_or(DEFAULT_FRAME_WIDTH),
            height: camera_file.height.unwrap_or(DEFAULT_FRAME_HEIGHT),
            target_fps: camera_file.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
        };

        let real_widths_m = match detection.species {
            Some(table) => parse_species_table(&table)?,
            None => PipelineConfig::demo_defaults().real_widths_m,
        };

        let flush = match (snapshot.flush_frames, snapshot.flush_secs) {
            (Some(_), Some(_)) => {
                return Err(anyhow!(
                    "snapshot.flush_frames and snapshot.flush_secs are mutually exclusive"
                ));
            }
            (None, Some(secs)) => FlushPolicy::EveryDuration(Duration::from_secs(secs)),
            (frames, None) => FlushPolicy::EveryFrames(frames.unwrap_or(DEFAULT_FLUSH_FRAMES)),
        };

        let pipeline = PipelineConfig {
            confidence_threshold: detection
                .confidence_threshold
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            min_box_px: detection.min_box_px.unwrap_or(DEFAULT_MIN_BOX_PX),
            real_widths_m,
            focal_length_px: camera_file
                .focal_length_px
                .unwrap_or(DEFAULT_FOCAL_LENGTH_PX),
            field_of_view_deg: camera_file
                .field_of_view_deg
                .unwrap_or(DEFAULT_FIELD_OF_VIEW_DEG),
            overlap_threshold: detection
                .overlap_threshold
                .unwrap_or(DEFAULT_OVERLAP_THRESHOLD),
            max_match_distance_px: tracking
                .max_match_distance_px
                .unwrap_or(DEFAULT_MAX_MATCH_DISTANCE_PX),
            confirm_after_frames: tracking
                .confirm_after_frames
                .unwrap_or(DEFAULT_CONFIRM_AFTER_FRAMES),
            retire_after_frames: tracking
                .retire_after_frames
                .unwrap_or(DEFAULT_RETIRE_AFTER_FRAMES),
            trajectory_capacity: tracking
                .trajectory_capacity
                .unwrap_or(DEFAULT_TRAJECTORY_CAPACITY),
            meters_per_pixel: tracking.meters_per_pixel.unwrap_or(DEFAULT_METERS_PER_PIXEL),
            flush,
        };

        Ok(Self {
            db_path,
            camera,
            pipeline,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("ENTOMON_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(fps) = std::env::var("ENTOMON_TARGET_FPS") {
            let fps: u32 = fps
                .parse()
                .map_err(|_| anyhow!("ENTOMON_TARGET_FPS must be an integer"))?;
            self.camera.target_fps = fps;
        }
        if let Ok(frames) = std::env::var("ENTOMON_FLUSH_FRAMES") {
            let frames: u64 = frames
                .parse()
                .map_err(|_| anyhow!("ENTOMON_FLUSH_FRAMES must be an integer frame count"))?;
            self.pipeline.flush = FlushPolicy::EveryFrames(frames);
        }
        if let Ok(focal) = std::env::var("ENTOMON_FOCAL_LENGTH_PX") {
            let focal: f64 = focal
                .parse()
                .map_err(|_| anyhow!("ENTOMON_FOCAL_LENGTH_PX must be a number"))?;
            self.pipeline.focal_length_px = focal;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.db_path.trim().is_empty() {
            return Err(anyhow!("db_path must not be empty"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera dimensions must be non-zero"));
        }
        if self.camera.target_fps == 0 {
            return Err(anyhow!("camera target_fps must be >= 1"));
        }
        self.pipeline.validate()
    }
}

fn parse_species_table(table: &BTreeMap<String, f64>) -> Result<BTreeMap<Species, f64>> {
    let mut out = BTreeMap::new();
    for (label, width) in table {
        let species: Species = label
            .parse()
            .map_err(|e| anyhow!("invalid species entry '{}': {}", label, e))?;
        if out.insert(species, *width).is_some() {
            return Err(anyhow!("duplicate species entry '{}'", label));
        }
    }
    Ok(out)
}

fn read_config_file(path: &Path) -> Result<EntomondConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
