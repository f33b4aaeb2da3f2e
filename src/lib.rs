//! Insect proximity monitor core.
//!
//! This crate implements the detection-to-track fusion and geometric
//! estimation pipeline for a camera-based insect monitor. Frames arrive as
//! per-detector candidate boxes; the core fuses them, ranges each object
//! from its projected size, maintains identity across frames, and surfaces
//! the nearest encounter plus periodic per-species summaries.
//!
//! # Pipeline
//!
//! One frame is fully processed before the next is accepted:
//!
//! 1. **Fusion** (`detect::fusion`): merge per-detector candidates into a
//!    deduplicated set.
//! 2. **Geometry** (`geometry`): pinhole ranging and angular placement.
//! 3. **Tracking** (`track`): associate candidates with live tracks,
//!    advance the `Tentative -> Confirmed -> Stale -> Retired` lifecycle.
//! 4. **Aggregation** (`summary`): per-species running statistics and the
//!    global nearest encounter.
//! 5. **Scheduling** (`snapshot`): periodic best-effort flushes to the
//!    archive store.
//!
//! # Boundaries
//!
//! Frame acquisition, inference, rendering, and physical feedback devices
//! live outside this crate. Detectors are opaque oracles behind the
//! `detect::Detector` trait; the archive sink is a pluggable
//! `archive::ArchiveStore`. The core never blocks on archival I/O: flushes
//! are handed to a worker thread and failures come back on an error hook.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

pub mod archive;
pub mod config;
pub mod detect;
pub mod geometry;
pub mod pipeline;
pub mod snapshot;
pub mod summary;
pub mod track;
pub mod view;

pub use archive::{ArchiveStore, InMemoryArchiveStore, SqliteArchiveStore};
pub use config::{EntomondConfig, PipelineConfig};
pub use detect::{fuse_candidates, Detector, DetectorSet, ScriptedDetector, SyntheticDetector};
pub use pipeline::{FrameBundle, FrameMailbox, FrameOutput, Session, SessionReport};
pub use snapshot::{ArchiveWriter, FlushPolicy, Snapshot, SnapshotScheduler};
pub use summary::{Aggregator, NearestEncounter, SpeciesSummary};
pub use track::{Track, TrackId, TrackManager, TrackState};
pub use view::{FeedbackState, NearestReadout, TrackView};

// -------------------- Species --------------------

/// Recognized species labels. Closed enumeration: detectors may emit other
/// class ids, but only these survive the fusion allow-list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Species {
    Fly,
    Cockroach,
}

impl Species {
    pub const ALL: [Species; 2] = [Species::Fly, Species::Cockroach];

    pub fn label(&self) -> &'static str {
        match self {
            Species::Fly => "fly",
            Species::Cockroach => "cockroach",
        }
    }
}

impl fmt::Display for Species {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Species {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        validate_species_label(s)?;
        match s.to_lowercase().as_str() {
            "fly" => Ok(Species::Fly),
            "cockroach" => Ok(Species::Cockroach),
            other => Err(anyhow!("unrecognized species label '{}'", other)),
        }
    }
}

/// A conforming species label is a short lowercase identifier.
///
/// Allowed: "fly", "cockroach", "house_fly"
/// Disallowed: whitespace, slashes, punctuation outside [_-].
pub fn validate_species_label(label: &str) -> Result<()> {
    // Compile once for hot paths.
    static LABEL_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = LABEL_RE.get_or_init(|| regex::Regex::new(r"^[a-z][a-z0-9_-]{0,63}$").unwrap());

    if !re.is_match(&label.to_lowercase()) {
        return Err(anyhow!("species label must match ^[a-z][a-z0-9_-]{{0,63}}$"));
    }
    Ok(())
}

// -------------------- Bounding boxes --------------------

/// Axis-aligned bounding box in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    /// Intersection over union with another box. 0.0 when either box is
    /// degenerate or they do not overlap.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.w).min(other.x + other.w);
        let y2 = (self.y + self.h).min(other.y + other.h);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            return 0.0;
        }
        inter / union
    }
}

// -------------------- Frame candidates --------------------

/// One detector's unconfirmed observation in a single frame.
///
/// Candidates exist only within one frame's fusion step; identity across
/// frames belongs to `track::Track`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub bbox: BoundingBox,
    pub species: Species,
    pub confidence: f32,
}

impl Candidate {
    pub fn new(bbox: BoundingBox, species: Species, confidence: f32) -> Self {
        Self {
            bbox,
            species,
            confidence,
        }
    }
}

// -------------------- Frame metadata --------------------

/// Per-frame metadata from the external frame source.
///
/// The core needs only the monotonic index, pixel dimensions (for angular
/// placement), and a capture timestamp (for speed estimation).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameMeta {
    /// Monotonic frame index assigned by the source.
    pub index: u64,
    pub width: u32,
    pub height: u32,
    /// Capture time in seconds since an arbitrary session epoch.
    pub timestamp_s: f64,
}

impl FrameMeta {
    pub fn new(index: u64, width: u32, height: u32, timestamp_s: f64) -> Self {
        Self {
            index,
            width,
            height,
            timestamp_s,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn species_labels_round_trip() {
        for species in Species::ALL {
            let parsed: Species = species.label().parse().expect("parse label");
            assert_eq!(parsed, species);
        }
    }

    #[test]
    fn species_parse_rejects_unknown_and_malformed() {
        assert!("moth".parse::<Species>().is_err());
        assert!("".parse::<Species>().is_err());
        assert!("two words".parse::<Species>().is_err());
        assert!("fly/2".parse::<Species>().is_err());
    }

    #[test]
    fn species_parse_is_case_insensitive() {
        assert_eq!("Fly".parse::<Species>().unwrap(), Species::Fly);
        assert_eq!("COCKROACH".parse::<Species>().unwrap(), Species::Cockroach);
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let b = BoundingBox::new(10.0, 10.0, 20.0, 20.0);
        assert!((b.iou(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(100.0, 100.0, 10.0, 10.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn iou_handles_degenerate_boxes() {
        let a = BoundingBox::new(0.0, 0.0, 0.0, 0.0);
        let b = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn half_overlap_iou() {
        // Two 10x10 boxes offset by 5 in x: intersection 50, union 150.
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    }
}
