//! Track identity and lifecycle.
//!
//! A `Track` is one physical object observed across consecutive frames.
//! Identities are arena-allocated `TrackId`s, never reused within a
//! session; per-frame association lives in `manager`.

mod manager;

pub use manager::TrackManager;

use std::collections::VecDeque;

use crate::config::PipelineConfig;
use crate::{geometry, BoundingBox, Candidate, FrameMeta, Species};

pub type TrackId = u64;

/// Track lifecycle. `Retired` is terminal: the manager removes the track
/// from the live set in the same frame it retires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackState {
    /// Newly created from an unmatched candidate; not yet trusted.
    Tentative,
    /// Matched in at least one subsequent frame; eligible for counting
    /// and reporting.
    Confirmed,
    /// No match in the most recent frame(s).
    Stale,
    /// Missed for longer than the grace period. Terminal.
    Retired,
}

/// A continuously observed object.
#[derive(Clone, Debug)]
pub struct Track {
    id: TrackId,
    species: Species,
    bbox: BoundingBox,
    /// Recent centers, oldest first. Bounded; oldest evicted on overflow.
    history: VecDeque<(f32, f32)>,
    capacity: usize,
    /// Last ranged distance. `None` = indeterminate (degenerate box).
    distance_m: Option<f64>,
    speed_mps: f64,
    angle_deg: f64,
    state: TrackState,
    /// Matches seen after the creation frame.
    matches_after_creation: u32,
    missed_frames: u32,
    last_seen_frame: u64,
    last_seen_ts: f64,
    confirmed_at_frame: Option<u64>,
}

impl Track {
    pub(crate) fn spawn(
        id: TrackId,
        candidate: &Candidate,
        meta: &FrameMeta,
        cfg: &PipelineConfig,
    ) -> Self {
        let mut history = VecDeque::with_capacity(cfg.trajectory_capacity);
        history.push_back(candidate.bbox.center());
        let mut track = Self {
            id,
            species: candidate.species,
            bbox: candidate.bbox,
            history,
            capacity: cfg.trajectory_capacity,
            distance_m: None,
            speed_mps: 0.0,
            angle_deg: 0.0,
            state: TrackState::Tentative,
            matches_after_creation: 0,
            missed_frames: 0,
            last_seen_frame: meta.index,
            last_seen_ts: meta.timestamp_s,
            confirmed_at_frame: None,
        };
        track.range(candidate, meta, cfg);
        track
    }

    /// Apply a matched candidate for the current frame.
    pub(crate) fn observe(&mut self, candidate: &Candidate, meta: &FrameMeta, cfg: &PipelineConfig) {
        let prev_ts = self.last_seen_ts;
        let center = candidate.bbox.center();
        let prev_center = self.history.back().copied().unwrap_or(center);
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(center);

        self.bbox = candidate.bbox;
        self.range(candidate, meta, cfg);

        // Speed fails safe to zero on degenerate elapsed time.
        let dt = meta.timestamp_s - prev_ts;
        self.speed_mps = if dt > 0.0 {
            let dx = (center.0 - prev_center.0) as f64;
            let dy = (center.1 - prev_center.1) as f64;
            (dx * dx + dy * dy).sqrt() * cfg.meters_per_pixel / dt
        } else {
            0.0
        };

        self.missed_frames = 0;
        self.matches_after_creation += 1;
        self.last_seen_frame = meta.index;
        self.last_seen_ts = meta.timestamp_s;

        if self.confirmed_at_frame.is_some() {
            // Re-activation after Stale; the original confirmation stands.
            self.state = TrackState::Confirmed;
        } else if self.matches_after_creation >= cfg.confirm_after_frames {
            self.state = TrackState::Confirmed;
            self.confirmed_at_frame = Some(meta.index);
        } else {
            self.state = TrackState::Tentative;
        }
    }

    /// Advance staleness for a frame without a match. Returns the new
    /// state; `Retired` means the caller must drop the track.
    pub(crate) fn mark_missed(&mut self, retire_after_frames: u32) -> TrackState {
        self.missed_frames += 1;
        self.state = if self.missed_frames > retire_after_frames {
            TrackState::Retired
        } else {
            TrackState::Stale
        };
        self.state
    }

    fn range(&mut self, candidate: &Candidate, meta: &FrameMeta, cfg: &PipelineConfig) {
        let real_width_m = cfg.real_widths_m.get(&self.species).copied();
        self.distance_m = real_width_m.and_then(|w| {
            geometry::distance_m(candidate.bbox.w as f64, w, cfg.focal_length_px)
        });
        let (cx, _) = candidate.bbox.center();
        self.angle_deg = geometry::angle_deg(cx as f64, meta.width as f64, cfg.field_of_view_deg);
    }

    /// Center extrapolated one frame ahead by the last observed velocity.
    pub(crate) fn predicted_center(&self) -> (f32, f32) {
        let n = self.history.len();
        let last = self.history[n - 1];
        if n < 2 {
            return last;
        }
        let prev = self.history[n - 2];
        (last.0 + (last.0 - prev.0), last.1 + (last.1 - prev.1))
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn species(&self) -> Species {
        self.species
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    pub fn state(&self) -> TrackState {
        self.state
    }

    pub fn is_confirmed(&self) -> bool {
        self.state == TrackState::Confirmed
    }

    pub fn distance_m(&self) -> Option<f64> {
        self.distance_m
    }

    pub fn speed_mps(&self) -> f64 {
        self.speed_mps
    }

    pub fn angle_deg(&self) -> f64 {
        self.angle_deg
    }

    pub fn last_seen_frame(&self) -> u64 {
        self.last_seen_frame
    }

    pub fn confirmed_at_frame(&self) -> Option<u64> {
        self.confirmed_at_frame
    }

    /// Recent centers, oldest first.
    pub fn trajectory(&self) -> impl Iterator<Item = (f32, f32)> + '_ {
        self.history.iter().copied()
    }
}
