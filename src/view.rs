//! Read-only per-frame views for the external renderer and feedback
//! device.
//!
//! These are owned snapshots, not borrows into the track arena: the
//! renderer and feedback device run outside the core and must not hold
//! references into single-writer state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::track::{Track, TrackId};
use crate::{geometry, BoundingBox, Species};

/// One confirmed track as the renderer sees it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackView {
    pub id: TrackId,
    pub species: Species,
    pub bbox: BoundingBox,
    pub distance_m: Option<f64>,
    pub speed_mps: f64,
    pub angle_deg: f64,
    /// Recent centers in pixel coordinates, oldest first.
    pub trajectory: Vec<(f32, f32)>,
    /// Radar placement relative to the camera's forward axis, when the
    /// distance is determinate.
    pub radar_position: Option<(f64, f64)>,
}

impl TrackView {
    pub fn from_track(track: &Track) -> Self {
        let radar_position = track
            .distance_m()
            .map(|d| geometry::polar_position(d, track.angle_deg()));
        Self {
            id: track.id(),
            species: track.species(),
            bbox: track.bbox(),
            distance_m: track.distance_m(),
            speed_mps: track.speed_mps(),
            angle_deg: track.angle_deg(),
            trajectory: track.trajectory().collect(),
            radar_position,
        }
    }
}

/// Nearest confirmed track, for the feedback device's text lines.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NearestReadout {
    pub species: Species,
    pub distance_m: Option<f64>,
    pub speed_mps: f64,
}

/// Small derived state emitted once per frame for physical indicators
/// (status LEDs, a character display).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackState {
    /// Confirmed tracks in the current frame.
    pub insect_count: usize,
    pub nearest: Option<NearestReadout>,
    /// Species with at least one confirmed track this frame.
    pub present: BTreeSet<Species>,
}

impl FeedbackState {
    /// Derive feedback for one frame from the confirmed track set.
    pub fn derive<'a>(confirmed: impl Iterator<Item = &'a Track>) -> Self {
        let mut state = FeedbackState::default();
        let mut best: Option<(f64, &Track)> = None;

        for track in confirmed {
            state.insect_count += 1;
            state.present.insert(track.species());
            if let Some(distance) = track.distance_m() {
                let nearer = match best {
                    Some((d, _)) => distance < d,
                    None => true,
                };
                if nearer {
                    best = Some((distance, track));
                }
            }
        }

        state.nearest = best.map(|(_, track)| NearestReadout {
            species: track.species(),
            distance_m: track.distance_m(),
            speed_mps: track.speed_mps(),
        });
        state
    }
}
