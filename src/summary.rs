//! Encounter and per-species summary aggregation.
//!
//! Runs once per frame after the track update, over Confirmed tracks only.
//! Counting is per physical object: a species' count increments on the
//! frame a track transitions to Confirmed, never once per frame.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::track::Track;
use crate::Species;

/// Session-lifetime running statistics for one species.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeciesSummary {
    /// Distinct tracks of this species that reached Confirmed.
    pub count: u64,
    /// Distance/angle at the species' first confirmation.
    pub entry_distance_m: Option<f64>,
    pub entry_angle_deg: f64,
    /// Distance/angle from the most recent frame a confirmed track of this
    /// species was seen.
    pub exit_distance_m: Option<f64>,
    pub exit_angle_deg: f64,
}

/// The single closest-ever observed object in a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NearestEncounter {
    pub distance_m: f64,
    pub frame_index: u64,
    pub species: Species,
    pub angle_deg: f64,
}

/// Owns the species summary map and the nearest encounter. Single writer,
/// updated once per processed frame.
#[derive(Debug, Default)]
pub struct Aggregator {
    summaries: BTreeMap<Species, SpeciesSummary>,
    nearest: Option<NearestEncounter>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one frame's confirmed tracks into the running statistics.
    pub fn observe_frame<'a>(
        &mut self,
        frame_index: u64,
        confirmed: impl Iterator<Item = &'a Track>,
    ) {
        for track in confirmed {
            let summary = self.summaries.entry(track.species()).or_default();

            // Count once, at the confirmation transition.
            if track.confirmed_at_frame() == Some(frame_index) {
                summary.count += 1;
                if summary.count == 1 {
                    summary.entry_distance_m = track.distance_m();
                    summary.entry_angle_deg = track.angle_deg();
                }
            }

            summary.exit_distance_m = track.distance_m();
            summary.exit_angle_deg = track.angle_deg();

            if let Some(distance) = track.distance_m() {
                let closer = match &self.nearest {
                    // Strictly smaller only; a later, farther detection
                    // never overwrites the record.
                    Some(nearest) => distance < nearest.distance_m,
                    None => true,
                };
                if closer {
                    self.nearest = Some(NearestEncounter {
                        distance_m: distance,
                        frame_index,
                        species: track.species(),
                        angle_deg: track.angle_deg(),
                    });
                }
            }
        }
    }

    pub fn summaries(&self) -> &BTreeMap<Species, SpeciesSummary> {
        &self.summaries
    }

    pub fn nearest(&self) -> Option<&NearestEncounter> {
        self.nearest.as_ref()
    }
}
