//! Per-frame candidate/track association.
//!
//! Association is greedy nearest-first over class-gated pairs: the cost is
//! the Euclidean distance between a track's predicted center and the
//! candidate center, pairs beyond the configured gate are never matched,
//! and ties resolve by detector confidence then candidate order so a frame
//! always associates the same way.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::PipelineConfig;
use crate::{Candidate, FrameMeta};

use super::{Track, TrackId, TrackState};

pub struct TrackManager {
    tracks: BTreeMap<TrackId, Track>,
    next_id: TrackId,
    retired_total: u64,
}

struct PairCost {
    cost: f32,
    confidence: f32,
    candidate_idx: usize,
    track_id: TrackId,
}

impl TrackManager {
    pub fn new() -> Self {
        Self {
            tracks: BTreeMap::new(),
            next_id: 1,
            retired_total: 0,
        }
    }

    /// Associate the frame's fused candidates with live tracks, then
    /// advance lifecycle state for everything unmatched.
    pub fn update(&mut self, meta: &FrameMeta, candidates: &[Candidate], cfg: &PipelineConfig) {
        let mut pairs = Vec::new();
        for (track_id, track) in &self.tracks {
            let predicted = track.predicted_center();
            for (candidate_idx, candidate) in candidates.iter().enumerate() {
                // Candidates of a different class are never considered.
                if candidate.species != track.species() {
                    continue;
                }
                let center = candidate.bbox.center();
                let dx = center.0 - predicted.0;
                let dy = center.1 - predicted.1;
                let cost = (dx * dx + dy * dy).sqrt();
                if cost > cfg.max_match_distance_px {
                    continue;
                }
                pairs.push(PairCost {
                    cost,
                    confidence: candidate.confidence,
                    candidate_idx,
                    track_id: *track_id,
                });
            }
        }

        // Lowest cost first; equal costs fall back to confidence, then
        // candidate order, then track id.
        pairs.sort_by(|a, b| {
            a.cost
                .total_cmp(&b.cost)
                .then_with(|| b.confidence.total_cmp(&a.confidence))
                .then_with(|| a.candidate_idx.cmp(&b.candidate_idx))
                .then_with(|| a.track_id.cmp(&b.track_id))
        });

        let mut matched_tracks: BTreeSet<TrackId> = BTreeSet::new();
        let mut matched_candidates: BTreeSet<usize> = BTreeSet::new();
        let mut last_taken_cost: Option<f32> = None;

        for pair in &pairs {
            if matched_tracks.contains(&pair.track_id)
                || matched_candidates.contains(&pair.candidate_idx)
            {
                if Some(pair.cost) == last_taken_cost {
                    log::debug!(
                        "association tie at cost {:.2}px resolved by confidence/order (frame {})",
                        pair.cost,
                        meta.index
                    );
                }
                continue;
            }
            matched_tracks.insert(pair.track_id);
            matched_candidates.insert(pair.candidate_idx);
            last_taken_cost = Some(pair.cost);

            if let Some(track) = self.tracks.get_mut(&pair.track_id) {
                track.observe(&candidates[pair.candidate_idx], meta, cfg);
            }
        }

        // Unmatched tracks advance toward retirement.
        let mut retired: Vec<TrackId> = Vec::new();
        for (track_id, track) in &mut self.tracks {
            if matched_tracks.contains(track_id) {
                continue;
            }
            if track.mark_missed(cfg.retire_after_frames) == TrackState::Retired {
                retired.push(*track_id);
            }
        }
        for track_id in retired {
            self.tracks.remove(&track_id);
            self.retired_total += 1;
            log::debug!("track {} retired (frame {})", track_id, meta.index);
        }

        // Unmatched candidates spawn tentative tracks. Ids are never
        // reused within a session.
        for (candidate_idx, candidate) in candidates.iter().enumerate() {
            if matched_candidates.contains(&candidate_idx) {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            self.tracks
                .insert(id, Track::spawn(id, candidate, meta, cfg));
        }
    }

    pub fn live_tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn confirmed_tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values().filter(|t| t.is_confirmed())
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn retired_total(&self) -> u64 {
        self.retired_total
    }
}

impl Default for TrackManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BoundingBox, Species};

    fn cfg() -> PipelineConfig {
        let mut cfg = PipelineConfig::demo_defaults();
        cfg.retire_after_frames = 2;
        cfg
    }

    fn meta(index: u64) -> FrameMeta {
        FrameMeta::new(index, 640, 480, index as f64 * 0.1)
    }

    fn fly_at(x: f32, y: f32, confidence: f32) -> Candidate {
        Candidate::new(
            BoundingBox::new(x - 20.0, y - 20.0, 40.0, 40.0),
            Species::Fly,
            confidence,
        )
    }

    fn single_state(manager: &TrackManager) -> TrackState {
        let mut it = manager.live_tracks();
        let state = it.next().expect("one track").state();
        assert!(it.next().is_none());
        state
    }

    #[test]
    fn lifecycle_runs_tentative_confirmed_stale_retired() {
        let cfg = cfg();
        let mut manager = TrackManager::new();

        manager.update(&meta(0), &[fly_at(100.0, 100.0, 0.8)], &cfg);
        assert_eq!(single_state(&manager), TrackState::Tentative);

        manager.update(&meta(1), &[fly_at(105.0, 100.0, 0.8)], &cfg);
        assert_eq!(single_state(&manager), TrackState::Confirmed);

        manager.update(&meta(2), &[], &cfg);
        assert_eq!(single_state(&manager), TrackState::Stale);

        manager.update(&meta(3), &[], &cfg);
        assert_eq!(single_state(&manager), TrackState::Stale);

        // Third consecutive miss exceeds the 2-frame grace period.
        manager.update(&meta(4), &[], &cfg);
        assert!(manager.is_empty());
        assert_eq!(manager.retired_total(), 1);
    }

    #[test]
    fn retirement_is_terminal_even_if_species_reappears() {
        let cfg = cfg();
        let mut manager = TrackManager::new();

        manager.update(&meta(0), &[fly_at(100.0, 100.0, 0.8)], &cfg);
        let original_id = manager.live_tracks().next().unwrap().id();

        for i in 1..=3 {
            manager.update(&meta(i), &[], &cfg);
        }
        assert!(manager.is_empty());

        // Same spot, new physical object: a fresh identity, not a revival.
        manager.update(&meta(4), &[fly_at(100.0, 100.0, 0.8)], &cfg);
        let new_id = manager.live_tracks().next().unwrap().id();
        assert_ne!(new_id, original_id);
        assert_eq!(manager.live_tracks().next().unwrap().state(), TrackState::Tentative);
    }

    #[test]
    fn candidates_beyond_the_gate_spawn_new_tracks() {
        let cfg = cfg();
        let mut manager = TrackManager::new();

        manager.update(&meta(0), &[fly_at(100.0, 100.0, 0.8)], &cfg);
        // 300px jump exceeds the 80px gate: old track goes stale, new one
        // spawns.
        manager.update(&meta(1), &[fly_at(400.0, 100.0, 0.8)], &cfg);

        assert_eq!(manager.len(), 2);
        let states: Vec<TrackState> = manager.live_tracks().map(|t| t.state()).collect();
        assert!(states.contains(&TrackState::Stale));
        assert!(states.contains(&TrackState::Tentative));
    }

    #[test]
    fn association_prefers_nearest_candidate() {
        let cfg = cfg();
        let mut manager = TrackManager::new();

        manager.update(&meta(0), &[fly_at(100.0, 100.0, 0.8)], &cfg);
        manager.update(
            &meta(1),
            &[fly_at(160.0, 100.0, 0.9), fly_at(104.0, 100.0, 0.5)],
            &cfg,
        );

        // The nearer, lower-confidence candidate continues the track; the
        // farther one spawns a new identity.
        let track = manager
            .live_tracks()
            .find(|t| t.state() == TrackState::Confirmed)
            .expect("continued track");
        assert_eq!(track.bbox().center().0, 104.0);
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn equal_cost_tie_breaks_on_confidence() {
        let cfg = cfg();
        let mut manager = TrackManager::new();

        manager.update(&meta(0), &[fly_at(100.0, 100.0, 0.8)], &cfg);
        // Symmetric candidates either side of the predicted center.
        manager.update(
            &meta(1),
            &[fly_at(90.0, 100.0, 0.4), fly_at(110.0, 100.0, 0.9)],
            &cfg,
        );

        let track = manager
            .live_tracks()
            .find(|t| t.state() == TrackState::Confirmed)
            .expect("continued track");
        assert_eq!(track.bbox().center().0, 110.0);
    }

    #[test]
    fn different_species_never_associate() {
        let cfg = cfg();
        let mut manager = TrackManager::new();

        manager.update(&meta(0), &[fly_at(100.0, 100.0, 0.8)], &cfg);
        let roach = Candidate::new(
            BoundingBox::new(80.0, 80.0, 40.0, 40.0),
            Species::Cockroach,
            0.9,
        );
        manager.update(&meta(1), &[roach], &cfg);

        assert_eq!(manager.len(), 2);
        assert!(manager
            .live_tracks()
            .all(|t| t.state() != TrackState::Confirmed));
    }

    #[test]
    fn confirmation_can_require_multiple_matches() {
        let mut cfg = cfg();
        cfg.confirm_after_frames = 2;
        let mut manager = TrackManager::new();

        manager.update(&meta(0), &[fly_at(100.0, 100.0, 0.8)], &cfg);
        manager.update(&meta(1), &[fly_at(104.0, 100.0, 0.8)], &cfg);
        assert_eq!(single_state(&manager), TrackState::Tentative);

        manager.update(&meta(2), &[fly_at(108.0, 100.0, 0.8)], &cfg);
        assert_eq!(single_state(&manager), TrackState::Confirmed);
    }
}
