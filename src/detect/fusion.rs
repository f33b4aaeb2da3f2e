//! Cross-detector candidate fusion.
//!
//! Each configured detector reports an independent candidate list per
//! frame. Fusion filters out noise (low confidence, unrecognized species,
//! sub-floor boxes) and collapses duplicate observations of the same
//! object: same species + IoU at or above the configured overlap threshold
//! means duplicate, and the highest-confidence copy wins. Heavily
//! overlapping boxes that *disagree* on species are both kept; track
//! continuity downstream resolves the ambiguity, or one short-lived track
//! retires quickly.

use crate::config::PipelineConfig;
use crate::Candidate;

/// Merge per-detector candidate lists for one frame into a deduplicated
/// set.
///
/// The result is canonically ordered (species, then box position, then
/// confidence) so it does not depend on detector iteration order, except
/// where confidence ties are broken in favor of earlier detectors.
pub fn fuse_candidates(per_detector: &[Vec<Candidate>], cfg: &PipelineConfig) -> Vec<Candidate> {
    // Filter each oracle's output before merging.
    let mut pool: Vec<(usize, usize, &Candidate)> = Vec::new();
    for (detector_idx, candidates) in per_detector.iter().enumerate() {
        for (order, cand) in candidates.iter().enumerate() {
            if cand.confidence < cfg.confidence_threshold {
                continue;
            }
            if !cfg.real_widths_m.contains_key(&cand.species) {
                continue;
            }
            // Sub-floor boxes are noise regardless of confidence.
            if cand.bbox.w < cfg.min_box_px || cand.bbox.h < cfg.min_box_px {
                continue;
            }
            pool.push((detector_idx, order, cand));
        }
    }

    // Highest confidence first; ties resolved by detector order, then by
    // each detector's own output order, for determinism.
    pool.sort_by(|a, b| {
        b.2.confidence
            .total_cmp(&a.2.confidence)
            .then_with(|| a.0.cmp(&b.0))
            .then_with(|| a.1.cmp(&b.1))
    });

    let mut kept: Vec<Candidate> = Vec::new();
    for (_, _, cand) in pool {
        let duplicate = kept.iter().any(|existing| {
            existing.species == cand.species
                && existing.bbox.iou(&cand.bbox) >= cfg.overlap_threshold
        });
        if !duplicate {
            kept.push(cand.clone());
        }
    }

    kept.sort_by(|a, b| {
        a.species
            .cmp(&b.species)
            .then_with(|| a.bbox.x.total_cmp(&b.bbox.x))
            .then_with(|| a.bbox.y.total_cmp(&b.bbox.y))
            .then_with(|| b.confidence.total_cmp(&a.confidence))
    });
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BoundingBox, Species};

    fn test_config() -> PipelineConfig {
        PipelineConfig::demo_defaults()
    }

    fn fly(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> Candidate {
        Candidate::new(BoundingBox::new(x, y, w, h), Species::Fly, confidence)
    }

    #[test]
    fn overlapping_same_species_keeps_highest_confidence() {
        let cfg = test_config();
        // IoU of these two boxes is 0.9+: near-identical observations.
        let a = fly(100.0, 100.0, 40.0, 40.0, 0.6);
        let b = fly(101.0, 100.0, 40.0, 40.0, 0.8);

        let fused = fuse_candidates(&[vec![a], vec![b.clone()]], &cfg);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0], b);
    }

    #[test]
    fn overlapping_different_species_both_survive() {
        let cfg = test_config();
        let a = fly(100.0, 100.0, 40.0, 40.0, 0.6);
        let b = Candidate::new(
            BoundingBox::new(101.0, 100.0, 40.0, 40.0),
            Species::Cockroach,
            0.8,
        );

        let fused = fuse_candidates(&[vec![a], vec![b]], &cfg);
        assert_eq!(fused.len(), 2);
    }

    #[test]
    fn disjoint_same_species_both_survive() {
        let cfg = test_config();
        let a = fly(0.0, 0.0, 40.0, 40.0, 0.6);
        let b = fly(300.0, 300.0, 40.0, 40.0, 0.8);

        let fused = fuse_candidates(&[vec![a], vec![b]], &cfg);
        assert_eq!(fused.len(), 2);
    }

    #[test]
    fn sub_floor_box_is_dropped_regardless_of_confidence() {
        let cfg = test_config();
        assert!(cfg.min_box_px >= 10.0);
        let tiny = fly(100.0, 100.0, 5.0, 5.0, 0.99);

        let fused = fuse_candidates(&[vec![tiny]], &cfg);
        assert!(fused.is_empty());
    }

    #[test]
    fn low_confidence_is_dropped() {
        let cfg = test_config();
        let weak = fly(100.0, 100.0, 40.0, 40.0, cfg.confidence_threshold / 2.0);

        let fused = fuse_candidates(&[vec![weak]], &cfg);
        assert!(fused.is_empty());
    }

    #[test]
    fn species_outside_allow_list_is_dropped() {
        let mut cfg = test_config();
        cfg.real_widths_m.remove(&Species::Cockroach);
        let roach = Candidate::new(
            BoundingBox::new(100.0, 100.0, 40.0, 40.0),
            Species::Cockroach,
            0.9,
        );

        let fused = fuse_candidates(&[vec![roach]], &cfg);
        assert!(fused.is_empty());
    }

    #[test]
    fn output_is_independent_of_detector_order() {
        let cfg = test_config();
        let a = fly(0.0, 0.0, 40.0, 40.0, 0.6);
        let b = fly(300.0, 300.0, 40.0, 40.0, 0.8);
        let c = Candidate::new(
            BoundingBox::new(200.0, 0.0, 40.0, 40.0),
            Species::Cockroach,
            0.7,
        );

        let forward = fuse_candidates(&[vec![a.clone(), c.clone()], vec![b.clone()]], &cfg);
        let reverse = fuse_candidates(&[vec![b], vec![a, c]], &cfg);
        assert_eq!(forward, reverse);
    }

    #[test]
    fn confidence_tie_prefers_earlier_detector() {
        let cfg = test_config();
        let first = fly(100.0, 100.0, 40.0, 40.0, 0.7);
        let second = fly(102.0, 100.0, 40.0, 40.0, 0.7);

        let fused = fuse_candidates(&[vec![first.clone()], vec![second]], &cfg);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0], first);
    }
}
