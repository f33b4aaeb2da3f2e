//! Synthetic detector oracles for tests and the demo daemon.

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::detector::Detector;
use crate::{BoundingBox, Candidate, FrameMeta, Species};

/// Replays a pre-scripted candidate list per frame. Frames beyond the end
/// of the script yield no candidates.
pub struct ScriptedDetector {
    name: &'static str,
    script: Vec<Vec<Candidate>>,
    cursor: usize,
}

impl ScriptedDetector {
    pub fn new(name: &'static str, script: Vec<Vec<Candidate>>) -> Self {
        Self {
            name,
            script,
            cursor: 0,
        }
    }
}

impl Detector for ScriptedDetector {
    fn name(&self) -> &'static str {
        self.name
    }

    fn detect(&mut self, _pixels: &[u8], _meta: &FrameMeta) -> Result<Vec<Candidate>> {
        let out = self.script.get(self.cursor).cloned().unwrap_or_default();
        self.cursor += 1;
        Ok(out)
    }
}

/// Seeded random-walk detector for the demo daemon: one insect wanders
/// through the frame, occasionally leaving and re-entering.
pub struct SyntheticDetector {
    name: &'static str,
    species: Species,
    rng: StdRng,
    center: (f32, f32),
    box_px: f32,
    present: bool,
}

impl SyntheticDetector {
    pub fn new(name: &'static str, species: Species, seed: u64) -> Self {
        Self {
            name,
            species,
            rng: StdRng::seed_from_u64(seed),
            center: (0.0, 0.0),
            box_px: 0.0,
            present: false,
        }
    }
}

impl Detector for SyntheticDetector {
    fn name(&self) -> &'static str {
        self.name
    }

    fn detect(&mut self, _pixels: &[u8], meta: &FrameMeta) -> Result<Vec<Candidate>> {
        let w = meta.width as f32;
        let h = meta.height as f32;

        if !self.present {
            // Roughly one entrance per couple of seconds at 10 fps.
            if self.rng.gen_bool(0.05) {
                self.present = true;
                self.center = (self.rng.gen_range(0.1..0.9) * w, self.rng.gen_range(0.1..0.9) * h);
                self.box_px = self.rng.gen_range(24.0..96.0);
            }
            return Ok(Vec::new());
        }

        if self.rng.gen_bool(0.02) {
            self.present = false;
            return Ok(Vec::new());
        }

        // Wander a few pixels per frame; the apparent size drifts as the
        // insect approaches or recedes.
        self.center.0 = (self.center.0 + self.rng.gen_range(-8.0..8.0)).clamp(0.0, w);
        self.center.1 = (self.center.1 + self.rng.gen_range(-8.0..8.0)).clamp(0.0, h);
        self.box_px = (self.box_px * self.rng.gen_range(0.95..1.05)).clamp(12.0, 160.0);

        let bbox = BoundingBox::new(
            self.center.0 - self.box_px / 2.0,
            self.center.1 - self.box_px / 2.0,
            self.box_px,
            self.box_px,
        );
        let confidence = self.rng.gen_range(0.4..0.95);
        Ok(vec![Candidate::new(bbox, self.species, confidence)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_detector_replays_then_goes_quiet() {
        let cand = Candidate::new(
            BoundingBox::new(10.0, 10.0, 20.0, 20.0),
            Species::Fly,
            0.8,
        );
        let mut detector = ScriptedDetector::new("scripted", vec![vec![cand.clone()], vec![]]);
        let meta = FrameMeta::new(0, 640, 480, 0.0);

        assert_eq!(detector.detect(&[], &meta).unwrap(), vec![cand]);
        assert!(detector.detect(&[], &meta).unwrap().is_empty());
        assert!(detector.detect(&[], &meta).unwrap().is_empty());
    }

    #[test]
    fn synthetic_detector_is_deterministic_per_seed() {
        let meta = FrameMeta::new(0, 640, 480, 0.0);
        let mut a = SyntheticDetector::new("synthetic", Species::Fly, 7);
        let mut b = SyntheticDetector::new("synthetic", Species::Fly, 7);

        for _ in 0..100 {
            assert_eq!(a.detect(&[], &meta).unwrap(), b.detect(&[], &meta).unwrap());
        }
    }
}
