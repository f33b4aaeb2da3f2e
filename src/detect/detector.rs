use anyhow::Result;

use crate::{Candidate, FrameMeta};

/// Detector oracle trait.
///
/// Each detector is an opaque inference backend producing candidate boxes
/// for one frame. The core never looks inside: it merges, tracks, and
/// ranges whatever the oracles report.
///
/// Implementations must treat the pixel slice as read-only and ephemeral;
/// they must not retain it beyond the `detect` call.
pub trait Detector: Send {
    /// Detector identifier, used in diagnostics.
    fn name(&self) -> &'static str;

    /// Produce candidates for one frame.
    ///
    /// Candidates are raw oracle output: unfiltered confidence, any
    /// recognized species, boxes in frame pixel coordinates.
    fn detect(&mut self, pixels: &[u8], meta: &FrameMeta) -> Result<Vec<Candidate>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// An ordered set of detector oracles run against each frame.
///
/// Detector order is part of the session configuration: fusion breaks
/// confidence ties in favor of earlier detectors.
pub struct DetectorSet {
    detectors: Vec<Box<dyn Detector>>,
}

impl DetectorSet {
    pub fn new() -> Self {
        Self {
            detectors: Vec::new(),
        }
    }

    pub fn register<D: Detector + 'static>(&mut self, detector: D) {
        self.detectors.push(Box::new(detector));
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    pub fn warm_up(&mut self) -> Result<()> {
        for detector in &mut self.detectors {
            detector.warm_up()?;
        }
        Ok(())
    }

    /// Run every detector on one frame, yielding one candidate list per
    /// detector in registration order.
    ///
    /// A failing oracle degrades to an empty list: a single bad inference
    /// pass must not abort the session. The failure is logged.
    pub fn run(&mut self, pixels: &[u8], meta: &FrameMeta) -> Vec<Vec<Candidate>> {
        let mut per_detector = Vec::with_capacity(self.detectors.len());
        for detector in &mut self.detectors {
            match detector.detect(pixels, meta) {
                Ok(candidates) => per_detector.push(candidates),
                Err(err) => {
                    log::warn!(
                        "detector '{}' failed on frame {}: {}",
                        detector.name(),
                        meta.index,
                        err
                    );
                    per_detector.push(Vec::new());
                }
            }
        }
        per_detector
    }
}

impl Default for DetectorSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BoundingBox, Species};
    use anyhow::anyhow;

    struct FailingDetector;

    impl Detector for FailingDetector {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn detect(&mut self, _pixels: &[u8], _meta: &FrameMeta) -> Result<Vec<Candidate>> {
            Err(anyhow!("inference backend unavailable"))
        }
    }

    struct OneBoxDetector;

    impl Detector for OneBoxDetector {
        fn name(&self) -> &'static str {
            "one_box"
        }

        fn detect(&mut self, _pixels: &[u8], _meta: &FrameMeta) -> Result<Vec<Candidate>> {
            Ok(vec![Candidate::new(
                BoundingBox::new(10.0, 10.0, 30.0, 30.0),
                Species::Fly,
                0.9,
            )])
        }
    }

    #[test]
    fn failing_detector_degrades_to_empty_output() {
        let mut set = DetectorSet::new();
        set.register(FailingDetector);
        set.register(OneBoxDetector);

        let meta = FrameMeta::new(0, 640, 480, 0.0);
        let per_detector = set.run(&[], &meta);

        assert_eq!(per_detector.len(), 2);
        assert!(per_detector[0].is_empty());
        assert_eq!(per_detector[1].len(), 1);
    }
}
