mod detector;
mod fusion;
mod scripted;

pub use detector::{Detector, DetectorSet};
pub use fusion::fuse_candidates;
pub use scripted::{ScriptedDetector, SyntheticDetector};
