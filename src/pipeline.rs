//! Session lifecycle: `new -> process_frame* -> stop`.
//!
//! One frame is fully processed (fusion -> geometry -> tracking ->
//! aggregation -> scheduling) before the next is accepted. The session
//! owns all mutable state; nothing is shared for concurrent mutation. A
//! concurrent frame source is serialized through `FrameMailbox`, a
//! depth-1 latest-wins slot: stale detections have rapidly diminishing
//! geometric validity, so the oldest frame is dropped on overflow rather
//! than buffered.

use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex};

use crate::archive::ArchiveStore;
use crate::config::PipelineConfig;
use crate::detect::fuse_candidates;
use crate::snapshot::{ArchiveErrorHook, ArchiveWriter, Snapshot, SnapshotScheduler};
use crate::summary::{Aggregator, NearestEncounter, SpeciesSummary};
use crate::track::TrackManager;
use crate::view::{FeedbackState, TrackView};
use crate::{Candidate, FrameMeta, Species};

// -------------------- Per-frame output --------------------

/// Everything the outside world needs after one processed frame.
#[derive(Clone, Debug)]
pub struct FrameOutput {
    pub frame_index: u64,
    /// Confirmed tracks, for the renderer/recorder.
    pub tracks: Vec<TrackView>,
    /// Derived state for the feedback device.
    pub feedback: FeedbackState,
    /// True when this frame triggered a snapshot flush.
    pub flushed: bool,
}

/// Terminal state returned by `Session::stop`.
#[derive(Clone, Debug)]
pub struct SessionReport {
    pub frames_processed: u64,
    pub species: BTreeMap<Species, SpeciesSummary>,
    pub nearest: Option<NearestEncounter>,
    /// Scheduled flushes plus the final closing flush.
    pub snapshots_flushed: u64,
    pub tracks_retired: u64,
}

// -------------------- Session --------------------

pub struct Session {
    cfg: PipelineConfig,
    tracks: TrackManager,
    aggregator: Aggregator,
    scheduler: SnapshotScheduler,
    writer: Option<ArchiveWriter>,
    last_frame_index: Option<u64>,
    frames_processed: u64,
}

impl Session {
    /// Validate configuration and start the archival worker. Archive
    /// errors are logged; use `with_error_hook` to observe them.
    pub fn new(cfg: PipelineConfig, store: Box<dyn ArchiveStore + Send>) -> Result<Self> {
        Self::with_error_hook(
            cfg,
            store,
            Box::new(|err| log::warn!("snapshot archival failed: {}", err)),
        )
    }

    pub fn with_error_hook(
        cfg: PipelineConfig,
        store: Box<dyn ArchiveStore + Send>,
        on_archive_error: ArchiveErrorHook,
    ) -> Result<Self> {
        // Invalid configuration halts here, loudly, before any frame.
        cfg.validate()?;
        let scheduler = SnapshotScheduler::new(cfg.flush);
        let writer = ArchiveWriter::spawn(store, on_archive_error);
        Ok(Self {
            cfg,
            tracks: TrackManager::new(),
            aggregator: Aggregator::new(),
            scheduler,
            writer: Some(writer),
            last_frame_index: None,
            frames_processed: 0,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    /// Process one frame's worth of per-detector candidates.
    ///
    /// `per_detector` holds one candidate list per configured detector, in
    /// detector order. Frames must arrive in index order; a regression is
    /// logged and processed anyway rather than aborting the session.
    pub fn process_frame(
        &mut self,
        meta: &FrameMeta,
        per_detector: &[Vec<Candidate>],
    ) -> Result<FrameOutput> {
        if let Some(last) = self.last_frame_index {
            if meta.index <= last {
                log::warn!(
                    "frame index {} not after {}; source must deliver frames in order",
                    meta.index,
                    last
                );
            }
        }

        let fused = fuse_candidates(per_detector, &self.cfg);
        self.tracks.update(meta, &fused, &self.cfg);
        self.aggregator
            .observe_frame(meta.index, self.tracks.confirmed_tracks());

        let mut flushed = false;
        if self.scheduler.frame_processed() {
            let snapshot = Snapshot::capture(meta.index, &self.aggregator, false)?;
            if let Some(writer) = &self.writer {
                writer.submit(snapshot);
            }
            self.scheduler.record_flush();
            flushed = true;
        }

        self.frames_processed += 1;
        self.last_frame_index = Some(meta.index);

        Ok(FrameOutput {
            frame_index: meta.index,
            tracks: self
                .tracks
                .confirmed_tracks()
                .map(TrackView::from_track)
                .collect(),
            feedback: FeedbackState::derive(self.tracks.confirmed_tracks()),
            flushed,
        })
    }

    /// Stop accepting frames, flush the final summary, and join the
    /// archive worker. Guaranteed to run the closing flush even if no
    /// scheduled flush ever fired.
    pub fn stop(mut self) -> Result<SessionReport> {
        let final_frame = self.last_frame_index.unwrap_or(0);
        let snapshot = Snapshot::capture(final_frame, &self.aggregator, true)?;
        self.scheduler.record_flush();

        if let Some(writer) = self.writer.take() {
            writer.submit(snapshot);
            writer.shutdown()?;
        }

        Ok(SessionReport {
            frames_processed: self.frames_processed,
            species: self.aggregator.summaries().clone(),
            nearest: self.aggregator.nearest().cloned(),
            snapshots_flushed: self.scheduler.flushes(),
            tracks_retired: self.tracks.retired_total(),
        })
    }
}

// -------------------- Frame mailbox --------------------

/// One frame's candidates from a concurrent source.
#[derive(Clone, Debug)]
pub struct FrameBundle {
    pub meta: FrameMeta,
    pub per_detector: Vec<Vec<Candidate>>,
}

struct MailboxState {
    slot: Option<FrameBundle>,
    closed: bool,
    dropped: u64,
}

/// Depth-1 handoff between a capture/inference thread and the session
/// loop. Delivering over an unconsumed frame replaces it (drop-oldest);
/// there is no unbounded buffering.
pub struct FrameMailbox {
    state: Mutex<MailboxState>,
    ready: Condvar,
}

impl FrameMailbox {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MailboxState {
                slot: None,
                closed: false,
                dropped: 0,
            }),
            ready: Condvar::new(),
        }
    }

    /// Deliver a frame. Returns true when an unconsumed older frame was
    /// dropped to make room.
    pub fn deliver(&self, bundle: FrameBundle) -> bool {
        let mut state = self.state.lock().expect("mailbox lock");
        if state.closed {
            return false;
        }
        let replaced = state.slot.replace(bundle).is_some();
        if replaced {
            state.dropped += 1;
        }
        self.ready.notify_one();
        replaced
    }

    /// Block until a frame is available or the mailbox is closed.
    pub fn next(&self) -> Option<FrameBundle> {
        let mut state = self.state.lock().expect("mailbox lock");
        loop {
            if let Some(bundle) = state.slot.take() {
                return Some(bundle);
            }
            if state.closed {
                return None;
            }
            state = self.ready.wait(state).expect("mailbox lock");
        }
    }

    /// Non-blocking variant of `next`.
    pub fn try_next(&self) -> Option<FrameBundle> {
        self.state.lock().expect("mailbox lock").slot.take()
    }

    /// Stop accepting frames; a blocked `next` returns once the last
    /// delivered frame is consumed.
    pub fn close(&self) {
        let mut state = self.state.lock().expect("mailbox lock");
        state.closed = true;
        self.ready.notify_all();
    }

    /// Frames dropped because the consumer fell behind.
    pub fn dropped(&self) -> u64 {
        self.state.lock().expect("mailbox lock").dropped
    }
}

impl Default for FrameMailbox {
    fn default() -> Self {
        Self::new()
    }
}
