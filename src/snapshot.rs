//! Periodic snapshot scheduling and asynchronous archival handoff.
//!
//! The scheduler decides *when* accumulated state is flushed; the
//! `ArchiveWriter` owns the worker thread that performs the store append
//! so a slow or failing archive can never stall the frame loop. Flush
//! failures surface through an error hook and the payload is rebuilt at
//! the next scheduled boundary; there is no immediate retry.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::archive::ArchiveStore;
use crate::summary::{Aggregator, NearestEncounter, SpeciesSummary};
use crate::Species;

pub(crate) fn now_epoch_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

// -------------------- Snapshot payload --------------------

/// Serialized summary state handed to the archive layer on each flush.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub frame_index: u64,
    /// Wall-clock marker, seconds since epoch.
    pub epoch_s: u64,
    pub species: BTreeMap<Species, SpeciesSummary>,
    pub nearest: Option<NearestEncounter>,
    /// True only for the guaranteed final flush at session stop.
    #[serde(default)]
    pub closing: bool,
}

impl Snapshot {
    pub fn capture(frame_index: u64, aggregator: &Aggregator, closing: bool) -> Result<Self> {
        Ok(Self {
            frame_index,
            epoch_s: now_epoch_s()?,
            species: aggregator.summaries().clone(),
            nearest: aggregator.nearest().cloned(),
            closing,
        })
    }
}

// -------------------- Flush policy --------------------

/// When to flush. Frame-count is the default style: it decouples logging
/// cadence from the camera frame rate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FlushPolicy {
    EveryFrames(u64),
    EveryDuration(Duration),
}

impl FlushPolicy {
    pub fn validate(&self) -> Result<()> {
        match self {
            FlushPolicy::EveryFrames(0) => Err(anyhow!("flush interval must be >= 1 frame")),
            FlushPolicy::EveryDuration(d) if d.is_zero() => {
                Err(anyhow!("flush interval must be > 0"))
            }
            _ => Ok(()),
        }
    }
}

// -------------------- Scheduler --------------------

pub struct SnapshotScheduler {
    policy: FlushPolicy,
    frames_since_flush: u64,
    last_flush_at: Instant,
    flushes: u64,
}

impl SnapshotScheduler {
    pub fn new(policy: FlushPolicy) -> Self {
        Self {
            policy,
            frames_since_flush: 0,
            last_flush_at: Instant::now(),
            flushes: 0,
        }
    }

    /// Record one processed frame; returns true when a flush is due.
    pub fn frame_processed(&mut self) -> bool {
        self.frames_since_flush += 1;
        match self.policy {
            FlushPolicy::EveryFrames(n) => self.frames_since_flush >= n,
            FlushPolicy::EveryDuration(d) => self.last_flush_at.elapsed() >= d,
        }
    }

    /// Reset the interval after a flush attempt, successful or not: a
    /// failed flush is retried at the next boundary, never immediately.
    pub fn record_flush(&mut self) {
        self.frames_since_flush = 0;
        self.last_flush_at = Instant::now();
        self.flushes += 1;
    }

    pub fn flushes(&self) -> u64 {
        self.flushes
    }
}

// -------------------- Archive worker --------------------

pub type ArchiveErrorHook = Box<dyn Fn(anyhow::Error) + Send>;

/// Handle to the archival worker thread.
///
/// Snapshots are handed off fire-and-forget; `shutdown` closes the
/// channel, drains everything already submitted, and joins the worker.
pub struct ArchiveWriter {
    tx: Option<mpsc::Sender<Snapshot>>,
    join: Option<JoinHandle<()>>,
}

impl ArchiveWriter {
    pub fn spawn(mut store: Box<dyn ArchiveStore + Send>, on_error: ArchiveErrorHook) -> Self {
        let (tx, rx) = mpsc::channel::<Snapshot>();
        let join = std::thread::spawn(move || {
            while let Ok(snapshot) = rx.recv() {
                if let Err(err) = store.append_snapshot(&snapshot) {
                    log::warn!(
                        "archive flush failed at frame {}: {}",
                        snapshot.frame_index,
                        err
                    );
                    on_error(err);
                }
            }
        });
        Self {
            tx: Some(tx),
            join: Some(join),
        }
    }

    /// Queue a snapshot for archival without blocking the frame loop.
    pub fn submit(&self, snapshot: Snapshot) {
        if let Some(tx) = &self.tx {
            if tx.send(snapshot).is_err() {
                log::error!("archive worker is gone; snapshot dropped");
            }
        }
    }

    /// Drain pending snapshots and stop the worker.
    pub fn shutdown(mut self) -> Result<()> {
        self.tx.take();
        if let Some(join) = self.join.take() {
            join.join().map_err(|_| anyhow!("archive worker panicked"))?;
        }
        Ok(())
    }
}

impl Drop for ArchiveWriter {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::InMemoryArchiveStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn frame_policy_flushes_on_the_interval() {
        let mut scheduler = SnapshotScheduler::new(FlushPolicy::EveryFrames(3));
        assert!(!scheduler.frame_processed());
        assert!(!scheduler.frame_processed());
        assert!(scheduler.frame_processed());
        scheduler.record_flush();
        assert!(!scheduler.frame_processed());
    }

    #[test]
    fn duration_policy_flushes_after_the_interval() {
        let mut scheduler = SnapshotScheduler::new(FlushPolicy::EveryDuration(
            Duration::from_millis(20),
        ));
        assert!(!scheduler.frame_processed());
        std::thread::sleep(Duration::from_millis(30));
        assert!(scheduler.frame_processed());
    }

    #[test]
    fn zero_intervals_are_invalid() {
        assert!(FlushPolicy::EveryFrames(0).validate().is_err());
        assert!(FlushPolicy::EveryDuration(Duration::ZERO).validate().is_err());
        assert!(FlushPolicy::EveryFrames(30).validate().is_ok());
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let mut species = BTreeMap::new();
        species.insert(
            Species::Fly,
            SpeciesSummary {
                count: 3,
                entry_distance_m: Some(1.2),
                entry_angle_deg: -12.5,
                exit_distance_m: Some(0.4),
                exit_angle_deg: 8.0,
            },
        );
        let snapshot = Snapshot {
            frame_index: 90,
            epoch_s: 1_700_000_000,
            species,
            nearest: Some(NearestEncounter {
                distance_m: 0.4,
                frame_index: 88,
                species: Species::Fly,
                angle_deg: 8.0,
            }),
            closing: false,
        };

        let json = serde_json::to_string(&snapshot).expect("serialize");
        let restored: Snapshot = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(restored, snapshot);
    }

    #[test]
    fn writer_delivers_snapshots_in_order() {
        let store = InMemoryArchiveStore::new();
        let writer = ArchiveWriter::spawn(Box::new(store.clone()), Box::new(|_| {}));

        for frame_index in [10u64, 20, 30] {
            writer.submit(Snapshot {
                frame_index,
                epoch_s: 0,
                species: BTreeMap::new(),
                nearest: None,
                closing: false,
            });
        }
        writer.shutdown().expect("shutdown");

        let stored = store.snapshots();
        let indices: Vec<u64> = stored.iter().map(|s| s.frame_index).collect();
        assert_eq!(indices, vec![10, 20, 30]);
    }

    #[test]
    fn failing_store_reports_through_hook_without_stalling() {
        struct FailingStore;
        impl ArchiveStore for FailingStore {
            fn append_snapshot(&mut self, _snapshot: &Snapshot) -> Result<()> {
                Err(anyhow!("disk full"))
            }
            fn read_snapshots(&mut self, _limit: usize) -> Result<Vec<Snapshot>> {
                Ok(Vec::new())
            }
        }

        let errors = Arc::new(AtomicUsize::new(0));
        let hook_errors = errors.clone();
        let writer = ArchiveWriter::spawn(
            Box::new(FailingStore),
            Box::new(move |_| {
                hook_errors.fetch_add(1, Ordering::SeqCst);
            }),
        );

        for _ in 0..2 {
            writer.submit(Snapshot {
                frame_index: 0,
                epoch_s: 0,
                species: BTreeMap::new(),
                nearest: None,
                closing: false,
            });
        }
        writer.shutdown().expect("shutdown");
        assert_eq!(errors.load(Ordering::SeqCst), 2);
    }
}
