//! entomond - live insect monitoring session over a synthetic camera
//!
//! Runs the full pipeline end to end: a capture thread produces frames
//! and runs the detector oracles, a depth-1 mailbox serializes them into
//! the session, and snapshots land in the sqlite archive. A real
//! deployment swaps the synthetic detectors for camera-backed inference;
//! everything downstream is identical.

use anyhow::Result;
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use entomon::{
    DetectorSet, EntomondConfig, FrameBundle, FrameMailbox, FrameMeta, Session, Species,
    SqliteArchiveStore, SyntheticDetector,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Session duration in seconds (0 = run until interrupted).
    #[arg(long, default_value_t = 10)]
    seconds: u64,
    /// Override the archive database path from config.
    #[arg(long)]
    db: Option<String>,
    /// Seed for the synthetic detectors.
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    stage("load config");
    let mut cfg = EntomondConfig::load()?;
    if let Some(db) = args.db {
        cfg.db_path = db;
    }

    stage("open archive + session");
    let store = SqliteArchiveStore::open(&cfg.db_path)?;
    let mut session = Session::new(cfg.pipeline.clone(), Box::new(store))?;

    let running = Arc::new(AtomicBool::new(true));
    let running_ctrlc = running.clone();
    ctrlc::set_handler(move || {
        running_ctrlc.store(false, Ordering::SeqCst);
    })?;

    // Two independent oracles, as on the bench: one model per species.
    let mut detectors = DetectorSet::new();
    detectors.register(SyntheticDetector::new("roach_net", Species::Cockroach, args.seed));
    detectors.register(SyntheticDetector::new("fly_net", Species::Fly, args.seed.wrapping_add(1)));
    detectors.warm_up()?;

    stage("run capture loop");
    let mailbox = Arc::new(FrameMailbox::new());
    let capture_mailbox = mailbox.clone();
    let capture_running = running.clone();
    let camera = cfg.camera.clone();
    let total_frames = args.seconds.saturating_mul(camera.target_fps as u64);

    let capture = std::thread::spawn(move || {
        let frame_interval = Duration::from_secs(1) / camera.target_fps;
        let started = Instant::now();
        let mut index = 0u64;
        while capture_running.load(Ordering::SeqCst) {
            if total_frames > 0 && index >= total_frames {
                break;
            }
            let meta = FrameMeta::new(
                index,
                camera.width,
                camera.height,
                started.elapsed().as_secs_f64(),
            );
            // Synthetic oracles never look at pixels; a camera-backed
            // build hands the decoded frame here.
            let per_detector = detectors.run(&[], &meta);
            if capture_mailbox.deliver(FrameBundle { meta, per_detector }) {
                log::debug!("consumer behind; dropped one frame");
            }
            index += 1;
            std::thread::sleep(frame_interval);
        }
        capture_mailbox.close();
    });

    let mut last_count = 0usize;
    while let Some(bundle) = mailbox.next() {
        let output = session.process_frame(&bundle.meta, &bundle.per_detector)?;
        if output.feedback.insect_count != last_count {
            last_count = output.feedback.insect_count;
            match &output.feedback.nearest {
                Some(nearest) => log::info!(
                    "frame {}: {} insect(s), nearest {} at {} ({:.2} m/s)",
                    output.frame_index,
                    output.feedback.insect_count,
                    nearest.species,
                    nearest
                        .distance_m
                        .map(|d| format!("{:.2}m", d))
                        .unwrap_or_else(|| "?".to_string()),
                    nearest.speed_mps,
                ),
                None => log::info!("frame {}: clear", output.frame_index),
            }
        }
        if output.flushed {
            log::debug!("snapshot flushed at frame {}", output.frame_index);
        }
    }
    running.store(false, Ordering::SeqCst);
    capture
        .join()
        .map_err(|_| anyhow::anyhow!("capture thread panicked"))?;

    stage("final flush");
    let dropped = mailbox.dropped();
    let report = session.stop()?;

    println!("session summary:");
    println!("  frames processed: {}", report.frames_processed);
    println!("  frames dropped: {}", dropped);
    println!("  snapshots flushed: {}", report.snapshots_flushed);
    println!("  tracks retired: {}", report.tracks_retired);
    for (species, summary) in &report.species {
        println!(
            "  {}: {} seen, entry {} -> exit {}",
            species,
            summary.count,
            format_distance(summary.entry_distance_m),
            format_distance(summary.exit_distance_m),
        );
    }
    match &report.nearest {
        Some(nearest) => println!(
            "  nearest encounter: {} at {:.2}m, {:.1} deg (frame {})",
            nearest.species, nearest.distance_m, nearest.angle_deg, nearest.frame_index
        ),
        None => println!("  nearest encounter: none"),
    }
    println!("  archive db: {}", cfg.db_path);
    println!("next steps:");
    println!("  cargo run --bin summary_dump -- --db {}", cfg.db_path);

    Ok(())
}

fn stage(msg: &str) {
    eprintln!("entomond: {}", msg);
}

fn format_distance(distance: Option<f64>) -> String {
    match distance {
        Some(d) => format!("{:.2}m", d),
        None => "?".to_string(),
    }
}
