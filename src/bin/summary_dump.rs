//! summary_dump - print archived session snapshots from the sqlite store

use anyhow::Result;
use clap::Parser;

use entomon::{ArchiveStore, SqliteArchiveStore};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the snapshot archive database.
    #[arg(long, default_value = "entomon.db")]
    db: String,
    /// Maximum snapshots to print, oldest first.
    #[arg(long, default_value_t = 50)]
    limit: usize,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut store = SqliteArchiveStore::open(&args.db)?;
    let snapshots = store.read_snapshots(args.limit)?;

    if snapshots.is_empty() {
        println!("no snapshots in {}", args.db);
        return Ok(());
    }

    for snapshot in &snapshots {
        let marker = if snapshot.closing { " (closing)" } else { "" };
        println!(
            "frame {} @ epoch {}{}",
            snapshot.frame_index, snapshot.epoch_s, marker
        );
        for (species, summary) in &snapshot.species {
            println!(
                "  {}: count {}, entry {} @ {:.1} deg, exit {} @ {:.1} deg",
                species,
                summary.count,
                format_distance(summary.entry_distance_m),
                summary.entry_angle_deg,
                format_distance(summary.exit_distance_m),
                summary.exit_angle_deg,
            );
        }
        match &snapshot.nearest {
            Some(nearest) => println!(
                "  nearest: {} at {:.2}m, {:.1} deg (frame {})",
                nearest.species, nearest.distance_m, nearest.angle_deg, nearest.frame_index
            ),
            None => println!("  nearest: none"),
        }
    }
    println!("{} snapshot(s) from {}", snapshots.len(), args.db);

    Ok(())
}

fn format_distance(distance: Option<f64>) -> String {
    match distance {
        Some(d) => format!("{:.2}m", d),
        None => "?".to_string(),
    }
}
