//! Age-based retention for the Output Store
//!
//! One TTL, one sweep. The server runs it periodically; `dashpdf sweep` runs
//! it once for external schedulers.

use crate::config::OutputStore;
use log::{error, info};
use std::path::Path;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;

/// Outcome of one sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted: usize,
    pub errors: usize,
}

/// Finished PDFs and leftovers from interrupted writes.
fn is_swept(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("pdf") | Some("part")
    )
}

/// Delete generated files whose modification time is more than `ttl` before
/// `now`. Per-file failures are logged and counted; the sweep goes on.
pub fn sweep(dir: &Path, ttl: Duration, now: SystemTime) -> SweepReport {
    let mut report = SweepReport::default();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return report,
        Err(e) => {
            error!("Error reading output directory {}: {}", dir.display(), e);
            report.errors += 1;
            return report;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                error!("Error listing output directory: {}", e);
                report.errors += 1;
                continue;
            }
        };
        let path = entry.path();
        if !is_swept(&path) {
            continue;
        }

        let modified = entry.metadata().and_then(|m| {
            if m.is_file() {
                m.modified().map(Some)
            } else {
                Ok(None)
            }
        });
        let modified = match modified {
            Ok(Some(t)) => t,
            Ok(None) => continue,
            Err(e) => {
                error!("Error getting file stats for {}: {}", path.display(), e);
                report.errors += 1;
                continue;
            }
        };

        // files stamped in the future count as fresh
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age <= ttl {
            continue;
        }

        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!("Deleted {}", path.display());
                report.deleted += 1;
            }
            Err(e) => {
                error!("Error deleting old file {}: {}", path.display(), e);
                report.errors += 1;
            }
        }
    }

    report
}

/// Run the sweep every `store.sweep_interval` on the blocking pool.
pub fn spawn(store: OutputStore) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(store.sweep_interval);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let dir = store.dir.clone();
            let ttl = store.ttl;
            match tokio::task::spawn_blocking(move || sweep(&dir, ttl, SystemTime::now())).await {
                Ok(report) => info!(
                    "Output sweep finished: {} deleted, {} errors",
                    report.deleted, report.errors
                ),
                Err(e) => error!("Output sweep task failed: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn only_old_generated_files_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("ops_2026-10-16.pdf");
        let part = dir.path().join("ops_2026-10-16.pdf.part");
        let other = dir.path().join("keep.txt");
        for p in [&pdf, &part, &other] {
            std::fs::write(p, b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.pdf")).unwrap();

        let fresh = sweep(dir.path(), HOUR, SystemTime::now());
        assert_eq!(fresh, SweepReport::default());
        assert!(pdf.exists());

        let later = SystemTime::now() + 2 * HOUR;
        let report = sweep(dir.path(), HOUR, later);
        assert_eq!(report, SweepReport { deleted: 2, errors: 0 });
        assert!(!pdf.exists());
        assert!(!part.exists());
        assert!(other.exists());
        assert!(dir.path().join("nested.pdf").is_dir());
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let report = sweep(&dir.path().join("absent"), HOUR, SystemTime::now());
        assert_eq!(report, SweepReport::default());
    }
}
