use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use common::config::CleanupConfig;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: usize,
    pub bytes: u64,
}

/// Delete regular files in `dir` last modified more than `ttl` ago.
/// Subdirectories are left alone. A missing directory is not an error.
pub async fn cleanup_dir(dir: &Path, ttl: Duration) -> std::io::Result<CleanupReport> {
    let mut report = CleanupReport::default();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
        Err(e) => return Err(e),
    };

    let now = SystemTime::now();
    while let Some(entry) = entries.next_entry().await? {
        let metadata = match entry.metadata().await {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Failed to stat file");
                continue;
            }
        };
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age <= ttl {
            continue;
        }

        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => {
                report.removed += 1;
                report.bytes += metadata.len();
            }
            Err(e) => warn!(path = %entry.path().display(), error = %e, "Failed to delete expired file"),
        }
    }
    Ok(report)
}

/// Periodically sweep staged uploads and finished archives.
pub async fn run_cleanup(config: CleanupConfig, dirs: Vec<PathBuf>) {
    if !config.enabled {
        info!("File cleanup disabled");
        return;
    }

    let ttl = Duration::from_secs(config.ttl_secs);
    info!(
        interval_secs = config.interval_secs,
        ttl_secs = config.ttl_secs,
        dirs = dirs.len(),
        "Starting file cleanup"
    );

    tokio::time::sleep(Duration::from_secs(config.initial_delay_secs)).await;
    let mut interval = tokio::time::interval(Duration::from_secs(config.interval_secs.max(1)));

    loop {
        interval.tick().await;

        for dir in &dirs {
            match cleanup_dir(dir, ttl).await {
                Ok(report) if report.removed > 0 => info!(
                    dir = %dir.display(),
                    removed = report.removed,
                    bytes = report.bytes,
                    "Removed expired files"
                ),
                Ok(_) => {}
                Err(e) => error!(dir = %dir.display(), error = %e, "File cleanup failed"),
            }
        }
    }
}
