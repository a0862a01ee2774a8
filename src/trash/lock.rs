use std::fs;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime};

use tracing::warn;

use super::error::{TrashError, TrashResult};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Advisory per-facility lock: a `lock` file created with exclusive-create
/// semantics inside the facility directory. Held across one public engine
/// call; released on drop so a panic mid-operation cannot wedge the
/// facility. A lock older than the staleness window is reclaimed.
pub struct FacilityLock {
    path: PathBuf,
}

impl FacilityLock {
    pub fn acquire(facility_root: &std::path::Path, stale_after: Duration) -> TrashResult<Self> {
        let path = facility_root.join("lock");
        let deadline = Instant::now() + stale_after + Duration::from_secs(5);
        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    let _ = write!(file, "{}", std::process::id());
                    return Ok(Self { path });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    if lock_is_stale(&path, stale_after) {
                        warn!(
                            lock = %path.display(),
                            "reclaiming stale facility lock"
                        );
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(TrashError::facility_unavailable(format!(
                            "lock {} is held by another process",
                            path.display()
                        )));
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(err) => {
                    return Err(TrashError::from_io_error(
                        &format!("failed to create facility lock {}", path.display()),
                        err,
                    ));
                }
            }
        }
    }
}

fn lock_is_stale(path: &std::path::Path, stale_after: Duration) -> bool {
    let Ok(meta) = fs::symlink_metadata(path) else {
        return false;
    };
    let Ok(modified) = meta.modified() else {
        return false;
    };
    SystemTime::now()
        .duration_since(modified)
        .map(|age| age > stale_after)
        .unwrap_or(false)
}

impl Drop for FacilityLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != ErrorKind::NotFound {
                warn!(
                    lock = %self.path.display(),
                    error = %err,
                    "failed to release facility lock"
                );
            }
        }
    }
}
