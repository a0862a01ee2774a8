use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use chrono::Local;
use tracing::debug;

use super::error::{TrashError, TrashErrorCode, TrashResult};
use super::lock::FacilityLock;
use super::{
    disambiguate_name, is_cancelled, EntryKind, ListFilter, Listing, OverwritePolicy,
    TrashBackend, TrashEntry,
};
use crate::fsops;
use crate::path_norm;

/// macOS backend: same-volume rename into `~/.Trash`, copy-then-delete
/// across volumes. The system keeps per-item restore metadata private to
/// Finder, so enumeration and restore go through Finder rather than here.
pub struct PlatformTrash {
    trash_root: PathBuf,
    lock_stale_after: Duration,
}

impl PlatformTrash {
    pub fn new(lock_stale_after: Duration, _id_collision_retries: u32) -> Self {
        let trash_root = dirs_next::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(".Trash");
        Self {
            trash_root,
            lock_stale_after,
        }
    }

    fn ensure_facility(&self) -> TrashResult<()> {
        if self.trash_root.exists() {
            return Ok(());
        }
        fs::create_dir_all(&self.trash_root).map_err(|e| {
            TrashError::facility_unavailable(format!(
                "cannot create {}: {e}",
                self.trash_root.display()
            ))
        })
    }
}

impl TrashBackend for PlatformTrash {
    fn send_to_trash(&self, path: &Path, cancel: Option<&AtomicBool>) -> TrashResult<TrashEntry> {
        if is_cancelled(cancel) {
            return Err(TrashError::new(
                TrashErrorCode::Cancelled,
                "cancelled before the trash move started",
            ));
        }
        if path.starts_with(&self.trash_root) {
            return Err(TrashError::new(
                TrashErrorCode::InsideFacility,
                format!("{} is already inside the trash", path.display()),
            ));
        }
        self.ensure_facility()?;
        let _lock = FacilityLock::acquire(&self.trash_root, self.lock_stale_after)?;

        let meta = fs::symlink_metadata(path).map_err(|e| {
            TrashError::from_io_error(&format!("cannot stat {}", path.display()), e)
        })?;
        let kind = EntryKind::of(&meta);
        let size = fsops::entry_size(path);
        let deleted_at = Local::now();

        let base_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "item".to_string());
        let name = disambiguate_name(&self.trash_root, &base_name, |_| false);
        let data_target = self.trash_root.join(&name);

        if path_norm::same_volume(path, &self.trash_root) {
            fs::rename(path, &data_target).map_err(|e| {
                TrashError::from_io_error(
                    &format!("failed to move {} into the trash", path.display()),
                    e,
                )
            })?;
        } else {
            if let Err(err) = fsops::copy_entry(path, &data_target) {
                let _ = fsops::remove_entry(&data_target);
                return Err(TrashError::cross_device_failed(err));
            }
            if let Err(err) = fsops::remove_entry(path) {
                let _ = fsops::remove_entry(&data_target);
                return Err(TrashError::cross_device_failed(format!(
                    "copied into the trash but failed to delete the source: {err}"
                )));
            }
        }

        debug!(
            original = %path.display(),
            stored = %data_target.display(),
            "moved entry into the trash"
        );

        if is_cancelled(cancel) {
            return Err(TrashError::new(
                TrashErrorCode::Cancelled,
                "cancelled during the trash move; the entry was committed",
            ));
        }

        Ok(TrashEntry {
            handle: data_target.to_string_lossy().into_owned(),
            original_path: path.to_path_buf(),
            trash_path: data_target,
            deleted_at,
            size,
            kind,
        })
    }

    fn list(&self, _filter: Option<&ListFilter>) -> TrashResult<Listing> {
        Err(TrashError::facility_unavailable(
            "macOS keeps trash metadata private to Finder; use Finder to browse the trash",
        ))
    }

    fn restore(&self, _entry: &TrashEntry, _policy: OverwritePolicy) -> TrashResult<PathBuf> {
        Err(TrashError::facility_unavailable(
            "macOS keeps trash metadata private to Finder; use Finder to put items back",
        ))
    }

    fn facility_for(&self, _path: &Path) -> TrashResult<PathBuf> {
        Ok(self.trash_root.clone())
    }

    fn facility_roots(&self) -> Vec<PathBuf> {
        vec![self.trash_root.clone()]
    }
}
