use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use chrono::{DateTime, Local};
use serde::Serialize;

pub mod error;
mod lock;

#[cfg(target_os = "windows")]
#[path = "windows.rs"]
mod platform;

#[cfg(target_os = "macos")]
#[path = "macos.rs"]
mod platform;

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
#[path = "xdg.rs"]
mod platform;

#[cfg(all(test, not(any(target_os = "windows", target_os = "macos"))))]
mod tests;

pub use error::{TrashError, TrashErrorCode, TrashResult};
pub use lock::FacilityLock;
pub use platform::PlatformTrash;

/// The native backend for the host OS, configured once at startup.
pub fn platform_backend(cfg: &crate::config::Config) -> PlatformTrash {
    PlatformTrash::new(cfg.lock_stale_after, cfg.id_collision_retries)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

impl EntryKind {
    pub fn of(meta: &std::fs::Metadata) -> Self {
        if meta.file_type().is_symlink() {
            Self::Symlink
        } else if meta.is_dir() {
            Self::Directory
        } else {
            Self::File
        }
    }
}

/// One item currently living inside a recycle facility.
#[derive(Debug, Clone, Serialize)]
pub struct TrashEntry {
    /// Opaque handle, unique within the facility. For XDG it is the absolute
    /// path of the `.trashinfo` file; for Windows, the `$I` file.
    pub handle: String,
    pub original_path: PathBuf,
    pub trash_path: PathBuf,
    pub deleted_at: DateTime<Local>,
    pub size: u64,
    pub kind: EntryKind,
}

/// Non-fatal problem found while enumerating a facility. Malformed entries
/// never abort a listing.
#[derive(Debug, Clone)]
pub struct ListWarning {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct Listing {
    pub entries: Vec<TrashEntry>,
    pub warnings: Vec<ListWarning>,
}

/// Filter applied during enumeration: basename glob, deletion-time range,
/// size range. An empty filter matches everything.
#[derive(Default)]
pub struct ListFilter {
    pub name_glob: Option<globset::GlobMatcher>,
    pub deleted_after: Option<DateTime<Local>>,
    pub deleted_before: Option<DateTime<Local>>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
}

impl ListFilter {
    pub fn with_name_glob(pattern: &str) -> Result<Self, globset::Error> {
        Ok(Self {
            name_glob: Some(globset::Glob::new(pattern)?.compile_matcher()),
            ..Self::default()
        })
    }

    pub fn matches(&self, entry: &TrashEntry) -> bool {
        if let Some(glob) = &self.name_glob {
            let name = entry
                .original_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !glob.is_match(&name) {
                return false;
            }
        }
        if let Some(after) = self.deleted_after {
            if entry.deleted_at < after {
                return false;
            }
        }
        if let Some(before) = self.deleted_before {
            if entry.deleted_at > before {
                return false;
            }
        }
        if let Some(min) = self.min_size {
            if entry.size < min {
                return false;
            }
        }
        if let Some(max) = self.max_size {
            if entry.size > max {
                return false;
            }
        }
        true
    }
}

/// What `restore` does when a file already exists at the original path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwritePolicy {
    Abort,
    Rename,
    Overwrite,
}

/// The platform-polymorphic seam of the engine: one implementation per
/// native recycle facility, selected at program start.
pub trait TrashBackend {
    /// Move `path` into its owning facility and record the metadata the
    /// native restore UI expects. Observationally atomic: on error the
    /// original target is untouched and no partial artifact remains.
    fn send_to_trash(&self, path: &Path, cancel: Option<&AtomicBool>) -> TrashResult<TrashEntry>;

    /// Enumerate every well-formed entry; malformed ones become warnings.
    fn list(&self, filter: Option<&ListFilter>) -> TrashResult<Listing>;

    /// Move an entry back to its original path and drop its metadata.
    fn restore(&self, entry: &TrashEntry, policy: OverwritePolicy) -> TrashResult<PathBuf>;

    /// The facility root that owns `path`, resolved by volume.
    fn facility_for(&self, path: &Path) -> TrashResult<PathBuf>;

    /// Every facility root this backend may write to, for the classifier.
    fn facility_roots(&self) -> Vec<PathBuf>;
}

/// Suffix a basename with `_<timestamp>_<counter>` until `dir` has a free
/// slot for both the data name and `probe_taken` (the metadata sibling).
pub(crate) fn disambiguate_name(
    dir: &Path,
    name: &str,
    mut probe_taken: impl FnMut(&str) -> bool,
) -> String {
    if !dir.join(name).exists() && !probe_taken(name) {
        return name.to_string();
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), Some(ext.to_string())),
        _ => (name.to_string(), None),
    };
    let timestamp = Local::now().timestamp();
    let mut counter = 1u64;
    loop {
        let candidate = match &ext {
            Some(ext) => format!("{stem}_{timestamp}_{counter}.{ext}"),
            None => format!("{stem}_{timestamp}_{counter}"),
        };
        if !dir.join(&candidate).exists() && !probe_taken(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Sibling name used when restoring next to an existing file:
/// `name (restored N).ext`.
pub(crate) fn restored_sibling(original: &Path) -> PathBuf {
    let parent = original.parent().unwrap_or_else(|| Path::new("."));
    let stem = original
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "item".to_string());
    let ext = original.extension().map(|e| e.to_string_lossy().into_owned());
    let mut n = 1u32;
    loop {
        let name = match &ext {
            Some(ext) => format!("{stem} (restored {n}).{ext}"),
            None => format!("{stem} (restored {n})"),
        };
        let candidate = parent.join(name);
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

pub(crate) fn is_cancelled(cancel: Option<&AtomicBool>) -> bool {
    cancel
        .map(|token| token.load(std::sync::atomic::Ordering::Relaxed))
        .unwrap_or(false)
}
