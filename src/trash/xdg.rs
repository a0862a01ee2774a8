use std::fmt::Write as _;
use std::fs;
use std::io::{ErrorKind, Write};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use chrono::{Local, NaiveDateTime, TimeZone};
use tracing::{debug, warn};

use super::error::{TrashError, TrashErrorCode, TrashResult};
use super::lock::FacilityLock;
use super::{
    disambiguate_name, is_cancelled, restored_sibling, EntryKind, ListFilter, ListWarning,
    Listing, OverwritePolicy, TrashBackend, TrashEntry,
};
use crate::fsops;
use crate::path_norm;

const INFO_SUFFIX: &str = ".trashinfo";

/// freedesktop.org Trash backend: `files/` + `info/` under the home trash,
/// with per-volume `$topdir/.Trash/$uid` / `$topdir/.Trash-$uid` for sources
/// on other filesystems.
pub struct PlatformTrash {
    home_trash: PathBuf,
    lock_stale_after: Duration,
    id_collision_retries: u32,
}

impl PlatformTrash {
    pub fn new(lock_stale_after: Duration, id_collision_retries: u32) -> Self {
        let home_trash = std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .filter(|p| p.is_absolute())
            .or_else(|| dirs_next::data_dir())
            .unwrap_or_else(std::env::temp_dir)
            .join("Trash");
        Self {
            home_trash,
            lock_stale_after,
            id_collision_retries,
        }
    }

    /// Backend rooted at an explicit trash directory. Used by tests so suites
    /// never touch the user's real trash.
    pub fn with_home_trash(home_trash: PathBuf, lock_stale_after: Duration) -> Self {
        Self {
            home_trash,
            lock_stale_after,
            id_collision_retries: 5,
        }
    }

    fn ensure_facility(&self, root: &Path) -> TrashResult<()> {
        for dir in [root.to_path_buf(), root.join("files"), root.join("info")] {
            if dir.exists() {
                continue;
            }
            fs::DirBuilder::new()
                .recursive(true)
                .mode(0o755)
                .create(&dir)
                .map_err(|e| {
                    TrashError::facility_unavailable(format!(
                        "cannot create {}: {e}",
                        dir.display()
                    ))
                })?;
        }
        Ok(())
    }

    fn info_dir(root: &Path) -> PathBuf {
        root.join("info")
    }

    fn files_dir(root: &Path) -> PathBuf {
        root.join("files")
    }

    /// Volume-local trash for a source outside the home-trash filesystem:
    /// `$topdir/.Trash/$uid` when the admin pre-created it correctly
    /// (sticky, not a symlink), else `$topdir/.Trash-$uid`.
    fn topdir_trash(&self, mount_point: &Path) -> PathBuf {
        let uid = unsafe { libc::getuid() };
        let shared = mount_point.join(".Trash");
        if let Ok(meta) = fs::symlink_metadata(&shared) {
            use std::os::unix::fs::MetadataExt;
            let sticky = meta.mode() & 0o1000 != 0;
            if meta.is_dir() && !meta.file_type().is_symlink() && sticky {
                return shared.join(uid.to_string());
            }
        }
        mount_point.join(format!(".Trash-{uid}"))
    }

    /// Move the data into `files/` and claim the metadata slot, retrying with
    /// fresh names if an external writer races us on the same basename.
    fn place_entry(
        &self,
        source: &Path,
        root: &Path,
        same_volume: bool,
    ) -> TrashResult<(PathBuf, PathBuf, bool)> {
        let files = Self::files_dir(root);
        let info = Self::info_dir(root);
        let base_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "item".to_string());

        let mut attempt = 0u32;
        loop {
            let name = disambiguate_name(&files, &base_name, |candidate| {
                info.join(format!("{candidate}{INFO_SUFFIX}")).exists()
            });
            let data_target = files.join(&name);
            let info_target = info.join(format!("{name}{INFO_SUFFIX}"));

            let moved_by_rename = if same_volume {
                match fs::rename(source, &data_target) {
                    Ok(()) => true,
                    Err(err) if crate::errors::is_cross_device(&err) => {
                        self.copy_into_facility(source, &data_target)?;
                        false
                    }
                    Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                        attempt += 1;
                        if attempt > self.id_collision_retries {
                            return Err(TrashError::new(
                                TrashErrorCode::Io,
                                format!(
                                    "could not claim a unique trash slot for {}",
                                    source.display()
                                ),
                            ));
                        }
                        continue;
                    }
                    Err(err) => {
                        return Err(TrashError::from_io_error(
                            &format!("failed to move {} into the trash", source.display()),
                            err,
                        ));
                    }
                }
            } else {
                self.copy_into_facility(source, &data_target)?;
                false
            };

            return Ok((data_target, info_target, moved_by_rename));
        }
    }

    /// Cross-volume fallback: recursive copy, verification, then source
    /// removal. Any failure removes the partial copy so no orphan remains.
    pub(super) fn copy_into_facility(&self, source: &Path, data_target: &Path) -> TrashResult<()> {
        if let Err(err) = fsops::copy_entry(source, data_target) {
            let _ = fsops::remove_entry(data_target);
            return Err(TrashError::cross_device_failed(err));
        }
        #[cfg(test)]
        if fault::take_copy_failure() {
            let _ = fsops::remove_entry(data_target);
            return Err(TrashError::cross_device_failed(
                "injected copy failure at the verification midpoint",
            ));
        }
        match fsops::copies_match(source, data_target) {
            Ok(true) => {}
            Ok(false) => {
                let _ = fsops::remove_entry(data_target);
                return Err(TrashError::cross_device_failed(
                    "copied data does not match the source",
                ));
            }
            Err(err) => {
                let _ = fsops::remove_entry(data_target);
                return Err(TrashError::cross_device_failed(err));
            }
        }
        if let Err(err) = fsops::remove_entry(source) {
            let _ = fsops::remove_entry(data_target);
            return Err(TrashError::cross_device_failed(format!(
                "copied into the trash but failed to delete the source: {err}"
            )));
        }
        Ok(())
    }

    fn write_info_file(
        &self,
        info_target: &Path,
        original: &Path,
        deleted_at: chrono::DateTime<Local>,
    ) -> std::io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(info_target)?;
        write!(
            file,
            "[Trash Info]\nPath={}\nDeletionDate={}\n",
            encode_info_path(original),
            deleted_at.format("%Y-%m-%dT%H:%M:%S")
        )
    }

    fn roll_back_data(
        &self,
        source: &Path,
        data_target: &Path,
        moved_by_rename: bool,
    ) -> bool {
        let result = if moved_by_rename {
            fs::rename(data_target, source).map_err(std::io::Error::from)
        } else {
            fsops::move_by_copy_delete(data_target, source)
        };
        match result {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    source = %source.display(),
                    staged = %data_target.display(),
                    error = %err,
                    "failed to roll back a trash move"
                );
                false
            }
        }
    }

    fn list_root(&self, root: &Path, listing: &mut Listing) {
        let info_dir = Self::info_dir(root);
        let files_dir = Self::files_dir(root);
        let iter = match fs::read_dir(&info_dir) {
            Ok(iter) => iter,
            Err(err) if err.kind() == ErrorKind::NotFound => return,
            Err(err) => {
                listing.warnings.push(ListWarning {
                    path: info_dir,
                    reason: format!("cannot read trash info directory: {err}"),
                });
                return;
            }
        };
        for entry in iter.flatten() {
            let info_path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(stem) = name.strip_suffix(INFO_SUFFIX) else {
                continue;
            };
            match read_info_file(&info_path) {
                Ok((original_path, deleted_at)) => {
                    let data_path = files_dir.join(stem);
                    let meta = match fs::symlink_metadata(&data_path) {
                        Ok(meta) => meta,
                        Err(_) => {
                            listing.warnings.push(ListWarning {
                                path: info_path,
                                reason: "metadata present but data file is missing".to_string(),
                            });
                            continue;
                        }
                    };
                    listing.entries.push(TrashEntry {
                        handle: info_path.to_string_lossy().into_owned(),
                        original_path,
                        trash_path: data_path.clone(),
                        deleted_at,
                        size: fsops::entry_size(&data_path),
                        kind: EntryKind::of(&meta),
                    });
                }
                Err(reason) => {
                    listing.warnings.push(ListWarning {
                        path: info_path,
                        reason,
                    });
                }
            }
        }

        // Data without metadata cannot be restored; surface it.
        if let Ok(iter) = fs::read_dir(&files_dir) {
            for entry in iter.flatten() {
                let name = entry.file_name();
                let info_path = info_dir.join(format!("{}{INFO_SUFFIX}", name.to_string_lossy()));
                if !info_path.exists() {
                    listing.warnings.push(ListWarning {
                        path: entry.path(),
                        reason: "data file has no matching metadata".to_string(),
                    });
                }
            }
        }
    }

    /// Topdir trashes of currently mounted volumes, for enumeration. Mounts
    /// without an existing trash directory are skipped.
    fn mounted_trash_roots(&self) -> Vec<PathBuf> {
        let mut roots = Vec::new();
        let Ok(mounts) = fs::read_to_string("/proc/mounts") else {
            return roots;
        };
        let uid = unsafe { libc::getuid() };
        for line in mounts.lines() {
            let Some(mount_point) = line.split_whitespace().nth(1) else {
                continue;
            };
            let mount_point = Path::new(mount_point);
            if mount_point == Path::new("/") {
                continue;
            }
            for candidate in [
                mount_point.join(".Trash").join(uid.to_string()),
                mount_point.join(format!(".Trash-{uid}")),
            ] {
                if candidate.is_dir() && !roots.contains(&candidate) {
                    roots.push(candidate);
                }
            }
        }
        roots
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

        let root = self.facility_for(path)?;
        if path.starts_with(&root) {
            return Err(TrashError::new(
                TrashErrorCode::InsideFacility,
                format!("{} is already inside the trash", path.display()),
            ));
        }
        self.ensure_facility(&root)?;
        let _lock = FacilityLock::acquire(&root, self.lock_stale_after)?;

        // Size and kind are recorded before the move; afterwards the source
        // is gone.
        let meta = fs::symlink_metadata(path).map_err(|e| {
            TrashError::from_io_error(&format!("cannot stat {}", path.display()), e)
        })?;
        let kind = EntryKind::of(&meta);
        let size = fsops::entry_size(path);
        let deleted_at = Local::now();

        let same_volume = path_norm::same_volume(path, &root);
        let (data_target, info_target, moved_by_rename) =
            self.place_entry(path, &root, same_volume)?;

        // A cancel arriving after the data moved must not strand the entry
        // without metadata; finish the record, then report the cancel.
        let cancelled_late = is_cancelled(cancel);

        if let Err(err) = self.write_info_file(&info_target, path, deleted_at) {
            let rolled_back = self.roll_back_data(path, &data_target, moved_by_rename);
            return Err(TrashError::metadata_write_failed(err, rolled_back));
        }

        debug!(
            original = %path.display(),
            stored = %data_target.display(),
            "moved entry into the trash"
        );

        if cancelled_late {
            return Err(TrashError::new(
                TrashErrorCode::Cancelled,
                "cancelled during the trash move; the entry was committed",
            ));
        }

        Ok(TrashEntry {
            handle: info_target.to_string_lossy().into_owned(),
            original_path: path.to_path_buf(),
            trash_path: data_target,
            deleted_at,
            size,
            kind,
        })
    }

    fn list(&self, filter: Option<&ListFilter>) -> TrashResult<Listing> {
        let mut listing = Listing::default();
        self.list_root(&self.home_trash, &mut listing);
        for root in self.mounted_trash_roots() {
            self.list_root(&root, &mut listing);
        }
        if let Some(filter) = filter {
            listing.entries.retain(|entry| filter.matches(entry));
        }
        Ok(listing)
    }

    fn restore(&self, entry: &TrashEntry, policy: OverwritePolicy) -> TrashResult<PathBuf> {
        let info_path = PathBuf::from(&entry.handle);
        let root = info_path
            .parent()
            .and_then(|p| p.parent())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.home_trash.clone());
        let _lock = FacilityLock::acquire(&root, self.lock_stale_after)?;

        if !entry.trash_path.exists() {
            return Err(TrashError::new(
                TrashErrorCode::EntryOrphaned,
                format!(
                    "trash data for {} is gone",
                    entry.original_path.display()
                ),
            ));
        }

        let mut target = entry.original_path.clone();
        if fs::symlink_metadata(&target).is_ok() {
            match policy {
                OverwritePolicy::Abort => {
                    return Err(TrashError::new(
                        TrashErrorCode::TargetExists,
                        format!("{} already exists", target.display()),
                    ));
                }
                OverwritePolicy::Rename => {
                    target = restored_sibling(&entry.original_path);
                }
                OverwritePolicy::Overwrite => {
                    if self
                        .facility_roots()
                        .iter()
                        .any(|facility| target.starts_with(facility))
                    {
                        return Err(TrashError::new(
                            TrashErrorCode::InsideFacility,
                            "refusing to trash a file that lives inside the trash",
                        ));
                    }
                    // The displaced file goes through the engine itself so it
                    // stays recoverable. The lock is re-entered per facility,
                    // so drop ours first if it is the same one.
                    drop(_lock);
                    self.send_to_trash(&target, None)?;
                    return self.restore(entry, OverwritePolicy::Abort);
                }
            }
        }

        if let Some(parent) = target.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    TrashError::new(
                        TrashErrorCode::OriginalParentMissing,
                        format!(
                            "original parent {} is gone and could not be recreated: {e}",
                            parent.display()
                        ),
                    )
                })?;
            }
        }

        fsops::move_with_fallback(&entry.trash_path, &target).map_err(|e| {
            TrashError::from_io_error(
                &format!("failed to restore {}", entry.original_path.display()),
                e,
            )
        })?;

        if let Err(err) = fs::remove_file(&info_path) {
            if err.kind() != ErrorKind::NotFound {
                warn!(
                    info = %info_path.display(),
                    error = %err,
                    "restored the data but could not remove its metadata; the entry is now an orphan"
                );
            }
        }
        Ok(target)
    }

    fn facility_for(&self, path: &Path) -> TrashResult<PathBuf> {
        let home_volume = path_norm::volume_id(&self.home_trash);
        let path_volume = path_norm::volume_id(path);
        match (home_volume, path_volume) {
            (Some(home), Some(source)) if home != source => {
                let mount = mount_point_of(path);
                Ok(self.topdir_trash(&mount))
            }
            _ => Ok(self.home_trash.clone()),
        }
    }

    fn facility_roots(&self) -> Vec<PathBuf> {
        let mut roots = vec![self.home_trash.clone()];
        roots.extend(self.mounted_trash_roots());
        roots
    }
}

/// Walk up from the nearest existing ancestor until the device id changes.
fn mount_point_of(path: &Path) -> PathBuf {
    let mut probe = path.to_path_buf();
    while !probe.exists() {
        match probe.parent() {
            Some(parent) => probe = parent.to_path_buf(),
            None => return PathBuf::from("/"),
        }
    }
    let device = path_norm::volume_id(&probe);
    loop {
        let Some(parent) = probe.parent() else {
            return probe;
        };
        if path_norm::volume_id(parent) != device {
            return probe;
        }
        probe = parent.to_path_buf();
    }
}

/// Percent-encode an absolute path for a `.trashinfo` `Path=` line. Each
/// segment is encoded separately; `/` stays literal so the file remains
/// readable by GNOME and KDE.
pub(super) fn encode_info_path(path: &Path) -> String {
    let bytes = path.as_os_str().as_bytes();
    let mut out = String::with_capacity(bytes.len().saturating_mul(3).max(1));

    if bytes.starts_with(b"/") {
        out.push('/');
    }
    let start = usize::from(bytes.starts_with(b"/"));
    let mut first_segment = true;
    for segment in bytes[start..].split(|b| *b == b'/') {
        if segment.is_empty() {
            continue;
        }
        if !first_segment {
            out.push('/');
        }
        for byte in segment {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                    out.push(*byte as char);
                }
                _ => {
                    let _ = write!(out, "%{byte:02X}");
                }
            }
        }
        first_segment = false;
    }
    if out.is_empty() {
        ".".to_string()
    } else {
        out
    }
}

pub(super) fn decode_info_path(encoded: &str) -> Result<PathBuf, String> {
    fn hex_val(byte: u8) -> Option<u8> {
        match byte {
            b'0'..=b'9' => Some(byte - b'0'),
            b'a'..=b'f' => Some(byte - b'a' + 10),
            b'A'..=b'F' => Some(byte - b'A' + 10),
            _ => None,
        }
    }

    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 2 >= bytes.len() {
                return Err(format!("invalid percent encoding: '{encoded}'"));
            }
            let hi = hex_val(bytes[i + 1])
                .ok_or_else(|| format!("invalid percent encoding at index {} in '{encoded}'", i + 1))?;
            let lo = hex_val(bytes[i + 2])
                .ok_or_else(|| format!("invalid percent encoding at index {} in '{encoded}'", i + 2))?;
            out.push((hi << 4) | lo);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(PathBuf::from(std::ffi::OsString::from_vec(out)))
}

/// Scripted fault used by the cross-device atomicity tests: the next
/// facility copy fails after the data was written but before verification.
#[cfg(test)]
pub(super) mod fault {
    use std::sync::atomic::{AtomicBool, Ordering};

    static FAIL_NEXT_COPY: AtomicBool = AtomicBool::new(false);

    pub fn fail_next_copy() {
        FAIL_NEXT_COPY.store(true, Ordering::SeqCst);
    }

    pub fn take_copy_failure() -> bool {
        FAIL_NEXT_COPY.swap(false, Ordering::SeqCst)
    }
}

/// Parse one `.trashinfo` file into (original path, deletion time).
pub(super) fn read_info_file(path: &Path) -> Result<(PathBuf, chrono::DateTime<Local>), String> {
    let content =
        fs::read_to_string(path).map_err(|e| format!("cannot read metadata file: {e}"))?;
    let mut in_section = false;
    let mut encoded_path = None;
    let mut deletion_date = None;
    for line in content.lines() {
        let line = line.trim();
        if line == "[Trash Info]" {
            in_section = true;
            continue;
        }
        if line.starts_with('[') {
            in_section = false;
            continue;
        }
        if !in_section {
            continue;
        }
        // Per the freedesktop spec the first occurrence wins.
        if let Some(value) = line.strip_prefix("Path=") {
            encoded_path.get_or_insert_with(|| value.to_string());
        } else if let Some(value) = line.strip_prefix("DeletionDate=") {
            deletion_date.get_or_insert_with(|| value.to_string());
        }
    }

    let encoded_path = encoded_path.ok_or_else(|| "missing Path entry".to_string())?;
    let deletion_date = deletion_date.ok_or_else(|| "missing DeletionDate entry".to_string())?;

    let original = decode_info_path(&encoded_path)?;
    if !original.is_absolute() {
        return Err(format!("Path entry is not absolute: {encoded_path}"));
    }
    let naive = NaiveDateTime::parse_from_str(&deletion_date, "%Y-%m-%dT%H:%M:%S")
        .map_err(|e| format!("invalid DeletionDate '{deletion_date}': {e}"))?;
    let local = Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| format!("unrepresentable DeletionDate '{deletion_date}'"))?;
    Ok((original, local))
}
