use std::fs;
use std::io::{ErrorKind, Write};
use std::os::windows::ffi::{OsStrExt, OsStringExt};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone};
use tracing::{debug, warn};

use super::error::{TrashError, TrashErrorCode, TrashResult};
use super::lock::FacilityLock;
use super::{
    is_cancelled, restored_sibling, EntryKind, ListFilter, ListWarning, Listing,
    OverwritePolicy, TrashBackend, TrashEntry,
};
use crate::fsops;

/// 100-ns ticks between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_EPOCH: i64 = 116_444_736_000_000_000;
const HEADER_VERSION: u64 = 2;
/// Fixed fields of a version-2 `$I` file: version, size, FILETIME, path length.
const HEADER_LEN_V2: usize = 8 + 8 + 8 + 4;
const HEADER_LEN_V1: usize = 8 + 8 + 8;

/// Windows Recycle Bin backend: per-volume `X:\$Recycle.Bin\<SID>` stores,
/// one `$I`/`$R` pair per item in the exact layout Explorer restores from.
pub struct PlatformTrash {
    sid: Option<String>,
    lock_stale_after: Duration,
    id_collision_retries: u32,
}

impl PlatformTrash {
    pub fn new(lock_stale_after: Duration, id_collision_retries: u32) -> Self {
        let sid = current_user_sid();
        if sid.is_none() {
            warn!("could not resolve the current user SID; recycle bin access is unavailable");
        }
        Self {
            sid,
            lock_stale_after,
            id_collision_retries,
        }
    }

    fn sid(&self) -> TrashResult<&str> {
        self.sid
            .as_deref()
            .ok_or_else(|| TrashError::facility_unavailable("current user SID is unknown"))
    }

    fn recycle_root(&self, volume_root: &Path) -> TrashResult<PathBuf> {
        Ok(volume_root.join("$Recycle.Bin").join(self.sid()?))
    }

    fn ensure_facility(&self, root: &Path) -> TrashResult<()> {
        // ACLs are inherited from $Recycle.Bin; no explicit mode handling.
        fs::create_dir_all(root).map_err(|e| {
            TrashError::facility_unavailable(format!("cannot create {}: {e}", root.display()))
        })
    }

    /// Mint a fresh pair id. Explorer's visible name may duplicate; the id
    /// disambiguates, so collisions just mint again.
    fn mint_id() -> String {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        let salt = COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut value = (nanos ^ std::process::id()).wrapping_add(salt.wrapping_mul(0x9E37));
        let mut id = String::with_capacity(6);
        for _ in 0..6 {
            let digit = (value % 36) as u8;
            id.push(if digit < 10 {
                (b'0' + digit) as char
            } else {
                (b'A' + digit - 10) as char
            });
            value /= 36;
        }
        id
    }

    fn pair_names(source: &Path, id: &str) -> (String, String) {
        let ext = source
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        (format!("$R{id}{ext}"), format!("$I{id}{ext}"))
    }

    fn list_root(&self, root: &Path, listing: &mut Listing) {
        let iter = match fs::read_dir(root) {
            Ok(iter) => iter,
            Err(err) if err.kind() == ErrorKind::NotFound => return,
            Err(err) => {
                // Unmounted or access-denied volumes degrade to a warning.
                listing.warnings.push(ListWarning {
                    path: root.to_path_buf(),
                    reason: format!("cannot read recycle directory: {err}"),
                });
                return;
            }
        };
        for entry in iter.flatten() {
            let info_path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy().into_owned();
            if !name.starts_with("$I") {
                continue;
            }
            let data_name = format!("$R{}", &name[2..]);
            let data_path = root.join(&data_name);
            match read_header(&info_path) {
                Ok((original_path, size, deleted_at)) => {
                    let meta = match fs::symlink_metadata(&data_path) {
                        Ok(meta) => meta,
                        Err(_) => {
                            listing.warnings.push(ListWarning {
                                path: info_path,
                                reason: "metadata present but $R data file is missing"
                                    .to_string(),
                            });
                            continue;
                        }
                    };
                    listing.entries.push(TrashEntry {
                        handle: info_path.to_string_lossy().into_owned(),
                        original_path,
                        trash_path: data_path,
                        deleted_at,
                        size,
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
                format!("{} is already inside the recycle bin", path.display()),
            ));
        }
        self.ensure_facility(&root)?;
        let _lock = FacilityLock::acquire(&root, self.lock_stale_after)?;

        let meta = fs::symlink_metadata(path).map_err(|e| {
            TrashError::from_io_error(&format!("cannot stat {}", path.display()), e)
        })?;
        let kind = EntryKind::of(&meta);
        let size = fsops::entry_size(path);
        let deleted_at = Local::now();

        // Explorer may race us on ids; mint fresh ones and retry.
        let mut attempt = 0u32;
        let (data_target, info_target) = loop {
            let id = Self::mint_id();
            let (data_name, info_name) = Self::pair_names(path, &id);
            let data_target = root.join(&data_name);
            let info_target = root.join(&info_name);
            if data_target.exists() || info_target.exists() {
                attempt += 1;
                if attempt > self.id_collision_retries {
                    return Err(TrashError::new(
                        TrashErrorCode::Io,
                        format!(
                            "could not mint a unique recycle id for {}",
                            path.display()
                        ),
                    ));
                }
                continue;
            }
            break (data_target, info_target);
        };

        // The per-volume root guarantees same-volume, but a junction can
        // still force the copy fallback.
        let moved_by_rename = match fs::rename(path, &data_target) {
            Ok(()) => true,
            Err(err) if crate::errors::is_cross_device(&err) => {
                if let Err(copy_err) = fsops::copy_entry(path, &data_target) {
                    let _ = fsops::remove_entry(&data_target);
                    return Err(TrashError::cross_device_failed(copy_err));
                }
                match fsops::copies_match(path, &data_target) {
                    Ok(true) => {}
                    Ok(false) => {
                        let _ = fsops::remove_entry(&data_target);
                        return Err(TrashError::cross_device_failed(
                            "copied data does not match the source",
                        ));
                    }
                    Err(err) => {
                        let _ = fsops::remove_entry(&data_target);
                        return Err(TrashError::cross_device_failed(err));
                    }
                }
                if let Err(err) = fsops::remove_entry(path) {
                    let _ = fsops::remove_entry(&data_target);
                    return Err(TrashError::cross_device_failed(format!(
                        "copied into the recycle bin but failed to delete the source: {err}"
                    )));
                }
                false
            }
            Err(err) => {
                return Err(TrashError::from_io_error(
                    &format!("failed to move {} into the recycle bin", path.display()),
                    err,
                ));
            }
        };

        let cancelled_late = is_cancelled(cancel);

        if let Err(err) = write_header(&info_target, path, size, deleted_at) {
            let rolled_back = if moved_by_rename {
                fs::rename(&data_target, path).is_ok()
            } else {
                fsops::move_by_copy_delete(&data_target, path).is_ok()
            };
            let _ = fs::remove_file(&info_target);
            return Err(TrashError::metadata_write_failed(err, rolled_back));
        }

        debug!(
            original = %path.display(),
            stored = %data_target.display(),
            "moved entry into the recycle bin"
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
        for volume in fixed_volume_roots() {
            if let Ok(root) = self.recycle_root(&volume) {
                self.list_root(&root, &mut listing);
            }
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
            .map(Path::to_path_buf)
            .ok_or_else(|| TrashError::facility_unavailable("entry handle has no parent"))?;
        let _lock = FacilityLock::acquire(&root, self.lock_stale_after)?;

        if !entry.trash_path.exists() {
            return Err(TrashError::new(
                TrashErrorCode::EntryOrphaned,
                format!("recycle data for {} is gone", entry.original_path.display()),
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
                            "refusing to recycle a file that lives inside the recycle bin",
                        ));
                    }
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
                    "restored the data but could not remove its $I record"
                );
            }
        }
        Ok(target)
    }

    fn facility_for(&self, path: &Path) -> TrashResult<PathBuf> {
        let volume = volume_root_of(path).ok_or_else(|| {
            TrashError::facility_unavailable(format!(
                "{} has no drive or UNC prefix",
                path.display()
            ))
        })?;
        self.recycle_root(&volume)
    }

    fn facility_roots(&self) -> Vec<PathBuf> {
        fixed_volume_roots()
            .into_iter()
            .filter_map(|volume| self.recycle_root(&volume).ok())
            .collect()
    }
}

fn volume_root_of(path: &Path) -> Option<PathBuf> {
    let mut components = path.components();
    match components.next() {
        Some(Component::Prefix(prefix)) => {
            let mut root = PathBuf::from(prefix.as_os_str());
            root.push("\\");
            Some(root)
        }
        _ => None,
    }
}

fn fixed_volume_roots() -> Vec<PathBuf> {
    use windows_sys::Win32::Storage::FileSystem::{GetDriveTypeW, GetLogicalDrives};
    const DRIVE_FIXED: u32 = 3;

    let mut roots = Vec::new();
    let mask = unsafe { GetLogicalDrives() };
    for index in 0..26u32 {
        if mask & (1 << index) == 0 {
            continue;
        }
        let letter = (b'A' + index as u8) as char;
        let root = format!("{letter}:\\");
        let wide: Vec<u16> = root.encode_utf16().chain(std::iter::once(0)).collect();
        if unsafe { GetDriveTypeW(wide.as_ptr()) } == DRIVE_FIXED {
            roots.push(PathBuf::from(root));
        }
    }
    roots
}

fn current_user_sid() -> Option<String> {
    use windows_sys::Win32::Foundation::{CloseHandle, LocalFree, HANDLE};
    use windows_sys::Win32::Security::Authorization::ConvertSidToStringSidW;
    use windows_sys::Win32::Security::{GetTokenInformation, TokenUser, TOKEN_QUERY, TOKEN_USER};
    use windows_sys::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

    unsafe {
        let mut token: HANDLE = std::ptr::null_mut();
        if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) == 0 {
            return None;
        }
        let mut needed = 0u32;
        GetTokenInformation(token, TokenUser, std::ptr::null_mut(), 0, &mut needed);
        if needed == 0 {
            CloseHandle(token);
            return None;
        }
        let mut buf = vec![0u8; needed as usize];
        let ok = GetTokenInformation(
            token,
            TokenUser,
            buf.as_mut_ptr() as *mut _,
            needed,
            &mut needed,
        );
        CloseHandle(token);
        if ok == 0 {
            return None;
        }
        let user = &*(buf.as_ptr() as *const TOKEN_USER);
        let mut wide_sid: *mut u16 = std::ptr::null_mut();
        if ConvertSidToStringSidW(user.User.Sid, &mut wide_sid) == 0 {
            return None;
        }
        let mut len = 0usize;
        while *wide_sid.add(len) != 0 {
            len += 1;
        }
        let sid = String::from_utf16_lossy(std::slice::from_raw_parts(wide_sid, len));
        LocalFree(wide_sid as *mut _);
        Some(sid)
    }
}

fn to_filetime(at: DateTime<Local>) -> i64 {
    let unix_secs = at.timestamp();
    let sub_ticks = i64::from(at.timestamp_subsec_nanos() / 100);
    unix_secs * 10_000_000 + sub_ticks + FILETIME_UNIX_EPOCH
}

fn from_filetime(ticks: i64) -> DateTime<Local> {
    let unix_ticks = ticks - FILETIME_UNIX_EPOCH;
    let secs = unix_ticks.div_euclid(10_000_000);
    let nanos = (unix_ticks.rem_euclid(10_000_000) * 100) as u32;
    Local
        .timestamp_opt(secs, nanos)
        .earliest()
        .unwrap_or_else(Local::now)
}

/// Write a version-2 `$I` record: all little-endian, UTF-16LE path without a
/// BOM, one trailing NUL pair counted by the length field.
fn write_header(
    info_target: &Path,
    original: &Path,
    size: u64,
    deleted_at: DateTime<Local>,
) -> std::io::Result<()> {
    let mut wide: Vec<u16> = original.as_os_str().encode_wide().collect();
    wide.push(0);

    let mut buf = Vec::with_capacity(HEADER_LEN_V2 + wide.len() * 2);
    buf.extend_from_slice(&HEADER_VERSION.to_le_bytes());
    buf.extend_from_slice(&(size as i64).to_le_bytes());
    buf.extend_from_slice(&to_filetime(deleted_at).to_le_bytes());
    buf.extend_from_slice(&(wide.len() as u32).to_le_bytes());
    for unit in &wide {
        buf.extend_from_slice(&unit.to_le_bytes());
    }

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(info_target)?;
    file.write_all(&buf)
}

/// Read a `$I` record, accepting both the version-1 layout (path runs to the
/// end of file) and version 2 (explicit length field).
fn read_header(info_path: &Path) -> Result<(PathBuf, u64, DateTime<Local>), String> {
    fn le_bytes<const N: usize>(buf: &[u8], offset: usize) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&buf[offset..offset + N]);
        out
    }

    let buf = fs::read(info_path).map_err(|e| format!("cannot read $I file: {e}"))?;
    if buf.len() < HEADER_LEN_V1 {
        return Err("truncated $I header".to_string());
    }
    let version = u64::from_le_bytes(le_bytes(&buf, 0));
    let size = i64::from_le_bytes(le_bytes(&buf, 8)).max(0) as u64;
    let ticks = i64::from_le_bytes(le_bytes(&buf, 16));
    let deleted_at = from_filetime(ticks);

    let path_bytes = match version {
        1 => &buf[HEADER_LEN_V1..],
        2 => {
            if buf.len() < HEADER_LEN_V2 {
                return Err("truncated version-2 $I header".to_string());
            }
            let units = u32::from_le_bytes(le_bytes(&buf, 24)) as usize;
            let end = HEADER_LEN_V2 + units * 2;
            if buf.len() < end {
                return Err("path length exceeds the $I file".to_string());
            }
            &buf[HEADER_LEN_V2..end]
        }
        other => return Err(format!("unknown $I header version {other}")),
    };
    if path_bytes.len() % 2 != 0 {
        return Err("odd-length UTF-16 path in $I file".to_string());
    }
    let mut units: Vec<u16> = path_bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    while units.last() == Some(&0) {
        units.pop();
    }
    if units.is_empty() {
        return Err("empty path in $I file".to_string());
    }
    let original = PathBuf::from(std::ffi::OsString::from_wide(&units));
    Ok((original, size, deleted_at))
}
