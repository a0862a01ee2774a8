use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::config::Config;
use crate::fsops;
use crate::locale::translate;
use crate::path_norm;
use crate::prompt::{ConfirmStrength, Decision, PromptItem, Prompter};
use crate::trash::{OverwritePolicy, TrashBackend, TrashEntry};

mod error;

pub use error::{CopyError, CopyErrorCode, CopyResult};

#[derive(Debug, Clone, Copy, Default)]
pub struct CopyOptions {
    pub recursive: bool,
    pub preserve_attrs: bool,
    /// Skip when the destination is at least as new as the source.
    pub update_only: bool,
    /// Any existing destination is an error instead of an overwrite.
    pub no_clobber: bool,
    /// Auto-confirm overwrite prompts.
    pub force: bool,
    /// Post-copy verification; `None` means "on for files within the cap".
    pub verify: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyOutcome {
    Copied,
    /// Source and destination are the same physical file.
    SameFile,
    /// Destination already holds identical bytes.
    Identical,
    /// `update_only` found the destination newer.
    DestinationNewer,
    /// The user declined the overwrite prompt.
    Declined,
}

/// Collision-aware copy. A destination that would be clobbered is first moved
/// into the recycle facility, so even a bad copy never loses data.
pub fn safe_copy(
    source: &Path,
    destination: &Path,
    options: CopyOptions,
    cfg: &Config,
    backend: &dyn TrashBackend,
    prompter: &mut dyn Prompter,
) -> CopyResult<CopyOutcome> {
    let src_meta = fs::symlink_metadata(source).map_err(|e| {
        CopyError::from_io_error(&format!("cannot stat {}", source.display()), e)
    })?;
    if path_norm::is_same_file(source, destination) {
        return Ok(CopyOutcome::SameFile);
    }
    if src_meta.is_dir() && !options.recursive {
        return Err(CopyError::new(
            CopyErrorCode::IsDirectory,
            format!(
                "{} is a directory; use --recursive to copy it",
                source.display()
            ),
        ));
    }

    let mut victim: Option<TrashEntry> = None;
    if let Ok(dest_meta) = fs::symlink_metadata(destination) {
        if options.no_clobber {
            return Err(CopyError::new(
                CopyErrorCode::DestinationExists,
                format!("{} already exists", destination.display()),
            ));
        }

        if options.update_only && !newer_than(&src_meta, &dest_meta) {
            return Ok(CopyOutcome::DestinationNewer);
        }

        if src_meta.is_file()
            && dest_meta.is_file()
            && src_meta.len() == dest_meta.len()
            && src_meta.len() <= cfg.compare_cap
        {
            match fsops::files_equal(source, destination) {
                Ok(true) => return Ok(CopyOutcome::Identical),
                Ok(false) => {}
                Err(err) => {
                    warn!(
                        source = %source.display(),
                        dest = %destination.display(),
                        error = %err,
                        "byte comparison failed, treating destination as different"
                    );
                }
            }
        }

        if !options.force {
            let item = PromptItem {
                label: destination.to_string_lossy().into_owned(),
                strength: ConfirmStrength::Normal,
                detail: Some(format!("would replace it with {}", source.display())),
            };
            let batch = prompter.confirm_batch(translate("prompt.confirm_copy"), &[item]);
            if batch.aborted || batch.decisions.first() != Some(&Decision::Accept) {
                return Ok(CopyOutcome::Declined);
            }
        }

        let entry = backend.send_to_trash(destination, None).map_err(|e| {
            CopyError::new(
                CopyErrorCode::VictimRelocationFailed,
                format!(
                    "could not move the existing {} into the trash: {e}",
                    destination.display()
                ),
            )
        })?;
        debug!(
            dest = %destination.display(),
            stored = %entry.trash_path.display(),
            "relocated the destination into the trash"
        );
        victim = Some(entry);
    }

    if let Err(err) = fsops::copy_entry(source, destination) {
        let _ = fsops::remove_entry(destination);
        return Err(CopyError::from_io_error(
            &format!(
                "failed to copy {} -> {}",
                source.display(),
                destination.display()
            ),
            err,
        ));
    }

    if options.preserve_attrs {
        preserve_timestamps(source, destination);
    }

    let verify = options
        .verify
        .unwrap_or(src_meta.len() <= cfg.verify_cap);
    if verify {
        let matches = fsops::copies_match(source, destination).unwrap_or(false);
        if !matches {
            let _ = fsops::remove_entry(destination);
            if let Some(entry) = &victim {
                if let Err(err) = backend.restore(entry, OverwritePolicy::Abort) {
                    warn!(
                        dest = %destination.display(),
                        error = %err,
                        "could not put the displaced destination back; it remains in the trash"
                    );
                }
            }
            return Err(CopyError::new(
                CopyErrorCode::IntegrityFailed,
                translate("copy.integrity"),
            ));
        }
    }

    Ok(CopyOutcome::Copied)
}

fn newer_than(src: &fs::Metadata, dest: &fs::Metadata) -> bool {
    match (src.modified(), dest.modified()) {
        (Ok(src_time), Ok(dest_time)) => src_time > dest_time,
        _ => true,
    }
}

#[cfg(unix)]
fn preserve_timestamps(source: &Path, destination: &Path) {
    use std::os::unix::ffi::OsStrExt;
    use std::os::unix::fs::MetadataExt;

    let Ok(meta) = fs::metadata(source) else {
        return;
    };
    let times = [
        libc::timespec {
            tv_sec: meta.atime(),
            tv_nsec: meta.atime_nsec(),
        },
        libc::timespec {
            tv_sec: meta.mtime(),
            tv_nsec: meta.mtime_nsec(),
        },
    ];
    let Ok(c_path) = std::ffi::CString::new(destination.as_os_str().as_bytes()) else {
        return;
    };
    let rc = unsafe { libc::utimensat(libc::AT_FDCWD, c_path.as_ptr(), times.as_ptr(), 0) };
    if rc != 0 {
        debug!(
            dest = %destination.display(),
            "could not carry source timestamps over"
        );
    }
}

#[cfg(not(unix))]
fn preserve_timestamps(_source: &Path, _destination: &Path) {}
