use tracing::warn;

use crate::locale::translate;
use crate::prompt::{ConfirmStrength, Decision, PromptItem, Prompter};
use crate::report::{FailureKind, Report};
use crate::trash::{ListFilter, OverwritePolicy, TrashBackend, TrashEntry, TrashErrorCode};

#[derive(Debug, Clone, Copy)]
pub struct RestoreOptions {
    pub policy: OverwritePolicy,
    /// Accept every matching entry without prompting.
    pub all: bool,
    /// Cap enumeration.
    pub max: Option<usize>,
    /// Print matches without restoring anything.
    pub list_only: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            policy: OverwritePolicy::Abort,
            all: false,
            max: None,
            list_only: false,
        }
    }
}

/// Query-driven restore: filter the facility by original basename, let the
/// user pick from the matches, and put each accepted entry back.
pub fn restore_by_query(
    pattern: Option<&str>,
    options: RestoreOptions,
    backend: &dyn TrashBackend,
    prompter: &mut dyn Prompter,
    report: &mut Report,
) -> Result<(), String> {
    let filter = match pattern {
        Some(pattern) => {
            Some(ListFilter::with_name_glob(pattern).map_err(|e| {
                format!("invalid restore pattern '{pattern}': {e}")
            })?)
        }
        None => None,
    };

    let listing = match backend.list(filter.as_ref()) {
        Ok(listing) => listing,
        Err(err) => {
            report.mark_facility_unavailable();
            return Err(err.to_string());
        }
    };
    // Corrupt entries degrade to warnings; they never halt enumeration.
    for warning in &listing.warnings {
        warn!(entry = %warning.path.display(), reason = %warning.reason, "skipping trash entry");
        eprintln!(
            "warning: {}: {}",
            warning.path.display(),
            warning.reason
        );
    }

    let mut entries = listing.entries;
    // Newest first, the order a user expects to pick from.
    entries.sort_by(|a, b| b.deleted_at.cmp(&a.deleted_at));
    if let Some(max) = options.max {
        entries.truncate(max);
    }

    if entries.is_empty() {
        eprintln!("{}", translate("restore.nothing"));
        return Ok(());
    }

    if options.list_only {
        for entry in &entries {
            println!("{}", render_entry(entry));
        }
        return Ok(());
    }

    let selected: Vec<TrashEntry> = if options.all {
        entries
    } else {
        let items: Vec<PromptItem> = entries
            .iter()
            .map(|entry| PromptItem {
                label: entry.original_path.to_string_lossy().into_owned(),
                strength: ConfirmStrength::Normal,
                detail: Some(render_entry(entry)),
            })
            .collect();
        let batch = prompter.confirm_batch(translate("prompt.select"), &items);
        if batch.aborted {
            report.mark_aborted();
        }
        entries
            .into_iter()
            .zip(batch.decisions)
            .filter_map(|(entry, decision)| (decision == Decision::Accept).then_some(entry))
            .collect()
    };

    for entry in &selected {
        let target = entry.original_path.to_string_lossy().into_owned();
        match backend.restore(entry, options.policy) {
            Ok(restored_to) => {
                if restored_to != entry.original_path {
                    eprintln!("restored to {}", restored_to.display());
                }
                report.record_done(target);
            }
            Err(err) => {
                let kind = match err.code() {
                    TrashErrorCode::TargetExists => FailureKind::Validation,
                    TrashErrorCode::EntryOrphaned => FailureKind::FacilityCorrupt,
                    TrashErrorCode::PermissionDenied => FailureKind::Permission,
                    TrashErrorCode::CrossDeviceFallbackFailed => FailureKind::CrossDevice,
                    TrashErrorCode::FacilityUnavailable => {
                        report.mark_facility_unavailable();
                        FailureKind::Fatal
                    }
                    _ => FailureKind::Fatal,
                };
                report.record_failure(target, kind, err.to_string(), None);
            }
        }
    }
    Ok(())
}

fn render_entry(entry: &TrashEntry) -> String {
    format!(
        "{}  ({} bytes, deleted {})",
        entry.original_path.display(),
        entry.size,
        entry.deleted_at.format("%Y-%m-%d %H:%M:%S")
    )
}

#[cfg(all(test, not(any(target_os = "windows", target_os = "macos"))))]
mod tests {
    use super::*;
    use crate::prompt::ScriptedPrompter;
    use crate::report::Verbosity;
    use crate::trash::{PlatformTrash, TrashBackend};
    use std::fs;
    use std::path::PathBuf;
    use std::time::Duration;

    fn sandbox(label: &str) -> (PathBuf, PlatformTrash) {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let root = std::env::temp_dir().join(format!(
            "delguard-restore-test-{label}-{}-{ts}",
            std::process::id()
        ));
        fs::create_dir_all(&root).expect("create test dir");
        let backend =
            PlatformTrash::with_home_trash(root.join("Trash"), Duration::from_secs(60));
        (root, backend)
    }

    #[test]
    fn restore_all_matching_pattern_puts_files_back() {
        let (root, backend) = sandbox("all");
        let log = root.join("a.log");
        let txt = root.join("b.txt");
        fs::write(&log, b"log").expect("write");
        fs::write(&txt, b"txt").expect("write");
        backend.send_to_trash(&log, None).expect("send");
        backend.send_to_trash(&txt, None).expect("send");

        let mut prompter = ScriptedPrompter::accepting();
        let mut report = Report::new(Verbosity::Quiet);
        restore_by_query(
            Some("*.log"),
            RestoreOptions {
                all: true,
                ..RestoreOptions::default()
            },
            &backend,
            &mut prompter,
            &mut report,
        )
        .expect("restore");

        assert!(log.exists(), "pattern match restored");
        assert!(!txt.exists(), "non-matching entry stays trashed");
        assert_eq!(report.succeeded(), 1);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn selection_prompts_and_honors_rejections() {
        let (root, backend) = sandbox("select");
        let one = root.join("one.txt");
        let two = root.join("two.txt");
        fs::write(&one, b"1").expect("write");
        backend.send_to_trash(&one, None).expect("send");
        std::thread::sleep(Duration::from_millis(1100));
        fs::write(&two, b"2").expect("write");
        backend.send_to_trash(&two, None).expect("send");

        // Newest first: `two` is offered first and accepted, `one` rejected.
        let mut prompter =
            ScriptedPrompter::with_answers(vec![Decision::Accept, Decision::Reject]);
        let mut report = Report::new(Verbosity::Quiet);
        restore_by_query(
            None,
            RestoreOptions::default(),
            &backend,
            &mut prompter,
            &mut report,
        )
        .expect("restore");

        assert!(two.exists());
        assert!(!one.exists());
        assert_eq!(prompter.seen.len(), 2);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn max_caps_the_offered_entries() {
        let (root, backend) = sandbox("max");
        for i in 0..5 {
            let path = root.join(format!("f{i}.txt"));
            fs::write(&path, b"x").expect("write");
            backend.send_to_trash(&path, None).expect("send");
        }
        let mut prompter = ScriptedPrompter::accepting();
        let mut report = Report::new(Verbosity::Quiet);
        restore_by_query(
            None,
            RestoreOptions {
                all: true,
                max: Some(2),
                ..RestoreOptions::default()
            },
            &backend,
            &mut prompter,
            &mut report,
        )
        .expect("restore");
        assert_eq!(report.succeeded(), 2);
        assert_eq!(backend.list(None).expect("list").entries.len(), 3);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn corrupt_entries_are_reported_without_breaking_the_run() {
        let (root, backend) = sandbox("corrupt");
        let good = root.join("good.txt");
        fs::write(&good, b"ok").expect("write");
        backend.send_to_trash(&good, None).expect("send");
        fs::write(
            root.join("Trash").join("info").join("junk.trashinfo"),
            b"garbage",
        )
        .expect("write junk");

        let mut prompter = ScriptedPrompter::accepting();
        let mut report = Report::new(Verbosity::Quiet);
        restore_by_query(
            None,
            RestoreOptions {
                all: true,
                ..RestoreOptions::default()
            },
            &backend,
            &mut prompter,
            &mut report,
        )
        .expect("restore");

        assert!(good.exists(), "good entry restored despite the corrupt one");
        assert_eq!(report.failed(), 0, "a corrupt entry is a warning, not a failure");
        assert_eq!(report.succeeded(), 1);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn bad_pattern_is_a_usage_error() {
        let (_root, backend) = sandbox("pattern");
        let mut prompter = ScriptedPrompter::accepting();
        let mut report = Report::new(Verbosity::Quiet);
        let err = restore_by_query(
            Some("[unclosed"),
            RestoreOptions::default(),
            &backend,
            &mut prompter,
            &mut report,
        )
        .unwrap_err();
        assert!(err.contains("invalid restore pattern"));
    }
}
