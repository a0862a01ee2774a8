use std::path::PathBuf;

use tracing::info;

use super::CommandContext;
use crate::copy_engine::{safe_copy, CopyError, CopyErrorCode, CopyOptions, CopyOutcome};
use crate::locale::translate;
use crate::path_norm::{self, NormalizeOptions};
use crate::prompt::Prompter;
use crate::report::{FailureKind, Report};

#[derive(Debug, Clone, Default)]
pub struct CopyArgs {
    pub sources: Vec<String>,
    pub destination: String,
    pub recursive: bool,
    pub preserve_attrs: bool,
    pub no_clobber: bool,
    pub update_only: bool,
    pub force: bool,
    pub verify: Option<bool>,
}

/// The copy pipeline: normalize both sides, fan multiple sources into a
/// destination directory, and route every collision through the safe-copy
/// engine.
pub fn run_copy(
    ctx: &CommandContext,
    args: &CopyArgs,
    prompter: &mut dyn Prompter,
    report: &mut Report,
) {
    let norm = NormalizeOptions { expand_env: true };
    let destination = match path_norm::normalize(&args.destination, &ctx.base, norm) {
        Ok(path) => path,
        Err(err) => {
            report.record_failure(
                args.destination.clone(),
                FailureKind::Validation,
                err.to_string(),
                None,
            );
            return;
        }
    };

    let dest_is_dir = destination.is_dir();
    if args.sources.len() > 1 && !dest_is_dir {
        report.record_failure(
            args.destination.clone(),
            FailureKind::Validation,
            "destination must be a directory when copying multiple sources",
            None,
        );
        return;
    }

    let options = CopyOptions {
        recursive: args.recursive,
        preserve_attrs: args.preserve_attrs,
        update_only: args.update_only,
        no_clobber: args.no_clobber,
        force: args.force,
        verify: args.verify,
    };

    for raw in &args.sources {
        let source = match path_norm::normalize(raw, &ctx.base, norm) {
            Ok(path) => path,
            Err(err) => {
                report.record_failure(raw.clone(), FailureKind::Validation, err.to_string(), None);
                continue;
            }
        };
        let target: PathBuf = if dest_is_dir {
            match source.file_name() {
                Some(name) => destination.join(name),
                None => {
                    report.record_failure(
                        raw.clone(),
                        FailureKind::Validation,
                        "source has no file name",
                        None,
                    );
                    continue;
                }
            }
        } else {
            destination.clone()
        };

        match safe_copy(&source, &target, options, &ctx.cfg, &ctx.backend, prompter) {
            Ok(CopyOutcome::Copied) => {
                info!(source = %source.display(), dest = %target.display(), "copied");
                report.record_done(raw.clone());
            }
            Ok(CopyOutcome::SameFile) => {
                report.record_done(raw.clone());
            }
            Ok(CopyOutcome::Identical) => {
                info!(dest = %target.display(), "destination already identical");
                eprintln!("{}: {}", translate("copy.identical"), target.display());
                report.record_done(raw.clone());
            }
            Ok(CopyOutcome::DestinationNewer) => {
                report.record_skipped(raw.clone(), "destination is newer");
            }
            Ok(CopyOutcome::Declined) => {
                report.record_skipped(raw.clone(), "declined");
            }
            Err(err) => {
                report.record_domain_failure(raw.clone(), copy_failure_kind(&err), &err);
            }
        }
    }
}

fn copy_failure_kind(err: &CopyError) -> FailureKind {
    match err.code() {
        CopyErrorCode::SourceMissing => FailureKind::NotFound,
        CopyErrorCode::DestinationExists | CopyErrorCode::IsDirectory => FailureKind::Validation,
        CopyErrorCode::PermissionDenied => FailureKind::Permission,
        CopyErrorCode::IntegrityFailed => FailureKind::IntegrityFailure,
        CopyErrorCode::VictimRelocationFailed | CopyErrorCode::Io => FailureKind::Fatal,
    }
}

#[cfg(all(test, not(any(target_os = "windows", target_os = "macos"))))]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::prompt::ScriptedPrompter;
    use crate::report::Verbosity;
    use crate::trash::{PlatformTrash, TrashBackend};
    use std::fs;
    use std::time::Duration;

    fn context(label: &str) -> CommandContext {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let root = std::env::temp_dir().join(format!(
            "delguard-cpcmd-test-{label}-{}-{ts}",
            std::process::id()
        ));
        fs::create_dir_all(&root).expect("create test dir");
        let backend =
            PlatformTrash::with_home_trash(root.join("Trash"), Duration::from_secs(60));
        CommandContext {
            cfg: Config::default(),
            backend,
            base: root,
            home: None,
            elevated: false,
        }
    }

    #[test]
    fn copy_into_a_directory_keeps_the_source_name() {
        let ctx = context("intodir");
        fs::write(ctx.base.join("a.txt"), b"data").expect("write");
        fs::create_dir_all(ctx.base.join("out")).expect("mkdir");

        let mut prompter = ScriptedPrompter::accepting();
        let mut report = Report::new(Verbosity::Quiet);
        run_copy(
            &ctx,
            &CopyArgs {
                sources: vec!["a.txt".to_string()],
                destination: "out".to_string(),
                ..CopyArgs::default()
            },
            &mut prompter,
            &mut report,
        );

        assert_eq!(report.exit_code(), 0);
        assert_eq!(
            fs::read(ctx.base.join("out").join("a.txt")).expect("read"),
            b"data"
        );
        let _ = fs::remove_dir_all(&ctx.base);
    }

    #[test]
    fn overwrite_with_force_recycles_the_old_destination() {
        let ctx = context("force");
        fs::write(ctx.base.join("src"), b"A").expect("write");
        fs::write(ctx.base.join("dst"), b"B").expect("write");

        let mut prompter = ScriptedPrompter::accepting();
        let mut report = Report::new(Verbosity::Quiet);
        run_copy(
            &ctx,
            &CopyArgs {
                sources: vec!["src".to_string()],
                destination: "dst".to_string(),
                force: true,
                ..CopyArgs::default()
            },
            &mut prompter,
            &mut report,
        );

        assert_eq!(report.exit_code(), 0);
        assert_eq!(fs::read(ctx.base.join("dst")).expect("read"), b"A");
        let listing = ctx.backend.list(None).expect("list");
        assert_eq!(listing.entries.len(), 1);
        assert_eq!(listing.entries[0].original_path, ctx.base.join("dst"));
        let _ = fs::remove_dir_all(&ctx.base);
    }

    #[test]
    fn multiple_sources_need_a_directory_destination() {
        let ctx = context("multi");
        fs::write(ctx.base.join("a"), b"1").expect("write");
        fs::write(ctx.base.join("b"), b"2").expect("write");
        fs::write(ctx.base.join("dst"), b"x").expect("write");

        let mut prompter = ScriptedPrompter::accepting();
        let mut report = Report::new(Verbosity::Quiet);
        run_copy(
            &ctx,
            &CopyArgs {
                sources: vec!["a".to_string(), "b".to_string()],
                destination: "dst".to_string(),
                ..CopyArgs::default()
            },
            &mut prompter,
            &mut report,
        );
        assert_eq!(report.exit_code(), 1);
        let _ = fs::remove_dir_all(&ctx.base);
    }
}
