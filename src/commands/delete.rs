use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::CommandContext;
use crate::fsops;
use crate::gate::{gate_delete, GateDecision, GateOptions};
use crate::locale::translate;
use crate::prompt::{ConfirmStrength, Decision, PromptItem, Prompter};
use crate::report::{FailureKind, Report};
use crate::resolver::{ResolutionOutcome, ResolveOptions, Resolver};
use crate::trash::{TrashBackend, TrashError, TrashErrorCode};

#[derive(Debug, Clone, Default)]
pub struct DeleteArgs {
    pub targets: Vec<String>,
    pub recursive: bool,
    pub force: bool,
    pub interactive: bool,
    pub dry_run: bool,
    pub smart_search: bool,
    pub similarity: Option<u8>,
    pub max_results: Option<usize>,
    pub search_content: bool,
    pub search_parent: bool,
}

/// The delete pipeline: gate, resolve what is missing, re-gate the resolved
/// set, then hand each survivor to the trash engine.
pub fn run_delete(
    ctx: &CommandContext,
    args: &DeleteArgs,
    prompter: &mut dyn Prompter,
    report: &mut Report,
) {
    let options = GateOptions {
        force: args.force,
        dry_run: args.dry_run,
        interactive: args.interactive,
        elevated: ctx.elevated,
    };

    let plan = gate_delete(
        &args.targets,
        &ctx.base,
        &ctx.cfg,
        ctx.home.clone(),
        ctx.facility_roots(),
        options,
        prompter,
    );
    if plan.aborted {
        report.mark_aborted();
    }

    let mut to_execute: Vec<PathBuf> = Vec::new();
    let mut to_resolve: Vec<(String, Option<PathBuf>)> = Vec::new();
    for item in plan.items {
        match item.decision {
            GateDecision::Execute => {
                if let Some(path) = item.path {
                    to_execute.push(path);
                }
            }
            GateDecision::NeedsResolution => {
                to_resolve.push((item.raw, item.path));
            }
            GateDecision::Skipped { reason } => {
                report.record_skipped(item.raw, reason);
            }
            GateDecision::Rejected { kind, reason } => {
                if kind == FailureKind::Forbidden && ctx.elevated {
                    report.mark_elevation_refused();
                }
                report.record_failure(item.raw, kind, reason, None);
            }
        }
    }

    if !to_resolve.is_empty() && !plan.aborted {
        let resolved = resolve_missing(ctx, args, to_resolve, prompter, report);
        if !resolved.is_empty() {
            // Substituted targets go through the gate again before execution.
            let raws: Vec<String> = resolved
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect();
            let replan = gate_delete(
                &raws,
                &ctx.base,
                &ctx.cfg,
                ctx.home.clone(),
                ctx.facility_roots(),
                options,
                prompter,
            );
            if replan.aborted {
                report.mark_aborted();
            }
            for item in replan.items {
                match item.decision {
                    GateDecision::Execute => {
                        if let Some(path) = item.path {
                            to_execute.push(path);
                        }
                    }
                    GateDecision::NeedsResolution => {
                        report.record_failure(
                            item.raw,
                            FailureKind::NotFound,
                            translate("delete.not_found"),
                            None,
                        );
                    }
                    GateDecision::Skipped { reason } => report.record_skipped(item.raw, reason),
                    GateDecision::Rejected { kind, reason } => {
                        if kind == FailureKind::Forbidden && ctx.elevated {
                            report.mark_elevation_refused();
                        }
                        report.record_failure(item.raw, kind, reason, None);
                    }
                }
            }
        }
    }

    for path in to_execute {
        execute_delete(ctx, args, &path, report);
    }
}

fn resolve_missing(
    ctx: &CommandContext,
    args: &DeleteArgs,
    missing: Vec<(String, Option<PathBuf>)>,
    prompter: &mut dyn Prompter,
    report: &mut Report,
) -> Vec<PathBuf> {
    let resolver = Resolver::new(&ctx.cfg);
    let mut options = ResolveOptions::from_config(&ctx.cfg);
    options.recursive = args.recursive;
    options.search_parent = args.search_parent;
    options.search_content = args.search_content;
    if let Some(threshold) = args.similarity {
        options.threshold = threshold;
    }
    if let Some(max) = args.max_results {
        options.max_results = max;
    }

    let mut resolved = Vec::new();
    for (raw, normalized) in missing {
        let query = normalized
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| raw.clone());
        let working_dir = normalized
            .as_ref()
            .and_then(|p| p.parent())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| ctx.base.clone());

        let is_pattern = query.contains(['*', '?', '[']);
        if !is_pattern && !args.smart_search {
            report.record_failure(raw, FailureKind::NotFound, translate("delete.not_found"), None);
            continue;
        }

        match resolver.resolve(&query, &working_dir, options) {
            Ok(ResolutionOutcome::PatternMatches(matches)) => {
                debug!(query, matches = matches.len(), "pattern expanded");
                if args.force || args.dry_run {
                    resolved.extend(matches);
                    continue;
                }
                let items: Vec<PromptItem> = matches
                    .iter()
                    .map(|path| PromptItem {
                        label: path.to_string_lossy().into_owned(),
                        strength: ConfirmStrength::Normal,
                        detail: None,
                    })
                    .collect();
                let batch = prompter.confirm_batch(translate("prompt.confirm"), &items);
                if batch.aborted {
                    report.mark_aborted();
                    return resolved;
                }
                for (path, decision) in matches.into_iter().zip(batch.decisions) {
                    if decision == Decision::Accept {
                        resolved.push(path);
                    } else {
                        report.record_skipped(path.to_string_lossy(), "declined");
                    }
                }
            }
            Ok(ResolutionOutcome::AutoAccept(candidate)) => {
                info!(
                    query,
                    substitute = %candidate.path.display(),
                    score = candidate.score,
                    "substituting closest match"
                );
                eprintln!(
                    "{}: {} -> {} ({}%)",
                    translate("delete.resolved"),
                    raw,
                    candidate.path.display(),
                    candidate.score
                );
                resolved.push(candidate.path);
            }
            Ok(ResolutionOutcome::RequiresSelection(candidates)) => {
                if args.dry_run {
                    report.record_skipped(
                        raw,
                        format!("dry run, {} fuzzy candidates", candidates.len()),
                    );
                    continue;
                }
                let items: Vec<PromptItem> = candidates
                    .iter()
                    .map(|candidate| PromptItem {
                        label: candidate.path.to_string_lossy().into_owned(),
                        strength: ConfirmStrength::Normal,
                        detail: Some(match &candidate.snippet {
                            Some(snippet) => {
                                format!("match {}%, {}", candidate.score, snippet)
                            }
                            None => format!("match {}%", candidate.score),
                        }),
                    })
                    .collect();
                let batch = prompter.confirm_batch(translate("prompt.confirm"), &items);
                if batch.aborted {
                    report.mark_aborted();
                    return resolved;
                }
                let mut picked = false;
                for (candidate, decision) in candidates.into_iter().zip(batch.decisions) {
                    if decision == Decision::Accept {
                        resolved.push(candidate.path);
                        picked = true;
                    }
                }
                if !picked {
                    report.record_skipped(raw, "no candidate accepted");
                }
            }
            Ok(ResolutionOutcome::NoMatch) => {
                report.record_failure(
                    raw,
                    FailureKind::NotFound,
                    translate("delete.not_found"),
                    None,
                );
            }
            Err(err) => {
                report.record_failure(raw, FailureKind::Validation, err, None);
            }
        }
    }
    resolved
}

fn execute_delete(ctx: &CommandContext, args: &DeleteArgs, path: &Path, report: &mut Report) {
    let target = path.to_string_lossy().into_owned();

    let is_dir = std::fs::symlink_metadata(path)
        .map(|m| m.is_dir() && !m.file_type().is_symlink())
        .unwrap_or(false);
    if is_dir && !args.recursive {
        report.record_failure(
            target,
            FailureKind::Validation,
            format!("{} is a directory; use --recursive", path.display()),
            None,
        );
        return;
    }

    if !ctx.cfg.use_recycle_bin {
        // Explicit bypass: the only path where data is destroyed without a
        // facility entry first.
        match fsops::remove_entry(path) {
            Ok(()) => {
                info!(target = %path.display(), "permanently deleted (recycle bin bypassed)");
                report.record_done(target);
            }
            Err(err) => {
                report.record_failure(
                    target,
                    FailureKind::Fatal,
                    "permanent delete failed",
                    Some(err.to_string()),
                );
            }
        }
        return;
    }

    match send_with_retry(ctx, path) {
        Ok(()) => {
            info!(target = %path.display(), "moved to trash");
            report.record_done(target);
        }
        Err(err) => {
            let kind = failure_kind_for(err.code());
            if err.code() == TrashErrorCode::FacilityUnavailable {
                report.mark_facility_unavailable();
            }
            report.record_domain_failure(target, kind, &err);
        }
    }
}

/// Locked files retry with a short backoff; permission errors retry once.
fn send_with_retry(ctx: &CommandContext, path: &Path) -> Result<(), TrashError> {
    let mut in_use_left = ctx.cfg.in_use_retries;
    let mut permission_left = 1u32;
    loop {
        match ctx.backend.send_to_trash(path, None) {
            Ok(_) => return Ok(()),
            Err(err) if err.code() == TrashErrorCode::InUse && in_use_left > 0 => {
                in_use_left -= 1;
                debug!(target = %path.display(), "target busy, retrying");
                std::thread::sleep(ctx.cfg.in_use_backoff);
            }
            Err(err) if err.code() == TrashErrorCode::PermissionDenied && permission_left > 0 => {
                permission_left -= 1;
                debug!(target = %path.display(), "permission denied, retrying once");
            }
            Err(err) => return Err(err),
        }
    }
}

fn failure_kind_for(code: TrashErrorCode) -> FailureKind {
    match code {
        TrashErrorCode::SourceMissing => FailureKind::NotFound,
        TrashErrorCode::PermissionDenied => FailureKind::Permission,
        TrashErrorCode::InUse => FailureKind::InUse,
        TrashErrorCode::CrossDeviceFallbackFailed => FailureKind::CrossDevice,
        TrashErrorCode::Cancelled => FailureKind::Cancelled,
        TrashErrorCode::EntryOrphaned => FailureKind::FacilityCorrupt,
        TrashErrorCode::InsideFacility
        | TrashErrorCode::TargetExists
        | TrashErrorCode::OriginalParentMissing => FailureKind::Validation,
        TrashErrorCode::MetadataWriteFailed
        | TrashErrorCode::FacilityUnavailable
        | TrashErrorCode::Io => FailureKind::Fatal,
    }
}

#[cfg(all(test, not(any(target_os = "windows", target_os = "macos"))))]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::prompt::ScriptedPrompter;
    use crate::report::Verbosity;
    use crate::trash::PlatformTrash;
    use std::fs;
    use std::time::Duration;

    fn context(label: &str) -> CommandContext {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let root = std::env::temp_dir().join(format!(
            "delguard-delete-test-{label}-{}-{ts}",
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
    fn delete_moves_the_target_into_the_trash() {
        let ctx = context("basic");
        fs::write(ctx.base.join("a.txt"), b"hello\n").expect("write");

        let mut prompter = ScriptedPrompter::accepting();
        let mut report = Report::new(Verbosity::Quiet);
        run_delete(
            &ctx,
            &DeleteArgs {
                targets: vec!["a.txt".to_string()],
                ..DeleteArgs::default()
            },
            &mut prompter,
            &mut report,
        );

        assert_eq!(report.exit_code(), 0);
        assert!(!ctx.base.join("a.txt").exists());
        let listing = ctx.backend.list(None).expect("list");
        assert_eq!(listing.entries.len(), 1);
        assert_eq!(listing.entries[0].original_path, ctx.base.join("a.txt"));
        let _ = fs::remove_dir_all(&ctx.base);
    }

    #[test]
    fn missing_target_with_smart_search_uses_the_closest_match() {
        let ctx = context("fuzzy");
        fs::write(ctx.base.join("reports.txt"), b"data").expect("write");

        let mut prompter = ScriptedPrompter::accepting();
        let mut report = Report::new(Verbosity::Quiet);
        run_delete(
            &ctx,
            &DeleteArgs {
                targets: vec!["report.txt".to_string()],
                smart_search: true,
                ..DeleteArgs::default()
            },
            &mut prompter,
            &mut report,
        );

        assert_eq!(report.exit_code(), 0);
        assert!(!ctx.base.join("reports.txt").exists());
        assert_eq!(ctx.backend.list(None).expect("list").entries.len(), 1);
        let _ = fs::remove_dir_all(&ctx.base);
    }

    #[test]
    fn missing_target_without_smart_search_fails_as_not_found() {
        let ctx = context("nofuzzy");
        fs::write(ctx.base.join("reports.txt"), b"data").expect("write");

        let mut prompter = ScriptedPrompter::accepting();
        let mut report = Report::new(Verbosity::Quiet);
        run_delete(
            &ctx,
            &DeleteArgs {
                targets: vec!["report.txt".to_string()],
                ..DeleteArgs::default()
            },
            &mut prompter,
            &mut report,
        );

        assert_eq!(report.exit_code(), 1);
        assert!(ctx.base.join("reports.txt").exists());
        let _ = fs::remove_dir_all(&ctx.base);
    }

    #[test]
    fn glob_targets_expand_and_delete_confirmed_matches() {
        let ctx = context("glob");
        fs::write(ctx.base.join("a.log"), b"1").expect("write");
        fs::write(ctx.base.join("b.log"), b"2").expect("write");
        fs::write(ctx.base.join("keep.txt"), b"3").expect("write");

        let mut prompter = ScriptedPrompter::accepting();
        let mut report = Report::new(Verbosity::Quiet);
        run_delete(
            &ctx,
            &DeleteArgs {
                targets: vec!["*.log".to_string()],
                ..DeleteArgs::default()
            },
            &mut prompter,
            &mut report,
        );

        assert_eq!(report.succeeded(), 2);
        assert!(!ctx.base.join("a.log").exists());
        assert!(!ctx.base.join("b.log").exists());
        assert!(ctx.base.join("keep.txt").exists());
        let _ = fs::remove_dir_all(&ctx.base);
    }

    #[test]
    fn recycle_bin_bypass_deletes_permanently() {
        let mut ctx = context("bypass");
        ctx.cfg.use_recycle_bin = false;
        fs::write(ctx.base.join("a.txt"), b"gone").expect("write");

        let mut prompter = ScriptedPrompter::accepting();
        let mut report = Report::new(Verbosity::Quiet);
        run_delete(
            &ctx,
            &DeleteArgs {
                targets: vec!["a.txt".to_string()],
                ..DeleteArgs::default()
            },
            &mut prompter,
            &mut report,
        );

        assert_eq!(report.exit_code(), 0);
        assert!(!ctx.base.join("a.txt").exists());
        assert!(ctx.backend.list(None).expect("list").entries.is_empty());
        let _ = fs::remove_dir_all(&ctx.base);
    }

    #[cfg(unix)]
    #[test]
    fn deleting_the_root_is_refused_with_no_side_effects() {
        let ctx = context("root");
        let mut prompter = ScriptedPrompter::accepting();
        let mut report = Report::new(Verbosity::Quiet);
        run_delete(
            &ctx,
            &DeleteArgs {
                targets: vec!["/".to_string()],
                force: true,
                ..DeleteArgs::default()
            },
            &mut prompter,
            &mut report,
        );

        assert_ne!(report.exit_code(), 0);
        assert_eq!(report.failed(), 1);
        assert!(ctx.backend.list(None).expect("list").entries.is_empty());
        let _ = fs::remove_dir_all(&ctx.base);
    }

    #[test]
    fn directories_require_the_recursive_flag() {
        let ctx = context("dir");
        fs::create_dir_all(ctx.base.join("folder")).expect("mkdir");

        let mut prompter = ScriptedPrompter::accepting();
        let mut report = Report::new(Verbosity::Quiet);
        run_delete(
            &ctx,
            &DeleteArgs {
                targets: vec!["folder".to_string()],
                ..DeleteArgs::default()
            },
            &mut prompter,
            &mut report,
        );
        assert_eq!(report.exit_code(), 1);
        assert!(ctx.base.join("folder").exists());

        let mut report = Report::new(Verbosity::Quiet);
        run_delete(
            &ctx,
            &DeleteArgs {
                targets: vec!["folder".to_string()],
                recursive: true,
                ..DeleteArgs::default()
            },
            &mut prompter,
            &mut report,
        );
        assert_eq!(report.exit_code(), 0);
        assert!(!ctx.base.join("folder").exists());
        let _ = fs::remove_dir_all(&ctx.base);
    }

    #[test]
    fn dry_run_reports_without_touching_anything() {
        let ctx = context("dry");
        fs::write(ctx.base.join("a.txt"), b"stay").expect("write");

        let mut prompter = ScriptedPrompter::accepting();
        let mut report = Report::new(Verbosity::Quiet);
        run_delete(
            &ctx,
            &DeleteArgs {
                targets: vec!["a.txt".to_string()],
                dry_run: true,
                ..DeleteArgs::default()
            },
            &mut prompter,
            &mut report,
        );

        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.skipped(), 1);
        assert!(ctx.base.join("a.txt").exists());
        assert!(ctx.backend.list(None).expect("list").entries.is_empty());
        let _ = fs::remove_dir_all(&ctx.base);
    }
}
