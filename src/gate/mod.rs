use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::classify::{classify, ClassifyContext, PathTier, TargetFacts};
use crate::config::Config;
use crate::locale::translate;
use crate::path_norm::{self, NormalizeOptions};
use crate::prompt::{ConfirmStrength, Decision, PromptItem, Prompter};
use crate::report::FailureKind;

#[derive(Debug, Clone, Copy, Default)]
pub struct GateOptions {
    /// Auto-accept ordinary confirmations. Never downgrades strong-confirm
    /// or Forbidden.
    pub force: bool,
    /// Classify and report, execute nothing.
    pub dry_run: bool,
    /// Confirm even Safe targets.
    pub interactive: bool,
    /// Elevated identity promotes every tier by one step.
    pub elevated: bool,
}

#[derive(Debug, Clone)]
pub enum GateDecision {
    Execute,
    /// Direct lookup failed; the smart resolver may substitute a target.
    NeedsResolution,
    Skipped { reason: String },
    Rejected { kind: FailureKind, reason: String },
}

#[derive(Debug, Clone)]
pub struct PlanItem {
    pub raw: String,
    pub path: Option<PathBuf>,
    pub tier: Option<PathTier>,
    pub decision: GateDecision,
}

#[derive(Debug, Default)]
pub struct Plan {
    pub items: Vec<PlanItem>,
    pub aborted: bool,
}

/// Validate a batch of delete targets: normalize, classify, collect the
/// needed confirmations, and return the per-target plan. One bad target
/// never stops the others.
#[allow(clippy::too_many_arguments)]
pub fn gate_delete(
    targets: &[String],
    base: &Path,
    cfg: &Config,
    home: Option<PathBuf>,
    facility_roots: Vec<PathBuf>,
    options: GateOptions,
    prompter: &mut dyn Prompter,
) -> Plan {
    let ctx = ClassifyContext {
        tables: &cfg.safety,
        home,
        facility_roots,
        sensitive_size_threshold: cfg.sensitive_size_threshold,
    };

    let mut plan = Plan::default();
    // Indices into `plan.items` that still need a user decision.
    let mut pending: Vec<(usize, ConfirmStrength)> = Vec::new();

    for raw in targets {
        let normalized = match path_norm::normalize(
            raw,
            base,
            NormalizeOptions { expand_env: true },
        ) {
            Ok(path) => path,
            Err(err) => {
                // Glob metacharacters are illegal path characters on Windows;
                // a pattern-looking query belongs to the resolver, not here.
                let decision = if raw.contains(['*', '?', '['])
                    && err.code() == path_norm::PathErrorCode::IllegalCharacter
                {
                    GateDecision::NeedsResolution
                } else {
                    GateDecision::Rejected {
                        kind: FailureKind::Validation,
                        reason: err.to_string(),
                    }
                };
                plan.items.push(PlanItem {
                    raw: raw.clone(),
                    path: None,
                    tier: None,
                    decision,
                });
                continue;
            }
        };

        let meta = match fs::symlink_metadata(&normalized) {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                plan.items.push(PlanItem {
                    raw: raw.clone(),
                    path: Some(normalized),
                    tier: None,
                    decision: GateDecision::NeedsResolution,
                });
                continue;
            }
            Err(err) => {
                plan.items.push(PlanItem {
                    raw: raw.clone(),
                    path: Some(normalized),
                    tier: None,
                    decision: GateDecision::Rejected {
                        kind: FailureKind::Permission,
                        reason: format!("cannot inspect target: {err}"),
                    },
                });
                continue;
            }
        };

        let facts = gather_facts(&normalized, &meta);
        let mut tier = if cfg.security_checks {
            classify(&normalized, &facts, &ctx)
        } else {
            PathTier::Safe
        };
        if options.elevated {
            tier = tier.escalated();
        }
        debug!(target = %normalized.display(), tier = tier.as_str(), "classified delete target");

        let decision = match tier {
            PathTier::Forbidden => GateDecision::Rejected {
                kind: FailureKind::Forbidden,
                reason: translate("delete.forbidden").to_string(),
            },
            PathTier::Critical => {
                pending.push((plan.items.len(), ConfirmStrength::Strong));
                GateDecision::Execute
            }
            PathTier::Sensitive => {
                if options.force {
                    GateDecision::Execute
                } else {
                    pending.push((plan.items.len(), ConfirmStrength::Normal));
                    GateDecision::Execute
                }
            }
            PathTier::Safe => {
                if options.interactive && !options.force {
                    pending.push((plan.items.len(), ConfirmStrength::Normal));
                }
                GateDecision::Execute
            }
        };

        plan.items.push(PlanItem {
            raw: raw.clone(),
            path: Some(normalized),
            tier: Some(tier),
            decision,
        });
    }

    if options.dry_run {
        for item in &mut plan.items {
            if matches!(item.decision, GateDecision::Execute) {
                item.decision = GateDecision::Skipped {
                    reason: translate("delete.dry_run").to_string(),
                };
            }
        }
        return plan;
    }

    if pending.is_empty() {
        return plan;
    }

    let prompt_items: Vec<PromptItem> = pending
        .iter()
        .map(|(index, strength)| {
            let item = &plan.items[*index];
            PromptItem {
                label: item
                    .path
                    .as_ref()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_else(|| item.raw.clone()),
                strength: *strength,
                detail: item.tier.map(|t| format!("risk tier: {}", t.as_str())),
            }
        })
        .collect();

    let batch = prompter.confirm_batch(translate("prompt.confirm"), &prompt_items);
    for ((index, _), decision) in pending.iter().zip(batch.decisions.iter()) {
        if *decision == Decision::Reject {
            plan.items[*index].decision = GateDecision::Skipped {
                reason: "declined".to_string(),
            };
        }
    }
    if batch.aborted {
        plan.aborted = true;
        // Items the user never reached stay unexecuted.
        for (index, _) in pending.iter().skip(batch.decisions.len()) {
            plan.items[*index].decision = GateDecision::Skipped {
                reason: "aborted".to_string(),
            };
        }
    }
    plan
}

fn gather_facts(path: &Path, meta: &fs::Metadata) -> TargetFacts {
    TargetFacts {
        is_symlink: meta.file_type().is_symlink(),
        readonly: meta.permissions().readonly(),
        hidden: is_hidden(path, meta),
        size: meta.len(),
    }
}

#[cfg(unix)]
fn is_hidden(path: &Path, _meta: &fs::Metadata) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

#[cfg(windows)]
fn is_hidden(_path: &Path, meta: &fs::Metadata) -> bool {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
    meta.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0
}
