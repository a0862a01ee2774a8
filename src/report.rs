use serde::Serialize;

use crate::errors::DomainError;
use crate::locale::translate;

/// Failure taxonomy shared by every subsystem. Components return their own
/// typed errors; the command layer folds them into one of these kinds for
/// user-facing reporting and exit-code aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    Validation,
    Forbidden,
    NotFound,
    Permission,
    InUse,
    CrossDevice,
    IntegrityFailure,
    Cancelled,
    FacilityCorrupt,
    Fatal,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not-found",
            Self::Permission => "permission",
            Self::InUse => "in-use",
            Self::CrossDevice => "cross-device",
            Self::IntegrityFailure => "integrity",
            Self::Cancelled => "cancelled",
            Self::FacilityCorrupt => "facility-corrupt",
            Self::Fatal => "fatal",
        }
    }

    fn hint(self) -> &'static str {
        match self {
            Self::Validation => "the path is malformed or illegal on this platform",
            Self::Forbidden => "this path is protected and will never be deleted",
            Self::NotFound => "check the spelling or try --smart-search",
            Self::Permission => "you may need elevated privileges for this target",
            Self::InUse => "another process holds the file open; retry later",
            Self::CrossDevice => "the cross-volume fallback could not complete",
            Self::IntegrityFailure => "the copied bytes did not match; nothing was lost",
            Self::Cancelled => "the operation was aborted before completion",
            Self::FacilityCorrupt => "a trash entry has unreadable metadata",
            Self::Fatal => "an unexpected error occurred; run with -v for details",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

#[derive(Debug, Clone)]
enum Outcome {
    Done,
    Skipped { reason: String },
    Failed {
        kind: FailureKind,
        message: String,
        os_detail: Option<String>,
    },
}

#[derive(Debug)]
struct TargetReport {
    target: String,
    outcome: Outcome,
}

/// Per-invocation outcome accumulator. One failed target never short-circuits
/// the rest; the dispatcher folds everything recorded here into the process
/// exit code.
#[derive(Debug)]
pub struct Report {
    items: Vec<TargetReport>,
    verbosity: Verbosity,
    aborted: bool,
    elevation_refused: bool,
    facility_unavailable: bool,
}

impl Report {
    pub fn new(verbosity: Verbosity) -> Self {
        Self {
            items: Vec::new(),
            verbosity,
            aborted: false,
            elevation_refused: false,
            facility_unavailable: false,
        }
    }

    pub fn record_done(&mut self, target: impl Into<String>) {
        self.items.push(TargetReport {
            target: target.into(),
            outcome: Outcome::Done,
        });
    }

    pub fn record_skipped(&mut self, target: impl Into<String>, reason: impl Into<String>) {
        self.items.push(TargetReport {
            target: target.into(),
            outcome: Outcome::Skipped {
                reason: reason.into(),
            },
        });
    }

    pub fn record_failure(
        &mut self,
        target: impl Into<String>,
        kind: FailureKind,
        message: impl Into<String>,
        os_detail: Option<String>,
    ) {
        if kind == FailureKind::Cancelled {
            self.aborted = true;
        }
        self.items.push(TargetReport {
            target: target.into(),
            outcome: Outcome::Failed {
                kind,
                message: message.into(),
                os_detail,
            },
        });
    }

    /// Record a typed component error; the code string lands in the verbose
    /// detail line.
    pub fn record_domain_failure(
        &mut self,
        target: impl Into<String>,
        kind: FailureKind,
        error: &dyn DomainError,
    ) {
        self.record_failure(
            target,
            kind,
            error.message().to_string(),
            Some(error.code_str().to_string()),
        );
    }

    pub fn mark_aborted(&mut self) {
        self.aborted = true;
    }

    pub fn mark_elevation_refused(&mut self) {
        self.elevation_refused = true;
    }

    pub fn mark_facility_unavailable(&mut self) {
        self.facility_unavailable = true;
    }

    pub fn succeeded(&self) -> usize {
        self.items
            .iter()
            .filter(|item| matches!(item.outcome, Outcome::Done))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.items
            .iter()
            .filter(|item| matches!(item.outcome, Outcome::Skipped { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.items
            .iter()
            .filter(|item| matches!(item.outcome, Outcome::Failed { .. }))
            .count()
    }

    /// One line per failure (target, kind, hint), verbose adds the OS error,
    /// quiet suppresses everything but the final summary.
    pub fn print(&self) {
        if self.verbosity != Verbosity::Quiet {
            for item in &self.items {
                match &item.outcome {
                    Outcome::Done => {}
                    Outcome::Skipped { reason } => {
                        eprintln!("skipped: {}: {}", item.target, reason);
                    }
                    Outcome::Failed {
                        kind,
                        message,
                        os_detail,
                    } => {
                        eprintln!(
                            "failed: {}: [{}] {} ({})",
                            item.target,
                            kind.as_str(),
                            message,
                            kind.hint()
                        );
                        if self.verbosity == Verbosity::Verbose {
                            if let Some(detail) = os_detail {
                                eprintln!("  os error: {detail}");
                            }
                        }
                    }
                }
            }
        }
        let summary = translate("summary.line")
            .replace("{deleted}", &self.succeeded().to_string())
            .replace("{skipped}", &self.skipped().to_string())
            .replace("{failed}", &self.failed().to_string());
        eprintln!("{summary}");
    }

    pub fn exit_code(&self) -> i32 {
        if self.aborted {
            return 3;
        }
        if self.facility_unavailable {
            return 5;
        }
        if self.elevation_refused {
            return 4;
        }
        if self.failed() > 0 {
            return 1;
        }
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_prefers_abort_over_plain_failure() {
        let mut report = Report::new(Verbosity::Normal);
        report.record_failure("/tmp/a", FailureKind::Permission, "denied", None);
        assert_eq!(report.exit_code(), 1);
        report.record_failure("/tmp/b", FailureKind::Cancelled, "user quit", None);
        assert_eq!(report.exit_code(), 3);
    }

    #[test]
    fn counts_split_by_outcome() {
        let mut report = Report::new(Verbosity::Quiet);
        report.record_done("/tmp/a");
        report.record_skipped("/tmp/b", "dry run");
        report.record_failure("/tmp/c", FailureKind::NotFound, "missing", None);
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn facility_unavailable_wins_over_failed_targets() {
        let mut report = Report::new(Verbosity::Quiet);
        report.record_failure("/tmp/a", FailureKind::Fatal, "io", None);
        report.mark_facility_unavailable();
        assert_eq!(report.exit_code(), 5);
    }
}
