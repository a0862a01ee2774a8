use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::SafetyTables;

/// Risk tier of a normalized path. Every path lands in exactly one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum PathTier {
    Safe,
    Sensitive,
    Critical,
    Forbidden,
}

impl PathTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Sensitive => "sensitive",
            Self::Critical => "critical",
            Self::Forbidden => "forbidden",
        }
    }

    /// One-step promotion used when the process runs elevated.
    pub fn escalated(self) -> Self {
        match self {
            Self::Safe => Self::Sensitive,
            Self::Sensitive => Self::Critical,
            other => other,
        }
    }
}

/// Filesystem facts the gate gathers once per target so classification stays
/// a pure function.
#[derive(Debug, Clone, Copy, Default)]
pub struct TargetFacts {
    pub is_symlink: bool,
    pub readonly: bool,
    pub hidden: bool,
    pub size: u64,
}

pub struct ClassifyContext<'a> {
    pub tables: &'a SafetyTables,
    pub home: Option<PathBuf>,
    /// Roots of the recycle facilities; deleting the trash is refused.
    pub facility_roots: Vec<PathBuf>,
    pub sensitive_size_threshold: u64,
}

pub fn classify(path: &Path, facts: &TargetFacts, ctx: &ClassifyContext<'_>) -> PathTier {
    if is_volume_root(path)
        || ctx.home.as_deref() == Some(path)
        || ctx.tables.forbidden_roots.iter().any(|root| root == path)
        || ctx.facility_roots.iter().any(|root| root == path)
    {
        return PathTier::Forbidden;
    }

    if is_critical(path, ctx) {
        return PathTier::Critical;
    }

    if is_sensitive(path, facts, ctx) {
        return PathTier::Sensitive;
    }

    PathTier::Safe
}

fn is_volume_root(path: &Path) -> bool {
    path.parent().is_none()
}

fn is_critical(path: &Path, ctx: &ClassifyContext<'_>) -> bool {
    // Direct children of system roots and of the volume root. Children of the
    // user's home stay ordinary: home itself is forbidden, its files are not.
    if let Some(parent) = path.parent() {
        if is_volume_root(parent) || ctx.tables.forbidden_roots.iter().any(|root| root == parent) {
            return true;
        }
    }

    if ctx
        .tables
        .runtime_dirs
        .iter()
        .any(|dir| path.starts_with(dir))
    {
        return true;
    }

    if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
        if ctx
            .tables
            .critical_basenames
            .iter()
            .any(|known| known == name)
        {
            return true;
        }
    }

    false
}

fn is_sensitive(path: &Path, facts: &TargetFacts, ctx: &ClassifyContext<'_>) -> bool {
    if facts.is_symlink || facts.readonly || facts.hidden {
        return true;
    }
    if facts.size > ctx.sensitive_size_threshold {
        return true;
    }
    if let Some(name) = path.file_name() {
        if name.to_string_lossy().chars().any(is_spoofing_char) {
            return true;
        }
    }
    false
}

/// Control characters plus the invisible and bidi-override codepoints used in
/// filename spoofing attacks.
fn is_spoofing_char(ch: char) -> bool {
    ch.is_control()
        || matches!(
            ch,
            '\u{200B}'..='\u{200F}' | '\u{202A}'..='\u{202E}' | '\u{FEFF}'
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SafetyTables;

    fn ctx(tables: &SafetyTables) -> ClassifyContext<'_> {
        ClassifyContext {
            tables,
            home: Some(PathBuf::from("/home/user")),
            facility_roots: vec![PathBuf::from("/home/user/.local/share/Trash")],
            sensitive_size_threshold: 1024 * 1024 * 1024,
        }
    }

    fn plain() -> TargetFacts {
        TargetFacts::default()
    }

    #[test]
    fn volume_root_home_and_facility_are_forbidden() {
        let tables = SafetyTables::platform_defaults();
        let ctx = ctx(&tables);
        assert_eq!(classify(Path::new("/"), &plain(), &ctx), PathTier::Forbidden);
        assert_eq!(
            classify(Path::new("/home/user"), &plain(), &ctx),
            PathTier::Forbidden
        );
        assert_eq!(
            classify(
                Path::new("/home/user/.local/share/Trash"),
                &plain(),
                &ctx
            ),
            PathTier::Forbidden
        );
    }

    #[cfg(unix)]
    #[test]
    fn system_roots_and_their_children() {
        let tables = SafetyTables::platform_defaults();
        let ctx = ctx(&tables);
        assert_eq!(
            classify(Path::new("/etc"), &plain(), &ctx),
            PathTier::Forbidden
        );
        assert_eq!(
            classify(Path::new("/etc/fstab"), &plain(), &ctx),
            PathTier::Critical
        );
        assert_eq!(
            classify(Path::new("/opt"), &plain(), &ctx),
            PathTier::Critical
        );
    }

    #[test]
    fn credential_basenames_are_critical_anywhere() {
        let tables = SafetyTables::platform_defaults();
        let ctx = ctx(&tables);
        assert_eq!(
            classify(Path::new("/home/user/.ssh/id_rsa"), &plain(), &ctx),
            PathTier::Critical
        );
    }

    #[test]
    fn home_children_are_not_critical() {
        let tables = SafetyTables::platform_defaults();
        let ctx = ctx(&tables);
        assert_eq!(
            classify(Path::new("/home/user/notes.txt"), &plain(), &ctx),
            PathTier::Safe
        );
    }

    #[test]
    fn symlinks_readonly_and_oversized_are_sensitive() {
        let tables = SafetyTables::platform_defaults();
        let ctx = ctx(&tables);
        let symlink = TargetFacts {
            is_symlink: true,
            ..TargetFacts::default()
        };
        assert_eq!(
            classify(Path::new("/home/user/link"), &symlink, &ctx),
            PathTier::Sensitive
        );
        let huge = TargetFacts {
            size: 2 * 1024 * 1024 * 1024,
            ..TargetFacts::default()
        };
        assert_eq!(
            classify(Path::new("/home/user/big.iso"), &huge, &ctx),
            PathTier::Sensitive
        );
    }

    #[test]
    fn bidi_override_names_are_sensitive() {
        let tables = SafetyTables::platform_defaults();
        let ctx = ctx(&tables);
        let spoofed = format!("/home/user/exe{}txt.doc", '\u{202E}');
        assert_eq!(
            classify(Path::new(&spoofed), &plain(), &ctx),
            PathTier::Sensitive
        );
    }

    #[test]
    fn escalation_promotes_one_tier_and_saturates() {
        assert_eq!(PathTier::Safe.escalated(), PathTier::Sensitive);
        assert_eq!(PathTier::Sensitive.escalated(), PathTier::Critical);
        assert_eq!(PathTier::Critical.escalated(), PathTier::Critical);
        assert_eq!(PathTier::Forbidden.escalated(), PathTier::Forbidden);
    }
}
