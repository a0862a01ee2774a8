use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

const ENV_PREFIX: &str = "DELGUARD_";

/// Fully-populated runtime configuration. Built once at startup from the
/// environment and defaults; the rest of the core only ever sees the value.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Explicit interactivity override; `None` means "stdin is a TTY".
    pub interactive: Option<bool>,
    pub log_level: String,
    pub lang: String,
    /// When false every delete bypasses the recycle facility (force-delete).
    pub use_recycle_bin: bool,
    /// Files above this size classify as Sensitive.
    pub sensitive_size_threshold: u64,
    pub max_concurrent_ops: usize,
    pub security_checks: bool,

    pub similarity_threshold: u8,
    pub max_results: usize,
    pub candidate_cap: usize,
    pub content_scan_cap: u64,
    pub compare_cap: u64,
    pub verify_cap: u64,
    pub resolver_cache_ttl: Duration,

    pub prompt_timeout: Duration,
    pub strong_prompt_timeout: Duration,

    pub lock_stale_after: Duration,
    pub id_collision_retries: u32,
    pub in_use_retries: u32,
    pub in_use_backoff: Duration,

    pub safety: SafetyTables,
}

/// Data-driven classifier inputs so the tiers can be retargeted without
/// touching classifier code.
#[derive(Debug, Clone, Serialize)]
pub struct SafetyTables {
    pub forbidden_roots: Vec<PathBuf>,
    pub critical_basenames: Vec<String>,
    pub runtime_dirs: Vec<PathBuf>,
}

impl SafetyTables {
    pub fn platform_defaults() -> Self {
        #[cfg(windows)]
        let forbidden_roots = vec![
            PathBuf::from("C:\\Windows"),
            PathBuf::from("C:\\Program Files"),
            PathBuf::from("C:\\Program Files (x86)"),
        ];
        #[cfg(not(windows))]
        let forbidden_roots = vec![
            PathBuf::from("/etc"),
            PathBuf::from("/bin"),
            PathBuf::from("/sbin"),
            PathBuf::from("/usr"),
            PathBuf::from("/boot"),
            PathBuf::from("/System"),
            PathBuf::from("/Library"),
        ];

        #[cfg(windows)]
        let runtime_dirs = vec![PathBuf::from("C:\\Windows\\System32\\config")];
        #[cfg(not(windows))]
        let runtime_dirs = vec![
            PathBuf::from("/proc"),
            PathBuf::from("/sys"),
            PathBuf::from("/dev"),
            PathBuf::from("/run"),
        ];

        Self {
            forbidden_roots,
            critical_basenames: [
                "id_rsa",
                "id_ed25519",
                "id_ecdsa",
                "authorized_keys",
                "known_hosts",
                ".netrc",
                ".pgpass",
                "credentials",
                "credentials.json",
                "shadow",
                "passwd",
                "keystore.jks",
                ".npmrc",
                ".git-credentials",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            runtime_dirs,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interactive: None,
            log_level: "info".to_string(),
            lang: "en".to_string(),
            use_recycle_bin: true,
            sensitive_size_threshold: 1024 * 1024 * 1024,
            max_concurrent_ops: 4,
            security_checks: true,
            similarity_threshold: 60,
            max_results: 10,
            candidate_cap: 10_000,
            content_scan_cap: 1024 * 1024,
            compare_cap: 16 * 1024 * 1024,
            verify_cap: 1024 * 1024 * 1024,
            resolver_cache_ttl: Duration::from_secs(300),
            prompt_timeout: Duration::from_secs(15),
            strong_prompt_timeout: Duration::from_secs(30),
            lock_stale_after: Duration::from_secs(60),
            id_collision_retries: 5,
            in_use_retries: 3,
            in_use_backoff: Duration::from_millis(100),
            safety: SafetyTables::platform_defaults(),
        }
    }
}

impl Config {
    /// Layer `DELGUARD_*` environment variables over the defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_bool("INTERACTIVE") {
            cfg.interactive = Some(v);
        }
        if let Some(v) = env_string("LOG_LEVEL") {
            cfg.log_level = v.to_ascii_lowercase();
        }
        if let Some(v) = env_string("LANG") {
            cfg.lang = v;
        }
        if let Some(v) = env_bool("USE_RECYCLE_BIN") {
            cfg.use_recycle_bin = v;
        }
        if let Some(v) = env_u64("MAX_FILE_SIZE") {
            cfg.sensitive_size_threshold = v;
        }
        if let Some(v) = env_u64("MAX_CONCURRENT_OPS") {
            cfg.max_concurrent_ops = (v as usize).max(1);
        }
        if let Some(v) = env_bool("ENABLE_SECURITY_CHECKS") {
            cfg.security_checks = v;
        }
        cfg
    }
}

fn env_string(name: &str) -> Option<String> {
    let raw = std::env::var(format!("{ENV_PREFIX}{name}")).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn env_bool(name: &str) -> Option<bool> {
    let raw = env_string(name)?;
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_u64(name: &str) -> Option<u64> {
    env_string(name)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_limits() {
        let cfg = Config::default();
        assert_eq!(cfg.similarity_threshold, 60);
        assert_eq!(cfg.max_results, 10);
        assert_eq!(cfg.candidate_cap, 10_000);
        assert_eq!(cfg.compare_cap, 16 * 1024 * 1024);
        assert_eq!(cfg.prompt_timeout, Duration::from_secs(15));
        assert_eq!(cfg.strong_prompt_timeout, Duration::from_secs(30));
        assert!(cfg.use_recycle_bin);
    }

    #[test]
    fn platform_tables_are_nonempty() {
        let tables = SafetyTables::platform_defaults();
        assert!(!tables.forbidden_roots.is_empty());
        assert!(tables
            .critical_basenames
            .iter()
            .any(|name| name == "id_rsa"));
    }
}
