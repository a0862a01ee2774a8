use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use crate::config::Config;

mod score;

pub use score::{edit_distance, similarity};

/// Score given to content-only matches, just above the default threshold and
/// below the auto-accept line.
const CONTENT_MATCH_SCORE: u8 = 70;
const AUTO_ACCEPT_SCORE: u8 = 90;
const BINARY_SNIFF_LEN: usize = 8 * 1024;
const POOL_MAX_THREADS: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct ResolveOptions {
    pub recursive: bool,
    pub search_parent: bool,
    pub search_content: bool,
    pub regex: bool,
    pub threshold: u8,
    pub max_results: usize,
}

impl ResolveOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            recursive: false,
            search_parent: false,
            search_content: false,
            regex: false,
            threshold: cfg.similarity_threshold,
            max_results: cfg.max_results,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub path: PathBuf,
    pub score: u8,
    /// Context line for content matches.
    pub snippet: Option<String>,
}

#[derive(Debug)]
pub enum ResolutionOutcome {
    /// A single candidate scored high enough to substitute automatically.
    AutoAccept(Candidate),
    /// Ranked candidates for the user to pick from.
    RequiresSelection(Vec<Candidate>),
    /// The query was a pattern; these are its matches, for batch confirm.
    PatternMatches(Vec<PathBuf>),
    NoMatch,
}

struct CachedListing {
    at: Instant,
    entries: Vec<PathBuf>,
}

/// Fuzzy resolver used when direct lookup fails. Scans are bounded: the
/// working directory, optionally one parent hop and a child walk, never a
/// general filesystem crawl.
pub struct Resolver {
    candidate_cap: usize,
    content_scan_cap: u64,
    cache_ttl: Duration,
    pool_threads: usize,
    cache: Mutex<HashMap<(PathBuf, bool), CachedListing>>,
    pool: OnceCell<rayon::ThreadPool>,
}

impl Resolver {
    pub fn new(cfg: &Config) -> Self {
        Self {
            candidate_cap: cfg.candidate_cap,
            content_scan_cap: cfg.content_scan_cap,
            cache_ttl: cfg.resolver_cache_ttl,
            pool_threads: cfg
                .max_concurrent_ops
                .min(POOL_MAX_THREADS)
                .min(num_cpus::get())
                .max(1),
            cache: Mutex::new(HashMap::new()),
            pool: OnceCell::new(),
        }
    }

    pub fn resolve(
        &self,
        query: &str,
        working_dir: &Path,
        options: ResolveOptions,
    ) -> Result<ResolutionOutcome, String> {
        if options.regex || has_glob_meta(query) {
            let matches = self.expand_pattern(query, working_dir, options)?;
            if !matches.is_empty() {
                return Ok(ResolutionOutcome::PatternMatches(matches));
            }
            // An empty pattern expansion falls through to fuzzy matching.
        }

        let candidates = self.enumerate(working_dir, options);
        if candidates.is_empty() {
            return Ok(ResolutionOutcome::NoMatch);
        }

        let score_one = |path: &PathBuf| -> Option<Candidate> {
            let name = path.file_name()?.to_string_lossy();
            let score = similarity(query, &name);
            (score >= options.threshold).then(|| Candidate {
                path: path.clone(),
                score,
                snippet: None,
            })
        };
        let mut scored: Vec<Candidate> = match self.pool(options.recursive) {
            Some(pool) => pool.install(|| {
                use rayon::prelude::*;
                candidates.par_iter().filter_map(score_one).collect()
            }),
            None => candidates.iter().filter_map(score_one).collect(),
        };

        if scored.is_empty() && options.search_content {
            scored = self.scan_contents(query, &candidates, options.recursive);
        }

        if scored.is_empty() {
            return Ok(ResolutionOutcome::NoMatch);
        }

        scored.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| name_len(&a.path).cmp(&name_len(&b.path)))
                .then_with(|| a.path.cmp(&b.path))
        });
        scored.truncate(options.max_results);

        let top_is_unique = scored.len() == 1 || scored[0].score > scored[1].score;
        if scored[0].score >= AUTO_ACCEPT_SCORE && top_is_unique {
            let best = scored.swap_remove(0);
            debug!(
                query,
                best = %best.path.display(),
                score = best.score,
                "auto-accepting fuzzy match"
            );
            return Ok(ResolutionOutcome::AutoAccept(best));
        }
        Ok(ResolutionOutcome::RequiresSelection(scored))
    }

    fn expand_pattern(
        &self,
        query: &str,
        working_dir: &Path,
        options: ResolveOptions,
    ) -> Result<Vec<PathBuf>, String> {
        let entries = self.enumerate(working_dir, options);
        if options.regex {
            let pattern =
                regex::Regex::new(query).map_err(|e| format!("invalid regex '{query}': {e}"))?;
            Ok(entries
                .into_iter()
                .filter(|path| {
                    path.file_name()
                        .map(|name| pattern.is_match(&name.to_string_lossy()))
                        .unwrap_or(false)
                })
                .collect())
        } else {
            let matcher = globset::Glob::new(query)
                .map_err(|e| format!("invalid glob '{query}': {e}"))?
                .compile_matcher();
            Ok(entries
                .into_iter()
                .filter(|path| {
                    path.file_name()
                        .map(|name| matcher.is_match(name))
                        .unwrap_or(false)
                })
                .collect())
        }
    }

    /// Candidate enumeration, cached per directory for the life of the
    /// process (TTL-bounded). The walk stays inside the working directory
    /// except for the single optional parent hop.
    fn enumerate(&self, working_dir: &Path, options: ResolveOptions) -> Vec<PathBuf> {
        let mut out = self.listing_for(working_dir, options.recursive);
        if options.search_parent {
            if let Some(parent) = working_dir.parent() {
                let parent_entries = self.listing_for(parent, false);
                for entry in parent_entries {
                    if out.len() >= self.candidate_cap {
                        break;
                    }
                    if !out.contains(&entry) {
                        out.push(entry);
                    }
                }
            }
        }
        out.truncate(self.candidate_cap);
        out
    }

    fn listing_for(&self, dir: &Path, recursive: bool) -> Vec<PathBuf> {
        let key = (dir.to_path_buf(), recursive);
        if let Ok(cache) = self.cache.lock() {
            if let Some(cached) = cache.get(&key) {
                if cached.at.elapsed() < self.cache_ttl {
                    return cached.entries.clone();
                }
            }
        }

        let mut entries = Vec::new();
        if recursive {
            for entry in walkdir::WalkDir::new(dir)
                .min_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                entries.push(entry.into_path());
                if entries.len() >= self.candidate_cap {
                    break;
                }
            }
        } else {
            match fs::read_dir(dir) {
                Ok(iter) => {
                    for entry in iter.flatten() {
                        entries.push(entry.path());
                        if entries.len() >= self.candidate_cap {
                            break;
                        }
                    }
                }
                Err(err) => {
                    warn!(dir = %dir.display(), error = %err, "cannot enumerate directory");
                }
            }
        }

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                key,
                CachedListing {
                    at: Instant::now(),
                    entries: entries.clone(),
                },
            );
        }
        entries
    }

    /// Literal substring scan over small non-binary files, used only when no
    /// filename scored above the threshold.
    fn scan_contents(&self, query: &str, candidates: &[PathBuf], parallel: bool) -> Vec<Candidate> {
        let scan_one = |path: &PathBuf| -> Option<Candidate> {
            let meta = fs::metadata(path).ok()?;
            if !meta.is_file() || meta.len() > self.content_scan_cap {
                return None;
            }
            let snippet = find_in_file(path, query)?;
            Some(Candidate {
                path: path.clone(),
                score: CONTENT_MATCH_SCORE,
                snippet: Some(snippet),
            })
        };
        match self.pool(parallel) {
            Some(pool) => pool.install(|| {
                use rayon::prelude::*;
                candidates.par_iter().filter_map(scan_one).collect()
            }),
            None => candidates.iter().filter_map(scan_one).collect(),
        }
    }

    /// The bounded scan pool, built on first use. Disabled entirely for
    /// non-recursive lookups, which stay single-threaded.
    fn pool(&self, parallel: bool) -> Option<&rayon::ThreadPool> {
        if !parallel || self.pool_threads <= 1 {
            return None;
        }
        match self.pool.get_or_try_init(|| {
            rayon::ThreadPoolBuilder::new()
                .num_threads(self.pool_threads)
                .thread_name(|i| format!("resolver-scan-{i}"))
                .build()
        }) {
            Ok(pool) => Some(pool),
            Err(err) => {
                warn!(error = %err, "scan pool unavailable, running inline");
                None
            }
        }
    }
}

fn has_glob_meta(query: &str) -> bool {
    query.contains(['*', '?', '['])
}

fn name_len(path: &Path) -> usize {
    path.file_name()
        .map(|name| name.to_string_lossy().chars().count())
        .unwrap_or(usize::MAX)
}

fn find_in_file(path: &Path, needle: &str) -> Option<String> {
    let bytes = fs::read(path).ok()?;
    let sniff_len = bytes.len().min(BINARY_SNIFF_LEN);
    if bytes[..sniff_len].contains(&0) {
        return None;
    }
    let content = String::from_utf8_lossy(&bytes);

    for (number, line) in content.lines().enumerate() {
        if line.contains(needle) {
            let trimmed = line.trim();
            let shown: String = trimmed.chars().take(80).collect();
            return Some(format!("line {}: {}", number + 1, shown));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniq_dir(label: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "delguard-resolver-test-{label}-{}-{ts}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).expect("create test dir");
        dir
    }

    fn resolver() -> Resolver {
        Resolver::new(&Config::default())
    }

    fn options() -> ResolveOptions {
        ResolveOptions::from_config(&Config::default())
    }

    #[test]
    fn near_miss_with_clear_margin_auto_accepts() {
        let dir = uniq_dir("auto");
        fs::write(dir.join("reports.txt"), b"x").expect("write");
        fs::write(dir.join("unrelated.bin"), b"x").expect("write");

        let outcome = resolver()
            .resolve("report.txt", &dir, options())
            .expect("resolve");
        match outcome {
            ResolutionOutcome::AutoAccept(candidate) => {
                assert_eq!(candidate.path, dir.join("reports.txt"));
                assert!(candidate.score >= 90);
            }
            other => panic!("expected auto-accept, got {other:?}"),
        }
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn weaker_matches_require_selection_ranked_by_score() {
        let dir = uniq_dir("select");
        fs::write(dir.join("reprot.txt"), b"x").expect("write");
        fs::write(dir.join("repots.txt"), b"x").expect("write");

        let outcome = resolver()
            .resolve("report.txt", &dir, options())
            .expect("resolve");
        match outcome {
            ResolutionOutcome::RequiresSelection(candidates) => {
                assert_eq!(candidates.len(), 2);
                assert!(candidates[0].score >= candidates[1].score);
            }
            other => panic!("expected selection, got {other:?}"),
        }
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn below_threshold_candidates_are_dropped() {
        let dir = uniq_dir("nomatch");
        fs::write(dir.join("zzzzzz.bin"), b"x").expect("write");
        let outcome = resolver()
            .resolve("report.txt", &dir, options())
            .expect("resolve");
        assert!(matches!(outcome, ResolutionOutcome::NoMatch));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn glob_queries_expand_to_pattern_matches() {
        let dir = uniq_dir("glob");
        fs::write(dir.join("a.log"), b"x").expect("write");
        fs::write(dir.join("b.log"), b"x").expect("write");
        fs::write(dir.join("c.txt"), b"x").expect("write");

        let outcome = resolver()
            .resolve("*.log", &dir, options())
            .expect("resolve");
        match outcome {
            ResolutionOutcome::PatternMatches(mut matches) => {
                matches.sort();
                assert_eq!(matches, vec![dir.join("a.log"), dir.join("b.log")]);
            }
            other => panic!("expected pattern matches, got {other:?}"),
        }
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn regex_mode_matches_basenames() {
        let dir = uniq_dir("regex");
        fs::write(dir.join("build-2024.log"), b"x").expect("write");
        fs::write(dir.join("notes.txt"), b"x").expect("write");

        let outcome = resolver()
            .resolve(
                r"^build-\d+\.log$",
                &dir,
                ResolveOptions {
                    regex: true,
                    ..options()
                },
            )
            .expect("resolve");
        match outcome {
            ResolutionOutcome::PatternMatches(matches) => {
                assert_eq!(matches, vec![dir.join("build-2024.log")]);
            }
            other => panic!("expected pattern matches, got {other:?}"),
        }

        let err = resolver()
            .resolve(
                "[unclosed",
                &dir,
                ResolveOptions {
                    regex: true,
                    ..options()
                },
            )
            .unwrap_err();
        assert!(err.contains("invalid regex"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn content_search_kicks_in_when_names_miss() {
        let dir = uniq_dir("content");
        fs::write(dir.join("zzz.cfg"), b"first\nthe needle is here\nlast").expect("write");
        fs::write(dir.join("binary.dat"), &[0u8, 1, 2, 3]).expect("write");

        let outcome = resolver()
            .resolve(
                "needle",
                &dir,
                ResolveOptions {
                    search_content: true,
                    ..options()
                },
            )
            .expect("resolve");
        match outcome {
            ResolutionOutcome::RequiresSelection(candidates) => {
                assert_eq!(candidates.len(), 1);
                assert_eq!(candidates[0].score, CONTENT_MATCH_SCORE);
                let snippet = candidates[0].snippet.as_deref().expect("snippet");
                assert!(snippet.contains("line 2"));
                assert!(snippet.contains("the needle is here"));
            }
            other => panic!("expected content match, got {other:?}"),
        }
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn ties_break_by_shorter_name_then_lexicographic() {
        let dir = uniq_dir("ties");
        fs::write(dir.join("log1.txt"), b"x").expect("write");
        fs::write(dir.join("log2.txt"), b"x").expect("write");

        let outcome = resolver()
            .resolve("log.txt", &dir, options())
            .expect("resolve");
        match outcome {
            ResolutionOutcome::RequiresSelection(candidates) => {
                assert_eq!(candidates[0].path, dir.join("log1.txt"));
                assert_eq!(candidates[1].path, dir.join("log2.txt"));
            }
            other => panic!("expected selection, got {other:?}"),
        }
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn recursive_walk_finds_nested_candidates() {
        let dir = uniq_dir("recursive");
        fs::create_dir_all(dir.join("nested")).expect("mkdir");
        fs::write(dir.join("nested/reports.txt"), b"x").expect("write");

        let flat = resolver()
            .resolve("report.txt", &dir, options())
            .expect("resolve");
        assert!(matches!(flat, ResolutionOutcome::NoMatch));

        let outcome = resolver()
            .resolve(
                "report.txt",
                &dir,
                ResolveOptions {
                    recursive: true,
                    ..options()
                },
            )
            .expect("resolve");
        match outcome {
            ResolutionOutcome::AutoAccept(candidate) => {
                assert_eq!(candidate.path, dir.join("nested/reports.txt"));
            }
            other => panic!("expected auto-accept, got {other:?}"),
        }
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn parent_hop_sees_siblings_of_the_working_dir() {
        let dir = uniq_dir("parent");
        fs::create_dir_all(dir.join("inner")).expect("mkdir");
        fs::write(dir.join("reports.txt"), b"x").expect("write");

        let outcome = resolver()
            .resolve(
                "report.txt",
                &dir.join("inner"),
                ResolveOptions {
                    search_parent: true,
                    ..options()
                },
            )
            .expect("resolve");
        match outcome {
            ResolutionOutcome::AutoAccept(candidate) => {
                assert_eq!(candidate.path, dir.join("reports.txt"));
            }
            other => panic!("expected auto-accept via parent hop, got {other:?}"),
        }
        let _ = fs::remove_dir_all(&dir);
    }
}
