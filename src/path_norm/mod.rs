use std::path::{Component, Path, PathBuf};

mod error;

pub use error::{PathError, PathErrorCode, PathResult};

#[cfg(windows)]
const MAX_PATH_LEN: usize = 260;
#[cfg(not(windows))]
const MAX_PATH_LEN: usize = 4096;

#[cfg(windows)]
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizeOptions {
    /// Expand `~` and environment-variable references before resolving.
    pub expand_env: bool,
}

/// Resolve a raw user string into the canonical absolute path every other
/// component trusts. Relative inputs are anchored at `base` and must stay
/// inside it after `.`/`..` cleaning.
pub fn normalize(raw: &str, base: &Path, options: NormalizeOptions) -> PathResult<PathBuf> {
    if raw.contains('\0') {
        return Err(PathError::embedded_nul(raw));
    }

    let expanded = if options.expand_env {
        expand_env(raw)
    } else {
        raw.to_string()
    };
    let input = Path::new(&expanded);

    let was_relative = input.is_relative();
    let joined = if was_relative {
        base.join(input)
    } else {
        input.to_path_buf()
    };
    let cleaned = clean_components(&joined);

    if was_relative {
        let clean_base = clean_components(base);
        if !cleaned.starts_with(&clean_base) {
            return Err(PathError::traversal(raw));
        }
    }

    let rendered = cleaned.to_string_lossy();
    if rendered.chars().count() > MAX_PATH_LEN {
        return Err(PathError::too_long(rendered.chars().count(), MAX_PATH_LEN));
    }

    #[cfg(windows)]
    check_windows_illegality(&cleaned)?;

    Ok(cleaned)
}

/// Lexical `.`/`..` cleanup. `..` pops the previous normal component and is
/// clamped at the root, so the result never contains parent references.
fn clean_components(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(segment) => out.push(segment),
        }
    }
    out
}

fn expand_env(raw: &str) -> String {
    use once_cell::sync::Lazy;

    // `$VAR` / `${VAR}` on every platform, `%VAR%` additionally on Windows.
    static DOLLAR: Lazy<regex::Regex> = Lazy::new(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
            .expect("static pattern")
    });
    #[cfg(windows)]
    static PERCENT: Lazy<regex::Regex> =
        Lazy::new(|| regex::Regex::new(r"%([A-Za-z_][A-Za-z0-9_]*)%").expect("static pattern"));

    let mut value = raw.to_string();
    if let Some(rest) = value.strip_prefix('~') {
        if rest.is_empty() || rest.starts_with('/') || rest.starts_with('\\') {
            if let Some(home) = dirs_next::home_dir() {
                value = format!("{}{}", home.to_string_lossy(), rest);
            }
        }
    }
    value = DOLLAR
        .replace_all(&value, |caps: &regex::Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            std::env::var(name).unwrap_or_default()
        })
        .into_owned();
    #[cfg(windows)]
    {
        value = PERCENT
            .replace_all(&value, |caps: &regex::Captures<'_>| {
                std::env::var(&caps[1]).unwrap_or_default()
            })
            .into_owned();
    }
    value
}

#[cfg(windows)]
fn check_windows_illegality(path: &Path) -> PathResult<()> {
    for component in path.components() {
        let segment = match component {
            Component::Normal(segment) => segment.to_string_lossy(),
            _ => continue,
        };
        for ch in segment.chars() {
            if matches!(ch, '<' | '>' | ':' | '"' | '|' | '?' | '*') || (ch as u32) < 0x20 {
                return Err(PathError::illegal_character(ch));
            }
        }
        let stem = segment.split('.').next().unwrap_or(&segment);
        let upper = stem.trim().to_ascii_uppercase();
        if RESERVED_NAMES.contains(&upper.as_str()) {
            return Err(PathError::reserved_name(&upper));
        }
    }
    Ok(())
}

/// Physical identity comparison: device + inode on POSIX, volume serial +
/// file index on Windows. Missing paths compare unequal.
pub fn is_same_file(a: &Path, b: &Path) -> bool {
    match (file_id(a), file_id(b)) {
        (Some(left), Some(right)) => left == right,
        _ => false,
    }
}

#[cfg(unix)]
fn file_id(path: &Path) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    let meta = std::fs::metadata(path).ok()?;
    Some((meta.dev(), meta.ino()))
}

#[cfg(windows)]
fn file_id(path: &Path) -> Option<(u64, u64)> {
    use std::mem;
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Storage::FileSystem::{
        GetFileInformationByHandle, BY_HANDLE_FILE_INFORMATION,
    };

    let file = std::fs::File::open(path).ok()?;
    unsafe {
        let mut info: BY_HANDLE_FILE_INFORMATION = mem::zeroed();
        if GetFileInformationByHandle(file.as_raw_handle() as _, &mut info) == 0 {
            return None;
        }
        let index = ((info.nFileIndexHigh as u64) << 32) | info.nFileIndexLow as u64;
        Some((info.dwVolumeSerialNumber as u64, index))
    }
}

/// Whether two paths live on the same filesystem, judged by the nearest
/// existing ancestor of each. Used to pick rename vs. copy-then-delete.
pub fn same_volume(a: &Path, b: &Path) -> bool {
    match (volume_id(a), volume_id(b)) {
        (Some(left), Some(right)) => left == right,
        _ => false,
    }
}

#[cfg(unix)]
pub(crate) fn volume_id(path: &Path) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    let mut probe = path;
    loop {
        match std::fs::symlink_metadata(probe) {
            Ok(meta) => return Some(meta.dev()),
            Err(_) => probe = probe.parent()?,
        }
    }
}

#[cfg(windows)]
fn volume_id(path: &Path) -> Option<String> {
    // Drive-letter or UNC root; mount points below a drive are treated as the
    // drive itself, which matches how $Recycle.Bin is organized.
    let mut components = path.components();
    match components.next() {
        Some(Component::Prefix(prefix)) => {
            Some(prefix.as_os_str().to_string_lossy().to_ascii_uppercase())
        }
        _ => None,
    }
}
