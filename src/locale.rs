use std::collections::HashMap;

use once_cell::sync::OnceCell;

static CATALOG: OnceCell<HashMap<&'static str, &'static str>> = OnceCell::new();

/// Install the message catalog for the given locale tag. Only the English
/// catalog ships built in; unknown tags fall back to it.
pub fn init(lang: &str) {
    let _ = CATALOG.set(catalog_for(lang));
}

/// Look up a user-facing message by key. Unknown keys return the key itself
/// so a missing entry is visible rather than fatal.
pub fn translate(key: &str) -> &str {
    CATALOG
        .get()
        .and_then(|catalog| catalog.get(key).copied())
        .unwrap_or(key)
}

fn catalog_for(_lang: &str) -> HashMap<&'static str, &'static str> {
    // Only the English catalog ships today; any other tag falls back to it.
    english()
}

fn english() -> HashMap<&'static str, &'static str> {
    HashMap::from([
        ("delete.forbidden", "refusing to delete a protected path"),
        ("delete.not_found", "no such file or directory"),
        ("delete.dry_run", "dry run, nothing deleted"),
        ("delete.resolved", "target not found, using closest match"),
        ("prompt.confirm", "delete"),
        ("prompt.confirm_copy", "overwrite"),
        ("prompt.strong", "this target is critical; type the full path or YES to continue"),
        ("prompt.choices", "[y]es / [n]o / [a]ll / [r]eject all / [q]uit"),
        ("prompt.timeout", "no answer before the timeout, treating as no"),
        ("prompt.select", "select entries to restore"),
        ("restore.nothing", "nothing in the trash matches"),
        ("restore.exists", "a file already exists at the original path"),
        ("copy.identical", "destination already has identical content"),
        ("copy.integrity", "verification failed, destination rolled back"),
        ("summary.line", "deleted={deleted}, skipped={skipped}, failed={failed}"),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_key_falls_back_to_key() {
        init("en");
        assert_eq!(translate("no.such.key"), "no.such.key");
        assert_eq!(translate("delete.dry_run"), "dry run, nothing deleted");
    }
}
