//! Filename sanitization for chapter and series directory names.
//!
//! Shared contract: replace characters invalid on common filesystems with
//! an underscore, collapse runs, trim, truncate, and never return an empty
//! name.

use regex::Regex;
use std::sync::OnceLock;

/// Name used when sanitization leaves nothing.
const EMPTY_PLACEHOLDER: &str = "untitled";

fn invalid_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[<>:"/\\|?*~\[\]{}]"#).expect("invalid-char regex"))
}

fn underscore_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"_+").expect("underscore-run regex"))
}

/// Sanitize a string to be safe as a directory or file name on common
/// filesystems, truncated to `max_length` characters.
pub fn sanitize_filename(name: &str, max_length: usize) -> String {
    let replaced = invalid_chars().replace_all(name, "_");
    let collapsed = underscore_runs().replace_all(&replaced, "_");
    let mut out: String = collapsed.trim_matches([' ', '_']).to_string();

    if out.chars().count() > max_length {
        out = out.chars().take(max_length).collect();
        out = out.trim_end_matches([' ', '_']).to_string();
    }

    if out.is_empty() {
        return EMPTY_PLACEHOLDER.to_string();
    }
    out
}
