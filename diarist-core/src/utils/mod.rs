//! Utility functions and helpers

use once_cell::sync::Lazy;
use regex::Regex;
use std::io::Write;
use std::path::{Path, PathBuf};

static FORBIDDEN_FILENAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).expect("static regex"));

/// Longest slug kept in artifact file names, in characters
pub const MAX_SLUG_CHARS: usize = 50;

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir<P: AsRef<Path>>(path: P) -> std::io::Result<PathBuf> {
    let path = path.as_ref();
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(path.to_path_buf())
}

/// Create a file name slug from a free-form title.
///
/// Characters invalid in file names are removed, whitespace becomes `_`,
/// and the result is cut to [`MAX_SLUG_CHARS`] characters.
pub fn slugify(title: &str) -> String {
    let cleaned = FORBIDDEN_FILENAME_CHARS.replace_all(title.trim(), "");
    let joined = cleaned.split_whitespace().collect::<Vec<_>>().join("_");
    let slug: String = joined.chars().take(MAX_SLUG_CHARS).collect();
    let slug = slug.trim_matches(|c| c == '.' || c == '_').to_string();
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

/// Collapse all whitespace runs, line breaks included, into single spaces
pub fn single_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate a string to at most `max_chars` characters, appending `...`
/// when anything was cut.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars).collect();
        format!("{}...", kept)
    }
}

/// Write `content` to `path` through a temporary sibling and a rename, so
/// readers never observe a half-written file under the final name.
pub fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("artifact");
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name));
    {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, path).inspect_err(|_| {
        let _ = std::fs::remove_file(&tmp_path);
    })
}
