/// Path canonicalization and library file iteration.
///
/// Every `library_files.path` value in the store is produced by
/// [`normalize_library_path`]; two paths refer to the same file iff their
/// canonical forms are byte-equal.
use std::path::{Component, Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

/// Resolve a path lexically against the current directory without touching
/// the filesystem. Used when `canonicalize` fails because the file has been
/// deleted mid-flight.
fn absolutize(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().map(|cwd| cwd.join(path)).unwrap_or_else(|_| path.to_path_buf())
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonical path form used as the primary key of `library_files`: absolute,
/// symlink-resolved, and platform-normalized. On Windows the drive letter is
/// uppercased and separators are backslashes; on POSIX slashes are kept as-is.
pub fn normalize_library_path(path: &Path) -> String {
    let resolved = path.canonicalize().unwrap_or_else(|_| absolutize(path));
    let mut s = resolved.to_string_lossy().into_owned();
    if cfg!(windows) {
        // canonicalize() yields a verbatim \\?\ path on Windows.
        if let Some(stripped) = s.strip_prefix(r"\\?\") {
            s = stripped.to_string();
        }
        s = s.replace('/', "\\");
        let mut chars: Vec<char> = s.chars().collect();
        if chars.len() >= 2 && chars[1] == ':' {
            chars[0] = chars[0].to_ascii_uppercase();
            s = chars.into_iter().collect();
        }
    }
    s
}

/// Extension whitelist check. `extensions` entries are lowercase and dotted
/// (".mp3"); comparison is case-insensitive on the file side.
pub fn is_music_file(path: &Path, extensions: &[String]) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => {
            let dotted = format!(".{}", ext.to_lowercase());
            extensions.iter().any(|e| *e == dotted)
        }
        None => false,
    }
}

/// Ignore patterns are literal substrings matched against the full path.
pub fn matches_ignore_pattern(path: &Path, patterns: &[String]) -> bool {
    if patterns.is_empty() {
        return false;
    }
    let s = path.to_string_lossy();
    patterns.iter().any(|p| !p.is_empty() && s.contains(p.as_str()))
}

/// Walk the configured roots and collect every audio file that passes the
/// extension whitelist and ignore patterns. Missing roots are skipped with a
/// warning; unreadable entries are silently dropped.
pub fn iter_music_files(
    roots: &[PathBuf],
    extensions: &[String],
    ignore_patterns: &[String],
    follow_symlinks: bool,
) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for root in roots {
        if !root.exists() {
            warn!("library path does not exist, skipping: {}", root.display());
            continue;
        }
        for entry in WalkDir::new(root).follow_links(follow_symlinks).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if matches_ignore_pattern(path, ignore_patterns) {
                continue;
            }
            if !is_music_file(path, extensions) {
                continue;
            }
            out.push(path.to_path_buf());
        }
    }
    out
}

/// Expand a mixed list of files and directories into concrete audio files.
/// Paths that do not exist are returned in the second list so the caller can
/// treat them as deletions.
pub fn expand_paths(
    paths: &[PathBuf],
    extensions: &[String],
    ignore_patterns: &[String],
    follow_symlinks: bool,
) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut files = Vec::new();
    let mut missing = Vec::new();
    for path in paths {
        if path.is_dir() {
            files.extend(iter_music_files(
                std::slice::from_ref(path),
                extensions,
                ignore_patterns,
                follow_symlinks,
            ));
        } else if path.is_file() {
            if is_music_file(path, extensions) && !matches_ignore_pattern(path, ignore_patterns) {
                files.push(path.clone());
            }
        } else {
            missing.push(path.clone());
        }
    }
    (files, missing)
}
