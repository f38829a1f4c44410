/// The library scanner walks the configured roots, extracts audio tags, and
/// keeps the `library_files` index in sync with what is actually on disk.
///
/// This is a hot path: we read the whole existing index up front so that
/// unchanged files are skipped on a cheap `(size, mtime)` comparison without
/// opening them, and we batch writes behind interim commits so a long scan
/// never holds a long-lived write transaction.
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDate, NaiveDateTime, TimeZone};
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::probe::read_from_path;
use lofty::tag::{Accessor, ItemKey};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::errors::{RefrainError, Result};
use crate::fsutil::{expand_paths, iter_music_files, normalize_library_path};
use crate::hashing::partial_hash;
use crate::normalize::normalize_title_artist;
use crate::store::{NewLibraryFile, Store};

/// What to scan.
#[derive(Debug, Clone)]
pub enum ScanMode {
    /// Walk every configured root; prune rows whose files vanished.
    Full,
    /// Only process files modified at or after the given unix timestamp.
    /// Never deletes rows.
    Since(f64),
    /// Operate on an explicit list of files or directories. Deletes rows for
    /// supplied paths that no longer exist, and nothing outside that subset.
    Paths(Vec<PathBuf>),
}

#[derive(Debug, Default)]
pub struct ScanResult {
    pub files_seen: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub deleted: usize,
    pub tag_errors: usize,
    pub io_errors: usize,
    pub duration: Duration,
}

impl ScanResult {
    pub fn errors(&self) -> usize {
        self.tag_errors + self.io_errors
    }
}

#[derive(Debug, Default)]
struct FileTags {
    title: Option<String>,
    artist: Option<String>,
    album: Option<String>,
    year: Option<i64>,
    isrc: Option<String>,
    duration: Option<f64>,
    bitrate_kbps: Option<i64>,
}

lazy_static::lazy_static! {
    static ref YEAR_REGEX: Regex = Regex::new(r"(19|20)\d{2}").unwrap();
}

fn year_from_string(s: &str) -> Option<i64> {
    YEAR_REGEX.find(s).and_then(|m| m.as_str().parse().ok())
}

/// Read tags through lofty. `None` means the file could not be parsed at all;
/// the caller records a minimal row in that case.
fn read_tags(path: &Path) -> Option<FileTags> {
    let tagged_file = read_from_path(path).ok()?;
    let properties = tagged_file.properties();
    let duration = properties.duration().as_secs_f64();
    let mut tags = FileTags {
        duration: if duration > 0.0 { Some(duration) } else { None },
        bitrate_kbps: properties.audio_bitrate().map(|b| b as i64),
        ..FileTags::default()
    };
    if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        tags.title = tag.title().map(|t| t.to_string()).filter(|t| !t.is_empty());
        tags.artist = tag.artist().map(|a| a.to_string()).filter(|a| !a.is_empty());
        tags.album = tag.album().map(|a| a.to_string()).filter(|a| !a.is_empty());
        tags.year = tag.year().map(|y| y as i64).or_else(|| {
            tag.get_string(&ItemKey::RecordingDate)
                .or_else(|| tag.get_string(&ItemKey::OriginalReleaseDate))
                .and_then(year_from_string)
        });
        tags.isrc = tag.get_string(&ItemKey::Isrc).map(str::to_string).filter(|i| !i.is_empty());
    }
    Some(tags)
}

/// Parse a user-supplied `--since` value: either a relative duration
/// ("2h", "45min") or an absolute local timestamp ("2025-10-08 10:00").
pub fn parse_time_string(s: &str) -> Result<f64> {
    let s = s.trim();
    if let Ok(duration) = humantime::parse_duration(s) {
        return Ok(crate::common::unix_now() - duration.as_secs_f64());
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            if let Some(local) = Local.from_local_datetime(&dt).single() {
                return Ok(local.timestamp() as f64);
            }
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            if let Some(local) = Local.from_local_datetime(&dt).single() {
                return Ok(local.timestamp() as f64);
            }
        }
    }
    Err(RefrainError::InvalidConfiguration(format!(
        "cannot parse time {s:?}; use a duration like \"2h\" or a timestamp like \"2025-10-08 10:00\""
    )))
}

/// Scan the library according to `mode`. A set cancellation flag finalizes
/// partial work with a commit instead of unwinding.
pub fn scan_library(store: &Store, config: &Config, mode: ScanMode, cancel: Option<&AtomicBool>) -> Result<ScanResult> {
    let start = Instant::now();
    let mut result = ScanResult::default();

    let existing = store.library_file_index()?;
    debug!("loaded {} existing rows for skip checks", existing.len());

    let lib = &config.library;
    let (candidates, missing) = match &mode {
        ScanMode::Full | ScanMode::Since(_) => (
            iter_music_files(&lib.paths, &lib.extensions, &lib.ignore_patterns, lib.follow_symlinks),
            Vec::new(),
        ),
        ScanMode::Paths(paths) => expand_paths(paths, &lib.extensions, &lib.ignore_patterns, lib.follow_symlinks),
    };

    // Explicitly supplied paths that are gone from disk are deletions.
    for path in &missing {
        let canonical = normalize_library_path(path);
        if existing.contains_key(&canonical) && store.delete_library_file_by_path(&canonical)? {
            debug!("deleted {} (no longer on disk)", canonical);
            result.deleted += 1;
        }
    }

    let since = match &mode {
        ScanMode::Since(ts) => Some(*ts),
        _ => None,
    };

    let mut seen: HashSet<String> = HashSet::new();
    let mut since_commit = 0usize;
    let mut interrupted = false;

    for path in &candidates {
        if cancel.map(|flag| flag.load(Ordering::Relaxed)).unwrap_or(false) {
            info!("scan interrupted; finalizing partial work");
            interrupted = true;
            break;
        }
        result.files_seen += 1;

        let metadata = match path.metadata() {
            Ok(m) => m,
            Err(e) => {
                result.io_errors += 1;
                debug!("io error on {}: {e}", path.display());
                continue;
            }
        };
        let size = metadata.len() as i64;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        if let Some(since) = since {
            if mtime < since {
                result.skipped += 1;
                continue;
            }
        }

        let canonical = normalize_library_path(path);
        seen.insert(canonical.clone());

        // Fast skip: same size and mtime within a second means the content
        // has not changed; do not re-parse tags.
        if let Some(row) = existing.get(&canonical) {
            if row.size == size && (row.mtime - mtime).abs() < 1.0 {
                result.skipped += 1;
                continue;
            }
        }

        let tags = match read_tags(path) {
            Some(tags) => tags,
            None => {
                result.tag_errors += 1;
                debug!("tag parse failed for {}; recording minimal row", path.display());
                FileTags::default()
            }
        };

        let partial_hash = match partial_hash(path) {
            Ok(h) => h,
            Err(e) => {
                result.io_errors += 1;
                debug!("hash failed for {}: {e}", path.display());
                continue;
            }
        };

        let title = tags
            .title
            .unwrap_or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default());
        let artist = tags.artist.unwrap_or_default();
        let (_, _, mut normalized) = normalize_title_artist(&title, &artist);
        if config.matching.use_year {
            if let Some(year) = tags.year {
                normalized = format!("{normalized} {year}");
            }
        }

        store.upsert_library_file(&NewLibraryFile {
            path: canonical.clone(),
            size,
            mtime,
            partial_hash,
            title,
            artist,
            album: tags.album,
            year: tags.year,
            isrc: tags.isrc,
            duration: tags.duration,
            bitrate_kbps: tags.bitrate_kbps,
            normalized,
        })?;
        if existing.contains_key(&canonical) {
            result.updated += 1;
        } else {
            result.inserted += 1;
        }

        since_commit += 1;
        if since_commit >= lib.commit_interval {
            store.commit()?;
            debug!(
                "interim commit after {since_commit} rows (inserted={} updated={} skipped={})",
                result.inserted, result.updated, result.skipped
            );
            since_commit = 0;
        }
    }

    // Only an unbounded walk may treat "not seen" as "deleted". Incremental
    // and interrupted scans have not looked everywhere.
    if matches!(mode, ScanMode::Full) && !interrupted {
        for path in existing.keys() {
            if !seen.contains(path) {
                if store.delete_library_file_by_path(path)? {
                    debug!("deleted {} (no longer on disk)", path);
                    result.deleted += 1;
                }
            }
        }
    }

    store.commit()?;
    result.duration = start.elapsed();
    info!(
        "library scan: {} new, {} updated, {} unchanged, {} deleted in {:.2?}",
        result.inserted, result.updated, result.skipped, result.deleted, result.duration
    );
    if result.errors() > 0 {
        warn!("scan errors: tag={} io={}", result.tag_errors, result.io_errors);
    }
    Ok(result)
}
