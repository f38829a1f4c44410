use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::fsutil::normalize_library_path;
use crate::scan::{parse_time_string, scan_library, ScanMode};
use crate::testing;

// The scanner tolerates unparseable audio: these fixtures are plain bytes, so
// every file takes the tag-error path and gets a filename-derived title. Row
// bookkeeping (insert/update/skip/delete) is what these tests pin down.
fn write_file(config: &crate::config::Config, name: &str, contents: &[u8]) -> std::path::PathBuf {
    let path = config.library.paths[0].join(name);
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_full_scan_inserts_and_counts_tag_errors() {
    let (config, _temp) = testing::config();
    let store = testing::store(&config);
    write_file(&config, "First Song.mp3", b"not really audio");
    write_file(&config, "Second Song.flac", b"also not audio");
    write_file(&config, "notes.txt", b"ignored extension");

    let result = scan_library(&store, &config, ScanMode::Full, None).unwrap();
    assert_eq!(result.files_seen, 2);
    assert_eq!(result.inserted, 2);
    assert_eq!(result.updated, 0);
    assert_eq!(result.deleted, 0);
    assert_eq!(result.tag_errors, 2);

    let files = store.all_library_files().unwrap();
    assert_eq!(files.len(), 2);
    let first = files.iter().find(|f| f.path.ends_with("First Song.mp3")).unwrap();
    assert_eq!(first.title, "First Song");
    assert_eq!(first.artist, "");
    assert_eq!(first.normalized, "first song");
    assert!(!first.partial_hash.is_empty());
}

#[test]
fn test_unchanged_files_fast_skip() {
    let (config, _temp) = testing::config();
    let store = testing::store(&config);
    write_file(&config, "Song.mp3", b"bytes");

    let first = scan_library(&store, &config, ScanMode::Full, None).unwrap();
    assert_eq!(first.inserted, 1);

    let second = scan_library(&store, &config, ScanMode::Full, None).unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, 0);
    assert_eq!(second.skipped, 1);
    // The skip path does not re-hash, so the tag error counter stays quiet.
    assert_eq!(second.tag_errors, 0);
}

#[test]
fn test_changed_file_is_updated() {
    let (config, _temp) = testing::config();
    let store = testing::store(&config);
    let path = write_file(&config, "Song.mp3", b"v1");
    scan_library(&store, &config, ScanMode::Full, None).unwrap();

    // Size change defeats the fast-skip even when mtime granularity is
    // coarser than the rewrite.
    fs::write(&path, b"version two, longer").unwrap();
    let result = scan_library(&store, &config, ScanMode::Full, None).unwrap();
    assert_eq!(result.updated, 1);
    assert_eq!(result.inserted, 0);
}

#[test]
fn test_full_scan_prunes_deleted_files() {
    let (config, _temp) = testing::config();
    let store = testing::store(&config);
    let keep = write_file(&config, "Keep.mp3", b"bytes");
    let gone = write_file(&config, "Gone.mp3", b"bytes");
    scan_library(&store, &config, ScanMode::Full, None).unwrap();
    assert_eq!(store.count_library_files().unwrap(), 2);

    fs::remove_file(&gone).unwrap();
    let result = scan_library(&store, &config, ScanMode::Full, None).unwrap();
    assert_eq!(result.deleted, 1);
    let files = store.all_library_files().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path, normalize_library_path(&keep));
}

#[test]
fn test_since_scan_never_deletes() {
    let (config, _temp) = testing::config();
    let store = testing::store(&config);
    let gone = write_file(&config, "Gone.mp3", b"bytes");
    scan_library(&store, &config, ScanMode::Full, None).unwrap();
    fs::remove_file(&gone).unwrap();

    let result = scan_library(&store, &config, ScanMode::Since(0.0), None).unwrap();
    assert_eq!(result.deleted, 0);
    assert_eq!(store.count_library_files().unwrap(), 1);
}

#[test]
fn test_since_scan_skips_older_files() {
    let (config, _temp) = testing::config();
    let store = testing::store(&config);
    write_file(&config, "Old.mp3", b"bytes");

    // A cutoff far in the future: everything is older, nothing is parsed.
    let far_future = crate::common::unix_now() + 3600.0;
    let result = scan_library(&store, &config, ScanMode::Since(far_future), None).unwrap();
    assert_eq!(result.inserted, 0);
    assert_eq!(result.skipped, 1);

    // A cutoff in the past picks the file up.
    let result = scan_library(&store, &config, ScanMode::Since(0.0), None).unwrap();
    assert_eq!(result.inserted, 1);
}

#[test]
fn test_paths_mode_deletes_only_supplied_paths() {
    let (config, _temp) = testing::config();
    let store = testing::store(&config);
    let a = write_file(&config, "A.mp3", b"bytes");
    let b = write_file(&config, "B.mp3", b"bytes");
    scan_library(&store, &config, ScanMode::Full, None).unwrap();

    fs::remove_file(&a).unwrap();
    fs::remove_file(&b).unwrap();

    // Only A is in the supplied subset; B's row must survive even though its
    // file is gone too.
    let result = scan_library(&store, &config, ScanMode::Paths(vec![a]), None).unwrap();
    assert_eq!(result.deleted, 1);
    let files = store.all_library_files().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path, normalize_library_path(&b));
}

#[test]
fn test_paths_mode_expands_directories() {
    let (config, _temp) = testing::config();
    let store = testing::store(&config);
    let album_dir = config.library.paths[0].join("album");
    fs::create_dir_all(&album_dir).unwrap();
    fs::write(album_dir.join("01.mp3"), b"x").unwrap();
    fs::write(album_dir.join("02.mp3"), b"y").unwrap();

    let result = scan_library(&store, &config, ScanMode::Paths(vec![album_dir]), None).unwrap();
    assert_eq!(result.inserted, 2);
}

#[test]
fn test_ignore_patterns_are_substrings() {
    let (mut config, _temp) = testing::config();
    config.library.ignore_patterns = vec!["skipme".to_string()];
    let store = testing::store(&config);
    write_file(&config, "skipme-track.mp3", b"x");
    write_file(&config, "keep-track.mp3", b"y");

    let result = scan_library(&store, &config, ScanMode::Full, None).unwrap();
    assert_eq!(result.inserted, 1);
    assert!(store.all_library_files().unwrap()[0].path.ends_with("keep-track.mp3"));
}

#[test]
fn test_cancelled_scan_commits_partial_work() {
    let (config, _temp) = testing::config();
    let store = testing::store(&config);
    write_file(&config, "Song.mp3", b"x");
    let cancel = AtomicBool::new(true);
    cancel.store(true, Ordering::Relaxed);

    // Pre-set cancellation: the loop exits immediately, the commit still
    // runs, and nothing is treated as deleted.
    let result = scan_library(&store, &config, ScanMode::Full, Some(&cancel)).unwrap();
    assert_eq!(result.inserted, 0);
    assert_eq!(result.deleted, 0);
}

#[test]
fn test_use_year_appends_token() {
    let (mut config, _temp) = testing::config();
    config.matching.use_year = true;
    let store = testing::store(&config);
    // Tag parsing fails for raw bytes, so no year is available and the token
    // must not be appended.
    write_file(&config, "Song.mp3", b"x");
    scan_library(&store, &config, ScanMode::Full, None).unwrap();
    assert_eq!(store.all_library_files().unwrap()[0].normalized, "song");
}

#[test]
fn test_parse_time_string_durations_and_timestamps() {
    let now = crate::common::unix_now();
    let two_hours = parse_time_string("2h").unwrap();
    assert!((now - two_hours - 7200.0).abs() < 5.0);

    assert!(parse_time_string("2025-10-08 10:00").is_ok());
    assert!(parse_time_string("2025-10-08").is_ok());
    assert!(parse_time_string("not a time").is_err());
}
