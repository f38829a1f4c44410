use std::fs;
use std::sync::Once;

use tempfile::TempDir;

use crate::config::{Config, ExportConfig, ExportMode, LibraryConfig, MatchingConfig, ReportsConfig, WatchConfig};
use crate::normalize::normalize_title_artist;
use crate::store::{NewLibraryFile, Store, Track};

static INIT: Once = Once::new();

pub fn init() -> TempDir {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .with_test_writer()
            .try_init();
    });
    TempDir::new().expect("failed to create temp dir")
}

/// A config rooted in a fresh temp dir, with a `library/` source directory
/// already created.
pub fn config() -> (Config, TempDir) {
    let temp_dir = init();
    let base = temp_dir.path();
    fs::create_dir_all(base.join("library")).expect("failed to create library dir");

    let config = Config {
        provider: "spotify".to_string(),
        database_path: base.join("refrain.sqlite3"),
        library: LibraryConfig {
            paths: vec![base.join("library")],
            extensions: vec![".mp3".to_string(), ".flac".to_string(), ".m4a".to_string()],
            ignore_patterns: vec![],
            follow_symlinks: false,
            commit_interval: 100,
        },
        matching: MatchingConfig { duration_tolerance: Some(2.0), max_candidates_per_track: 500, use_year: false },
        export: ExportConfig {
            directory: base.join("playlists"),
            mode: ExportMode::Strict,
            placeholder_extension: ".mp3".to_string(),
            organize_by_owner: false,
        },
        reports: ReportsConfig { directory: base.join("reports") },
        watch: WatchConfig { debounce_seconds: 0.2, db_poll_interval_seconds: 0.2 },
        provider_snapshot: None,
    };
    (config, temp_dir)
}

pub fn store(config: &Config) -> Store {
    Store::open(&config.database_path).expect("failed to open store")
}

/// A remote track with its `normalized` column computed the way ingestion
/// computes it.
pub fn remote_track(
    id: &str,
    name: &str,
    artist: &str,
    album: Option<&str>,
    year: Option<i64>,
    isrc: Option<&str>,
    duration_ms: Option<i64>,
) -> Track {
    let (_, _, normalized) = normalize_title_artist(name, artist);
    Track {
        id: id.to_string(),
        name: name.to_string(),
        artist: artist.to_string(),
        album: album.map(str::to_string),
        year,
        isrc: isrc.map(str::to_string),
        duration_ms,
        normalized,
    }
}

/// A library file row with its `normalized` column computed the way the
/// scanner computes it.
pub fn local_file(
    path: &str,
    title: &str,
    artist: &str,
    album: Option<&str>,
    year: Option<i64>,
    isrc: Option<&str>,
    duration: Option<f64>,
) -> NewLibraryFile {
    let (_, _, normalized) = normalize_title_artist(title, artist);
    NewLibraryFile {
        path: path.to_string(),
        size: 1024,
        mtime: 1_700_000_000.0,
        partial_hash: format!("hash-of-{title}"),
        title: title.to_string(),
        artist: artist.to_string(),
        album: album.map(str::to_string),
        year,
        isrc: isrc.map(str::to_string),
        duration,
        bitrate_kbps: Some(320),
        normalized,
    }
}
