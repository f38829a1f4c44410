/// The incremental rebuild pipeline. Reacts to two change sources while watch
/// mode runs: batched library file changes from the watcher, and store writes
/// from an external ingestion run detected through the database file's mtime.
/// Either way the sequence is scan/match scoped to what changed, then export
/// and report scoped to the playlists that contain the re-matched tracks.
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::common::unix_now;
use crate::config::Config;
use crate::errors::Result;
use crate::fsutil::normalize_library_path;
use crate::matcher::Matcher;
use crate::scan::{scan_library, ScanMode};
use crate::store::Store;
use crate::watch::LibraryWatcher;

/// Sentinel playlist id for the virtual "Liked Songs" playlist in scoped
/// export and report calls.
pub const LIKED_PLAYLIST_ID: &str = "liked";

#[derive(Debug, Default, Clone)]
pub struct ExportSummary {
    pub playlists: usize,
    pub entries: usize,
}

/// Writes M3U playlists from the store. The core calls this; rendering lives
/// in the export module.
pub trait PlaylistExporter: Send + Sync {
    /// Export the given playlists, or the entire set (including Liked) when
    /// `playlist_ids` is `None`.
    fn export_playlists(&self, store: &Store, config: &Config, playlist_ids: Option<&[String]>)
        -> Result<ExportSummary>;
}

/// Writes analytical reports from the store. When scoped, only the detail
/// pages for the given playlists plus the summary indexes are regenerated.
pub trait ReportGenerator: Send + Sync {
    fn generate_reports(&self, store: &Store, out_dir: &Path, affected_playlist_ids: Option<&[String]>) -> Result<()>;
}

/// Guard value for the db-mtime poll while a rebuild is in flight; any real
/// mtime observed afterwards replaces it.
const MTIME_FAR_FUTURE: f64 = f64::MAX;

fn db_mtime(path: &Path) -> f64 {
    path.metadata()
        .ok()
        .and_then(|m| m.modified().ok())
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[derive(Clone)]
pub struct WatchBuild {
    config: Config,
    exporter: Arc<dyn PlaylistExporter>,
    reporter: Arc<dyn ReportGenerator>,
    skip_export: bool,
    skip_report: bool,
}

impl WatchBuild {
    pub fn new(
        config: Config,
        exporter: Arc<dyn PlaylistExporter>,
        reporter: Arc<dyn ReportGenerator>,
        skip_export: bool,
        skip_report: bool,
    ) -> WatchBuild {
        WatchBuild { config, exporter, reporter, skip_export, skip_report }
    }

    /// One full pipeline run: scan everything, match everything, export and
    /// report everything.
    pub fn run_once(&self) -> Result<()> {
        let store = Store::open(&self.config.database_path)?;
        let scan_start = unix_now();
        scan_library(&store, &self.config, ScanMode::Full, None)?;
        store.bump_last_scan_time(scan_start)?;
        store.set_meta("library_last_modified", &unix_now().to_string())?;

        Matcher::new(&store, &self.config).match_all()?;

        if self.skip_export {
            info!("export skipped (disabled)");
        } else {
            let summary = self.exporter.export_playlists(&store, &self.config, None)?;
            info!("exported {} playlist(s)", summary.playlists);
        }
        if self.skip_report {
            info!("reports skipped (disabled)");
        } else {
            self.reporter.generate_reports(&store, &self.config.reports.directory, None)?;
            info!("reports written to {}", self.config.reports.directory.display());
        }

        store.set_meta("last_write_epoch", &unix_now().to_string())?;
        store.set_meta("last_write_source", "manual")?;
        store.commit()?;
        Ok(())
    }

    /// Scoped export + report for the tracks whose match rows just changed.
    /// Empty input skips both with a log line.
    fn export_and_report_scoped(&self, store: &Store, matched_track_ids: &[String]) -> Result<()> {
        let provider = &self.config.provider;
        let affected = store.playlists_containing_tracks(provider, matched_track_ids)?;
        let has_liked = !store.liked_track_ids(provider, matched_track_ids)?.is_empty();
        debug!("affected playlists: {:?} (liked: {has_liked})", affected);

        if affected.is_empty() && !has_liked {
            if matched_track_ids.is_empty() {
                info!("no matches changed; skipping export and report");
            } else {
                info!("no playlists or liked songs contain the matched tracks; skipping export and report");
            }
            return Ok(());
        }

        if self.skip_export {
            info!("export skipped (disabled)");
        } else {
            let mut scoped = affected.clone();
            if has_liked {
                scoped.push(LIKED_PLAYLIST_ID.to_string());
            }
            let summary = self.exporter.export_playlists(store, &self.config, Some(&scoped))?;
            info!("exported {} affected playlist(s)", summary.playlists);
        }

        if self.skip_report {
            info!("reports skipped (disabled)");
        } else if affected.is_empty() {
            // The liked summary spans report pages, so a liked-only change
            // regenerates the full set.
            self.reporter.generate_reports(store, &self.config.reports.directory, None)?;
            info!("reports updated (full, liked change)");
        } else {
            self.reporter.generate_reports(store, &self.config.reports.directory, Some(&affected))?;
            info!("reports updated ({} playlist detail(s))", affected.len());
        }
        Ok(())
    }

    /// Match the given files and drive scoped export/report from the result.
    /// This is the back half of a library-change rebuild, split out so it can
    /// run against an already-scanned store.
    pub fn rebuild_for_files(&self, store: &Store, file_ids: &[i64]) -> Result<()> {
        let outcome = Matcher::new(store, &self.config).match_files(file_ids)?;
        self.export_and_report_scoped(store, &outcome.matched_track_ids)?;
        store.set_meta("last_write_epoch", &unix_now().to_string())?;
        store.set_meta("last_write_source", "watch:library")?;
        store.commit()?;
        Ok(())
    }

    /// React to a batch of changed library paths: scan exactly those paths,
    /// re-match the surviving files, then export/report the affected
    /// playlists.
    pub fn handle_library_changes(&self, paths: Vec<PathBuf>) -> Result<()> {
        info!("library changed ({} file(s))", paths.len());
        let store = Store::open(&self.config.database_path)?;

        let scan_start = unix_now();
        let result = scan_library(&store, &self.config, ScanMode::Paths(paths.clone()), None)?;
        store.bump_last_scan_time(scan_start)?;
        store.set_meta("library_last_modified", &unix_now().to_string())?;
        info!("scan: {} new, {} updated, {} deleted", result.inserted, result.updated, result.deleted);

        let mut file_ids = Vec::new();
        for path in &paths {
            let canonical = normalize_library_path(path);
            if let Some(id) = store.file_id_for_path(&canonical)? {
                file_ids.push(id);
            }
        }

        self.rebuild_for_files(&store, &file_ids)
    }

    /// React to an external store write (an out-of-process `pull`): consume
    /// the changed-track signal if the ingestion left one, otherwise fall
    /// back to a full re-match.
    pub fn handle_database_change(&self) -> Result<()> {
        info!("database changed (tracks/playlists updated)");
        let store = Store::open(&self.config.database_path)?;
        let matcher = Matcher::new(&store, &self.config);

        let changed: Vec<String> = store
            .get_meta("last_pull_changed_tracks")?
            .map(|value| value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
            .unwrap_or_default();

        let matched_track_ids = if changed.is_empty() {
            debug!("no change tracking available; re-matching all tracks");
            matcher.match_all()?;
            // A full rebuild regenerates the full export and report set.
            if !self.skip_export {
                let summary = self.exporter.export_playlists(&store, &self.config, None)?;
                info!("exported {} playlist(s)", summary.playlists);
            }
            if !self.skip_report {
                self.reporter.generate_reports(&store, &self.config.reports.directory, None)?;
            }
            Vec::new()
        } else {
            info!("incrementally matching {} changed track(s)", changed.len());
            let outcome = matcher.match_tracks(Some(&changed))?;
            store.delete_meta("last_pull_changed_tracks")?;
            outcome.matched_track_ids
        };

        if !matched_track_ids.is_empty() {
            self.export_and_report_scoped(&store, &matched_track_ids)?;
        }

        store.set_meta("last_write_epoch", &unix_now().to_string())?;
        store.set_meta("last_write_source", "watch:database")?;
        store.commit()?;
        Ok(())
    }

    /// Watch mode: run until `stop` is set, reacting to debounced library
    /// batches and to store writes from external ingestion. Handlers are
    /// serialized behind one lock; batches queued while one runs are handled
    /// next.
    pub fn run_watch(&self, debounce_seconds: f64, stop: Arc<AtomicBool>) -> Result<()> {
        info!("monitoring library files and database for changes (debounce {debounce_seconds}s); ctrl-c to stop");

        let db_path = self.config.database_path.clone();
        // Shared with the library-change callback so work in flight never
        // looks like an external store write.
        let last_db_mtime = Arc::new(Mutex::new(db_mtime(&db_path)));
        let work_lock = Arc::new(Mutex::new(()));

        let callback = {
            let pipeline = self.clone();
            let last_db_mtime = last_db_mtime.clone();
            let work_lock = work_lock.clone();
            let db_path = db_path.clone();
            Box::new(move |paths: Vec<PathBuf>| {
                let _work = work_lock.lock().unwrap();
                *last_db_mtime.lock().unwrap() = MTIME_FAR_FUTURE;
                if let Err(e) = pipeline.handle_library_changes(paths) {
                    error!("incremental rebuild failed: {e}");
                }
                *last_db_mtime.lock().unwrap() = db_mtime(&db_path);
                info!("watching for changes...");
            })
        };

        let mut watcher = LibraryWatcher::new(
            self.config.library.paths.clone(),
            self.config.library.extensions.clone(),
            self.config.library.ignore_patterns.clone(),
            debounce_seconds,
            callback,
        );
        watcher.start()?;

        let poll_interval = Duration::from_secs_f64(self.config.watch.db_poll_interval_seconds);
        let mut last_poll = Instant::now();
        while !stop.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(250));
            if last_poll.elapsed() < poll_interval {
                continue;
            }
            last_poll = Instant::now();
            let current = db_mtime(&db_path);
            if current > *last_db_mtime.lock().unwrap() {
                let _work = work_lock.lock().unwrap();
                *last_db_mtime.lock().unwrap() = MTIME_FAR_FUTURE;
                if let Err(e) = self.handle_database_change() {
                    error!("database sync failed: {e}");
                }
                *last_db_mtime.lock().unwrap() = db_mtime(&db_path);
                info!("watching for changes...");
            }
        }

        // Stop flushes any pending batch through the callback before
        // returning, so the last edits are not lost.
        watcher.stop();
        info!("watch mode stopped");
        Ok(())
    }
}
