use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use refrain_rs::common::{initialize_logging, unix_now};
use refrain_rs::config::Config;
use refrain_rs::diagnose::{diagnose_track, remove_match, set_manual_match};
use refrain_rs::errors::{RefrainError, Result};
use refrain_rs::export::M3uExporter;
use refrain_rs::ingest;
use refrain_rs::matcher::Matcher;
use refrain_rs::pipeline::WatchBuild;
use refrain_rs::report::CsvReporter;
use refrain_rs::scan::{parse_time_string, scan_library, ScanMode};
use refrain_rs::store::Store;
use refrain_rs::watch::LibraryWatcher;

#[derive(Parser)]
#[command(name = "refrain", version, about = "Reconcile a streaming provider library with local audio files")]
struct Cli {
    /// Config file path (default: the platform config dir).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the local library and index track metadata.
    Scan {
        /// Only scan files modified since this time ("2h", "2025-10-08 10:00").
        #[arg(long, conflicts_with_all = ["deep", "watch"])]
        since: Option<String>,
        /// Force a full rescan of all library paths.
        #[arg(long, conflicts_with = "watch")]
        deep: bool,
        /// Scan only these files or directories.
        #[arg(long, num_args = 1.., conflicts_with = "watch")]
        paths: Vec<PathBuf>,
        /// Watch library paths and continuously update the index.
        #[arg(long)]
        watch: bool,
        /// Seconds of quiet before a change batch is processed (watch mode).
        #[arg(long)]
        debounce: Option<f64>,
    },
    /// Match remote tracks against the indexed library files.
    Match {
        /// Re-score every track instead of only the unmatched ones.
        #[arg(long)]
        full: bool,
    },
    /// Run the full pipeline: scan, match, export, report.
    Build {
        /// Keep running and rebuild incrementally on changes.
        #[arg(long)]
        watch: bool,
        /// Seconds of quiet before a change batch is processed (watch mode).
        #[arg(long)]
        debounce: Option<f64>,
        #[arg(long)]
        no_export: bool,
        #[arg(long)]
        no_report: bool,
    },
    /// Ingest the provider library snapshot into the store.
    Pull {
        /// Re-process playlists even when their snapshot id is unchanged.
        #[arg(long)]
        force_refresh: bool,
    },
    /// Export playlists to M3U files.
    Export,
    /// Write the CSV report set.
    Report,
    /// Explain why a track did or did not match.
    Diagnose { track_id: String },
    /// Pin a manual match between a track and a library file.
    SetMatch { track_id: String, file_id: i64 },
    /// Remove a track's match (manual or automatic).
    RemoveMatch { track_id: String },
}

fn interrupt_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = flag.clone();
    let _ = ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    });
    flag
}

fn finish_scan_meta(store: &Store, scan_start: f64) -> Result<()> {
    store.bump_last_scan_time(scan_start)?;
    store.set_meta("library_last_modified", &unix_now().to_string())?;
    store.set_meta("last_write_epoch", &unix_now().to_string())?;
    store.set_meta("last_write_source", "scan")?;
    store.commit()
}

fn cmd_scan(config: &Config, since: Option<String>, deep: bool, paths: Vec<PathBuf>, watch: bool, debounce: Option<f64>) -> Result<()> {
    if watch {
        let debounce = debounce.unwrap_or(config.watch.debounce_seconds);
        let callback_config = config.clone();
        let watcher_callback = Box::new(move |changed: Vec<PathBuf>| {
            let run = || -> Result<()> {
                let store = Store::open(&callback_config.database_path)?;
                let scan_start = unix_now();
                let result = scan_library(&store, &callback_config, ScanMode::Paths(changed), None)?;
                finish_scan_meta(&store, scan_start)?;
                println!(
                    "{} new, {} updated, {} deleted",
                    result.inserted, result.updated, result.deleted
                );
                Ok(())
            };
            if let Err(e) = run() {
                eprintln!("error processing changes: {e}");
            }
        });
        let mut watcher = LibraryWatcher::new(
            config.library.paths.clone(),
            config.library.extensions.clone(),
            config.library.ignore_patterns.clone(),
            debounce,
            watcher_callback,
        );
        watcher.start()?;
        println!("watching for changes (debounce {debounce}s); ctrl-c to stop");
        let stop = interrupt_flag();
        while !stop.load(Ordering::SeqCst) {
            std::thread::sleep(std::time::Duration::from_millis(250));
        }
        watcher.stop();
        return Ok(());
    }

    let store = Store::open(&config.database_path)?;
    let mode = if !paths.is_empty() {
        ScanMode::Paths(paths)
    } else if deep {
        ScanMode::Full
    } else if let Some(since) = since {
        ScanMode::Since(parse_time_string(&since)?)
    } else {
        match store.get_meta("last_scan_time")?.and_then(|v| v.parse::<f64>().ok()) {
            Some(ts) => {
                println!("incremental scan since last scan; use --deep for a full rescan");
                ScanMode::Since(ts)
            }
            None => {
                println!("no previous scan found; performing a full scan");
                ScanMode::Full
            }
        }
    };

    let cancel = interrupt_flag();
    let scan_start = unix_now();
    let result = scan_library(&store, config, mode, Some(&cancel))?;
    finish_scan_meta(&store, scan_start)?;
    println!(
        "scan complete: {} new, {} updated, {} unchanged, {} deleted, {} error(s)",
        result.inserted,
        result.updated,
        result.skipped,
        result.deleted,
        result.errors()
    );
    Ok(())
}

fn cmd_match(config: &Config, full: bool) -> Result<()> {
    let store = Store::open(&config.database_path)?;
    let matcher = Matcher::new(&store, config);
    let outcome = if full { matcher.match_all()? } else { matcher.match_tracks(None)? };
    store.set_meta("last_write_epoch", &unix_now().to_string())?;
    store.set_meta("last_write_source", "manual")?;
    store.commit()?;
    println!("matched {}/{} track(s)", outcome.matched, outcome.processed);
    Ok(())
}

fn cmd_build(config: &Config, watch: bool, debounce: Option<f64>, no_export: bool, no_report: bool) -> Result<()> {
    let pipeline = WatchBuild::new(
        config.clone(),
        Arc::new(M3uExporter),
        Arc::new(CsvReporter::new(config.provider.clone())),
        no_export,
        no_report,
    );
    if watch {
        pipeline.run_once()?;
        let stop = interrupt_flag();
        pipeline.run_watch(debounce.unwrap_or(config.watch.debounce_seconds), stop)?;
    } else {
        pipeline.run_once()?;
        println!("build complete");
    }
    Ok(())
}

fn cmd_diagnose(config: &Config, track_id: &str) -> Result<()> {
    let store = Store::open(&config.database_path)?;
    let report = diagnose_track(&store, &config.provider, track_id, 5)?;
    let track = &report.track;
    println!("track: {} | {} - {}", track.id, track.artist, track.name);
    println!(
        "  album={} year={} isrc={} normalized='{}'",
        track.album.as_deref().unwrap_or("-"),
        track.year.map(|y| y.to_string()).unwrap_or_else(|| "-".to_string()),
        track.isrc.as_deref().unwrap_or("-"),
        track.normalized
    );
    match &report.matched {
        Some((m, file)) => {
            println!("matched: file_id={} score={:.3} method={} confidence={}", m.file_id, m.score, m.method, m.confidence);
            println!("  path: {}", file.path);
        }
        None => {
            println!("unmatched; closest of {} file(s):", report.total_files);
            for (file, ratio) in &report.closest {
                println!(
                    "  file_id={} ratio={:.3} | '{}' by '{}' | {}",
                    file.id, ratio, file.title, file.artist, file.path
                );
            }
        }
    }
    Ok(())
}

fn dispatch(config: &Config, command: &Commands) -> Result<()> {
    match command {
        Commands::Scan { since, deep, paths, watch, debounce } => {
            cmd_scan(config, since.clone(), *deep, paths.clone(), *watch, *debounce)
        }
        Commands::Match { full } => cmd_match(config, *full),
        Commands::Build { watch, debounce, no_export, no_report } => {
            cmd_build(config, *watch, *debounce, *no_export, *no_report)
        }
        Commands::Pull { force_refresh } => {
            let store = Store::open(&config.database_path)?;
            let summary = ingest::pull(&store, config, *force_refresh)?;
            println!(
                "pull complete: {} new, {} updated, {} unchanged playlist(s); {} liked",
                summary.playlists_new, summary.playlists_updated, summary.playlists_unchanged, summary.liked_added
            );
            Ok(())
        }
        Commands::Export => {
            let store = Store::open(&config.database_path)?;
            use refrain_rs::pipeline::PlaylistExporter;
            let summary = M3uExporter.export_playlists(&store, config, None)?;
            println!("exported {} playlist(s)", summary.playlists);
            Ok(())
        }
        Commands::Report => {
            let store = Store::open(&config.database_path)?;
            use refrain_rs::pipeline::ReportGenerator;
            CsvReporter::new(config.provider.clone()).generate_reports(&store, &config.reports.directory, None)?;
            println!("reports written to {}", config.reports.directory.display());
            Ok(())
        }
        Commands::Diagnose { track_id } => cmd_diagnose(config, track_id),
        Commands::SetMatch { track_id, file_id } => {
            let store = Store::open(&config.database_path)?;
            set_manual_match(&store, &config.provider, track_id, *file_id)?;
            println!("pinned {track_id} -> file {file_id}");
            Ok(())
        }
        Commands::RemoveMatch { track_id } => {
            let store = Store::open(&config.database_path)?;
            if remove_match(&store, &config.provider, track_id)? {
                println!("removed match for {track_id}");
            } else {
                println!("{track_id} had no match");
            }
            Ok(())
        }
    }
}

fn run() -> Result<()> {
    initialize_logging("stderr")?;
    let cli = Cli::parse();
    let config = Config::parse(cli.config.as_deref())?;

    // A busy store (another writer holding the lock past the timeout) gets
    // one retry before the command fails.
    match dispatch(&config, &cli.command) {
        Err(RefrainError::WriteConflict) => {
            eprintln!("store is busy; retrying once...");
            dispatch(&config, &cli.command)
        }
        other => other,
    }
}

fn main() {
    if let Err(e) = run() {
        match e {
            RefrainError::Expected(expected) => eprintln!("{expected}"),
            other => eprintln!("error: {other}"),
        }
        std::process::exit(1);
    }
}
