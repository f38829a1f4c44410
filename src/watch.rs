/// Debounced file-system watching over the library roots.
///
/// notify delivers raw events on its own thread; accepted paths accumulate in
/// a [`DebounceQueue`] whose deadline resets on every event, and a worker
/// thread emits the whole accumulated set as one callback once the quiet
/// period elapses. Copying an album folder in produces one batch, not one
/// rebuild per file.
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use notify::{recommended_watcher, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::errors::Result;

/// Extensions of in-progress downloads and editor scratch files.
const TEMP_EXTENSIONS: &[&str] = &[".tmp", ".part", ".download", ".crdownload"];

/// Decides which event paths are worth a rebuild.
#[derive(Debug, Clone)]
pub struct EventFilter {
    extensions: Vec<String>,
    ignore_patterns: Vec<String>,
}

impl EventFilter {
    pub fn new(extensions: Vec<String>, ignore_patterns: Vec<String>) -> EventFilter {
        EventFilter { extensions, ignore_patterns }
    }

    pub fn accepts(&self, path: &Path) -> bool {
        let ext = match path.extension().and_then(|e| e.to_str()) {
            Some(e) => format!(".{}", e.to_lowercase()),
            // Directories and extensionless files are never library audio.
            None => return false,
        };
        if TEMP_EXTENSIONS.contains(&ext.as_str()) {
            return false;
        }
        if !self.extensions.iter().any(|allowed| *allowed == ext) {
            return false;
        }
        if crate::fsutil::matches_ignore_pattern(path, &self.ignore_patterns) {
            return false;
        }
        true
    }
}

/// Accumulates accepted paths until the debounce period passes with no new
/// events.
#[derive(Debug)]
pub struct DebounceQueue {
    debounce: Duration,
    pending: HashSet<PathBuf>,
    deadline: Option<Instant>,
}

impl DebounceQueue {
    pub fn new(debounce: Duration) -> DebounceQueue {
        DebounceQueue { debounce, pending: HashSet::new(), deadline: None }
    }

    /// Record a path and push the deadline out by the full debounce period.
    pub fn push(&mut self, path: PathBuf) {
        self.pending.insert(path);
        self.deadline = Some(Instant::now() + self.debounce);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Whether the quiet period has elapsed with something pending.
    pub fn due(&self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) => !self.pending.is_empty() && now >= deadline,
            None => false,
        }
    }

    /// Take the accumulated batch and reset.
    pub fn drain(&mut self) -> Vec<PathBuf> {
        self.deadline = None;
        self.pending.drain().collect()
    }
}

pub type ChangeCallback = Box<dyn Fn(Vec<PathBuf>) + Send + Sync>;

/// Watches a set of root directories and delivers debounced path batches to a
/// callback. `start`/`stop` are idempotent; `stop` flushes any pending batch
/// synchronously before returning.
pub struct LibraryWatcher {
    roots: Vec<PathBuf>,
    filter: Arc<EventFilter>,
    queue: Arc<Mutex<DebounceQueue>>,
    callback: Arc<ChangeCallback>,
    watcher: Option<RecommendedWatcher>,
    worker: Option<JoinHandle<()>>,
    stop_flag: Arc<AtomicBool>,
    running: bool,
}

impl LibraryWatcher {
    pub fn new(
        roots: Vec<PathBuf>,
        extensions: Vec<String>,
        ignore_patterns: Vec<String>,
        debounce_seconds: f64,
        callback: ChangeCallback,
    ) -> LibraryWatcher {
        LibraryWatcher {
            roots,
            filter: Arc::new(EventFilter::new(extensions, ignore_patterns)),
            queue: Arc::new(Mutex::new(DebounceQueue::new(Duration::from_secs_f64(debounce_seconds)))),
            callback: Arc::new(callback),
            watcher: None,
            worker: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
            running: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn start(&mut self) -> Result<()> {
        if self.running {
            warn!("watcher already running");
            return Ok(());
        }
        self.stop_flag.store(false, Ordering::SeqCst);

        let filter = self.filter.clone();
        let queue = self.queue.clone();
        let mut watcher = recommended_watcher(move |res: notify::Result<notify::Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    warn!("watch event error: {e}");
                    return;
                }
            };
            if matches!(event.kind, EventKind::Access(_)) {
                return;
            }
            for path in event.paths {
                if filter.accepts(&path) {
                    debug!("watch event: {}", path.display());
                    queue.lock().unwrap().push(path);
                }
            }
        })?;

        let mut watched = 0;
        for root in &self.roots {
            if !root.exists() {
                warn!("library path does not exist, not watching: {}", root.display());
                continue;
            }
            watcher.watch(root, RecursiveMode::Recursive)?;
            info!("watching: {}", root.display());
            watched += 1;
        }
        if watched == 0 {
            warn!("no existing library paths to watch");
        }

        let queue = self.queue.clone();
        let callback = self.callback.clone();
        let stop_flag = self.stop_flag.clone();
        let worker = std::thread::spawn(move || {
            while !stop_flag.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(100));
                let batch = {
                    let mut queue = queue.lock().unwrap();
                    if queue.due(Instant::now()) {
                        Some(queue.drain())
                    } else {
                        None
                    }
                };
                if let Some(batch) = batch {
                    info!("processing {} changed file(s) after debounce", batch.len());
                    (*callback)(batch);
                }
            }
        });

        self.watcher = Some(watcher);
        self.worker = Some(worker);
        self.running = true;
        Ok(())
    }

    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        info!("stopping watch mode");
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        // Dropping the notify watcher stops its event threads.
        self.watcher = None;

        // Flush whatever accumulated but never came due.
        let batch = {
            let mut queue = self.queue.lock().unwrap();
            if queue.is_empty() {
                None
            } else {
                Some(queue.drain())
            }
        };
        if let Some(batch) = batch {
            info!("flushing {} pending change(s)", batch.len());
            (*self.callback)(batch);
        }
        self.running = false;
    }
}

impl Drop for LibraryWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
