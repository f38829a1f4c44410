/// Shared toys that do not belong to any single component: logging setup and
/// a couple of time helpers used across the scanner and pipeline.
use std::collections::HashSet;
use std::fs;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use directories::ProjectDirs;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, EnvFilter};

/// Current wall clock as fractional unix seconds.
pub fn unix_now() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0)
}

static LOGGING_INITIALIZED: Mutex<Option<HashSet<String>>> = Mutex::new(None);

/// Initialize the global tracing subscriber. Safe to call more than once; only
/// the first call per output mode takes effect.
pub fn initialize_logging(output: &str) -> crate::errors::Result<()> {
    let mut initialized = LOGGING_INITIALIZED.lock().unwrap();
    let set = initialized.get_or_insert_with(HashSet::new);
    if !set.insert(output.to_string()) {
        return Ok(());
    }
    drop(initialized);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if output == "file" {
        let proj_dirs = ProjectDirs::from("", "", "refrain")
            .ok_or_else(|| crate::errors::RefrainError::Generic("failed to resolve project directories".to_string()))?;
        let log_dir = if cfg!(target_os = "macos") {
            proj_dirs.cache_dir().to_path_buf()
        } else {
            proj_dirs.state_dir().unwrap_or(proj_dirs.cache_dir()).to_path_buf()
        };
        fs::create_dir_all(&log_dir)?;

        let file_appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .max_log_files(10)
            .filename_prefix("refrain")
            .filename_suffix("log")
            .build(&log_dir)
            .map_err(|e| crate::errors::RefrainError::Generic(format!("failed to build log appender: {e}")))?;

        let subscriber = fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .with_writer(file_appender)
            .with_target(true)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    } else {
        let subscriber = fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }

    Ok(())
}
