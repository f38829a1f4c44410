use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;

use crate::errors::{RefrainError, Result};

/// How unmatched tracks are rendered into exported M3U files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportMode {
    /// Omit unmatched tracks entirely.
    Strict,
    /// Write a commented pointer so the playlist mirrors the remote ordering.
    Mirrored,
    /// Write a sentinel path with a configured extension.
    Placeholders,
}

#[derive(Debug, Clone)]
pub struct LibraryConfig {
    pub paths: Vec<PathBuf>,
    pub extensions: Vec<String>,
    pub ignore_patterns: Vec<String>,
    pub follow_symlinks: bool,
    pub commit_interval: usize,
}

#[derive(Debug, Clone)]
pub struct MatchingConfig {
    pub duration_tolerance: Option<f64>,
    pub max_candidates_per_track: usize,
    pub use_year: bool,
}

#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub directory: PathBuf,
    pub mode: ExportMode,
    pub placeholder_extension: String,
    /// Place playlists owned by other users in per-owner subdirectories.
    pub organize_by_owner: bool,
}

#[derive(Debug, Clone)]
pub struct ReportsConfig {
    pub directory: PathBuf,
}

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub debounce_seconds: f64,
    pub db_poll_interval_seconds: f64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub provider: String,
    pub database_path: PathBuf,
    pub library: LibraryConfig,
    pub matching: MatchingConfig,
    pub export: ExportConfig,
    pub reports: ReportsConfig,
    pub watch: WatchConfig,
    /// Local snapshot document consumed by `pull`. The HTTP client that
    /// produces it lives out of tree.
    pub provider_snapshot: Option<PathBuf>,
}

// Raw mirror of the TOML file; everything optional so we can layer defaults
// and validate with precise messages afterwards.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    provider: Option<String>,
    database_path: Option<String>,
    #[serde(default)]
    library: RawLibrary,
    #[serde(default)]
    matching: RawMatching,
    #[serde(default)]
    export: RawExport,
    #[serde(default)]
    reports: RawReports,
    #[serde(default)]
    watch: RawWatch,
    provider_snapshot: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLibrary {
    paths: Option<Vec<String>>,
    extensions: Option<Vec<String>>,
    ignore_patterns: Option<Vec<String>>,
    follow_symlinks: Option<bool>,
    commit_interval: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMatching {
    duration_tolerance: Option<f64>,
    max_candidates_per_track: Option<usize>,
    use_year: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawExport {
    directory: Option<String>,
    mode: Option<ExportMode>,
    placeholder_extension: Option<String>,
    organize_by_owner: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawReports {
    directory: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawWatch {
    debounce_seconds: Option<f64>,
    db_poll_interval_seconds: Option<f64>,
}

pub const DEFAULT_EXTENSIONS: &[&str] = &[".mp3", ".m4a", ".ogg", ".opus", ".flac"];

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("", "", "refrain")
        .ok_or_else(|| RefrainError::Generic("failed to resolve project directories".to_string()))
}

impl Config {
    /// Default config file location: `~/.config/refrain/config.toml` (or the
    /// platform equivalent).
    pub fn default_config_path() -> Result<PathBuf> {
        Ok(project_dirs()?.config_dir().join("config.toml"))
    }

    pub fn parse(path: Option<&Path>) -> Result<Config> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_config_path()?,
        };
        let contents = std::fs::read_to_string(&config_path).map_err(|e| {
            RefrainError::InvalidConfiguration(format!("cannot read {}: {e}", config_path.display()))
        })?;
        let raw: RawConfig = toml::from_str(&contents)
            .map_err(|e| RefrainError::InvalidConfiguration(format!("{}: {e}", config_path.display())))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Config> {
        let database_path = match raw.database_path {
            Some(p) => expand(&p),
            None => project_dirs()?.data_dir().join("refrain.sqlite3"),
        };

        let extensions: Vec<String> = raw
            .library
            .extensions
            .unwrap_or_else(|| DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect())
            .into_iter()
            .map(|e| e.to_lowercase())
            .collect();
        for ext in &extensions {
            if !ext.starts_with('.') {
                return Err(RefrainError::InvalidConfiguration(format!(
                    "library.extensions entries must start with a dot, got {ext:?}"
                )));
            }
        }

        let commit_interval = raw.library.commit_interval.unwrap_or(100);
        if commit_interval == 0 {
            return Err(RefrainError::InvalidConfiguration(
                "library.commit_interval must be at least 1".to_string(),
            ));
        }

        let matching = MatchingConfig {
            duration_tolerance: raw.matching.duration_tolerance,
            max_candidates_per_track: raw.matching.max_candidates_per_track.unwrap_or(500),
            use_year: raw.matching.use_year.unwrap_or(false),
        };
        if let Some(tol) = matching.duration_tolerance {
            if tol < 0.0 {
                return Err(RefrainError::InvalidConfiguration(
                    "matching.duration_tolerance must be non-negative".to_string(),
                ));
            }
        }
        if matching.max_candidates_per_track == 0 {
            return Err(RefrainError::InvalidConfiguration(
                "matching.max_candidates_per_track must be at least 1".to_string(),
            ));
        }

        let watch = WatchConfig {
            debounce_seconds: raw.watch.debounce_seconds.unwrap_or(2.0),
            db_poll_interval_seconds: raw.watch.db_poll_interval_seconds.unwrap_or(2.0),
        };
        if watch.debounce_seconds <= 0.0 || watch.db_poll_interval_seconds <= 0.0 {
            return Err(RefrainError::InvalidConfiguration(
                "watch intervals must be positive".to_string(),
            ));
        }

        let placeholder_extension = raw.export.placeholder_extension.unwrap_or_else(|| ".mp3".to_string());
        if !placeholder_extension.starts_with('.') {
            return Err(RefrainError::InvalidConfiguration(
                "export.placeholder_extension must start with a dot".to_string(),
            ));
        }

        Ok(Config {
            provider: raw.provider.unwrap_or_else(|| "spotify".to_string()),
            database_path,
            library: LibraryConfig {
                paths: raw.library.paths.unwrap_or_default().iter().map(|p| expand(p)).collect(),
                extensions,
                ignore_patterns: raw.library.ignore_patterns.unwrap_or_default(),
                follow_symlinks: raw.library.follow_symlinks.unwrap_or(false),
                commit_interval,
            },
            matching,
            export: ExportConfig {
                directory: raw.export.directory.as_deref().map(expand).unwrap_or_else(|| PathBuf::from("playlists")),
                mode: raw.export.mode.unwrap_or(ExportMode::Strict),
                placeholder_extension,
                organize_by_owner: raw.export.organize_by_owner.unwrap_or(false),
            },
            reports: ReportsConfig {
                directory: raw.reports.directory.as_deref().map(expand).unwrap_or_else(|| PathBuf::from("reports")),
            },
            watch,
            provider_snapshot: raw.provider_snapshot.as_deref().map(expand),
        })
    }
}
