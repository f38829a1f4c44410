/// M3U playlist export. One file per playlist (plus the virtual "Liked
/// Songs"), UTF-8, entries in playlist order pointing at the matched local
/// files. Files are written to a temp sibling and renamed into place so a
/// concurrent media player never reads a half-written playlist.
use std::fs;
use std::io::Write;
use std::path::Path;

use regex::Regex;
use tracing::{info, warn};

use crate::config::{Config, ExportMode};
use crate::errors::Result;
use crate::pipeline::{ExportSummary, PlaylistExporter, LIKED_PLAYLIST_ID};
use crate::store::{PlaylistDetailRow, Store};

lazy_static::lazy_static! {
    static ref ILLEGAL_FS_CHARS_REGEX: Regex = Regex::new(r#"[:\?<>\\\*\|"/]+"#).unwrap();
}

fn sanitize_filename(name: &str) -> String {
    ILLEGAL_FS_CHARS_REGEX.replace_all(name, "_").trim().to_string()
}

fn extinf_seconds(row: &PlaylistDetailRow) -> i64 {
    row.duration_ms.map(|ms| (ms as f64 / 1000.0).round() as i64).unwrap_or(-1)
}

fn render_m3u(rows: &[PlaylistDetailRow], config: &Config) -> (String, usize) {
    let mut out = String::from("#EXTM3U\n");
    let mut entries = 0;
    for row in rows {
        let display = format!("{} - {}", row.artist, row.name);
        match &row.file_path {
            Some(path) => {
                out.push_str(&format!("#EXTINF:{},{}\n{}\n", extinf_seconds(row), display, path));
                entries += 1;
            }
            None => match config.export.mode {
                ExportMode::Strict => {}
                ExportMode::Mirrored => {
                    // A pointer the user can grep for; deliberately not a
                    // playable entry.
                    out.push_str(&format!("# missing: {}\n", display));
                }
                ExportMode::Placeholders => {
                    let sentinel = format!(
                        "_missing/{}{}",
                        sanitize_filename(&display),
                        config.export.placeholder_extension
                    );
                    out.push_str(&format!("#EXTINF:{},{}\n{}\n", extinf_seconds(row), display, sentinel));
                    entries += 1;
                }
            },
        }
    }
    (out, entries)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let tmp = path.with_extension("m3u.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents.as_bytes())?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

pub struct M3uExporter;

impl M3uExporter {
    fn export_one(
        &self,
        store: &Store,
        config: &Config,
        playlist_id: &str,
        current_user_id: Option<&str>,
        summary: &mut ExportSummary,
    ) -> Result<()> {
        let provider = &config.provider;
        let (name, owner, rows) = if playlist_id == LIKED_PLAYLIST_ID {
            ("Liked Songs".to_string(), None, store.liked_detail(provider)?)
        } else {
            match store.get_playlist(provider, playlist_id)? {
                Some(playlist) => {
                    let owner = playlist.owner_name.clone().or(playlist.owner_id.clone());
                    let foreign = match (&playlist.owner_id, current_user_id) {
                        (Some(owner_id), Some(user_id)) => owner_id != user_id,
                        _ => false,
                    };
                    (playlist.name, if foreign { owner } else { None }, store.playlist_detail(provider, playlist_id)?)
                }
                None => {
                    warn!("playlist {playlist_id} not in store; skipping export");
                    return Ok(());
                }
            }
        };

        // Followed playlists land in a per-owner subdirectory when the user
        // asked for that layout.
        let mut target_dir = config.export.directory.clone();
        if config.export.organize_by_owner {
            if let Some(owner) = owner {
                target_dir = target_dir.join(sanitize_filename(&owner));
                fs::create_dir_all(&target_dir)?;
            }
        }

        let filename = {
            let base = sanitize_filename(&name);
            if base.is_empty() {
                format!("{playlist_id}.m3u")
            } else {
                format!("{base}.m3u")
            }
        };
        let (contents, entries) = render_m3u(&rows, config);
        write_atomic(&target_dir.join(filename), &contents)?;
        summary.playlists += 1;
        summary.entries += entries;
        Ok(())
    }
}

impl PlaylistExporter for M3uExporter {
    fn export_playlists(
        &self,
        store: &Store,
        config: &Config,
        playlist_ids: Option<&[String]>,
    ) -> Result<ExportSummary> {
        fs::create_dir_all(&config.export.directory)?;
        let current_user_id =
            if config.export.organize_by_owner { store.get_meta("current_user_id")? } else { None };
        let mut summary = ExportSummary::default();
        match playlist_ids {
            Some(ids) => {
                for id in ids {
                    self.export_one(store, config, id, current_user_id.as_deref(), &mut summary)?;
                }
            }
            None => {
                for playlist in store.all_playlists(&config.provider)? {
                    self.export_one(store, config, &playlist.id, current_user_id.as_deref(), &mut summary)?;
                }
                self.export_one(store, config, LIKED_PLAYLIST_ID, current_user_id.as_deref(), &mut summary)?;
            }
        }
        info!("wrote {} playlist file(s) to {}", summary.playlists, config.export.directory.display());
        Ok(summary)
    }
}
