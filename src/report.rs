/// CSV report generation: a coverage summary over all playlists, flat lists
/// of matched and unmatched tracks, and one detail file per playlist. A
/// scoped run rewrites only the affected detail files plus the summary
/// indexes; everything else on disk stays as it is.
use std::fs;
use std::path::Path;

use tracing::info;

use crate::errors::Result;
use crate::pipeline::{ReportGenerator, LIKED_PLAYLIST_ID};
use crate::store::Store;

pub struct CsvReporter {
    provider: String,
}

impl CsvReporter {
    pub fn new(provider: impl Into<String>) -> CsvReporter {
        CsvReporter { provider: provider.into() }
    }

    fn write_playlist_summary(&self, store: &Store, out_dir: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(out_dir.join("playlists.csv"))?;
        writer.write_record(["playlist_id", "name", "owner", "tracks", "matched", "coverage_pct"])?;
        for playlist in store.all_playlists(&self.provider)? {
            let rows = store.playlist_detail(&self.provider, &playlist.id)?;
            let matched = rows.iter().filter(|r| r.file_path.is_some()).count();
            let coverage = if rows.is_empty() { 0.0 } else { matched as f64 / rows.len() as f64 * 100.0 };
            writer.write_record([
                playlist.id.clone(),
                playlist.name.clone(),
                playlist.owner_name.clone().unwrap_or_default(),
                rows.len().to_string(),
                matched.to_string(),
                format!("{coverage:.1}"),
            ])?;
        }
        // The liked summary spans reports; it is part of the index.
        let liked = store.liked_detail(&self.provider)?;
        let liked_matched = liked.iter().filter(|r| r.file_path.is_some()).count();
        let liked_coverage = if liked.is_empty() { 0.0 } else { liked_matched as f64 / liked.len() as f64 * 100.0 };
        writer.write_record([
            LIKED_PLAYLIST_ID.to_string(),
            "Liked Songs".to_string(),
            String::new(),
            liked.len().to_string(),
            liked_matched.to_string(),
            format!("{liked_coverage:.1}"),
        ])?;
        writer.flush()?;
        Ok(())
    }

    fn write_track_lists(&self, store: &Store, out_dir: &Path) -> Result<()> {
        let mut matched = csv::Writer::from_path(out_dir.join("matched_tracks.csv"))?;
        matched.write_record(["track_id", "artist", "name", "album", "score", "confidence", "path"])?;
        let mut unmatched = csv::Writer::from_path(out_dir.join("unmatched_tracks.csv"))?;
        unmatched.write_record(["track_id", "artist", "name", "album", "year"])?;

        for (track, match_info) in store.all_tracks_with_matches(&self.provider)? {
            match match_info {
                Some((score, confidence, path)) => {
                    matched.write_record([
                        track.id.clone(),
                        track.artist.clone(),
                        track.name.clone(),
                        track.album.clone().unwrap_or_default(),
                        format!("{score:.3}"),
                        confidence.as_str().to_string(),
                        path,
                    ])?;
                }
                None => {
                    unmatched.write_record([
                        track.id.clone(),
                        track.artist.clone(),
                        track.name.clone(),
                        track.album.clone().unwrap_or_default(),
                        track.year.map(|y| y.to_string()).unwrap_or_default(),
                    ])?;
                }
            }
        }
        matched.flush()?;
        unmatched.flush()?;
        Ok(())
    }

    fn write_playlist_detail(&self, store: &Store, out_dir: &Path, playlist_id: &str) -> Result<()> {
        let rows = if playlist_id == LIKED_PLAYLIST_ID {
            store.liked_detail(&self.provider)?
        } else {
            if store.get_playlist(&self.provider, playlist_id)?.is_none() {
                return Ok(());
            }
            store.playlist_detail(&self.provider, playlist_id)?
        };
        let mut writer = csv::Writer::from_path(out_dir.join(format!("playlist_{playlist_id}.csv")))?;
        writer.write_record(["position", "track_id", "artist", "name", "album", "score", "confidence", "path"])?;
        for row in rows {
            writer.write_record([
                row.position.to_string(),
                row.track_id.clone(),
                row.artist.clone(),
                row.name.clone(),
                row.album.clone().unwrap_or_default(),
                row.score.map(|s| format!("{s:.3}")).unwrap_or_default(),
                row.confidence.map(|c| c.as_str().to_string()).unwrap_or_default(),
                row.file_path.clone().unwrap_or_default(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl ReportGenerator for CsvReporter {
    fn generate_reports(&self, store: &Store, out_dir: &Path, affected_playlist_ids: Option<&[String]>) -> Result<()> {
        fs::create_dir_all(out_dir)?;

        // Summary indexes are cheap and always kept current.
        self.write_playlist_summary(store, out_dir)?;
        self.write_track_lists(store, out_dir)?;

        match affected_playlist_ids {
            Some(ids) => {
                for id in ids {
                    self.write_playlist_detail(store, out_dir, id)?;
                }
                info!("updated {} playlist detail report(s) in {}", ids.len(), out_dir.display());
            }
            None => {
                let playlists = store.all_playlists(&self.provider)?;
                for playlist in &playlists {
                    self.write_playlist_detail(store, out_dir, &playlist.id)?;
                }
                self.write_playlist_detail(store, out_dir, LIKED_PLAYLIST_ID)?;
                info!("wrote full report set ({} playlists) to {}", playlists.len(), out_dir.display());
            }
        }
        Ok(())
    }
}
