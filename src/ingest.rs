/// Snapshot ingestion: the `pull` path. A provider client living out of tree
/// (the HTTP and OAuth machinery is not part of this crate) drops a JSON
/// snapshot of the user's library; this module folds it into the store with
/// the same incremental rules a live client would use. Playlists whose
/// snapshot id is unchanged are skipped, liked tracks are gated by the
/// `liked_last_added_at` cursor, and every upserted track id lands in the
/// `last_pull_changed_tracks` signal the watch pipeline consumes.
use std::collections::BTreeSet;
use std::fs;

use serde::Deserialize;
use tracing::{debug, info};

use crate::common::unix_now;
use crate::config::Config;
use crate::errors::{RefrainError, Result};
use crate::normalize::normalize_title_artist;
use crate::store::{Playlist, PlaylistEntry, Store, Track};

#[derive(Debug, Deserialize)]
pub struct Snapshot {
    pub provider: Option<String>,
    pub user: Option<SnapshotUser>,
    #[serde(default)]
    pub playlists: Vec<SnapshotPlaylist>,
    #[serde(default)]
    pub liked: Vec<SnapshotLiked>,
}

#[derive(Debug, Deserialize)]
pub struct SnapshotUser {
    pub id: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SnapshotPlaylist {
    pub id: String,
    pub name: String,
    pub snapshot_id: Option<String>,
    pub owner_id: Option<String>,
    pub owner_name: Option<String>,
    #[serde(default)]
    pub tracks: Vec<SnapshotEntry>,
}

#[derive(Debug, Deserialize)]
pub struct SnapshotEntry {
    pub added_at: Option<String>,
    #[serde(flatten)]
    pub track: SnapshotTrack,
}

#[derive(Debug, Deserialize)]
pub struct SnapshotLiked {
    pub added_at: Option<String>,
    #[serde(flatten)]
    pub track: SnapshotTrack,
}

#[derive(Debug, Deserialize)]
pub struct SnapshotTrack {
    pub id: String,
    pub name: Option<String>,
    #[serde(default)]
    pub artists: Vec<String>,
    pub album: Option<String>,
    pub year: Option<i64>,
    pub isrc: Option<String>,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Default)]
pub struct PullSummary {
    pub playlists_new: usize,
    pub playlists_updated: usize,
    pub playlists_unchanged: usize,
    pub tracks_upserted: usize,
    pub liked_added: usize,
}

fn to_track(raw: &SnapshotTrack, use_year: bool) -> Track {
    let name = raw.name.clone().unwrap_or_default();
    let artist = raw.artists.join(", ");
    let (_, _, mut normalized) = normalize_title_artist(&name, &artist);
    if use_year {
        if let Some(year) = raw.year {
            normalized = format!("{normalized} {year}");
        }
    }
    Track {
        id: raw.id.clone(),
        name,
        artist,
        album: raw.album.clone().filter(|a| !a.is_empty()),
        year: raw.year,
        isrc: raw.isrc.clone().filter(|i| !i.is_empty()),
        duration_ms: raw.duration_ms,
        normalized,
    }
}

/// Ingest the configured snapshot document. `force_refresh` re-processes
/// playlists even when their snapshot id is unchanged (useful after schema
/// additions that need every track re-written).
pub fn pull(store: &Store, config: &Config, force_refresh: bool) -> Result<PullSummary> {
    let snapshot_path = config.provider_snapshot.as_ref().ok_or_else(|| {
        RefrainError::InvalidConfiguration(
            "provider_snapshot is not configured; point it at a provider library snapshot file".to_string(),
        )
    })?;
    let contents = fs::read_to_string(snapshot_path)?;
    let snapshot: Snapshot = serde_json::from_str(&contents)?;
    let provider = snapshot.provider.clone().unwrap_or_else(|| config.provider.clone());
    let use_year = config.matching.use_year;

    let mut summary = PullSummary::default();
    // BTreeSet so the signal is deterministic for a given snapshot.
    let mut changed: BTreeSet<String> = BTreeSet::new();

    if let Some(user) = &snapshot.user {
        if store.get_meta("current_user_id")?.as_deref() != Some(user.id.as_str()) {
            store.set_meta("current_user_id", &user.id)?;
        }
    }

    for playlist in &snapshot.playlists {
        let known = store.get_playlist(&provider, &playlist.id)?.is_some();
        let unchanged = match &playlist.snapshot_id {
            Some(snapshot_id) => !store.playlist_snapshot_changed(&provider, &playlist.id, snapshot_id)?,
            None => false,
        };
        let row = Playlist {
            id: playlist.id.clone(),
            name: playlist.name.clone(),
            snapshot_id: playlist.snapshot_id.clone(),
            owner_id: playlist.owner_id.clone(),
            owner_name: playlist.owner_name.clone(),
        };
        if unchanged && !force_refresh {
            // Keep the metadata fresh even when the track list is skipped.
            store.upsert_playlist(&provider, &row)?;
            summary.playlists_unchanged += 1;
            debug!("[skip] {} - unchanged snapshot", playlist.name);
            continue;
        }

        let mut entries = Vec::with_capacity(playlist.tracks.len());
        for entry in &playlist.tracks {
            store.upsert_track(&provider, &to_track(&entry.track, use_year))?;
            changed.insert(entry.track.id.clone());
            summary.tracks_upserted += 1;
            entries.push(PlaylistEntry { track_id: entry.track.id.clone(), added_at: entry.added_at.clone() });
        }
        store.upsert_playlist(&provider, &row)?;
        store.replace_playlist_tracks(&provider, &playlist.id, &entries)?;
        store.commit()?;
        if known {
            summary.playlists_updated += 1;
        } else {
            summary.playlists_new += 1;
        }
        info!("[pull] {} ({} tracks)", playlist.name, entries.len());
    }

    // Liked tracks: only entries newer than the stored cursor are work.
    let cursor = if force_refresh { None } else { store.get_meta("liked_last_added_at")? };
    let mut max_added_at = cursor.clone();
    for liked in &snapshot.liked {
        if let (Some(cursor), Some(added_at)) = (&cursor, &liked.added_at) {
            // ISO-8601 timestamps compare correctly as strings.
            if added_at <= cursor {
                continue;
            }
        }
        store.upsert_track(&provider, &to_track(&liked.track, use_year))?;
        store.upsert_liked(&provider, &liked.track.id, liked.added_at.as_deref())?;
        changed.insert(liked.track.id.clone());
        summary.liked_added += 1;
        if let Some(added_at) = &liked.added_at {
            if max_added_at.as_ref().map(|m| added_at > m).unwrap_or(true) {
                max_added_at = Some(added_at.clone());
            }
        }
    }
    if let Some(max) = &max_added_at {
        store.set_meta("liked_last_added_at", max)?;
    }

    if !changed.is_empty() {
        let signal: Vec<String> = changed.into_iter().collect();
        store.set_meta("last_pull_changed_tracks", &signal.join(","))?;
    }
    store.set_meta("last_write_epoch", &unix_now().to_string())?;
    store.set_meta("last_write_source", "pull")?;
    store.commit()?;

    info!(
        "pull: {} new, {} updated, {} unchanged playlist(s); {} track upsert(s); {} liked",
        summary.playlists_new,
        summary.playlists_updated,
        summary.playlists_unchanged,
        summary.tracks_upserted,
        summary.liked_added
    );
    Ok(summary)
}
