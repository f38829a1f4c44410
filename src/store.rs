/// The store module encapsulates the embedded SQLite database holding the
/// remote library (tracks, playlists, liked entries), the local file index,
/// the derived matches, and the meta key/value table used for cursors and
/// cross-process change signals.
///
/// Concurrency model: WAL journaling so readers stay live during writes, one
/// writer at a time with a 30 second busy timeout. Writes accumulate in a
/// deferred transaction; callers make them visible with [`Store::commit`].
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::errors::Result;
use crate::scoring::Confidence;

const SCHEMA: &str = include_str!("schema.sql");

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// A remote track as ingested from the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub artist: String,
    pub album: Option<String>,
    pub year: Option<i64>,
    pub isrc: Option<String>,
    pub duration_ms: Option<i64>,
    pub normalized: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub snapshot_id: Option<String>,
    pub owner_id: Option<String>,
    pub owner_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistEntry {
    pub track_id: String,
    pub added_at: Option<String>,
}

/// An indexed audio file on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryFile {
    pub id: i64,
    pub path: String,
    pub size: i64,
    pub mtime: f64,
    pub partial_hash: String,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub year: Option<i64>,
    pub isrc: Option<String>,
    pub duration: Option<f64>,
    pub bitrate_kbps: Option<i64>,
    pub normalized: String,
}

/// Field set for upserting a library file; the row id is assigned by the
/// store and returned from [`Store::upsert_library_file`].
#[derive(Debug, Clone)]
pub struct NewLibraryFile {
    pub path: String,
    pub size: i64,
    pub mtime: f64,
    pub partial_hash: String,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub year: Option<i64>,
    pub isrc: Option<String>,
    pub duration: Option<f64>,
    pub bitrate_kbps: Option<i64>,
    pub normalized: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackMatch {
    pub track_id: String,
    pub file_id: i64,
    pub score: f64,
    pub method: String,
    pub confidence: Confidence,
}

/// One row of a playlist as the exporter and reporter consume it: the entry,
/// its track metadata, and the matched file if any.
#[derive(Debug, Clone)]
pub struct PlaylistDetailRow {
    pub position: i64,
    pub track_id: String,
    pub name: String,
    pub artist: String,
    pub album: Option<String>,
    pub duration_ms: Option<i64>,
    pub file_path: Option<String>,
    pub score: Option<f64>,
    pub confidence: Option<Confidence>,
}

pub struct Store {
    conn: Connection,
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

fn track_from_row(row: &rusqlite::Row) -> rusqlite::Result<Track> {
    Ok(Track {
        id: row.get("id")?,
        name: row.get::<_, Option<String>>("name")?.unwrap_or_default(),
        artist: row.get::<_, Option<String>>("artist")?.unwrap_or_default(),
        album: row.get("album")?,
        year: row.get("year")?,
        isrc: row.get("isrc")?,
        duration_ms: row.get("duration_ms")?,
        normalized: row.get::<_, Option<String>>("normalized")?.unwrap_or_default(),
    })
}

fn file_from_row(row: &rusqlite::Row) -> rusqlite::Result<LibraryFile> {
    Ok(LibraryFile {
        id: row.get("id")?,
        path: row.get("path")?,
        size: row.get::<_, Option<i64>>("size")?.unwrap_or(0),
        mtime: row.get::<_, Option<f64>>("mtime")?.unwrap_or(0.0),
        partial_hash: row.get::<_, Option<String>>("partial_hash")?.unwrap_or_default(),
        title: row.get::<_, Option<String>>("title")?.unwrap_or_default(),
        artist: row.get::<_, Option<String>>("artist")?.unwrap_or_default(),
        album: row.get("album")?,
        year: row.get("year")?,
        isrc: row.get("isrc")?,
        duration: row.get("duration")?,
        bitrate_kbps: row.get("bitrate_kbps")?,
        normalized: row.get::<_, Option<String>>("normalized")?.unwrap_or_default(),
    })
}

impl Store {
    /// Open (and create if necessary) the store at `path`. The schema is
    /// applied idempotently; WAL mode keeps readers live during writes.
    pub fn open(path: &Path) -> Result<Store> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Store { conn })
    }

    // Writes accumulate in a deferred transaction until commit() so that a
    // batch of upserts is atomic and cheap. Readers in this session see their
    // own uncommitted writes.
    fn ensure_txn(&self) -> Result<()> {
        if self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN")?;
        }
        Ok(())
    }

    /// Writer barrier: make all accumulated writes durable and visible to
    /// other connections.
    pub fn commit(&self) -> Result<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Remote side: tracks, playlists, liked entries
    // ------------------------------------------------------------------

    pub fn upsert_track(&self, provider: &str, track: &Track) -> Result<()> {
        self.ensure_txn()?;
        self.conn.execute(
            "INSERT INTO tracks (provider, id, name, artist, album, year, isrc, duration_ms, normalized)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT (provider, id) DO UPDATE SET
                 name = excluded.name, artist = excluded.artist, album = excluded.album,
                 year = excluded.year, isrc = excluded.isrc, duration_ms = excluded.duration_ms,
                 normalized = excluded.normalized",
            params![
                provider,
                track.id,
                track.name,
                track.artist,
                track.album,
                track.year,
                track.isrc,
                track.duration_ms,
                track.normalized
            ],
        )?;
        Ok(())
    }

    pub fn get_track(&self, provider: &str, track_id: &str) -> Result<Option<Track>> {
        let row = self
            .conn
            .query_row(
                "SELECT * FROM tracks WHERE provider = ?1 AND id = ?2",
                params![provider, track_id],
                track_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn all_tracks(&self, provider: &str) -> Result<Vec<Track>> {
        let mut stmt = self.conn.prepare("SELECT * FROM tracks WHERE provider = ?1")?;
        let rows = stmt.query_map(params![provider], track_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn tracks_by_ids(&self, provider: &str, ids: &[String]) -> Result<Vec<Track>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!("SELECT * FROM tracks WHERE provider = ? AND id IN ({})", placeholders(ids.len()));
        let mut stmt = self.conn.prepare(&sql)?;
        let mut args: Vec<&dyn rusqlite::ToSql> = vec![&provider];
        for id in ids {
            args.push(id);
        }
        let rows = stmt.query_map(&args[..], track_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn unmatched_tracks(&self, provider: &str) -> Result<Vec<Track>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.* FROM tracks t
             LEFT JOIN matches m ON m.provider = t.provider AND m.track_id = t.id
             WHERE t.provider = ?1 AND m.track_id IS NULL",
        )?;
        let rows = stmt.query_map(params![provider], track_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn upsert_playlist(&self, provider: &str, playlist: &Playlist) -> Result<()> {
        self.ensure_txn()?;
        self.conn.execute(
            "INSERT INTO playlists (provider, id, name, snapshot_id, owner_id, owner_name)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (provider, id) DO UPDATE SET
                 name = excluded.name, snapshot_id = excluded.snapshot_id,
                 owner_id = excluded.owner_id, owner_name = excluded.owner_name",
            params![provider, playlist.id, playlist.name, playlist.snapshot_id, playlist.owner_id, playlist.owner_name],
        )?;
        Ok(())
    }

    pub fn get_playlist(&self, provider: &str, playlist_id: &str) -> Result<Option<Playlist>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, snapshot_id, owner_id, owner_name FROM playlists WHERE provider = ?1 AND id = ?2",
                params![provider, playlist_id],
                |row| {
                    Ok(Playlist {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        snapshot_id: row.get(2)?,
                        owner_id: row.get(3)?,
                        owner_name: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn all_playlists(&self, provider: &str) -> Result<Vec<Playlist>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, snapshot_id, owner_id, owner_name FROM playlists WHERE provider = ?1 ORDER BY name",
        )?;
        let rows = stmt.query_map(params![provider], |row| {
            Ok(Playlist {
                id: row.get(0)?,
                name: row.get(1)?,
                snapshot_id: row.get(2)?,
                owner_id: row.get(3)?,
                owner_name: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// True when the stored snapshot differs from the given one (or the
    /// playlist is unknown). Ingestion uses this to skip unchanged playlists.
    pub fn playlist_snapshot_changed(&self, provider: &str, playlist_id: &str, snapshot_id: &str) -> Result<bool> {
        let stored: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT snapshot_id FROM playlists WHERE provider = ?1 AND id = ?2",
                params![provider, playlist_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match stored {
            Some(Some(stored)) => stored != snapshot_id,
            _ => true,
        })
    }

    /// Atomically replace the track list of a playlist. Positions are
    /// re-densified to 0..N-1 in entry order regardless of the input.
    pub fn replace_playlist_tracks(&self, provider: &str, playlist_id: &str, entries: &[PlaylistEntry]) -> Result<()> {
        self.ensure_txn()?;
        self.conn.execute(
            "DELETE FROM playlist_tracks WHERE provider = ?1 AND playlist_id = ?2",
            params![provider, playlist_id],
        )?;
        let mut stmt = self.conn.prepare(
            "INSERT INTO playlist_tracks (provider, playlist_id, position, track_id, added_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for (position, entry) in entries.iter().enumerate() {
            stmt.execute(params![provider, playlist_id, position as i64, entry.track_id, entry.added_at])?;
        }
        Ok(())
    }

    pub fn playlist_track_count(&self, provider: &str, playlist_id: &str) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM playlist_tracks WHERE provider = ?1 AND playlist_id = ?2",
            params![provider, playlist_id],
            |row| row.get(0),
        )?)
    }

    pub fn upsert_liked(&self, provider: &str, track_id: &str, added_at: Option<&str>) -> Result<()> {
        self.ensure_txn()?;
        self.conn.execute(
            "INSERT INTO liked_tracks (provider, track_id, added_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (provider, track_id) DO UPDATE SET added_at = excluded.added_at",
            params![provider, track_id, added_at],
        )?;
        Ok(())
    }

    /// The subset of `track_ids` present in the liked table.
    pub fn liked_track_ids(&self, provider: &str, track_ids: &[String]) -> Result<Vec<String>> {
        if track_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT track_id FROM liked_tracks WHERE provider = ? AND track_id IN ({})",
            placeholders(track_ids.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut args: Vec<&dyn rusqlite::ToSql> = vec![&provider];
        for id in track_ids {
            args.push(id);
        }
        let rows = stmt.query_map(&args[..], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ------------------------------------------------------------------
    // Local side: library files
    // ------------------------------------------------------------------

    /// Upsert by canonical path; returns the row id.
    pub fn upsert_library_file(&self, file: &NewLibraryFile) -> Result<i64> {
        self.ensure_txn()?;
        let id = self.conn.query_row(
            "INSERT INTO library_files
                 (path, size, mtime, partial_hash, title, artist, album, year, isrc, duration, bitrate_kbps, normalized)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT (path) DO UPDATE SET
                 size = excluded.size, mtime = excluded.mtime, partial_hash = excluded.partial_hash,
                 title = excluded.title, artist = excluded.artist, album = excluded.album,
                 year = excluded.year, isrc = excluded.isrc, duration = excluded.duration,
                 bitrate_kbps = excluded.bitrate_kbps, normalized = excluded.normalized
             RETURNING id",
            params![
                file.path,
                file.size,
                file.mtime,
                file.partial_hash,
                file.title,
                file.artist,
                file.album,
                file.year,
                file.isrc,
                file.duration,
                file.bitrate_kbps,
                file.normalized
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn get_library_file(&self, id: i64) -> Result<Option<LibraryFile>> {
        let row = self
            .conn
            .query_row("SELECT * FROM library_files WHERE id = ?1", params![id], file_from_row)
            .optional()?;
        Ok(row)
    }

    pub fn file_id_for_path(&self, path: &str) -> Result<Option<i64>> {
        let row = self
            .conn
            .query_row("SELECT id FROM library_files WHERE path = ?1", params![path], |row| row.get(0))
            .optional()?;
        Ok(row)
    }

    pub fn all_library_files(&self) -> Result<Vec<LibraryFile>> {
        let mut stmt = self.conn.prepare("SELECT * FROM library_files ORDER BY id")?;
        let rows = stmt.query_map([], file_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn library_files_by_ids(&self, ids: &[i64]) -> Result<Vec<LibraryFile>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!("SELECT * FROM library_files WHERE id IN ({}) ORDER BY id", placeholders(ids.len()));
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), file_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn unmatched_files(&self, provider: &str) -> Result<Vec<LibraryFile>> {
        let mut stmt = self.conn.prepare(
            "SELECT f.* FROM library_files f
             LEFT JOIN matches m ON m.file_id = f.id AND m.provider = ?1
             WHERE m.file_id IS NULL",
        )?;
        let rows = stmt.query_map(params![provider], file_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Snapshot of every indexed file keyed by canonical path; the scanner
    /// uses this for its cheap in-memory skip checks.
    pub fn library_file_index(&self) -> Result<HashMap<String, LibraryFile>> {
        let mut index = HashMap::new();
        for file in self.all_library_files()? {
            index.insert(file.path.clone(), file);
        }
        Ok(index)
    }

    /// Delete a file row; dependent matches go with it via the foreign key
    /// cascade. Returns whether a row existed.
    pub fn delete_library_file(&self, id: i64) -> Result<bool> {
        self.ensure_txn()?;
        let n = self.conn.execute("DELETE FROM library_files WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    pub fn delete_library_file_by_path(&self, path: &str) -> Result<bool> {
        self.ensure_txn()?;
        let n = self.conn.execute("DELETE FROM library_files WHERE path = ?1", params![path])?;
        Ok(n > 0)
    }

    pub fn count_library_files(&self) -> Result<i64> {
        Ok(self.conn.query_row("SELECT COUNT(*) FROM library_files", [], |row| row.get(0))?)
    }

    // ------------------------------------------------------------------
    // Matches
    // ------------------------------------------------------------------

    pub fn upsert_match(&self, provider: &str, m: &TrackMatch) -> Result<()> {
        self.ensure_txn()?;
        self.conn.execute(
            "INSERT INTO matches (provider, track_id, file_id, score, method, confidence)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (provider, track_id) DO UPDATE SET
                 file_id = excluded.file_id, score = excluded.score,
                 method = excluded.method, confidence = excluded.confidence",
            params![provider, m.track_id, m.file_id, m.score, m.method, m.confidence.as_str()],
        )?;
        Ok(())
    }

    pub fn get_match(&self, provider: &str, track_id: &str) -> Result<Option<TrackMatch>> {
        let row = self
            .conn
            .query_row(
                "SELECT track_id, file_id, score, method, confidence FROM matches
                 WHERE provider = ?1 AND track_id = ?2",
                params![provider, track_id],
                |row| {
                    Ok(TrackMatch {
                        track_id: row.get(0)?,
                        file_id: row.get(1)?,
                        score: row.get(2)?,
                        method: row.get(3)?,
                        confidence: Confidence::parse(&row.get::<_, String>(4)?),
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// The matched file for a track, if any. With at most one match row per
    /// (provider, track) the priority rule is enforced at write time; this is
    /// a plain join.
    pub fn matched_file_for_track(&self, provider: &str, track_id: &str) -> Result<Option<(TrackMatch, LibraryFile)>> {
        let m = match self.get_match(provider, track_id)? {
            Some(m) => m,
            None => return Ok(None),
        };
        match self.get_library_file(m.file_id)? {
            Some(f) => Ok(Some((m, f))),
            None => Ok(None),
        }
    }

    /// Track ids currently pinned by a MANUAL match. Automatic rematching
    /// leaves these alone.
    pub fn manual_track_ids(&self, provider: &str) -> Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT track_id FROM matches WHERE provider = ?1 AND confidence = 'MANUAL'")?;
        let rows = stmt.query_map(params![provider], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<HashSet<_>>>()?)
    }

    /// Delete match rows for the given tracks. `keep_manual` preserves
    /// user-pinned rows; automatic rematch paths always pass true.
    pub fn delete_matches_by_track_ids(&self, provider: &str, track_ids: &[String], keep_manual: bool) -> Result<usize> {
        if track_ids.is_empty() {
            return Ok(0);
        }
        self.ensure_txn()?;
        let manual_clause = if keep_manual { " AND confidence != 'MANUAL'" } else { "" };
        let sql = format!(
            "DELETE FROM matches WHERE provider = ? AND track_id IN ({}){}",
            placeholders(track_ids.len()),
            manual_clause
        );
        let mut args: Vec<&dyn rusqlite::ToSql> = vec![&provider];
        for id in track_ids {
            args.push(id);
        }
        let n = self.conn.execute(&sql, &args[..])?;
        debug!("deleted {n} match rows for {} tracks", track_ids.len());
        Ok(n)
    }

    pub fn delete_matches_by_file_ids(&self, provider: &str, file_ids: &[i64], keep_manual: bool) -> Result<usize> {
        if file_ids.is_empty() {
            return Ok(0);
        }
        self.ensure_txn()?;
        let manual_clause = if keep_manual { " AND confidence != 'MANUAL'" } else { "" };
        let sql = format!(
            "DELETE FROM matches WHERE provider = ? AND file_id IN ({}){}",
            placeholders(file_ids.len()),
            manual_clause
        );
        let mut args: Vec<&dyn rusqlite::ToSql> = vec![&provider];
        for id in file_ids {
            args.push(id);
        }
        let n = self.conn.execute(&sql, &args[..])?;
        Ok(n)
    }

    pub fn delete_match(&self, provider: &str, track_id: &str) -> Result<bool> {
        self.ensure_txn()?;
        let n = self.conn.execute(
            "DELETE FROM matches WHERE provider = ?1 AND track_id = ?2",
            params![provider, track_id],
        )?;
        Ok(n > 0)
    }

    pub fn count_matches(&self, provider: &str) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM matches WHERE provider = ?1", params![provider], |row| row.get(0))?)
    }

    /// Per-tier match counts, highest tier first.
    pub fn match_confidence_tally(&self, provider: &str) -> Result<Vec<(Confidence, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT confidence, COUNT(*) FROM matches WHERE provider = ?1 GROUP BY confidence",
        )?;
        let rows = stmt.query_map(params![provider], |row| {
            Ok((Confidence::parse(&row.get::<_, String>(0)?), row.get::<_, i64>(1)?))
        })?;
        let mut tally = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        tally.sort_by_key(|(confidence, _)| *confidence);
        Ok(tally)
    }

    // ------------------------------------------------------------------
    // Cross-cutting queries
    // ------------------------------------------------------------------

    /// DISTINCT playlist ids containing any of the given tracks. This is what
    /// scopes incremental export and reporting.
    pub fn playlists_containing_tracks(&self, provider: &str, track_ids: &[String]) -> Result<Vec<String>> {
        if track_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT DISTINCT playlist_id FROM playlist_tracks
             WHERE provider = ? AND track_id IN ({})
             ORDER BY playlist_id",
            placeholders(track_ids.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut args: Vec<&dyn rusqlite::ToSql> = vec![&provider];
        for id in track_ids {
            args.push(id);
        }
        let rows = stmt.query_map(&args[..], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Playlist contents in order, joined with track metadata and the matched
    /// file (when one exists).
    pub fn playlist_detail(&self, provider: &str, playlist_id: &str) -> Result<Vec<PlaylistDetailRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT pt.position, t.id, t.name, t.artist, t.album, t.duration_ms,
                    f.path, m.score, m.confidence
             FROM playlist_tracks pt
             JOIN tracks t ON t.provider = pt.provider AND t.id = pt.track_id
             LEFT JOIN matches m ON m.provider = pt.provider AND m.track_id = pt.track_id
             LEFT JOIN library_files f ON f.id = m.file_id
             WHERE pt.provider = ?1 AND pt.playlist_id = ?2
             ORDER BY pt.position",
        )?;
        let rows = stmt.query_map(params![provider, playlist_id], Self::detail_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// The virtual "Liked Songs" playlist, oldest like first.
    pub fn liked_detail(&self, provider: &str) -> Result<Vec<PlaylistDetailRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT ROW_NUMBER() OVER (ORDER BY lt.added_at) - 1, t.id, t.name, t.artist, t.album, t.duration_ms,
                    f.path, m.score, m.confidence
             FROM liked_tracks lt
             JOIN tracks t ON t.provider = lt.provider AND t.id = lt.track_id
             LEFT JOIN matches m ON m.provider = lt.provider AND m.track_id = lt.track_id
             LEFT JOIN library_files f ON f.id = m.file_id
             WHERE lt.provider = ?1
             ORDER BY lt.added_at",
        )?;
        let rows = stmt.query_map(params![provider], Self::detail_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Every track joined with its match row and file path, for the report
    /// summaries. The per-track tuple is `(track, score, confidence, path)`.
    pub fn all_tracks_with_matches(
        &self,
        provider: &str,
    ) -> Result<Vec<(Track, Option<(f64, Confidence, String)>)>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.*, m.score AS m_score, m.confidence AS m_confidence, f.path AS m_path
             FROM tracks t
             LEFT JOIN matches m ON m.provider = t.provider AND m.track_id = t.id
             LEFT JOIN library_files f ON f.id = m.file_id
             WHERE t.provider = ?1
             ORDER BY t.artist, t.album, t.name",
        )?;
        let rows = stmt.query_map(params![provider], |row| {
            let track = track_from_row(row)?;
            let score: Option<f64> = row.get("m_score")?;
            let confidence: Option<String> = row.get("m_confidence")?;
            let path: Option<String> = row.get("m_path")?;
            let matched = match (score, confidence, path) {
                (Some(score), Some(confidence), Some(path)) => Some((score, Confidence::parse(&confidence), path)),
                _ => None,
            };
            Ok((track, matched))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn detail_from_row(row: &rusqlite::Row) -> rusqlite::Result<PlaylistDetailRow> {
        Ok(PlaylistDetailRow {
            position: row.get(0)?,
            track_id: row.get(1)?,
            name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            artist: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            album: row.get(4)?,
            duration_ms: row.get(5)?,
            file_path: row.get(6)?,
            score: row.get(7)?,
            confidence: row.get::<_, Option<String>>(8)?.map(|c| Confidence::parse(&c)),
        })
    }

    pub fn count_tracks(&self, provider: &str) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM tracks WHERE provider = ?1", params![provider], |row| row.get(0))?)
    }

    pub fn count_playlists(&self, provider: &str) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM playlists WHERE provider = ?1", params![provider], |row| row.get(0))?)
    }

    pub fn count_liked(&self, provider: &str) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM liked_tracks WHERE provider = ?1", params![provider], |row| {
                row.get(0)
            })?)
    }

    // ------------------------------------------------------------------
    // Meta
    // ------------------------------------------------------------------

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.ensure_txn()?;
        self.conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let row = self
            .conn
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(row)
    }

    pub fn delete_meta(&self, key: &str) -> Result<()> {
        self.ensure_txn()?;
        self.conn.execute("DELETE FROM meta WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// `last_scan_time` is monotonic over the life of the store; a stale
    /// timestamp never overwrites a newer one.
    pub fn bump_last_scan_time(&self, ts: f64) -> Result<()> {
        let existing = self
            .get_meta("last_scan_time")?
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.0);
        if ts > existing {
            self.set_meta("last_scan_time", &ts.to_string())?;
        }
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        // Mirror of close(): finalize any pending transaction so a dropped
        // session never leaves the database mid-write.
        if !self.conn.is_autocommit() {
            let _ = self.conn.execute_batch("COMMIT");
        }
    }
}
