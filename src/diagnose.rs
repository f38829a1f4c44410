/// Troubleshooting and manual-match management: explain why a track did or
/// did not match, pin a match by hand, or clear one.
use crate::common::unix_now;
use crate::errors::{RefrainExpectedError, Result};
use crate::scoring::{token_set_ratio, Confidence};
use crate::store::{LibraryFile, Store, TrackMatch};

#[derive(Debug)]
pub struct DiagnosticReport {
    pub track: crate::store::Track,
    pub matched: Option<(TrackMatch, LibraryFile)>,
    /// The closest candidates by token-set ratio (0..=1), best first. Empty
    /// when the track is already matched.
    pub closest: Vec<(LibraryFile, f64)>,
    pub total_files: i64,
}

/// Explain a track's match status. Unknown track ids are a user-visible
/// error; nothing in the store is touched.
pub fn diagnose_track(store: &Store, provider: &str, track_id: &str, top_n: usize) -> Result<DiagnosticReport> {
    let track = store
        .get_track(provider, track_id)?
        .ok_or(RefrainExpectedError::TrackDoesNotExist { id: track_id.to_string() })?;
    let total_files = store.count_library_files()?;

    if let Some(matched) = store.matched_file_for_track(provider, track_id)? {
        return Ok(DiagnosticReport { track, matched: Some(matched), closest: Vec::new(), total_files });
    }

    let mut scored: Vec<(LibraryFile, f64)> = Vec::new();
    if !track.normalized.is_empty() {
        for file in store.all_library_files()? {
            if file.normalized.is_empty() {
                continue;
            }
            let ratio = token_set_ratio(&track.normalized, &file.normalized) / 100.0;
            scored.push((file, ratio));
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_n);
    }

    Ok(DiagnosticReport { track, matched: None, closest: scored, total_files })
}

/// Pin a match by hand. MANUAL matches survive every automatic re-match; only
/// [`remove_match`] clears them. Both sides must exist.
pub fn set_manual_match(store: &Store, provider: &str, track_id: &str, file_id: i64) -> Result<()> {
    if store.get_track(provider, track_id)?.is_none() {
        return Err(RefrainExpectedError::TrackDoesNotExist { id: track_id.to_string() }.into());
    }
    if store.get_library_file(file_id)?.is_none() {
        return Err(RefrainExpectedError::FileDoesNotExist { id: file_id }.into());
    }
    store.upsert_match(
        provider,
        &TrackMatch {
            track_id: track_id.to_string(),
            file_id,
            score: 1.0,
            method: "manual".to_string(),
            confidence: Confidence::Manual,
        },
    )?;
    store.set_meta("last_write_epoch", &unix_now().to_string())?;
    store.set_meta("last_write_source", "manual")?;
    store.commit()?;
    Ok(())
}

/// Remove a track's match row (manual or automatic). Returns whether a row
/// existed. Unknown tracks are a user-visible error with no store mutation.
pub fn remove_match(store: &Store, provider: &str, track_id: &str) -> Result<bool> {
    if store.get_track(provider, track_id)?.is_none() {
        return Err(RefrainExpectedError::TrackDoesNotExist { id: track_id.to_string() }.into());
    }
    let removed = store.delete_match(provider, track_id)?;
    if removed {
        store.set_meta("last_write_epoch", &unix_now().to_string())?;
        store.set_meta("last_write_source", "manual")?;
    }
    store.commit()?;
    Ok(removed)
}
