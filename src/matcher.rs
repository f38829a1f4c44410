/// Match orchestration: runs the candidate selector and scoring engine over
/// remote tracks and library files, and persists the winning pairs.
///
/// Three entry points cover the rebuild shapes the pipeline needs: a full
/// pass over every track, a pass scoped to a set of changed tracks, and the
/// inverted pass over a set of changed files. All of them preserve MANUAL
/// matches and finish with a single commit.
use std::collections::HashSet;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::Config;
use crate::errors::Result;
use crate::scoring::{evaluate_pair, Confidence, ScoreBreakdown, ScoringConfig};
use crate::selector::{Candidate, CandidateSelector};
use crate::store::{Store, Track, TrackMatch};

/// Below this many tracks the parallel fan-out costs more than it saves.
const PARALLEL_THRESHOLD: usize = 50;

#[derive(Debug, Default)]
pub struct MatchOutcome {
    pub processed: usize,
    pub matched: usize,
    pub matched_track_ids: Vec<String>,
}

/// The scoring-side knobs, split from the matcher so track evaluation can run
/// on worker threads without borrowing the store.
struct MatchParams {
    scoring: ScoringConfig,
    duration_tolerance: Option<f64>,
    max_candidates: usize,
}

fn best_for_track(track: &Track, pool: &[Candidate], params: &MatchParams) -> Option<(i64, ScoreBreakdown)> {
    let selector = CandidateSelector;
    let mut candidates: Vec<&Candidate> =
        selector.duration_prefilter(track, pool.iter().collect(), params.duration_tolerance);
    if candidates.is_empty() {
        // An over-strict prefilter must not drop the track entirely.
        candidates = pool.iter().collect();
    }
    let track_tokens: HashSet<String> = track.normalized.split_whitespace().map(str::to_string).collect();
    let candidates = selector.token_prescore(&track_tokens, candidates, params.max_candidates);

    let mut best: Option<(i64, ScoreBreakdown)> = None;
    for candidate in candidates {
        let breakdown = evaluate_pair(track, &candidate.file, &params.scoring);
        if breakdown.confidence == Confidence::Rejected {
            continue;
        }
        let better = match &best {
            None => true,
            Some((best_id, best_breakdown)) => {
                breakdown.raw_score > best_breakdown.raw_score
                    || (breakdown.raw_score == best_breakdown.raw_score && candidate.file.id < *best_id)
            }
        };
        let certain = breakdown.confidence == Confidence::Certain;
        if better {
            best = Some((candidate.file.id, breakdown));
        }
        if certain {
            break;
        }
    }
    best
}

pub struct Matcher<'a> {
    store: &'a Store,
    provider: String,
    params: MatchParams,
    progress_interval: usize,
}

impl<'a> Matcher<'a> {
    pub fn new(store: &'a Store, config: &Config) -> Matcher<'a> {
        Matcher {
            store,
            provider: config.provider.clone(),
            params: MatchParams {
                scoring: ScoringConfig::default(),
                duration_tolerance: config.matching.duration_tolerance,
                max_candidates: config.matching.max_candidates_per_track,
            },
            progress_interval: 100,
        }
    }

    fn load_pool(&self) -> Result<Vec<Candidate>> {
        Ok(self.store.all_library_files()?.into_iter().map(Candidate::new).collect())
    }

    fn persist(&self, track_id: &str, file_id: i64, breakdown: &ScoreBreakdown) -> Result<()> {
        self.store.upsert_match(
            &self.provider,
            &TrackMatch {
                track_id: track_id.to_string(),
                file_id,
                score: (breakdown.raw_score / 100.0).clamp(0.0, 1.0),
                method: format!("score:{}", breakdown.confidence.as_str().to_lowercase()),
                confidence: breakdown.confidence,
            },
        )
    }

    fn log_tally(&self) -> Result<()> {
        let tally = self.store.match_confidence_tally(&self.provider)?;
        if !tally.is_empty() {
            let summary: Vec<String> =
                tally.iter().map(|(confidence, n)| format!("{n} {}", confidence.as_str().to_lowercase())).collect();
            info!("confidence: {}", summary.join(", "));
        }
        Ok(())
    }

    /// Evaluate `tracks` against `pool` and persist the winners. Evaluation
    /// fans out with rayon above [`PARALLEL_THRESHOLD`]; persistence always
    /// goes through this session's single writer.
    fn run(&self, tracks: &[Track], pool: &[Candidate]) -> Result<MatchOutcome> {
        let start = Instant::now();
        let mut outcome = MatchOutcome::default();
        if tracks.is_empty() || pool.is_empty() {
            debug!("no tracks or files to match");
            return Ok(outcome);
        }

        // The store (and with it `self`) must not cross into the rayon pool;
        // only the scoring params and the read-only slices go over.
        let params = &self.params;
        let evaluations: Vec<(usize, Option<(i64, ScoreBreakdown)>)> = if tracks.len() < PARALLEL_THRESHOLD {
            tracks.iter().enumerate().map(|(i, t)| (i, best_for_track(t, pool, params))).collect()
        } else {
            tracks.par_iter().enumerate().map(|(i, t)| (i, best_for_track(t, pool, params))).collect()
        };

        for (i, evaluation) in evaluations {
            outcome.processed += 1;
            if let Some((file_id, breakdown)) = evaluation {
                let track_id = &tracks[i].id;
                self.persist(track_id, file_id, &breakdown)?;
                outcome.matched += 1;
                outcome.matched_track_ids.push(track_id.clone());
            }
            if outcome.processed % self.progress_interval == 0 {
                info!(
                    "matched {}/{} tracks ({} with a match) in {:.1?}",
                    outcome.processed,
                    tracks.len(),
                    outcome.matched,
                    start.elapsed()
                );
            }
        }

        self.store.commit()?;
        let rate = outcome.matched as f64 / tracks.len() as f64 * 100.0;
        info!("matched {}/{} tracks ({rate:.1}%) in {:.2?}", outcome.matched, tracks.len(), start.elapsed());
        self.log_tally()?;
        Ok(outcome)
    }

    /// Match every remote track against the whole library. Tracks pinned by a
    /// MANUAL match are left untouched.
    pub fn match_all(&self) -> Result<MatchOutcome> {
        let manual = self.store.manual_track_ids(&self.provider)?;
        let tracks: Vec<Track> =
            self.store.all_tracks(&self.provider)?.into_iter().filter(|t| !manual.contains(&t.id)).collect();
        let pool = self.load_pool()?;
        info!("matching {} tracks against {} library files", tracks.len(), pool.len());
        self.run(&tracks, &pool)
    }

    /// Match a specific set of changed tracks (their stale automatic matches
    /// are dropped first), or every currently unmatched track when no ids are
    /// given.
    pub fn match_tracks(&self, track_ids: Option<&[String]>) -> Result<MatchOutcome> {
        let manual = self.store.manual_track_ids(&self.provider)?;
        let tracks: Vec<Track> = match track_ids {
            Some(ids) if !ids.is_empty() => {
                self.store.delete_matches_by_track_ids(&self.provider, ids, true)?;
                self.store
                    .tracks_by_ids(&self.provider, ids)?
                    .into_iter()
                    .filter(|t| !manual.contains(&t.id))
                    .collect()
            }
            _ => self.store.unmatched_tracks(&self.provider)?,
        };
        let pool = self.load_pool()?;
        info!("incrementally matching {} track(s) against {} library files", tracks.len(), pool.len());
        self.run(&tracks, &pool)
    }

    /// Inverted pass for the watcher: every track is evaluated, but only
    /// against the given files. Stale automatic matches referencing those
    /// files are dropped first. An existing better match from an untouched
    /// file always wins over a weaker score from a changed one.
    pub fn match_files(&self, file_ids: &[i64]) -> Result<MatchOutcome> {
        let start = Instant::now();
        let mut outcome = MatchOutcome::default();
        if file_ids.is_empty() {
            return Ok(outcome);
        }
        let pool: Vec<Candidate> =
            self.store.library_files_by_ids(file_ids)?.into_iter().map(Candidate::new).collect();
        self.store.delete_matches_by_file_ids(&self.provider, file_ids, true)?;
        if pool.is_empty() {
            self.store.commit()?;
            return Ok(outcome);
        }

        let manual = self.store.manual_track_ids(&self.provider)?;
        let tracks: Vec<Track> =
            self.store.all_tracks(&self.provider)?.into_iter().filter(|t| !manual.contains(&t.id)).collect();
        info!("incrementally matching {} changed file(s) against {} tracks", pool.len(), tracks.len());

        let params = &self.params;
        let evaluations: Vec<(usize, Option<(i64, ScoreBreakdown)>)> = if tracks.len() < PARALLEL_THRESHOLD {
            tracks.iter().enumerate().map(|(i, t)| (i, best_for_track(t, &pool, params))).collect()
        } else {
            tracks.par_iter().enumerate().map(|(i, t)| (i, best_for_track(t, &pool, params))).collect()
        };

        for (i, evaluation) in evaluations {
            outcome.processed += 1;
            let (file_id, breakdown) = match evaluation {
                Some(found) => found,
                None => continue,
            };
            let track_id = &tracks[i].id;
            // The changed file only takes the slot if it beats the track's
            // surviving match (higher score, lower file id on ties).
            let replace = match self.store.get_match(&self.provider, track_id)? {
                None => true,
                Some(existing) => {
                    let new_score = (breakdown.raw_score / 100.0).clamp(0.0, 1.0);
                    new_score > existing.score || (new_score == existing.score && file_id < existing.file_id)
                }
            };
            if replace {
                self.persist(track_id, file_id, &breakdown)?;
                outcome.matched += 1;
                outcome.matched_track_ids.push(track_id.clone());
            }
        }

        self.store.commit()?;
        info!(
            "found {} match(es) from {} changed file(s) in {:.2?}",
            outcome.matched,
            file_ids.len(),
            start.elapsed()
        );
        self.log_tally()?;
        Ok(outcome)
    }
}
