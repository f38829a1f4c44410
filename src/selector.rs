/// Candidate selection: cheap two-stage pruning of the library file pool
/// before the scoring engine runs. Stage one drops files whose duration is
/// incompatible with the track; stage two caps the pool at the top K by token
/// Jaccard similarity.
use std::collections::HashSet;

use crate::store::{LibraryFile, Track};

/// A library file plus its precomputed token set. Token sets are built once
/// per file at load time; rebuilding them per track would make selection
/// quadratic over the library.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub file: LibraryFile,
    pub tokens: HashSet<String>,
}

impl Candidate {
    pub fn new(file: LibraryFile) -> Candidate {
        let tokens = file.normalized.split_whitespace().map(str::to_string).collect();
        Candidate { file, tokens }
    }
}

pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

pub struct CandidateSelector;

impl CandidateSelector {
    /// Keep candidates whose duration is within `max(4, 2 * tolerance)`
    /// seconds of the track's. Files without a duration are never excluded,
    /// and a track without a duration (or an unset tolerance) disables the
    /// filter entirely.
    pub fn duration_prefilter<'a>(
        &self,
        track: &Track,
        candidates: Vec<&'a Candidate>,
        tolerance: Option<f64>,
    ) -> Vec<&'a Candidate> {
        let tolerance = match tolerance {
            Some(t) => t,
            None => return candidates,
        };
        let target_sec = match track.duration_ms {
            Some(ms) => ms as f64 / 1000.0,
            None => return candidates,
        };
        let window = (tolerance * 2.0).max(4.0);
        candidates
            .into_iter()
            .filter(|c| match c.file.duration {
                None => true,
                Some(d) => (d - target_sec).abs() <= window,
            })
            .collect()
    }

    /// When the pool is larger than `max_candidates`, keep the top K by
    /// Jaccard similarity between the track's and each file's token sets.
    /// Pools at or under the cap are returned unsorted as-is.
    pub fn token_prescore<'a>(
        &self,
        track_tokens: &HashSet<String>,
        candidates: Vec<&'a Candidate>,
        max_candidates: usize,
    ) -> Vec<&'a Candidate> {
        if candidates.len() <= max_candidates {
            return candidates;
        }
        let mut scored: Vec<(f64, &Candidate)> =
            candidates.into_iter().map(|c| (jaccard(track_tokens, &c.tokens), c)).collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(max_candidates);
        scored.into_iter().map(|(_, c)| c).collect()
    }
}
