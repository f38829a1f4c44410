/// The scoring engine evaluates one remote track against one library file and
/// produces a weighted score with a confidence tier. It is a pure function of
/// its inputs: no store access, no IO, no failure modes. Missing metadata
/// degrades into penalties instead of errors.
use std::collections::BTreeSet;

use regex::Regex;

use crate::normalize::normalize_token;
use crate::store::{LibraryFile, Track};

/// Match confidence tiers. MANUAL marks user-pinned matches and is never
/// produced by the scorer; REJECTED means "do not persist a match".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Confidence {
    Manual,
    Certain,
    High,
    Medium,
    Low,
    Rejected,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Manual => "MANUAL",
            Confidence::Certain => "CERTAIN",
            Confidence::High => "HIGH",
            Confidence::Medium => "MEDIUM",
            Confidence::Low => "LOW",
            Confidence::Rejected => "REJECTED",
        }
    }

    /// Lenient parse for values read back from the store; anything unknown is
    /// treated as the lowest acceptable tier.
    pub fn parse(s: &str) -> Confidence {
        match s.to_uppercase().as_str() {
            "MANUAL" => Confidence::Manual,
            "CERTAIN" => Confidence::Certain,
            "HIGH" => Confidence::High,
            "MEDIUM" => Confidence::Medium,
            "LOW" => Confidence::Low,
            _ => Confidence::Rejected,
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Weights, penalties and thresholds for [`evaluate_pair`]. The defaults are
/// contracts, not incidental values; tests pin them.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    // fuzzy thresholds, on the 0..=100 ratio scale
    pub min_title_ratio: f64,
    pub strong_title_ratio: f64,
    pub min_artist_ratio: f64,
    pub min_album_fuzzy_ratio: f64,
    // duration tolerances (seconds)
    pub tight_duration: i64,
    pub loose_duration: i64,
    // score weights
    pub weight_title_exact: f64,
    pub weight_title_fuzzy_max: f64,
    pub weight_artist_exact: f64,
    pub weight_artist_fuzzy: f64,
    pub weight_album_exact: f64,
    pub weight_album_fuzzy: f64,
    pub weight_year: f64,
    pub weight_duration_tight: f64,
    pub weight_duration_loose: f64,
    pub weight_isrc: f64,
    // penalties
    pub penalty_album_missing_local: f64,
    pub penalty_album_missing_remote: f64,
    pub penalty_year_missing: f64,
    pub penalty_variant_mismatch: f64,
    pub penalty_complete_metadata_missing: f64,
    // confidence thresholds
    pub confidence_certain_threshold: f64,
    pub confidence_high_threshold: f64,
    pub confidence_medium_threshold: f64,
    pub min_accept_score: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        ScoringConfig {
            min_title_ratio: 88.0,
            strong_title_ratio: 96.0,
            min_artist_ratio: 92.0,
            min_album_fuzzy_ratio: 95.0,
            tight_duration: 2,
            loose_duration: 4,
            weight_title_exact: 45.0,
            weight_title_fuzzy_max: 30.0,
            weight_artist_exact: 30.0,
            weight_artist_fuzzy: 20.0,
            weight_album_exact: 18.0,
            weight_album_fuzzy: 12.0,
            weight_year: 6.0,
            weight_duration_tight: 6.0,
            weight_duration_loose: 3.0,
            weight_isrc: 15.0,
            penalty_album_missing_local: 8.0,
            penalty_album_missing_remote: 5.0,
            penalty_year_missing: 4.0,
            penalty_variant_mismatch: 6.0,
            penalty_complete_metadata_missing: 15.0,
            confidence_certain_threshold: 95.0,
            confidence_high_threshold: 82.0,
            confidence_medium_threshold: 78.0,
            min_accept_score: 65.0,
        }
    }
}

/// The diagnostic surface of one evaluation: the raw score, the tier, which
/// signals matched, and a note for every contribution and penalty that fired.
#[derive(Debug, Clone)]
pub struct ScoreBreakdown {
    pub raw_score: f64,
    pub confidence: Confidence,
    pub matched_title: bool,
    pub matched_artist: bool,
    pub matched_album: bool,
    pub matched_year: bool,
    pub matched_isrc: bool,
    pub duration_diff: Option<i64>,
    pub title_ratio: Option<f64>,
    pub artist_ratio: Option<f64>,
    pub notes: Vec<String>,
}

lazy_static::lazy_static! {
    // Raw-title variant detection. Normalization strips these keywords, so the
    // mismatch check runs against the original strings.
    static ref VARIANT_REGEX: Regex = Regex::new(
        r"(?i)\b(?:live|remix|acoustic|edit|mix|version|demo|remaster(?:ed)?|instrumental|radio|explicit|clean|deluxe|bonus|extended|unplugged)\b"
    )
    .unwrap();
}

/// Whether a raw title carries a variant keyword (whole-word, anywhere in the
/// string, including inside parentheses or brackets).
pub fn has_variant(title: &str) -> bool {
    !title.is_empty() && VARIANT_REGEX.is_match(title)
}

fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b) * 100.0
}

fn join_nonempty(a: &str, b: &str) -> String {
    if a.is_empty() {
        b.to_string()
    } else if b.is_empty() {
        a.to_string()
    } else {
        format!("{a} {b}")
    }
}

/// Token-set similarity on the 0..=100 scale: split both strings into token
/// sets, then compare the intersection against each side's remainder. A
/// non-empty subset relation scores 100.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let ta: BTreeSet<&str> = a.split_whitespace().collect();
    let tb: BTreeSet<&str> = b.split_whitespace().collect();
    if ta.is_empty() && tb.is_empty() {
        return 0.0;
    }
    let sect: Vec<&str> = ta.intersection(&tb).copied().collect();
    let diff_ab: Vec<&str> = ta.difference(&tb).copied().collect();
    let diff_ba: Vec<&str> = tb.difference(&ta).copied().collect();
    if !sect.is_empty() && (diff_ab.is_empty() || diff_ba.is_empty()) {
        return 100.0;
    }
    let s_sect = sect.join(" ");
    let s1 = join_nonempty(&s_sect, &diff_ab.join(" "));
    let s2 = join_nonempty(&s_sect, &diff_ba.join(" "));
    similarity(&s_sect, &s1).max(similarity(&s_sect, &s2)).max(similarity(&s1, &s2))
}

fn clean_isrc(isrc: Option<&str>) -> Option<String> {
    let cleaned = isrc?.trim().to_lowercase();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Score one remote track against one library file.
pub fn evaluate_pair(remote: &Track, local: &LibraryFile, cfg: &ScoringConfig) -> ScoreBreakdown {
    let mut notes: Vec<String> = Vec::new();

    let r_title = remote.name.as_str();
    // A file with no usable title falls back to its path so the fuzzy pass
    // still has something to chew on.
    let l_title = if local.title.is_empty() { local.path.as_str() } else { local.title.as_str() };
    let r_artist = remote.artist.as_str();
    let l_artist = local.artist.as_str();

    let r_album = remote.album.as_deref().filter(|a| !a.is_empty());
    let l_album = local.album.as_deref().filter(|a| !a.is_empty());

    let r_isrc = clean_isrc(remote.isrc.as_deref());
    let l_isrc = clean_isrc(local.isrc.as_deref());

    let duration_diff: Option<i64> = match (remote.duration_ms, local.duration) {
        (Some(ms), Some(sec)) => Some((ms as f64 / 1000.0 - sec).abs() as i64),
        _ => None,
    };

    let r_title_norm = normalize_token(r_title);
    let l_title_norm = normalize_token(l_title);
    let r_artist_norm = normalize_token(r_artist);
    let l_artist_norm = normalize_token(l_artist);
    let r_album_norm = r_album.map(normalize_token);
    let l_album_norm = l_album.map(normalize_token);

    let mut raw_score = 0.0;
    let mut matched_title = false;
    let mut matched_artist = false;
    let mut matched_album = false;
    let mut matched_year = false;
    let mut matched_isrc = false;
    let mut title_ratio = None;
    let mut artist_ratio = None;

    // Title
    if !r_title_norm.is_empty() && !l_title_norm.is_empty() {
        if r_title_norm == l_title_norm {
            raw_score += cfg.weight_title_exact;
            matched_title = true;
            notes.push("title_exact".to_string());
        } else {
            let ratio = token_set_ratio(&r_title_norm, &l_title_norm);
            title_ratio = Some(ratio);
            if ratio >= cfg.min_title_ratio {
                matched_title = true;
                // Scale the fuzzy weight linearly across min..strong.
                let span = (cfg.strong_title_ratio - cfg.min_title_ratio).max(1.0);
                let scaled = (ratio.min(cfg.strong_title_ratio) - cfg.min_title_ratio) / span;
                raw_score += scaled * cfg.weight_title_fuzzy_max;
                notes.push(format!("title_fuzzy:{ratio:.0}"));
            } else {
                notes.push(format!("title_no_match:{ratio:.0}"));
            }
        }
    }

    // Artist
    if !r_artist_norm.is_empty() && !l_artist_norm.is_empty() {
        if r_artist_norm == l_artist_norm {
            raw_score += cfg.weight_artist_exact;
            matched_artist = true;
            notes.push("artist_exact".to_string());
        } else {
            let ratio = token_set_ratio(&r_artist_norm, &l_artist_norm);
            artist_ratio = Some(ratio);
            if ratio >= cfg.min_artist_ratio {
                matched_artist = true;
                raw_score += cfg.weight_artist_fuzzy;
                notes.push(format!("artist_fuzzy:{ratio:.0}"));
            } else {
                notes.push(format!("artist_no_match:{ratio:.0}"));
            }
        }
    }

    // Album: presence is judged on the original strings, not the normalized
    // forms, so a generic name that normalizes to nothing is not a "missing"
    // album.
    match (r_album, l_album) {
        (Some(_), Some(_)) => {
            let rn = r_album_norm.as_deref().unwrap_or("");
            let ln = l_album_norm.as_deref().unwrap_or("");
            if (rn.is_empty() && ln.is_empty()) || (!rn.is_empty() && rn == ln) {
                raw_score += cfg.weight_album_exact;
                matched_album = true;
                notes.push("album_exact".to_string());
            } else if !rn.is_empty() && !ln.is_empty() {
                let ratio = token_set_ratio(rn, ln);
                if ratio >= cfg.min_album_fuzzy_ratio {
                    matched_album = true;
                    raw_score += cfg.weight_album_fuzzy;
                    notes.push(format!("album_fuzzy:{ratio:.0}"));
                } else {
                    notes.push(format!("album_mismatch:{ratio:.0}"));
                }
            } else {
                // One side normalized to nothing (descriptor-only album name);
                // treat as a fuzzy match.
                matched_album = true;
                raw_score += cfg.weight_album_fuzzy;
                notes.push("album_norm_empty_match".to_string());
            }
        }
        (r, l) => {
            if l.is_none() {
                raw_score -= cfg.penalty_album_missing_local;
                notes.push("penalty_album_missing_local".to_string());
            }
            if r.is_none() {
                raw_score -= cfg.penalty_album_missing_remote;
                notes.push("penalty_album_missing_remote".to_string());
            }
        }
    }

    // Year: equal or off-by-one counts (re-releases drift by a year).
    match (remote.year, local.year) {
        (Some(ry), Some(ly)) => {
            if (ry - ly).abs() <= 1 {
                raw_score += cfg.weight_year;
                matched_year = true;
                notes.push("year_match".to_string());
            } else {
                notes.push("year_mismatch".to_string());
            }
        }
        (r, l) => {
            if r.is_none() {
                raw_score -= cfg.penalty_year_missing;
                notes.push("penalty_year_missing_remote".to_string());
            }
            if l.is_none() {
                raw_score -= cfg.penalty_year_missing;
                notes.push("penalty_year_missing_local".to_string());
            }
        }
    }

    // Items missing album and year on both sides carry too little metadata to
    // trust; demote them once.
    if r_album.is_none() && l_album.is_none() && remote.year.is_none() && local.year.is_none() {
        raw_score -= cfg.penalty_complete_metadata_missing;
        notes.push("penalty_all_metadata_missing".to_string());
    }

    // Duration
    if let Some(diff) = duration_diff {
        if diff <= cfg.tight_duration {
            raw_score += cfg.weight_duration_tight;
            notes.push("duration_tight".to_string());
        } else if diff <= cfg.loose_duration {
            raw_score += cfg.weight_duration_loose;
            notes.push("duration_loose".to_string());
        } else {
            notes.push(format!("duration_far:{diff}"));
        }
    }

    // ISRC
    if let (Some(r), Some(l)) = (&r_isrc, &l_isrc) {
        if r == l {
            raw_score += cfg.weight_isrc;
            matched_isrc = true;
            notes.push("isrc_match".to_string());
        }
    }

    // Variant mismatch: one side a live/remix/remaster/etc. rendition, the
    // other not. Checked on the raw titles because normalization strips the
    // keywords.
    if !r_title.is_empty() && !l_title.is_empty() && has_variant(r_title) != has_variant(l_title) {
        raw_score -= cfg.penalty_variant_mismatch;
        notes.push("penalty_variant_mismatch".to_string());
    }

    // A pair that matches on every signal is certain no matter what the
    // arithmetic says.
    let confidence = if matched_title && matched_artist && matched_album && matched_year && matched_isrc {
        Confidence::Certain
    } else if raw_score >= cfg.confidence_certain_threshold {
        Confidence::Certain
    } else if raw_score >= cfg.confidence_high_threshold {
        Confidence::High
    } else if raw_score >= cfg.confidence_medium_threshold {
        Confidence::Medium
    } else if raw_score >= cfg.min_accept_score {
        Confidence::Low
    } else {
        Confidence::Rejected
    };

    ScoreBreakdown {
        raw_score,
        confidence,
        matched_title,
        matched_artist,
        matched_album,
        matched_year,
        matched_isrc,
        duration_diff,
        title_ratio,
        artist_ratio,
        notes,
    }
}
