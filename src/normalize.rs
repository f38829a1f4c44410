/// Token normalization for matching. Everything the matcher compares goes
/// through here first: titles, artists and albums are reduced to a sorted,
/// stopword-free bag of ascii tokens so that "Beatles, The" and "The Beatles"
/// (or a remastered title and its clean original) land on the same string.
use std::collections::HashMap;
use std::sync::Mutex;

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

lazy_static::lazy_static! {
    static ref FEAT_REGEX: Regex = Regex::new(r"(?i)\b(?:featuring|feat|ft)\b\.?").unwrap();
    // Catches "2011 Remaster", "(Remastered 2011)", "- Remaster", "Mono",
    // "Stereo Version" and friends, with any paren/bracket/dash lead-in.
    static ref REMASTER_REGEX: Regex = Regex::new(
        r"(?ix)
        (?:
            [\(\[\-\s]+
            (?:
                (?:19|20)\d{2}\s*remaster(?:ed)?
              | remaster(?:ed)?(?:\s*(?:19|20)\d{2})?
              | mono\s*version | stereo\s*version | mono | stereo
            )
            [\)\]]*
        )
        "
    )
    .unwrap();
    static ref VERSION_REGEX: Regex = Regex::new(
        r"(?i)\b(radio|album|single|extended|live|acoustic|remix|mix|edit|version|demo|deluxe|bonus|explicit|clean|instrumental)\b"
    )
    .unwrap();
    static ref BRACKET_REGEX: Regex = Regex::new(r"[\[\](){}]").unwrap();
    static ref TRAILING_FEAT_REGEX: Regex = Regex::new(r"feat\..*").unwrap();
    static ref PUNCT_REGEX: Regex = Regex::new(r"[\s\-_.]+").unwrap();
    static ref NON_ALNUM_REGEX: Regex = Regex::new(r"[^a-z0-9 ]+").unwrap();
}

const STOPWORDS: &[&str] = &["the", "a", "an", "and", "or", "of", "in", "on", "at", "to", "for", "with", "from"];

const CACHE_CAPACITY: usize = 8192;

static CACHE: Lazy<Mutex<HashMap<String, String>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn normalize_token_uncached(s: &str) -> String {
    let s = s.to_lowercase();
    let s = s.trim();

    // Compatibility decomposition, then drop combining marks (accents).
    let s: String = s.nfkd().filter(|c| !is_combining_mark(*c)).collect();

    let s = FEAT_REGEX.replace_all(&s, "");
    let s = REMASTER_REGEX.replace_all(&s, "");
    let s = VERSION_REGEX.replace_all(&s, "");
    let s = BRACKET_REGEX.replace_all(&s, " ");
    let s = TRAILING_FEAT_REGEX.replace_all(&s, "");
    let s = PUNCT_REGEX.replace_all(&s, " ");
    let s = NON_ALNUM_REGEX.replace_all(&s, "");

    let mut tokens: Vec<&str> = s.split_whitespace().filter(|t| !STOPWORDS.contains(t)).collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Normalize a single string into its canonical token bag. Memoized in a
/// bounded cache: tag values repeat heavily across a library (artist and
/// album names especially), so the hit rate is high during scans.
pub fn normalize_token(s: &str) -> String {
    {
        let cache = CACHE.lock().unwrap();
        if let Some(hit) = cache.get(s) {
            return hit.clone();
        }
    }
    let computed = normalize_token_uncached(s);
    let mut cache = CACHE.lock().unwrap();
    if cache.len() >= CACHE_CAPACITY {
        cache.clear();
    }
    cache.insert(s.to_string(), computed.clone());
    computed
}

/// Normalize a title/artist pair. Returns `(norm_title, norm_artist, combo)`
/// where `combo` is the artist tokens followed by the title tokens; the combo
/// is what gets persisted in the `normalized` columns.
pub fn normalize_title_artist(title: &str, artist: &str) -> (String, String, String) {
    let nt = normalize_token(title);
    let na = normalize_token(artist);
    let combo = format!("{na} {nt}").trim().to_string();
    (nt, na, combo)
}
