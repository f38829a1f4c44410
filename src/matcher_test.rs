use crate::matcher::Matcher;
use crate::scoring::Confidence;
use crate::store::{Store, TrackMatch};
use crate::testing::{self, local_file, remote_track};

fn seeded() -> (crate::config::Config, Store, tempfile::TempDir) {
    let (config, temp) = testing::config();
    let store = testing::store(&config);
    (config, store, temp)
}

#[test]
fn test_match_all_finds_best_candidates() {
    let (config, store, _temp) = seeded();
    store
        .upsert_track(
            "spotify",
            &remote_track("t1", "Paranoid Android", "Radiohead", Some("OK Computer"), Some(1997), None, Some(387_000)),
        )
        .unwrap();
    let good = store
        .upsert_library_file(&local_file(
            "/m/ok/02.mp3",
            "Paranoid Android",
            "Radiohead",
            Some("OK Computer"),
            Some(1997),
            None,
            Some(387.0),
        ))
        .unwrap();
    store
        .upsert_library_file(&local_file("/m/other.mp3", "Something Else", "Nobody", None, None, None, Some(100.0)))
        .unwrap();
    store.commit().unwrap();

    let outcome = Matcher::new(&store, &config).match_all().unwrap();
    assert_eq!(outcome.matched, 1);
    assert_eq!(outcome.matched_track_ids, vec!["t1".to_string()]);

    let m = store.get_match("spotify", "t1").unwrap().unwrap();
    assert_eq!(m.file_id, good);
    assert!(m.score > 0.9);
    assert_eq!(m.confidence, Confidence::Certain);
    assert!(m.method.starts_with("score:"));
}

#[test]
fn test_match_all_is_idempotent() {
    let (config, store, _temp) = seeded();
    store
        .upsert_track("spotify", &remote_track("t1", "Song", "Artist", Some("Album"), Some(2020), None, Some(180_000)))
        .unwrap();
    store
        .upsert_library_file(&local_file("/m/song.mp3", "Song", "Artist", Some("Album"), Some(2020), None, Some(180.0)))
        .unwrap();
    store.commit().unwrap();

    let matcher = Matcher::new(&store, &config);
    matcher.match_all().unwrap();
    let first = store.get_match("spotify", "t1").unwrap().unwrap();
    matcher.match_all().unwrap();
    let second = store.get_match("spotify", "t1").unwrap().unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_rejected_candidates_never_persist() {
    let (config, store, _temp) = seeded();
    store.upsert_track("spotify", &remote_track("t1", "Some Song", "Somebody", None, None, None, None)).unwrap();
    store
        .upsert_library_file(&local_file("/m/x.mp3", "Entirely Different", "Another Artist", None, None, None, None))
        .unwrap();
    store.commit().unwrap();

    let outcome = Matcher::new(&store, &config).match_all().unwrap();
    assert_eq!(outcome.matched, 0);
    assert!(store.get_match("spotify", "t1").unwrap().is_none());
}

#[test]
fn test_tie_breaks_on_lower_file_id() {
    let (config, store, _temp) = seeded();
    store
        .upsert_track("spotify", &remote_track("t1", "Song", "Artist", Some("Album"), Some(2020), None, Some(180_000)))
        .unwrap();
    // Two byte-identical candidates; the lower row id must win.
    let f1 = store
        .upsert_library_file(&local_file("/m/copy1.mp3", "Song", "Artist", Some("Album"), Some(2020), None, Some(180.0)))
        .unwrap();
    let f2 = store
        .upsert_library_file(&local_file("/m/copy2.mp3", "Song", "Artist", Some("Album"), Some(2020), None, Some(180.0)))
        .unwrap();
    assert!(f1 < f2);
    store.commit().unwrap();

    Matcher::new(&store, &config).match_all().unwrap();
    assert_eq!(store.get_match("spotify", "t1").unwrap().unwrap().file_id, f1);
}

#[test]
fn test_manual_match_survives_rematching() {
    let (config, store, _temp) = seeded();
    store
        .upsert_track("spotify", &remote_track("t1", "Song", "Artist", Some("Album"), Some(2020), None, Some(180_000)))
        .unwrap();
    let pinned = store
        .upsert_library_file(&local_file("/m/pinned.mp3", "Unrelated", "Nobody", None, None, None, None))
        .unwrap();
    let natural = store
        .upsert_library_file(&local_file("/m/natural.mp3", "Song", "Artist", Some("Album"), Some(2020), None, Some(180.0)))
        .unwrap();
    store
        .upsert_match(
            "spotify",
            &TrackMatch {
                track_id: "t1".to_string(),
                file_id: pinned,
                score: 1.0,
                method: "manual".to_string(),
                confidence: Confidence::Manual,
            },
        )
        .unwrap();
    store.commit().unwrap();

    let matcher = Matcher::new(&store, &config);
    matcher.match_all().unwrap();
    assert_eq!(store.get_match("spotify", "t1").unwrap().unwrap().file_id, pinned);

    matcher.match_tracks(Some(&["t1".to_string()])).unwrap();
    assert_eq!(store.get_match("spotify", "t1").unwrap().unwrap().file_id, pinned);

    matcher.match_files(&[pinned, natural]).unwrap();
    let m = store.get_match("spotify", "t1").unwrap().unwrap();
    assert_eq!(m.file_id, pinned);
    assert_eq!(m.confidence, Confidence::Manual);
}

#[test]
fn test_match_tracks_scoped_rematch() {
    let (config, store, _temp) = seeded();
    store
        .upsert_track("spotify", &remote_track("t1", "Song One", "Artist", Some("Album"), Some(2020), None, Some(180_000)))
        .unwrap();
    store
        .upsert_track("spotify", &remote_track("t2", "Song Two", "Artist", Some("Album"), Some(2020), None, Some(200_000)))
        .unwrap();
    store
        .upsert_library_file(&local_file("/m/one.mp3", "Song One", "Artist", Some("Album"), Some(2020), None, Some(180.0)))
        .unwrap();
    store
        .upsert_library_file(&local_file("/m/two.mp3", "Song Two", "Artist", Some("Album"), Some(2020), None, Some(200.0)))
        .unwrap();
    store.commit().unwrap();

    let matcher = Matcher::new(&store, &config);
    let outcome = matcher.match_tracks(Some(&["t1".to_string()])).unwrap();
    assert_eq!(outcome.matched, 1);
    assert_eq!(outcome.matched_track_ids, vec!["t1".to_string()]);
    assert!(store.get_match("spotify", "t2").unwrap().is_none());

    // No ids falls back to the unmatched set.
    let outcome = matcher.match_tracks(None).unwrap();
    assert_eq!(outcome.matched_track_ids, vec!["t2".to_string()]);
}

#[test]
fn test_match_files_does_not_downgrade_better_match() {
    let (config, store, _temp) = seeded();
    store
        .upsert_track("spotify", &remote_track("t1", "Song", "Artist", Some("Album"), Some(2020), None, Some(180_000)))
        .unwrap();
    let strong = store
        .upsert_library_file(&local_file("/m/strong.mp3", "Song", "Artist", Some("Album"), Some(2020), None, Some(180.0)))
        .unwrap();
    store.commit().unwrap();

    let matcher = Matcher::new(&store, &config);
    matcher.match_all().unwrap();
    let before = store.get_match("spotify", "t1").unwrap().unwrap();
    assert_eq!(before.file_id, strong);

    // A new file that only weakly matches the same track must not steal the
    // slot from the stronger existing match.
    let weak = store
        .upsert_library_file(&local_file("/m/weak.mp3", "Song", "Artist", Some("Album"), None, None, None))
        .unwrap();
    store.commit().unwrap();
    let outcome = matcher.match_files(&[weak]).unwrap();
    assert!(outcome.matched_track_ids.is_empty());
    assert_eq!(store.get_match("spotify", "t1").unwrap().unwrap().file_id, strong);
}

#[test]
fn test_match_files_reports_newly_matched_tracks() {
    let (config, store, _temp) = seeded();
    store
        .upsert_track("spotify", &remote_track("t1", "Song", "Artist", Some("Album"), Some(2020), None, Some(180_000)))
        .unwrap();
    store.commit().unwrap();

    let matcher = Matcher::new(&store, &config);
    assert_eq!(matcher.match_files(&[]).unwrap().matched, 0);

    let file_id = store
        .upsert_library_file(&local_file("/m/new.mp3", "Song", "Artist", Some("Album"), Some(2020), None, Some(180.0)))
        .unwrap();
    store.commit().unwrap();
    let outcome = matcher.match_files(&[file_id]).unwrap();
    assert_eq!(outcome.matched, 1);
    assert_eq!(outcome.matched_track_ids, vec!["t1".to_string()]);
}

#[test]
fn test_prefilter_fallback_keeps_track_alive() {
    let (config, store, _temp) = seeded();
    // Duration far outside the window, but every candidate has a duration so
    // the prefilter empties; the matcher must fall back to the full pool.
    store
        .upsert_track("spotify", &remote_track("t1", "Song", "Artist", Some("Album"), Some(2020), None, Some(500_000)))
        .unwrap();
    store
        .upsert_library_file(&local_file("/m/song.mp3", "Song", "Artist", Some("Album"), Some(2020), None, Some(180.0)))
        .unwrap();
    store.commit().unwrap();

    let outcome = Matcher::new(&store, &config).match_all().unwrap();
    // Without the tight/loose duration bonus the score still clears LOW.
    assert_eq!(outcome.matched, 1);
}
