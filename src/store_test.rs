use crate::scoring::Confidence;
use crate::store::{Playlist, PlaylistEntry, Store, TrackMatch};
use crate::testing::{self, local_file, remote_track};

fn open() -> (Store, tempfile::TempDir) {
    let (config, temp) = testing::config();
    (testing::store(&config), temp)
}

#[test]
fn test_track_upsert_roundtrip() {
    let (store, _temp) = open();
    let track = remote_track("t1", "Song", "Artist", Some("Album"), Some(2020), Some("ISRC1"), Some(180_000));
    store.upsert_track("spotify", &track).unwrap();
    store.commit().unwrap();

    let fetched = store.get_track("spotify", "t1").unwrap().unwrap();
    assert_eq!(fetched, track);

    // Same id under another provider is a distinct row.
    assert!(store.get_track("tidal", "t1").unwrap().is_none());
}

#[test]
fn test_track_upsert_updates_in_place() {
    let (store, _temp) = open();
    store.upsert_track("spotify", &remote_track("t1", "Old Name", "Artist", None, None, None, None)).unwrap();
    store.upsert_track("spotify", &remote_track("t1", "New Name", "Artist", None, None, None, None)).unwrap();
    store.commit().unwrap();
    assert_eq!(store.count_tracks("spotify").unwrap(), 1);
    assert_eq!(store.get_track("spotify", "t1").unwrap().unwrap().name, "New Name");
}

#[test]
fn test_playlist_snapshot_changed() {
    let (store, _temp) = open();
    let playlist = Playlist {
        id: "p1".to_string(),
        name: "Road Trip".to_string(),
        snapshot_id: Some("snap1".to_string()),
        owner_id: Some("u1".to_string()),
        owner_name: Some("User".to_string()),
    };
    // Unknown playlist counts as changed.
    assert!(store.playlist_snapshot_changed("spotify", "p1", "snap1").unwrap());
    store.upsert_playlist("spotify", &playlist).unwrap();
    store.commit().unwrap();
    assert!(!store.playlist_snapshot_changed("spotify", "p1", "snap1").unwrap());
    assert!(store.playlist_snapshot_changed("spotify", "p1", "snap2").unwrap());
}

#[test]
fn test_replace_playlist_tracks_is_dense_and_atomic() {
    let (store, _temp) = open();
    store
        .upsert_playlist(
            "spotify",
            &Playlist { id: "p1".to_string(), name: "P".to_string(), snapshot_id: None, owner_id: None, owner_name: None },
        )
        .unwrap();
    for id in ["t1", "t2", "t3"] {
        store.upsert_track("spotify", &remote_track(id, id, "A", None, None, None, None)).unwrap();
    }
    let entries: Vec<PlaylistEntry> = ["t1", "t2", "t3"]
        .iter()
        .map(|id| PlaylistEntry { track_id: id.to_string(), added_at: None })
        .collect();
    store.replace_playlist_tracks("spotify", "p1", &entries).unwrap();
    store.commit().unwrap();
    assert_eq!(store.playlist_track_count("spotify", "p1").unwrap(), 3);

    // Replacing shrinks and re-densifies.
    let shorter = vec![PlaylistEntry { track_id: "t3".to_string(), added_at: None }];
    store.replace_playlist_tracks("spotify", "p1", &shorter).unwrap();
    store.commit().unwrap();
    assert_eq!(store.playlist_track_count("spotify", "p1").unwrap(), 1);
    let detail = store.playlist_detail("spotify", "p1").unwrap();
    assert_eq!(detail[0].position, 0);
    assert_eq!(detail[0].track_id, "t3");
}

#[test]
fn test_library_file_upsert_keeps_id_by_path() {
    let (store, _temp) = open();
    let id1 = store.upsert_library_file(&local_file("/m/a.mp3", "A", "X", None, None, None, Some(100.0))).unwrap();
    let id2 = store.upsert_library_file(&local_file("/m/a.mp3", "A2", "X", None, None, None, Some(100.0))).unwrap();
    store.commit().unwrap();
    assert_eq!(id1, id2);
    assert_eq!(store.count_library_files().unwrap(), 1);
    assert_eq!(store.get_library_file(id1).unwrap().unwrap().title, "A2");
    assert_eq!(store.file_id_for_path("/m/a.mp3").unwrap(), Some(id1));
    assert_eq!(store.file_id_for_path("/m/missing.mp3").unwrap(), None);
}

#[test]
fn test_deleting_file_cascades_to_matches() {
    let (store, _temp) = open();
    store.upsert_track("spotify", &remote_track("t1", "Song", "A", None, None, None, None)).unwrap();
    let file_id = store.upsert_library_file(&local_file("/m/a.mp3", "Song", "A", None, None, None, None)).unwrap();
    store
        .upsert_match(
            "spotify",
            &TrackMatch {
                track_id: "t1".to_string(),
                file_id,
                score: 0.9,
                method: "score:high".to_string(),
                confidence: Confidence::High,
            },
        )
        .unwrap();
    store.commit().unwrap();
    assert_eq!(store.count_matches("spotify").unwrap(), 1);

    assert!(store.delete_library_file(file_id).unwrap());
    store.commit().unwrap();
    assert_eq!(store.count_matches("spotify").unwrap(), 0);
}

#[test]
fn test_delete_matches_keep_manual() {
    let (store, _temp) = open();
    for id in ["t1", "t2"] {
        store.upsert_track("spotify", &remote_track(id, id, "A", None, None, None, None)).unwrap();
    }
    let file_id = store.upsert_library_file(&local_file("/m/a.mp3", "t1", "A", None, None, None, None)).unwrap();
    store
        .upsert_match(
            "spotify",
            &TrackMatch {
                track_id: "t1".to_string(),
                file_id,
                score: 1.0,
                method: "manual".to_string(),
                confidence: Confidence::Manual,
            },
        )
        .unwrap();
    store
        .upsert_match(
            "spotify",
            &TrackMatch {
                track_id: "t2".to_string(),
                file_id,
                score: 0.8,
                method: "score:high".to_string(),
                confidence: Confidence::High,
            },
        )
        .unwrap();
    store.commit().unwrap();

    let deleted = store
        .delete_matches_by_track_ids("spotify", &["t1".to_string(), "t2".to_string()], true)
        .unwrap();
    assert_eq!(deleted, 1);
    assert!(store.get_match("spotify", "t1").unwrap().is_some());
    assert!(store.get_match("spotify", "t2").unwrap().is_none());

    let manual = store.manual_track_ids("spotify").unwrap();
    assert!(manual.contains("t1"));

    // Non-keeping delete clears the manual row too.
    store.delete_matches_by_track_ids("spotify", &["t1".to_string()], false).unwrap();
    assert!(store.get_match("spotify", "t1").unwrap().is_none());
}

#[test]
fn test_delete_matches_by_file_ids() {
    let (store, _temp) = open();
    store.upsert_track("spotify", &remote_track("t1", "Song", "A", None, None, None, None)).unwrap();
    let f1 = store.upsert_library_file(&local_file("/m/a.mp3", "Song", "A", None, None, None, None)).unwrap();
    store
        .upsert_match(
            "spotify",
            &TrackMatch {
                track_id: "t1".to_string(),
                file_id: f1,
                score: 0.8,
                method: "score:high".to_string(),
                confidence: Confidence::High,
            },
        )
        .unwrap();
    store.commit().unwrap();
    assert_eq!(store.delete_matches_by_file_ids("spotify", &[f1], true).unwrap(), 1);
    assert_eq!(store.count_matches("spotify").unwrap(), 0);
}

#[test]
fn test_unmatched_queries() {
    let (store, _temp) = open();
    store.upsert_track("spotify", &remote_track("t1", "Song", "A", None, None, None, None)).unwrap();
    store.upsert_track("spotify", &remote_track("t2", "Other", "B", None, None, None, None)).unwrap();
    let f1 = store.upsert_library_file(&local_file("/m/a.mp3", "Song", "A", None, None, None, None)).unwrap();
    store.upsert_library_file(&local_file("/m/b.mp3", "Spare", "C", None, None, None, None)).unwrap();
    store
        .upsert_match(
            "spotify",
            &TrackMatch {
                track_id: "t1".to_string(),
                file_id: f1,
                score: 0.8,
                method: "score:high".to_string(),
                confidence: Confidence::High,
            },
        )
        .unwrap();
    store.commit().unwrap();

    let unmatched_tracks = store.unmatched_tracks("spotify").unwrap();
    assert_eq!(unmatched_tracks.len(), 1);
    assert_eq!(unmatched_tracks[0].id, "t2");

    let unmatched_files = store.unmatched_files("spotify").unwrap();
    assert_eq!(unmatched_files.len(), 1);
    assert_eq!(unmatched_files[0].path, "/m/b.mp3");
}

#[test]
fn test_playlists_containing_tracks_is_distinct() {
    let (store, _temp) = open();
    for pid in ["a", "b", "c"] {
        store
            .upsert_playlist(
                "spotify",
                &Playlist {
                    id: pid.to_string(),
                    name: pid.to_uppercase(),
                    snapshot_id: None,
                    owner_id: None,
                    owner_name: None,
                },
            )
            .unwrap();
    }
    for id in ["t", "t2", "tc"] {
        store.upsert_track("spotify", &remote_track(id, id, "A", None, None, None, None)).unwrap();
    }
    // Playlists a and b share track t (twice in a); c holds a different one.
    store
        .replace_playlist_tracks(
            "spotify",
            "a",
            &[
                PlaylistEntry { track_id: "t".to_string(), added_at: None },
                PlaylistEntry { track_id: "t2".to_string(), added_at: None },
                PlaylistEntry { track_id: "t".to_string(), added_at: None },
            ],
        )
        .unwrap();
    store
        .replace_playlist_tracks("spotify", "b", &[PlaylistEntry { track_id: "t".to_string(), added_at: None }])
        .unwrap();
    store
        .replace_playlist_tracks("spotify", "c", &[PlaylistEntry { track_id: "tc".to_string(), added_at: None }])
        .unwrap();
    store.commit().unwrap();

    let affected = store.playlists_containing_tracks("spotify", &["t".to_string()]).unwrap();
    assert_eq!(affected, vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn test_liked_track_ids_subset() {
    let (store, _temp) = open();
    store.upsert_track("spotify", &remote_track("t1", "Song", "A", None, None, None, None)).unwrap();
    store.upsert_liked("spotify", "t1", Some("2025-01-01T00:00:00Z")).unwrap();
    store.commit().unwrap();
    assert_eq!(store.count_liked("spotify").unwrap(), 1);
    let liked = store.liked_track_ids("spotify", &["t1".to_string(), "t2".to_string()]).unwrap();
    assert_eq!(liked, vec!["t1".to_string()]);
    assert!(store.liked_track_ids("spotify", &[]).unwrap().is_empty());
}

#[test]
fn test_meta_roundtrip_and_delete() {
    let (store, _temp) = open();
    assert!(store.get_meta("missing").unwrap().is_none());
    store.set_meta("last_write_source", "scan").unwrap();
    store.commit().unwrap();
    assert_eq!(store.get_meta("last_write_source").unwrap().as_deref(), Some("scan"));
    store.delete_meta("last_write_source").unwrap();
    store.commit().unwrap();
    assert!(store.get_meta("last_write_source").unwrap().is_none());
}

#[test]
fn test_last_scan_time_is_monotonic() {
    let (store, _temp) = open();
    store.bump_last_scan_time(100.0).unwrap();
    store.bump_last_scan_time(50.0).unwrap();
    store.commit().unwrap();
    assert_eq!(store.get_meta("last_scan_time").unwrap().unwrap().parse::<f64>().unwrap(), 100.0);
    store.bump_last_scan_time(150.0).unwrap();
    store.commit().unwrap();
    assert_eq!(store.get_meta("last_scan_time").unwrap().unwrap().parse::<f64>().unwrap(), 150.0);
}

#[test]
fn test_match_confidence_tally_orders_by_tier() {
    let (store, _temp) = open();
    for (id, confidence) in [("t1", Confidence::Low), ("t2", Confidence::Certain), ("t3", Confidence::Certain)] {
        store.upsert_track("spotify", &remote_track(id, id, "A", None, None, None, None)).unwrap();
        let file_id = store
            .upsert_library_file(&local_file(&format!("/m/{id}.mp3"), id, "A", None, None, None, None))
            .unwrap();
        store
            .upsert_match(
                "spotify",
                &TrackMatch {
                    track_id: id.to_string(),
                    file_id,
                    score: 0.9,
                    method: "score:x".to_string(),
                    confidence,
                },
            )
            .unwrap();
    }
    store.commit().unwrap();
    let tally = store.match_confidence_tally("spotify").unwrap();
    assert_eq!(tally, vec![(Confidence::Certain, 2), (Confidence::Low, 1)]);
}

#[test]
fn test_read_your_writes_before_commit() {
    let (store, _temp) = open();
    store.upsert_track("spotify", &remote_track("t1", "Song", "A", None, None, None, None)).unwrap();
    // Visible in this session even before the commit barrier.
    assert!(store.get_track("spotify", "t1").unwrap().is_some());
    store.commit().unwrap();
}
