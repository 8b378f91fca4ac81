//! Shortener Correctness Tests
//!
//! End-to-end scenarios over the full stack: map, identifier assignment,
//! operation log, replay, compaction, and crash recovery. Every test gets its
//! own temporary directory and asserts the log down to the byte.

use std::fs;
use std::path::Path;

use shortener_rs::id::{ALPHABET, ID_LENGTH};
use shortener_rs::{MapError, Shortener, ShortenerConfig, ShortenerError};
use tempfile::tempdir;

fn open_in(dir: &Path) -> Shortener {
    Shortener::open(ShortenerConfig {
        log_path: dir.join("log"),
    })
    .unwrap()
}

fn log_lines(dir: &Path) -> Vec<String> {
    fs::read_to_string(dir.join("log"))
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

// ============================================================================
// SEGMENT 1: BASIC OPERATIONS AND LOG APPENDS
// ============================================================================

#[test]
fn insert_then_translate_logs_one_line() {
    let dir = tempdir().unwrap();
    let shortener = open_in(dir.path());

    let id = shortener.insert("https://example.com/a").unwrap();
    assert_eq!(id.len(), ID_LENGTH);
    assert!(id.bytes().all(|b| ALPHABET.contains(&b)));
    assert_eq!(shortener.translate(&id).unwrap(), "https://example.com/a");

    assert_eq!(log_lines(dir.path()), [format!("+|{id}|https://example.com/a")]);
}

#[test]
fn custom_id_rejects_a_duplicate() {
    let dir = tempdir().unwrap();
    let shortener = open_in(dir.path());

    shortener.insert_custom("abcdefgh", "u1").unwrap();
    let err = shortener.insert_custom("abcdefgh", "u2").unwrap_err();
    assert!(matches!(err, ShortenerError::Map(MapError::KeyExists)));

    assert_eq!(shortener.translate("abcdefgh").unwrap(), "u1");
    // The losing insert must not have reached the log.
    assert_eq!(log_lines(dir.path()), ["+|abcdefgh|u1"]);
}

#[test]
fn remove_then_reinsert_logs_the_full_history() {
    let dir = tempdir().unwrap();
    let shortener = open_in(dir.path());

    let id = shortener.insert("u").unwrap();
    shortener.remove(&id).unwrap();
    let err = shortener.translate(&id).unwrap_err();
    assert!(matches!(err, ShortenerError::Map(MapError::KeyNotFound)));

    shortener.insert_custom(&id, "v").unwrap();
    assert_eq!(shortener.translate(&id).unwrap(), "v");

    assert_eq!(
        log_lines(dir.path()),
        [
            format!("+|{id}|u"),
            format!("-|{id}|[DELETED]"),
            format!("+|{id}|v"),
        ]
    );
}

#[test]
fn remove_of_unknown_id_is_not_logged() {
    let dir = tempdir().unwrap();
    let shortener = open_in(dir.path());

    let err = shortener.remove("missing1").unwrap_err();
    assert!(matches!(err, ShortenerError::Map(MapError::KeyNotFound)));
    assert_eq!(fs::read_to_string(dir.path().join("log")).unwrap(), "");
}

#[test]
fn log_order_matches_commit_order() {
    let dir = tempdir().unwrap();
    let shortener = open_in(dir.path());

    shortener.insert_custom("aaaaaaaa", "u1").unwrap();
    shortener.insert_custom("bbbbbbbb", "u2").unwrap();
    shortener.remove("aaaaaaaa").unwrap();
    shortener.insert_custom("cccccccc", "u3").unwrap();

    assert_eq!(
        log_lines(dir.path()),
        [
            "+|aaaaaaaa|u1",
            "+|bbbbbbbb|u2",
            "-|aaaaaaaa|[DELETED]",
            "+|cccccccc|u3",
        ]
    );
}

// ============================================================================
// SEGMENT 2: REPLAY
// ============================================================================

#[test]
fn replay_rebuilds_the_logged_state() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("log"),
        "+|aaaaaaaa|u1\n+|aaaaaaab|u2\n-|aaaaaaaa|[DELETED]\n",
    )
    .unwrap();

    let shortener = open_in(dir.path());
    shortener.load_from_log().unwrap();

    let err = shortener.translate("aaaaaaaa").unwrap_err();
    assert!(matches!(err, ShortenerError::Map(MapError::KeyNotFound)));
    assert_eq!(shortener.translate("aaaaaaab").unwrap(), "u2");
}

#[test]
fn replay_skips_malformed_lines() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("log"),
        "+|aaaaaaaa|u1\ngarbage\n?|aaaaaaab|u2\n+|aaaaaaac|u3\n",
    )
    .unwrap();

    let shortener = open_in(dir.path());
    shortener.load_from_log().unwrap();

    assert_eq!(shortener.translate("aaaaaaaa").unwrap(), "u1");
    assert_eq!(shortener.translate("aaaaaaac").unwrap(), "u3");
    assert!(shortener.translate("aaaaaaab").is_err());
}

#[test]
fn replay_conflict_is_fatal() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("log"), "+|aaaaaaaa|u1\n+|aaaaaaaa|u2\n").unwrap();

    let shortener = open_in(dir.path());
    let err = shortener.load_from_log().unwrap_err();
    match err {
        ShortenerError::Replay { line_no, source } => {
            assert_eq!(line_no, 2);
            assert_eq!(source, MapError::KeyExists);
        }
        other => panic!("expected a replay error, got {other:?}"),
    }
}

#[test]
fn appends_after_replay_extend_the_log() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("log"), "+|aaaaaaaa|u1\n").unwrap();

    let shortener = open_in(dir.path());
    shortener.load_from_log().unwrap();
    shortener.insert_custom("bbbbbbbb", "u2").unwrap();

    assert_eq!(log_lines(dir.path()), ["+|aaaaaaaa|u1", "+|bbbbbbbb|u2"]);
}

#[test]
fn state_round_trips_through_reopen() {
    let dir = tempdir().unwrap();
    let before: Vec<(String, String)> = {
        let shortener = open_in(dir.path());
        for i in 0..20 {
            shortener
                .insert_custom(&format!("id{i:06}"), &format!("https://e.com/{i}"))
                .unwrap();
        }
        for i in (0..20).step_by(3) {
            shortener.remove(&format!("id{i:06}")).unwrap();
        }
        shortener.list_all().collect()
    };

    let reopened = open_in(dir.path());
    reopened.load_from_log().unwrap();
    let after: Vec<(String, String)> = reopened.list_all().collect();
    assert_eq!(before, after);
}

// ============================================================================
// SEGMENT 3: COMPACTION AND CRASH RECOVERY
// ============================================================================

#[test]
fn compaction_keeps_exactly_the_live_set() {
    let dir = tempdir().unwrap();
    let shortener = open_in(dir.path());

    for i in 0..5 {
        shortener
            .insert_custom(&format!("key{i:05}"), &format!("u{i}"))
            .unwrap();
    }
    shortener.remove("key00001").unwrap();
    shortener.remove("key00003").unwrap();

    let before: Vec<(String, String)> = shortener.list_all().collect();
    shortener.compact_log().unwrap();
    let after: Vec<(String, String)> = shortener.list_all().collect();
    assert_eq!(before, after, "compaction must preserve the live set");

    assert_eq!(
        log_lines(dir.path()),
        ["+|key00000|u0", "+|key00002|u2", "+|key00004|u4"]
    );
    assert!(!dir.path().join("newlog").exists());
}

#[test]
fn compacted_log_replays_cleanly() {
    let dir = tempdir().unwrap();
    {
        let shortener = open_in(dir.path());
        for i in 0..10 {
            shortener
                .insert_custom(&format!("key{i:05}"), "u")
                .unwrap();
        }
        for i in (0..10).step_by(2) {
            shortener.remove(&format!("key{i:05}")).unwrap();
        }
        shortener.compact_log().unwrap();
    }

    let reopened = open_in(dir.path());
    reopened.load_from_log().unwrap();
    assert_eq!(reopened.list_all().count(), 5);
}

#[test]
fn appends_continue_after_compaction() {
    let dir = tempdir().unwrap();
    let shortener = open_in(dir.path());

    shortener.insert_custom("aaaaaaaa", "u1").unwrap();
    shortener.compact_log().unwrap();
    shortener.insert_custom("bbbbbbbb", "u2").unwrap();

    assert_eq!(log_lines(dir.path()), ["+|aaaaaaaa|u1", "+|bbbbbbbb|u2"]);
}

#[test]
fn crash_before_rename_recovers_from_newlog() {
    let dir = tempdir().unwrap();
    // Simulate a crash between `remove(log)` and `rename(newlog, log)`: only
    // the finished scratch file survives.
    fs::write(dir.path().join("newlog"), "+|aaaaaaaa|u1\n").unwrap();

    let shortener = open_in(dir.path());
    shortener.load_from_log().unwrap();

    assert_eq!(shortener.translate("aaaaaaaa").unwrap(), "u1");
    assert!(dir.path().join("log").exists());
    assert!(!dir.path().join("newlog").exists());
}

#[test]
fn existing_log_wins_over_a_leftover_newlog() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("log"), "+|aaaaaaaa|live\n").unwrap();
    fs::write(dir.path().join("newlog"), "+|aaaaaaaa|stale\n").unwrap();

    let shortener = open_in(dir.path());
    shortener.load_from_log().unwrap();
    assert_eq!(shortener.translate("aaaaaaaa").unwrap(), "live");
}

// ============================================================================
// SEGMENT 4: CONCURRENT USE OF THE FULL STACK
// ============================================================================

#[test]
fn concurrent_shorteners_agree_with_their_log() {
    use std::sync::Arc;
    use std::thread;

    let dir = tempdir().unwrap();
    let shortener = Arc::new(open_in(dir.path()));

    let mut handles = Vec::new();
    for t in 0..4 {
        let shortener = Arc::clone(&shortener);
        handles.push(thread::spawn(move || {
            for i in 0..50 {
                shortener
                    .insert_custom(&format!("t{t}i{i:04}"), "u")
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().expect("thread panicked");
    }

    assert_eq!(shortener.list_all().count(), 200);
    assert_eq!(log_lines(dir.path()).len(), 200);

    // Replaying that log in a fresh instance yields the same live set.
    let dir2 = tempdir().unwrap();
    fs::copy(dir.path().join("log"), dir2.path().join("log")).unwrap();
    let replica = open_in(dir2.path());
    replica.load_from_log().unwrap();
    let original: Vec<(String, String)> = shortener.list_all().collect();
    let replayed: Vec<(String, String)> = replica.list_all().collect();
    assert_eq!(original, replayed);
}
