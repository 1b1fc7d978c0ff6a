// SPDX-License-Identifier: MIT OR Apache-2.0
//! Snapshots and the key registry under concurrent access.

use chrono::Utc;
use fdk_core::{ClientLogger, ParsedConfig, Snapshot, User, UserHandle};
use std::sync::Arc;
use std::thread;

fn ruled_body(flags: usize) -> String {
    let mut entries = Vec::with_capacity(flags);
    for i in 0..flags {
        entries.push(format!(
            r#""conc-flag-{i}":{{
                "v":"default","t":1,
                "p":[{{"v":"a","p":50}},{{"v":"b","p":50}}]
            }}"#
        ));
    }
    format!(r#"{{"f":{{{}}}}}"#, entries.join(","))
}

#[test]
fn shared_snapshot_reads_are_consistent_across_threads() {
    let body = ruled_body(16);
    let config = ParsedConfig::parse(body.as_bytes(), None, Utc::now(), None).unwrap();
    let snapshot = Arc::new(Snapshot::new(
        config,
        Some(UserHandle::record(User::new("thread-user"))),
        ClientLogger::disabled(),
    ));

    // Establish the expected values single-threaded.
    let expected: Vec<String> = (0..16)
        .map(|i| snapshot.string_value(&format!("conc-flag-{i}"), ""))
        .collect();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let snapshot = Arc::clone(&snapshot);
        let expected = expected.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..100 {
                for (i, want) in expected.iter().enumerate() {
                    let got = snapshot.string_value(&format!("conc-flag-{i}"), "");
                    assert_eq!(&got, want);
                }
            }
        }));
    }
    for handle in handles {
        handle.join().expect("reader thread panicked");
    }
}

#[test]
fn memoization_race_publishes_one_value() {
    // Many threads race the first evaluation of the same key; every
    // one of them must observe the same result because the config and
    // user are frozen.
    for round in 0..20 {
        let body = ruled_body(1);
        let config = ParsedConfig::parse(body.as_bytes(), None, Utc::now(), None).unwrap();
        let snapshot = Arc::new(Snapshot::new(
            config,
            Some(UserHandle::record(User::new(format!("racer-{round}")))),
            ClientLogger::disabled(),
        ));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let snapshot = Arc::clone(&snapshot);
            handles.push(thread::spawn(move || snapshot.string_value("conc-flag-0", "")));
        }
        let results: Vec<String> = handles
            .into_iter()
            .map(|h| h.join().expect("racer panicked"))
            .collect();
        assert!(results.windows(2).all(|w| w[0] == w[1]), "{results:?}");
    }
}

#[test]
fn key_interning_is_race_free() {
    let mut handles = Vec::new();
    for t in 0..8 {
        handles.push(thread::spawn(move || {
            let mut ids = Vec::new();
            for i in 0..50 {
                // Every thread interns the same key set.
                let _ = t;
                ids.push(fdk_core::keys::intern(&format!("race-key-{i}")));
            }
            ids
        }));
    }
    let all: Vec<Vec<fdk_core::KeyId>> = handles
        .into_iter()
        .map(|h| h.join().expect("intern thread panicked"))
        .collect();
    // Identical names resolved to identical ids on every thread.
    for ids in &all[1..] {
        assert_eq!(ids, &all[0]);
    }
}

#[test]
fn evaluator_cache_is_shared_between_snapshots() {
    let body = ruled_body(4);
    let config = ParsedConfig::parse(body.as_bytes(), None, Utc::now(), None).unwrap();

    // Two snapshots over the same config with same-typed users share
    // the compiled evaluator set; results only depend on the user.
    let a = Snapshot::new(
        config.clone(),
        Some(UserHandle::record(User::new("same"))),
        ClientLogger::disabled(),
    );
    let b = Snapshot::new(
        config,
        Some(UserHandle::record(User::new("same"))),
        ClientLogger::disabled(),
    );
    for i in 0..4 {
        let key = format!("conc-flag-{i}");
        assert_eq!(a.string_value(&key, ""), b.string_value(&key, ""));
    }
}
