// Property-based tests for the recovery loop
// Feature: queue-janitor

use chrono::{DateTime, TimeZone, Utc};
use common::config::parse_queue_names;
use common::models::JobRecord;
use common::resolver::StalenessResolver;
use common::staleness::ManualClock;
use common::store::{KeyScheme, MemoryQueueStore, RequeuePosition};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const STALE_TIME: Duration = Duration::from_secs(600);

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

fn record(seconds_ago: i64) -> JobRecord {
    JobRecord::new(
        "started",
        (now() - chrono::Duration::seconds(seconds_ago)).to_rfc3339(),
    )
}

fn resolver(store: &MemoryQueueStore) -> StalenessResolver {
    StalenessResolver::new(
        Arc::new(store.clone()),
        Arc::new(ManualClock::new(now())),
        KeyScheme::default(),
        STALE_TIME,
        RequeuePosition::Head,
    )
}

fn running() -> watch::Receiver<bool> {
    let (_tx, rx) = watch::channel(false);
    rx
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

fn occurrences(list: &[String], job_id: &str) -> usize {
    list.iter().filter(|entry| entry.as_str() == job_id).count()
}

/// Staleness profile of a generated entry
#[derive(Debug, Clone, Copy)]
enum Entry {
    Live(i64),
    Expired(i64),
    Missing,
    Malformed,
}

fn entry_strategy() -> impl Strategy<Value = Entry> {
    prop_oneof![
        (0i64..=600).prop_map(Entry::Live),
        (601i64..100_000).prop_map(Entry::Expired),
        Just(Entry::Missing),
        Just(Entry::Malformed),
    ]
}

impl Entry {
    fn is_stale(self) -> bool {
        !matches!(self, Entry::Live(_))
    }

    async fn install(self, store: &MemoryQueueStore, job_id: &str) {
        match self {
            Entry::Live(age) | Entry::Expired(age) => store.set_record(job_id, record(age)).await,
            Entry::Missing => store.remove_record(job_id).await,
            Entry::Malformed => {
                store
                    .set_record(job_id, JobRecord::new("started", "not-a-timestamp"))
                    .await
            }
        }
    }
}

/// **Property: No duplication**
///
/// *For any* number of janitors sweeping the same processing queue concurrently,
/// optionally racing a worker that completes the entry, the entry ends up in at
/// most one of the work queue and the processing queue, and in exactly one when
/// the worker did not complete it.
#[test]
fn property_no_duplication_under_concurrent_janitors() {
    proptest!(ProptestConfig::with_cases(64), |(
        janitors in 2usize..8,
        worker_completes in any::<bool>(),
        profile in entry_strategy(),
    )| {
        let rt = runtime();
        let (work, processing, completed) = rt.block_on(async move {
            let store = MemoryQueueStore::default();
            let processing_key = "processing-predict:worker-1";
            store.insert_processing(processing_key, "J").await;
            profile.install(&store, "J").await;

            let mut handles = Vec::new();
            for _ in 0..janitors {
                let store = store.clone();
                handles.push(tokio::spawn(async move {
                    resolver(&store).sweep("predict", &running()).await
                }));
            }

            let completed = if worker_completes {
                let store = store.clone();
                tokio::spawn(async move { store.complete(processing_key, "J").await })
                    .await
                    .unwrap()
            } else {
                false
            };

            for handle in handles {
                handle.await.unwrap().unwrap();
            }

            (store.list("predict").await, store.list(processing_key).await, completed)
        });

        let total = occurrences(&work, "J") + occurrences(&processing, "J");
        prop_assert!(total <= 1, "J duplicated: work={:?} processing={:?}", work, processing);
        if !completed {
            prop_assert_eq!(total, 1);
        }
        if !profile.is_stale() {
            prop_assert_eq!(occurrences(&work, "J"), 0);
        }
    });
}

/// **Property: No loss, live untouched**
///
/// *For any* processing queue with a mix of live and stale entries and a single
/// janitor, every stale entry is in the work queue after one sweep and every
/// live entry is still in the processing queue.
#[test]
fn property_single_janitor_moves_exactly_the_stale_entries() {
    proptest!(ProptestConfig::with_cases(64), |(
        profiles in prop::collection::vec(entry_strategy(), 1..30),
    )| {
        let rt = runtime();
        let (work, processing) = rt.block_on({
            let profiles = profiles.clone();
            async move {
                let store = MemoryQueueStore::default();
                for (i, profile) in profiles.iter().enumerate() {
                    let job_id = format!("job-{}", i);
                    store.insert_processing("processing-predict:w", &job_id).await;
                    profile.install(&store, &job_id).await;
                }

                let report = resolver(&store).sweep("predict", &running()).await.unwrap();
                assert_eq!(report.inspected, profiles.len());
                (store.list("predict").await, store.list("processing-predict:w").await)
            }
        });

        for (i, profile) in profiles.iter().enumerate() {
            let job_id = format!("job-{}", i);
            if profile.is_stale() {
                prop_assert_eq!(occurrences(&work, &job_id), 1);
                prop_assert_eq!(occurrences(&processing, &job_id), 0);
            } else {
                prop_assert_eq!(occurrences(&work, &job_id), 0);
                prop_assert_eq!(occurrences(&processing, &job_id), 1);
            }
        }
    });
}

/// **Property: Idempotent re-sweep**
///
/// *For any* queue state, a second sweep with no worker activity in between
/// changes nothing.
#[test]
fn property_resweep_is_idempotent() {
    proptest!(ProptestConfig::with_cases(32), |(
        profiles in prop::collection::vec(entry_strategy(), 0..20),
        already_queued in prop::collection::vec("[a-z]{4}", 0..5),
    )| {
        let rt = runtime();
        rt.block_on(async move {
            let store = MemoryQueueStore::default();
            for job_id in &already_queued {
                store.push_work("predict", job_id).await;
            }
            for (i, profile) in profiles.iter().enumerate() {
                let job_id = format!("job-{}", i);
                store.insert_processing("processing-predict:w", &job_id).await;
                profile.install(&store, &job_id).await;
            }

            let resolver = resolver(&store);
            resolver.sweep("predict", &running()).await.unwrap();
            let work = store.list("predict").await;
            let processing = store.list("processing-predict:w").await;

            let second = resolver.sweep("predict", &running()).await.unwrap();
            assert_eq!(second.requeued, 0);
            assert_eq!(store.list("predict").await, work);
            assert_eq!(store.list("processing-predict:w").await, processing);
        });
    });
}

/// **Property: Deprecated queue merge**
///
/// *For any* queue list and deprecated name, the monitored set is the
/// deduplicated union of both.
#[test]
fn property_deprecated_queue_merge() {
    proptest!(|(
        names in prop::collection::vec("[a-z]{1,8}", 0..10),
        deprecated in "[a-z]{1,8}",
    )| {
        let joined = names.join(",");
        let parsed = parse_queue_names(&joined, ",", Some(&deprecated));

        let mut expected: BTreeSet<String> = names.iter().cloned().collect();
        expected.insert(deprecated.clone());
        prop_assert_eq!(parsed, expected);
    });
}

#[test]
fn test_deprecated_queue_merge_example() {
    let parsed = parse_queue_names("segment,predict", ",", Some("predict"));
    assert_eq!(
        parsed,
        BTreeSet::from(["predict".to_string(), "segment".to_string()])
    );
}

/// Processing queue `[a, b, c]`: `a` updated 5s ago, `b` has no record, `c`
/// updated 700s ago. One sweep leaves `[a]` and appends `b` then `c`.
#[tokio::test]
async fn test_mixed_processing_queue_scenario() {
    let store = MemoryQueueStore::default();
    let processing_key = "processing-predict:worker-1";
    // LPUSH in reverse so the list reads a, b, c left to right
    for job_id in ["c", "b", "a"] {
        store.insert_processing(processing_key, job_id).await;
    }
    store.set_record("a", record(5)).await;
    store.set_record("c", record(700)).await;

    let report = resolver(&store).sweep("predict", &running()).await.unwrap();

    assert_eq!(store.list(processing_key).await, vec!["a".to_string()]);
    assert_eq!(
        store.list("predict").await,
        vec!["b".to_string(), "c".to_string()]
    );
    assert_eq!(report.live, 1);
    assert_eq!(report.requeued, 2);
}

/// A missing record is treated as abandoned, whatever its history
#[tokio::test]
async fn test_missing_record_is_requeued() {
    let store = MemoryQueueStore::default();
    store.insert_processing("processing-predict", "orphan").await;

    let report = resolver(&store).sweep("predict", &running()).await.unwrap();

    assert_eq!(report.requeued, 1);
    assert_eq!(store.list("predict").await, vec!["orphan".to_string()]);
    assert!(store.list("processing-predict").await.is_empty());
}

/// A live entry survives any number of sweeps
#[tokio::test]
async fn test_live_entry_survives_repeated_sweeps() {
    let store = MemoryQueueStore::default();
    store.insert_processing("processing-predict:w", "busy").await;
    store.set_record("busy", record(1)).await;
    let resolver = resolver(&store);

    for _ in 0..10 {
        resolver.sweep("predict", &running()).await.unwrap();
    }

    assert_eq!(store.list("processing-predict:w").await, vec!["busy".to_string()]);
    assert!(store.list("predict").await.is_empty());
}

/// Requeued work can be claimed again and recovered again
#[tokio::test]
async fn test_recovered_entry_can_be_reclaimed() {
    let store = MemoryQueueStore::default();
    store.push_work("predict", "job").await;
    let claimed = store.claim("predict", "processing-predict:w1").await;
    assert_eq!(claimed.as_deref(), Some("job"));

    resolver(&store).sweep("predict", &running()).await.unwrap();
    assert_eq!(store.list("predict").await, vec!["job".to_string()]);

    let reclaimed = store.claim("predict", "processing-predict:w2").await;
    assert_eq!(reclaimed.as_deref(), Some("job"));
    assert!(store.list("processing-predict:w1").await.is_empty());
}
