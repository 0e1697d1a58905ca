//! Tests for ShardedStore
//!
//! These tests verify:
//! - Basic put/get/upsert/retrieve through the drain loop
//! - Batch splitting and query grouping limits
//! - Pagination and filter shrinking
//! - Deduplication of concurrent lookups
//! - Failure isolation between partitions
//! - Shutdown behavior

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use shardtable::service::{Filter, TableService};
use shardtable::{
    page_callback, Entity, OperationKind, PageSignal, ShardedStore, StoreConfig, StoreError,
};

use common::{
    gated_store, gated_store_with_pages, keys_in_distinct_partitions, memory_store,
    memory_store_with_pages,
};

fn keys(prefix: &str, count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| format!("{}{:04}", prefix, i).into_bytes())
        .collect()
}

fn targets_of(filter: &Filter) -> usize {
    filter.target_count()
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_open_creates_table() {
    let (service, _store) = memory_store(4);
    assert_eq!(service.stats().create_calls, 1);
}

#[test]
fn test_open_rejects_zero_shards() {
    let service = Arc::new(shardtable::InMemoryTableService::new());
    let config = StoreConfig::builder().shard_count(0).build();
    let result = ShardedStore::open(service, config);
    assert!(matches!(result, Err(StoreError::Config(_))));
}

#[test]
fn test_open_rejects_limits_above_backend_maximum() {
    let service = Arc::new(shardtable::InMemoryTableService::new());
    let mut config = StoreConfig::default();
    config.batch_limit = 250;
    let result = ShardedStore::open(Arc::clone(&service), config);
    assert!(matches!(result, Err(StoreError::Config(_))));

    let mut config = StoreConfig::default();
    config.query_group_limit = 101;
    let result = ShardedStore::open(service, config);
    assert!(matches!(result, Err(StoreError::Config(_))));
}

#[test]
fn test_put_get() {
    let (_service, store) = memory_store(4);

    store.put(b"hello", b"world").unwrap();
    assert_eq!(store.get(b"hello").unwrap(), b"world".to_vec());
}

#[test]
fn test_get_nonexistent_key() {
    let (_service, store) = memory_store(4);
    assert_eq!(store.get(b"nonexistent"), Err(StoreError::NotFound));
}

#[test]
fn test_put_overwrite() {
    let (_service, store) = memory_store(4);

    store.put(b"key", b"value1").unwrap();
    store.put(b"key", b"value2").unwrap();
    assert_eq!(store.get(b"key").unwrap(), b"value2".to_vec());
}

#[test]
fn test_retrieve_entities_in_request_order() {
    let (_service, store) = memory_store(8);
    let written = keys("k", 20);
    store
        .upsert(written.iter().map(|k| Entity::new(k.clone(), k.clone())))
        .unwrap();

    let mut requested = written.clone();
    requested.reverse();
    requested.push(b"missing".to_vec());

    let found = store
        .retrieve_entities(requested.iter().map(|k| Entity::key_only(k.clone())))
        .unwrap();

    assert_eq!(found.len(), requested.len());
    for (entity, key) in found.iter().zip(&requested) {
        assert_eq!(&entity.key, key);
        assert_eq!(entity.partition, store.partition_of(key));
    }
    for entity in &found[..20] {
        assert_eq!(entity.value.as_ref(), Some(&entity.key));
    }
    assert_eq!(found[20].value, None);
}

#[test]
fn test_settled_operation_completes_without_backend_call() {
    let (service, store) = memory_store(4);
    let entity = Entity::new(b"k".to_vec(), b"v".to_vec());

    let result = store
        .submit(entity.clone(), OperationKind::Settled, None)
        .wait()
        .unwrap();

    assert_eq!(result.value, entity.value);
    let stats = service.stats();
    assert_eq!(stats.batch_calls(), 0);
    assert_eq!(stats.page_calls(), 0);
}

// =============================================================================
// Batching Tests
// =============================================================================

#[test]
fn test_250_upserts_make_three_batches() {
    let (service, store) = memory_store(1);

    store
        .upsert(keys("k", 250).into_iter().map(|k| Entity::new(k, b"v".to_vec())))
        .unwrap();

    let mut sizes = service.stats().batch_sizes;
    sizes.sort_unstable_by(|a, b| b.cmp(a));
    assert_eq!(sizes, vec![100, 100, 50]);
    assert_eq!(service.row_count(), 250);
}

#[test]
fn test_150_retrieves_split_into_groups() {
    let (service, store) = memory_store(1);
    let all = keys("k", 150);
    store
        .upsert(all.iter().map(|k| Entity::new(k.clone(), b"v".to_vec())))
        .unwrap();
    service.reset_stats();

    let found = store
        .retrieve_entities(all.iter().map(|k| Entity::key_only(k.clone())))
        .unwrap();
    assert!(found.iter().all(Entity::is_found));

    let filters = service.stats().filters;
    assert!(filters.len() >= 2);
    assert!(filters.iter().all(|f| targets_of(f) <= 100));
    assert_eq!(filters.iter().map(targets_of).sum::<usize>(), 150);
}

#[test]
fn test_upserts_to_many_partitions() {
    let (service, store) = memory_store(16);

    store
        .upsert(keys("k", 500).into_iter().map(|k| Entity::new(k, b"v".to_vec())))
        .unwrap();

    let stats = service.stats();
    assert!(stats.batch_sizes.iter().all(|&n| n <= 100));
    assert_eq!(stats.batch_sizes.iter().sum::<usize>(), 500);
    assert_eq!(service.row_count(), 500);
}

// =============================================================================
// Pagination Tests
// =============================================================================

#[test]
fn test_three_pages_are_drained() {
    let (service, store) = memory_store_with_pages(1, 1);
    let all = keys("k", 3);
    store
        .upsert(all.iter().map(|k| Entity::new(k.clone(), b"v".to_vec())))
        .unwrap();
    service.reset_stats();

    let pages = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&pages);
    let callback = page_callback(move |page: &[Entity]| {
        sink.lock().push(page.len());
        PageSignal::Continue
    });

    let completions = store.submit_many(
        all.iter().map(|k| Entity::key_only(k.clone())),
        OperationKind::Retrieve,
        Some(callback),
    );
    for completion in completions {
        assert!(completion.wait().unwrap().is_found());
    }

    // Filter untouched by Continue: three calls with all three targets
    let filters = service.stats().filters;
    assert_eq!(filters.iter().map(targets_of).collect::<Vec<_>>(), vec![3, 3, 3]);
    assert_eq!(*pages.lock(), vec![1, 1, 1]);
}

#[test]
fn test_no_retrieve_settles_before_last_page() {
    let (service, store) = gated_store_with_pages(1, 1);
    let all = keys("k", 3);
    store
        .upsert(all.iter().map(|k| Entity::new(k.clone(), b"v".to_vec())))
        .unwrap();

    service.close();
    let completions = store.submit_many(
        all.iter().map(|k| Entity::key_only(k.clone())),
        OperationKind::Retrieve,
        None,
    );

    // Let pages one and two through, hold the third call
    service.wait_entered();
    service.release_one();
    service.wait_entered();
    service.release_one();
    service.wait_entered();

    // Rows from the first two pages are resolved but not settled yet
    for completion in &completions {
        assert!(completion.try_get().is_none());
    }

    service.open();
    for completion in completions {
        assert!(completion.wait().unwrap().is_found());
    }
    assert_eq!(service.inner.stats().page_calls(), 3);
}

#[test]
fn test_satisfied_shrinks_filter() {
    let (service, store) = memory_store_with_pages(1, 1);
    let all = keys("k", 3);
    store
        .upsert(all.iter().map(|k| Entity::new(k.clone(), b"v".to_vec())))
        .unwrap();
    service.reset_stats();

    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);
    store
        .retrieve(
            all.iter().map(|k| Entity::key_only(k.clone())),
            Some(page_callback(move |page: &[Entity]| {
                counter.fetch_add(page.len(), Ordering::SeqCst);
                PageSignal::Satisfied
            })),
        )
        .unwrap();

    let filters = service.stats().filters;
    assert_eq!(filters.iter().map(targets_of).collect::<Vec<_>>(), vec![3, 2, 1]);
    assert_eq!(delivered.load(Ordering::SeqCst), 3);
}

#[test]
fn test_missing_keys_are_not_delivered() {
    let (_service, store) = memory_store(4);
    store.put(b"present", b"v").unwrap();

    let delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&delivered);
    store
        .retrieve(
            vec![Entity::key_only(b"present".to_vec()), Entity::key_only(b"absent".to_vec())],
            Some(page_callback(move |page: &[Entity]| {
                sink.lock().extend(page.iter().map(|e| e.key.clone()));
                PageSignal::Satisfied
            })),
        )
        .unwrap();

    assert_eq!(*delivered.lock(), vec![b"present".to_vec()]);
}

// =============================================================================
// Deduplication Tests
// =============================================================================

#[test]
fn test_concurrent_retrieves_of_one_key_share_a_query() {
    let (service, store) = gated_store(4);
    store.put(b"shared", b"value").unwrap();

    // Hold the drain loop inside a batch write so the retrieves pile up
    // for the next cycle
    service.close();
    let blocker = store.submit(
        Entity::new(b"blocker".to_vec(), b"x".to_vec()),
        OperationKind::Upsert,
        None,
    );
    service.wait_entered();
    service.inner.reset_stats();

    let store = Arc::new(store);
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                store.submit(Entity::key_only(b"shared".to_vec()), OperationKind::Retrieve, None)
            })
        })
        .collect();
    let completions: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(store.pending_len(), 8);

    service.open();
    blocker.wait().unwrap();
    for completion in completions {
        assert_eq!(completion.wait().unwrap().value, Some(b"value".to_vec()));
    }

    let filters = service.inner.stats().filters;
    assert_eq!(filters.len(), 1);
    assert_eq!(filters[0].target_count(), 1);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_writers_then_readers() {
    let (_service, store) = memory_store(32);
    let store = Arc::new(store);

    let writers: Vec<_> = (0..8)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..25 {
                    let key = format!("thread{}_key{}", t, i);
                    let value = format!("thread{}_value{}", t, i);
                    store.put(key.as_bytes(), value.as_bytes()).unwrap();
                }
            })
        })
        .collect();
    for handle in writers {
        handle.join().unwrap();
    }

    let readers: Vec<_> = (0..8)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..25 {
                    let key = format!("thread{}_key{}", t, i);
                    let expected = format!("thread{}_value{}", t, i);
                    assert_eq!(store.get(key.as_bytes()).unwrap(), expected.into_bytes());
                }
            })
        })
        .collect();
    for handle in readers {
        handle.join().unwrap();
    }
}

#[test]
fn test_mixed_upserts_and_retrieves_settle_once() {
    let (_service, store) = memory_store(8);
    let store = Arc::new(store);

    let handles: Vec<_> = (0..6)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let mut completions = Vec::new();
                for i in 0..50 {
                    let key = format!("k{}", i % 10).into_bytes();
                    let kind = if (i + t) % 2 == 0 {
                        OperationKind::Upsert
                    } else {
                        OperationKind::Retrieve
                    };
                    let entity = match kind {
                        OperationKind::Upsert => Entity::new(key, b"v".to_vec()),
                        _ => Entity::key_only(key),
                    };
                    completions.push(store.submit(entity, kind, None));
                }
                completions
                    .into_iter()
                    .map(|c| c.wait())
                    .filter(Result::is_ok)
                    .count()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 50);
    }
}

// =============================================================================
// Failure Isolation Tests
// =============================================================================

#[test]
fn test_failing_partition_only_fails_its_operations() {
    let (service, store) = memory_store(8);
    let picked = keys_in_distinct_partitions(8, 2);
    let (bad, good) = (picked[0].clone(), picked[1].clone());
    let bad_partition = store.partition_of(&bad);
    service.fail_partition(bad_partition);

    let completions = store.submit_many(
        vec![Entity::new(bad.clone(), b"x".to_vec()), Entity::new(good.clone(), b"y".to_vec())],
        OperationKind::Upsert,
        None,
    );
    let mut outcomes = completions.into_iter().map(|c| c.wait());

    match outcomes.next().unwrap() {
        Err(StoreError::Backend { partition, .. }) => assert_eq!(partition, bad_partition),
        other => panic!("expected backend error, got {:?}", other),
    }
    assert!(outcomes.next().unwrap().is_ok());

    // Reads are isolated the same way
    let completions = store.submit_many(
        vec![Entity::key_only(bad), Entity::key_only(good)],
        OperationKind::Retrieve,
        None,
    );
    let outcomes: Vec<_> = completions.into_iter().map(|c| c.wait()).collect();
    assert!(outcomes[0].as_ref().unwrap_err().is_backend());
    assert_eq!(outcomes[1].as_ref().unwrap().value, Some(b"y".to_vec()));
}

#[test]
fn test_upsert_reports_first_failure_after_waiting_all() {
    let (service, store) = memory_store(8);
    let picked = keys_in_distinct_partitions(8, 2);
    service.fail_partition(store.partition_of(&picked[0]));

    let result = store.upsert(picked.iter().map(|k| Entity::new(k.clone(), b"v".to_vec())));
    assert!(matches!(result, Err(StoreError::Backend { .. })));

    // The healthy partition was still written
    assert_eq!(store.get(&picked[1]).unwrap(), b"v".to_vec());
}

// =============================================================================
// Shutdown Tests
// =============================================================================

#[test]
fn test_submit_after_dispose_is_rejected() {
    let (_service, store) = memory_store(4);
    store.dispose();
    assert!(store.is_disposed());

    assert_eq!(store.put(b"k", b"v"), Err(StoreError::ShutDown));
    assert_eq!(store.get(b"k"), Err(StoreError::ShutDown));
}

#[test]
fn test_dispose_drains_pending_operations() {
    let (service, store) = gated_store(4);
    service.close();
    let blocker = store.submit(
        Entity::new(b"blocker".to_vec(), b"x".to_vec()),
        OperationKind::Upsert,
        None,
    );
    service.wait_entered();

    let pending = store.submit_many(
        keys("late", 10).into_iter().map(|k| Entity::new(k, b"v".to_vec())),
        OperationKind::Upsert,
        None,
    );

    let store = Arc::new(store);
    let disposer = {
        let store = Arc::clone(&store);
        thread::spawn(move || store.dispose())
    };

    service.open();
    disposer.join().unwrap();

    blocker.wait().unwrap();
    for completion in pending {
        assert!(completion.wait().is_ok());
    }
    assert_eq!(service.inner.row_count(), 11);
}

#[test]
fn test_dispose_from_page_callback_returns() {
    let (_service, store) = memory_store(4);
    let store = Arc::new(store);
    store.put(b"k", b"v").unwrap();

    let inner = Arc::clone(&store);
    let callback = page_callback(move |_page: &[Entity]| {
        inner.dispose();
        PageSignal::Continue
    });
    let completion = store.submit(Entity::key_only(b"k".to_vec()), OperationKind::Retrieve, Some(callback));

    let outcome = completion.wait_timeout(Duration::from_secs(5));
    assert!(outcome.is_some(), "dispose inside a page callback blocked the drain loop");
    assert!(outcome.unwrap().unwrap().is_found());

    assert!(store.is_disposed());
    assert_eq!(store.put(b"late", b"v"), Err(StoreError::ShutDown));
    // Joins the drain thread, which has exited after its final cycle
    store.dispose();
}

#[test]
fn test_dispose_is_idempotent() {
    let (_service, store) = memory_store(4);
    store.put(b"k", b"v").unwrap();
    store.dispose();
    store.dispose();
    assert!(store.cycles_completed() >= 1);
}

#[test]
fn test_idle_store_runs_no_cycles() {
    let (service, store) = memory_store(4);
    std::thread::sleep(std::time::Duration::from_millis(20));
    assert_eq!(store.cycles_completed(), 0);
    assert_eq!(service.stats().batch_calls(), 0);
    assert!(service.create_if_missing().is_ok());
}
