use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use vellum::{MvccSkipList, TransactionStatus, VellumError};

#[test]
fn test_basic_transaction() {
    let list: MvccSkipList<i32, String> = MvccSkipList::with_silent(6, true);

    let txn1 = list.begin_transaction();
    list.insert_element(&txn1, 1, "value1".to_string()).unwrap();
    list.insert_element(&txn1, 2, "value2".to_string()).unwrap();
    list.insert_element(&txn1, 3, "value3".to_string()).unwrap();

    // Read-your-writes inside the same transaction.
    assert_eq!(
        list.search_element(&txn1, &1).unwrap(),
        Some("value1".to_string())
    );
    list.commit_transaction(&txn1).unwrap();

    let txn2 = list.begin_transaction();
    assert_eq!(
        list.search_element(&txn2, &1).unwrap(),
        Some("value1".to_string())
    );
    assert_eq!(
        list.search_element(&txn2, &2).unwrap(),
        Some("value2".to_string())
    );
    list.commit_transaction(&txn2).unwrap();
}

#[test]
fn test_read_committed_isolation() {
    let list: MvccSkipList<i32, String> = MvccSkipList::with_silent(6, true);

    let txn1 = list.begin_transaction();
    list.insert_element(&txn1, 10, "initial".to_string()).unwrap();
    list.commit_transaction(&txn1).unwrap();

    let txn2 = list.begin_transaction();
    list.insert_element(&txn2, 10, "updated_by_txn2".to_string())
        .unwrap();

    // A transaction begun before txn2 commits keeps seeing the old value.
    let txn3 = list.begin_transaction();
    assert_eq!(
        list.search_element(&txn3, &10).unwrap(),
        Some("initial".to_string())
    );

    list.commit_transaction(&txn2).unwrap();

    // One begun after the commit sees the new value.
    let txn4 = list.begin_transaction();
    assert_eq!(
        list.search_element(&txn4, &10).unwrap(),
        Some("updated_by_txn2".to_string())
    );

    list.commit_transaction(&txn3).unwrap();
    list.commit_transaction(&txn4).unwrap();
}

#[test]
fn test_multi_version_management() {
    let list: MvccSkipList<i32, String> = MvccSkipList::with_silent(6, true);

    for i in 1..=3 {
        let txn = list.begin_transaction();
        list.insert_element(&txn, 100, format!("v{}", i)).unwrap();
        list.commit_transaction(&txn).unwrap();
    }

    let txn4 = list.begin_transaction();
    assert_eq!(
        list.search_element(&txn4, &100).unwrap(),
        Some("v3".to_string())
    );
    list.commit_transaction(&txn4).unwrap();

    let stats = list.stats();
    assert_eq!(stats.versions, 3);
    assert_eq!(stats.size, 1);
    assert_eq!(stats.commits, 4);
}

#[test]
fn test_transaction_abort() {
    let list: MvccSkipList<i32, String> = MvccSkipList::with_silent(6, true);

    let txn1 = list.begin_transaction();
    list.insert_element(&txn1, 50, "committed_value".to_string())
        .unwrap();
    list.commit_transaction(&txn1).unwrap();

    let txn2 = list.begin_transaction();
    list.insert_element(&txn2, 50, "aborted_value".to_string())
        .unwrap();
    list.abort_transaction(&txn2);
    assert_eq!(txn2.status(), TransactionStatus::Aborted);

    let txn3 = list.begin_transaction();
    assert_eq!(
        list.search_element(&txn3, &50).unwrap(),
        Some("committed_value".to_string())
    );
    list.commit_transaction(&txn3).unwrap();

    assert_eq!(list.stats().aborts, 1);
}

#[test]
fn test_aborted_writes_invisible_to_range_queries() {
    let list: MvccSkipList<i32, String> = MvccSkipList::with_silent(6, true);

    let txn1 = list.begin_transaction();
    list.insert_element(&txn1, 1, "keep".to_string()).unwrap();
    list.commit_transaction(&txn1).unwrap();

    let txn2 = list.begin_transaction();
    list.insert_element(&txn2, 2, "discard".to_string()).unwrap();
    list.abort_transaction(&txn2);

    let txn3 = list.begin_transaction();
    let results = list.range_query(&txn3, &0, &10).unwrap();
    assert_eq!(results, vec![(1, "keep".to_string())]);
    assert_eq!(list.search_element(&txn3, &2).unwrap(), None);
}

#[test]
fn test_operations_reject_finished_transactions() {
    let list: MvccSkipList<i32, String> = MvccSkipList::with_silent(6, true);

    let txn = list.begin_transaction();
    list.insert_element(&txn, 1, "one".to_string()).unwrap();
    list.commit_transaction(&txn).unwrap();

    assert_eq!(
        list.commit_transaction(&txn),
        Err(VellumError::TransactionNotActive)
    );
    assert_eq!(
        list.insert_element(&txn, 2, "two".to_string()),
        Err(VellumError::TransactionNotActive)
    );
    assert_eq!(
        list.search_element(&txn, &1),
        Err(VellumError::TransactionNotActive)
    );
    assert_eq!(
        list.delete_element(&txn, &1),
        Err(VellumError::TransactionNotActive)
    );
    assert_eq!(
        list.range_query(&txn, &0, &5),
        Err(VellumError::TransactionNotActive)
    );
    // Aborting a committed transaction is a no-op.
    list.abort_transaction(&txn);
    assert_eq!(txn.status(), TransactionStatus::Committed);
}

#[test]
fn test_concurrent_transactions() {
    let list: Arc<MvccSkipList<i32, String>> = Arc::new(MvccSkipList::with_silent(6, true));

    let init = list.begin_transaction();
    for i in 0..10 {
        list.insert_element(&init, i, format!("init_{}", i)).unwrap();
    }
    list.commit_transaction(&init).unwrap();

    let mut handles = Vec::new();

    {
        let list = list.clone();
        handles.push(thread::spawn(move || {
            let txn = list.begin_transaction();
            for i in 0..10 {
                list.search_element(&txn, &i).unwrap();
                thread::sleep(Duration::from_millis(2));
            }
            list.commit_transaction(&txn).unwrap();
        }));
    }
    {
        let list = list.clone();
        handles.push(thread::spawn(move || {
            let txn = list.begin_transaction();
            for i in 0..5 {
                list.insert_element(&txn, i, format!("updated_{}", i)).unwrap();
                thread::sleep(Duration::from_millis(3));
            }
            list.commit_transaction(&txn).unwrap();
        }));
    }
    {
        let list = list.clone();
        handles.push(thread::spawn(move || {
            let txn = list.begin_transaction();
            for i in 10..15 {
                list.insert_element(&txn, i, format!("new_{}", i)).unwrap();
                thread::sleep(Duration::from_millis(2));
            }
            list.commit_transaction(&txn).unwrap();
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    let verify = list.begin_transaction();
    assert_eq!(list.size(), 15);
    for i in 0..5 {
        assert_eq!(
            list.search_element(&verify, &i).unwrap(),
            Some(format!("updated_{}", i))
        );
    }
    for i in 10..15 {
        assert_eq!(
            list.search_element(&verify, &i).unwrap(),
            Some(format!("new_{}", i))
        );
    }
    list.commit_transaction(&verify).unwrap();
}

#[test]
fn test_range_query() {
    let list: MvccSkipList<i32, String> = MvccSkipList::with_silent(6, true);

    let txn1 = list.begin_transaction();
    for i in (0..20).step_by(2) {
        list.insert_element(&txn1, i, format!("value_{}", i)).unwrap();
    }
    list.commit_transaction(&txn1).unwrap();

    let txn2 = list.begin_transaction();
    let results = list.range_query(&txn2, &5, &15).unwrap();
    assert_eq!(
        results,
        vec![
            (6, "value_6".to_string()),
            (8, "value_8".to_string()),
            (10, "value_10".to_string()),
            (12, "value_12".to_string()),
            (14, "value_14".to_string()),
        ]
    );
    list.commit_transaction(&txn2).unwrap();
}

#[test]
fn test_range_query_inverted_bounds_is_empty() {
    let list: MvccSkipList<i32, String> = MvccSkipList::with_silent(6, true);
    let txn = list.begin_transaction();
    list.insert_element(&txn, 1, "one".to_string()).unwrap();
    assert!(list.range_query(&txn, &9, &3).unwrap().is_empty());
}

#[test]
fn test_delete_operation() {
    let list: MvccSkipList<i32, String> = MvccSkipList::with_silent(6, true);

    let txn1 = list.begin_transaction();
    list.insert_element(&txn1, 30, "to_be_deleted".to_string())
        .unwrap();
    list.commit_transaction(&txn1).unwrap();

    let txn2 = list.begin_transaction();
    assert!(list.delete_element(&txn2, &30).unwrap());
    list.commit_transaction(&txn2).unwrap();

    let txn3 = list.begin_transaction();
    assert_eq!(list.search_element(&txn3, &30).unwrap(), None);
    list.commit_transaction(&txn3).unwrap();
}

#[test]
fn test_garbage_collection() {
    let list: MvccSkipList<i32, String> = MvccSkipList::with_silent(6, true);

    for i in 0..10 {
        let txn = list.begin_transaction();
        list.insert_element(&txn, 1, format!("version_{}", i)).unwrap();
        list.commit_transaction(&txn).unwrap();
    }
    assert_eq!(list.stats().versions, 10);

    let reclaimed = list.gc();
    assert!(reclaimed > 0);
    assert!(list.stats().versions < 10);

    let txn = list.begin_transaction();
    assert_eq!(
        list.search_element(&txn, &1).unwrap(),
        Some("version_9".to_string())
    );
    list.commit_transaction(&txn).unwrap();
}

#[test]
fn test_gc_does_not_disturb_active_readers() {
    let list: MvccSkipList<i32, String> = MvccSkipList::with_silent(6, true);

    let txn1 = list.begin_transaction();
    list.insert_element(&txn1, 7, "old".to_string()).unwrap();
    list.commit_transaction(&txn1).unwrap();

    // Reader begins before the rewrite; it must keep seeing "old".
    let reader = list.begin_transaction();
    assert_eq!(
        list.search_element(&reader, &7).unwrap(),
        Some("old".to_string())
    );

    let txn2 = list.begin_transaction();
    list.insert_element(&txn2, 7, "new".to_string()).unwrap();
    list.commit_transaction(&txn2).unwrap();

    list.gc();

    assert_eq!(
        list.search_element(&reader, &7).unwrap(),
        Some("old".to_string())
    );
    list.commit_transaction(&reader).unwrap();
}

#[test]
fn test_gc_reclaims_aborted_versions_once_superseded() {
    let list: MvccSkipList<i32, String> = MvccSkipList::with_silent(6, true);

    let txn1 = list.begin_transaction();
    list.insert_element(&txn1, 5, "first".to_string()).unwrap();
    list.commit_transaction(&txn1).unwrap();

    let txn2 = list.begin_transaction();
    list.insert_element(&txn2, 5, "doomed".to_string()).unwrap();
    list.abort_transaction(&txn2);

    let txn3 = list.begin_transaction();
    list.insert_element(&txn3, 5, "final".to_string()).unwrap();
    list.commit_transaction(&txn3).unwrap();

    assert_eq!(list.stats().versions, 3);
    let reclaimed = list.gc();
    assert!(reclaimed >= 1);

    let txn = list.begin_transaction();
    assert_eq!(
        list.search_element(&txn, &5).unwrap(),
        Some("final".to_string())
    );
}

#[test]
fn test_transaction_ids_are_unique_across_threads() {
    let list: Arc<MvccSkipList<i32, String>> = Arc::new(MvccSkipList::with_silent(6, true));
    let ids = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let list = list.clone();
        let ids = ids.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..100 {
                let txn = list.begin_transaction();
                ids.lock().unwrap().push(txn.id);
                list.commit_transaction(&txn).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let mut ids = Arc::try_unwrap(ids).unwrap().into_inner().unwrap();
    ids.sort_unstable();
    let before = ids.len();
    ids.dedup();
    assert_eq!(before, ids.len(), "duplicate transaction ids handed out");
    assert_eq!(before, 800);
}

#[test]
fn test_stress_concurrent_commits() {
    let list: Arc<MvccSkipList<i32, String>> = Arc::new(MvccSkipList::with_silent(18, true));
    let threads = 4;
    let ops_per_thread = 250;

    let mut handles = Vec::new();
    for t in 0..threads {
        let list = list.clone();
        handles.push(thread::spawn(move || {
            for i in 0..ops_per_thread {
                let txn = list.begin_transaction();
                let key = t * ops_per_thread + i;
                list.insert_element(&txn, key, format!("stress_{}", key))
                    .unwrap();
                if i % 3 == 0 {
                    assert_eq!(
                        list.search_element(&txn, &key).unwrap(),
                        Some(format!("stress_{}", key))
                    );
                }
                list.commit_transaction(&txn).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(list.size(), (threads * ops_per_thread) as usize);
    let stats = list.stats();
    assert_eq!(stats.commits, (threads * ops_per_thread) as u64);
    assert_eq!(stats.active_transactions, 0);

    let verify = list.begin_transaction();
    for key in [0, 1, 499, 500, 999] {
        assert_eq!(
            list.search_element(&verify, &key).unwrap(),
            Some(format!("stress_{}", key))
        );
    }
    list.commit_transaction(&verify).unwrap();
}
