//! Range-sharded tables.

mod common;

use common::{open_memory, open_memory_with, restart, test_config};
use shelfdb_core::{
    collect_rows, dissect, CoreError, Document, IndexSpec, Interval, IntervalProvider,
    IntervalSet, Predicate, RowCursor, RowKey, Selector, StorageEngine, Update,
};
use shelfdb_storage::InMemoryBackend;
use std::sync::Arc;
use std::time::Duration;

fn keys(rows: &[(RowKey, Document)]) -> Vec<i64> {
    rows.iter().filter_map(|(k, _)| k.as_int()).collect()
}

#[test]
fn intervals_follow_base_and_width() {
    let provider = IntervalProvider::new(0, 100).unwrap();
    let interval = provider.interval_for(250);
    assert_eq!(interval, Interval::closed_open(200, 300));
    assert_eq!(provider.next_interval(&interval, -1), Interval::closed_open(100, 200));
    assert_eq!(interval.to_string(), "[200, 300)");
}

#[test]
fn point_predicates_visit_one_shard() {
    let set: IntervalSet<i64> =
        dissect(&Predicate::eq(Selector::Key, 42), &IndexSpec::row_key()).unwrap();
    assert_eq!(set, IntervalSet::of(Interval::point(42)));

    let db = open_memory(&Arc::new(InMemoryBackend::new()));
    let events = db.sharded_table("events", 0, 100).unwrap();
    for k in [10, 150, 250] {
        events.insert_row(None, RowKey::Int(k), Document::from(k)).unwrap();
    }
    assert_eq!(
        events.shards(),
        vec![
            Interval::closed_open(0, 100),
            Interval::closed_open(100, 200),
            Interval::closed_open(200, 300),
        ]
    );
    assert_eq!(
        events.plan(&Predicate::eq(Selector::Key, 42)).unwrap(),
        vec![Interval::closed_open(0, 100)]
    );
    assert_eq!(
        events
            .plan(&Predicate::And(vec![
                Predicate::gte(Selector::Key, 150),
                Predicate::lt(Selector::Key, 200),
            ]))
            .unwrap(),
        vec![Interval::closed_open(100, 200)]
    );
    assert_eq!(events.plan(&Predicate::eq(Selector::Key, 999)).unwrap(), vec![]);
    assert_eq!(events.plan(&Predicate::All).unwrap().len(), 3);
}

#[test]
fn point_operations_route_by_key() {
    let db = open_memory(&Arc::new(InMemoryBackend::new()));
    let events = db.sharded_table("events", 0, 100).unwrap();

    events.insert_row(None, RowKey::Int(-5), Document::from("neg")).unwrap();
    events.insert_row(None, RowKey::Int(5), Document::from("pos")).unwrap();
    assert_eq!(events.open_shards(), 2);
    assert_eq!(
        events.shards(),
        vec![Interval::closed_open(-100, 0), Interval::closed_open(0, 100)]
    );
    assert!(db.tables().unwrap().contains(&"events@-100".to_string()));

    assert_eq!(events.read_row(None, &RowKey::Int(-5)).unwrap(), Some(Document::from("neg")));
    events.replace_row(None, RowKey::Int(5), Document::from("POS")).unwrap();
    assert_eq!(events.read_row(None, &RowKey::Int(5)).unwrap(), Some(Document::from("POS")));
    events.delete_row(None, &RowKey::Int(5)).unwrap();
    assert_eq!(events.read_row(None, &RowKey::Int(5)).unwrap(), None);

    assert!(matches!(
        events.insert_row(None, RowKey::from("text"), Document::Null),
        Err(CoreError::InvalidQuery { .. })
    ));
    assert!(matches!(
        events.query_table(None, &Predicate::eq(Selector::Key, "text")),
        Err(CoreError::InvalidQuery { .. })
    ));
}

#[test]
fn composite_cursor_walks_shards_in_key_order() {
    let db = open_memory(&Arc::new(InMemoryBackend::new()));
    let events = db.sharded_table("events", 0, 100).unwrap();
    for k in [250, 10, 150, 99, 100, 299] {
        events.insert_row(None, RowKey::Int(k), Document::from(k)).unwrap();
    }

    let rows = collect_rows(events.query_table(None, &Predicate::All).unwrap()).unwrap();
    assert_eq!(keys(&rows), vec![10, 99, 100, 150, 250, 299]);

    let range = Predicate::And(vec![
        Predicate::gt(Selector::Key, 99),
        Predicate::lte(Selector::Key, 250),
    ]);
    let rows = collect_rows(events.query_table(None, &range).unwrap()).unwrap();
    assert_eq!(keys(&rows), vec![100, 150, 250]);

    let by_value = Predicate::Or(vec![
        Predicate::eq(Selector::field(""), 10),
        Predicate::eq(Selector::field(""), 299),
    ]);
    let rows = collect_rows(events.query_table(None, &by_value).unwrap()).unwrap();
    assert_eq!(keys(&rows), vec![10, 299]);
}

#[test]
fn composite_cursor_keeps_its_snapshot() {
    let db = open_memory(&Arc::new(InMemoryBackend::new()));
    let events = db.sharded_table("events", 0, 100).unwrap();
    for k in [1, 101, 201] {
        events.insert_row(None, RowKey::Int(k), Document::from(k)).unwrap();
    }

    let mut cursor = events.query_table(None, &Predicate::All).unwrap();
    let first = cursor.next().unwrap().unwrap();
    assert_eq!(first.0, RowKey::Int(1));

    // Later shards are opened after these commits but read the old view.
    events.replace_row(None, RowKey::Int(201), Document::from(0)).unwrap();
    events.delete_row(None, &RowKey::Int(101)).unwrap();

    let rest: Vec<_> = cursor.by_ref().map(Result::unwrap).collect();
    assert_eq!(
        rest,
        vec![
            (RowKey::Int(101), Document::from(101)),
            (RowKey::Int(201), Document::from(201)),
        ]
    );
    cursor.close().unwrap();
}

#[test]
fn transactions_span_shards() {
    let db = open_memory(&Arc::new(InMemoryBackend::new()));
    let events = db.sharded_table("events", 0, 100).unwrap();

    let txn = db.begin().unwrap();
    events.insert_row(Some(&txn), RowKey::Int(1), Document::from(1)).unwrap();
    events.insert_row(Some(&txn), RowKey::Int(301), Document::from(301)).unwrap();
    assert_eq!(txn.tables(), vec!["events@0".to_string(), "events@300".to_string()]);

    let own = collect_rows(events.query_table(Some(&txn), &Predicate::All).unwrap()).unwrap();
    assert_eq!(keys(&own), vec![1, 301]);
    let others = collect_rows(events.query_table(None, &Predicate::All).unwrap()).unwrap();
    assert!(others.is_empty());

    db.commit(&txn).unwrap();
    let rows = collect_rows(events.query_table(None, &Predicate::All).unwrap()).unwrap();
    assert_eq!(keys(&rows), vec![1, 301]);
}

#[test]
fn bulk_operations_fan_out() {
    let db = open_memory(&Arc::new(InMemoryBackend::new()));
    let events = db.sharded_table("events", 0, 10).unwrap();
    for k in 0..50 {
        events
            .insert_row(None, RowKey::Int(k), Document::map([("n", k)]))
            .unwrap();
    }

    let middle = Predicate::And(vec![
        Predicate::gte(Selector::Key, 15),
        Predicate::lt(Selector::Key, 35),
    ]);
    assert_eq!(events.update_all(None, &middle, &Update::increment("n", 1000)).unwrap(), 20);
    assert_eq!(events.delete_all(None, &Predicate::lt(Selector::Key, 10)).unwrap(), 10);

    let rows = collect_rows(events.query_table(None, &Predicate::All).unwrap()).unwrap();
    assert_eq!(rows.len(), 40);
    assert_eq!(rows[5].0, RowKey::Int(15));
    assert_eq!(rows[5].1.get("n"), Some(&Document::from(1015)));
}

#[test]
fn persisted_shards_are_known_at_open() {
    let backend = Arc::new(InMemoryBackend::new());
    {
        let db = open_memory(&backend);
        let events = db.sharded_table("events", 0, 100).unwrap();
        for k in [5, 105, 205] {
            events.insert_row(None, RowKey::Int(k), Document::from(k)).unwrap();
        }
        db.close().unwrap();
    }

    let db = open_memory(&restart(&backend));
    assert_eq!(
        db.tables().unwrap(),
        vec!["events@0".to_string(), "events@100".to_string(), "events@200".to_string()]
    );
    let events = db.sharded_table("events", 0, 100).unwrap();
    assert_eq!(events.shards().len(), 3);
    assert_eq!(events.open_shards(), 0);

    let rows = collect_rows(events.query_table(None, &Predicate::gte(Selector::Key, 100)).unwrap()).unwrap();
    assert_eq!(keys(&rows), vec![105, 205]);
    assert_eq!(events.open_shards(), 2);
}

#[test]
fn idle_shards_are_evicted_and_reopened() {
    let backend = Arc::new(InMemoryBackend::new());
    let config = test_config().shard_idle_timeout(Duration::ZERO);
    let db = open_memory_with(&backend, config);
    let events = db.sharded_table("events", 0, 100).unwrap();
    for k in [1, 101, 201] {
        events.insert_row(None, RowKey::Int(k), Document::from(k)).unwrap();
    }

    // An open cursor and an uncommitted write pin their shards.
    let cursor = events.query_table(None, &Predicate::lt(Selector::Key, 100)).unwrap();
    let txn = db.begin().unwrap();
    events.insert_row(Some(&txn), RowKey::Int(102), Document::from(102)).unwrap();

    assert_eq!(events.evict_idle(), 1);
    assert_eq!(events.open_shards(), 2);

    drop(cursor);
    db.commit(&txn).unwrap();
    assert_eq!(events.evict_idle(), 2);
    assert_eq!(events.open_shards(), 0);
    assert_eq!(events.shards().len(), 3);

    // Evicted shards flushed on the way out and reopen on demand.
    assert_eq!(events.read_row(None, &RowKey::Int(201)).unwrap(), Some(Document::from(201)));
    let rows = collect_rows(events.query_table(None, &Predicate::All).unwrap()).unwrap();
    assert_eq!(keys(&rows), vec![1, 101, 102, 201]);
}

#[test]
fn eviction_keeps_shards_older_transactions_read() {
    let backend = Arc::new(InMemoryBackend::new());
    let db = open_memory_with(&backend, test_config().shard_idle_timeout(Duration::ZERO));
    let events = db.sharded_table("events", 0, 100).unwrap();
    events.insert_row(None, RowKey::Int(5), Document::from("v1")).unwrap();

    let txn = db.begin().unwrap();
    assert_eq!(events.read_row(Some(&txn), &RowKey::Int(5)).unwrap(), Some(Document::from("v1")));
    events.replace_row(None, RowKey::Int(5), Document::from("v2")).unwrap();

    // Reloading the shard would drop the version the transaction sees.
    assert_eq!(events.evict_idle(), 0);
    assert_eq!(events.read_row(Some(&txn), &RowKey::Int(5)).unwrap(), Some(Document::from("v1")));

    db.revert(&txn).unwrap();
    assert_eq!(events.evict_idle(), 1);
    assert_eq!(events.read_row(None, &RowKey::Int(5)).unwrap(), Some(Document::from("v2")));
}

#[test]
fn eviction_keeps_shards_an_open_cursor_will_read() {
    let backend = Arc::new(InMemoryBackend::new());
    let db = open_memory_with(&backend, test_config().shard_idle_timeout(Duration::ZERO));
    let events = db.sharded_table("events", 0, 100).unwrap();
    for k in [1, 101, 201] {
        events.insert_row(None, RowKey::Int(k), Document::from(k)).unwrap();
    }

    let mut cursor = events.query_table(None, &Predicate::All).unwrap();
    assert_eq!(cursor.next().unwrap().unwrap().0, RowKey::Int(1));
    events.replace_row(None, RowKey::Int(201), Document::from(0)).unwrap();

    // Only the untouched middle shard may go; it reloads unchanged.
    assert_eq!(events.evict_idle(), 1);
    assert_eq!(events.open_shards(), 2);

    let rest: Vec<_> = cursor.by_ref().map(Result::unwrap).collect();
    assert_eq!(
        rest,
        vec![
            (RowKey::Int(101), Document::from(101)),
            (RowKey::Int(201), Document::from(201)),
        ]
    );
    cursor.close().unwrap();

    assert_eq!(events.evict_idle(), 3);
    assert_eq!(events.read_row(None, &RowKey::Int(201)).unwrap(), Some(Document::from(0)));
}

#[test]
fn sweep_evicts_in_the_background() {
    let backend = Arc::new(InMemoryBackend::new());
    let config = test_config()
        .shard_idle_timeout(Duration::from_millis(20))
        .shard_sweep_interval(Duration::from_millis(10));
    let db = open_memory_with(&backend, config);
    let events = db.sharded_table("events", 0, 100).unwrap();
    events.insert_row(None, RowKey::Int(1), Document::from(1)).unwrap();
    assert_eq!(events.open_shards(), 1);

    assert!(common::wait_until(Duration::from_secs(5), || events.open_shards() == 0));
    assert_eq!(events.read_row(None, &RowKey::Int(1)).unwrap(), Some(Document::from(1)));
}
