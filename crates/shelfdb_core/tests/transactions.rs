//! Row store operations and snapshot-isolated transactions.

mod common;

use common::{open_memory, person};
use shelfdb_core::{
    collect_rows, CoreError, Document, Predicate, RowCursor, RowKey, Selector, StorageEngine,
    TransactionStatus, Update, Upserted,
};
use shelfdb_storage::InMemoryBackend;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

fn key(k: &str) -> RowKey {
    RowKey::from(k)
}

#[test]
fn autocommit_insert_read_delete() {
    let db = open_memory(&Arc::new(InMemoryBackend::new()));
    let table = db.table("things").unwrap();
    let payload = person("alice", 30);

    table.insert_row(None, key("a"), payload.clone()).unwrap();
    assert_eq!(table.read_row(None, &key("a")).unwrap(), Some(payload));

    table.delete_row(None, &key("a")).unwrap();
    assert_eq!(table.read_row(None, &key("a")).unwrap(), None);
    assert!(matches!(
        table.delete_row(None, &key("a")),
        Err(CoreError::KeyNotFound { .. })
    ));
}

#[test]
fn first_committer_wins() {
    let db = open_memory(&Arc::new(InMemoryBackend::new()));
    let table = db.table("things").unwrap();
    table.insert_row(None, key("x"), Document::from(0)).unwrap();

    let tx1 = db.begin().unwrap();
    table.replace_row(Some(&tx1), key("x"), Document::from(1)).unwrap();

    let (ready_tx, ready_rx) = mpsc::channel();
    let (go_tx, go_rx) = mpsc::channel::<()>();
    let (db_ref, table_ref) = (&db, &table);
    let result = thread::scope(|s| {
        let second = s.spawn(move || {
            let tx2 = db_ref.begin().unwrap();
            table_ref.replace_row(Some(&tx2), key("x"), Document::from(2)).unwrap();
            ready_tx.send(()).unwrap();
            go_rx.recv().unwrap();
            let result = db_ref.commit(&tx2);
            (result, tx2.status())
        });

        ready_rx.recv().unwrap();
        db.commit(&tx1).unwrap();
        go_tx.send(()).unwrap();
        second.join().unwrap()
    });

    assert!(matches!(result.0, Err(CoreError::WriteConflict { .. })));
    assert_eq!(result.1, TransactionStatus::Reverted);
    assert_eq!(table.read_row(None, &key("x")).unwrap(), Some(Document::from(1)));
}

#[test]
fn insert_rejects_visible_duplicates() {
    let db = open_memory(&Arc::new(InMemoryBackend::new()));
    let table = db.table("things").unwrap();
    table.insert_row(None, RowKey::Int(1), Document::from("a")).unwrap();
    assert!(matches!(
        table.insert_row(None, RowKey::Int(1), Document::from("b")),
        Err(CoreError::DuplicateKey { .. })
    ));

    // A deleted key can be inserted again.
    table.delete_row(None, &RowKey::Int(1)).unwrap();
    table.insert_row(None, RowKey::Int(1), Document::from("c")).unwrap();
    assert_eq!(table.read_row(None, &RowKey::Int(1)).unwrap(), Some(Document::from("c")));
}

#[test]
fn transactions_read_their_own_writes() {
    let db = open_memory(&Arc::new(InMemoryBackend::new()));
    let table = db.table("things").unwrap();

    let txn = db.begin().unwrap();
    table.insert_row(Some(&txn), key("k"), Document::from("mine")).unwrap();
    assert_eq!(table.read_row(Some(&txn), &key("k")).unwrap(), Some(Document::from("mine")));
    assert_eq!(table.read_row(None, &key("k")).unwrap(), None);

    table.replace_row(Some(&txn), key("k"), Document::from("again")).unwrap();
    assert_eq!(table.read_row(Some(&txn), &key("k")).unwrap(), Some(Document::from("again")));

    db.commit(&txn).unwrap();
    assert_eq!(table.read_row(None, &key("k")).unwrap(), Some(Document::from("again")));
}

#[test]
fn transactions_do_not_see_later_commits() {
    let db = open_memory(&Arc::new(InMemoryBackend::new()));
    let table = db.table("things").unwrap();
    table.insert_row(None, key("k"), Document::from(1)).unwrap();

    let txn = db.begin().unwrap();
    table.replace_row(None, key("k"), Document::from(2)).unwrap();
    table.insert_row(None, key("new"), Document::from(3)).unwrap();

    assert_eq!(table.read_row(Some(&txn), &key("k")).unwrap(), Some(Document::from(1)));
    assert_eq!(table.read_row(Some(&txn), &key("new")).unwrap(), None);
    let rows = collect_rows(table.query_table(Some(&txn), &Predicate::All).unwrap()).unwrap();
    assert_eq!(rows, vec![(key("k"), Document::from(1))]);
    db.revert(&txn).unwrap();
}

#[test]
fn revert_and_drop_discard_writes() {
    let db = open_memory(&Arc::new(InMemoryBackend::new()));
    let table = db.table("things").unwrap();

    let txn = db.begin().unwrap();
    table.insert_row(Some(&txn), key("a"), Document::from(1)).unwrap();
    db.revert(&txn).unwrap();
    assert_eq!(table.read_row(None, &key("a")).unwrap(), None);
    assert!(table.insert_row(Some(&txn), key("a"), Document::from(1)).is_err());

    {
        let txn = db.begin().unwrap();
        table.insert_row(Some(&txn), key("b"), Document::from(2)).unwrap();
    }
    assert_eq!(table.read_row(None, &key("b")).unwrap(), None);
    assert!(!table.has_pending());
    assert_eq!(db.coordinator().open_count(), 0);
}

#[test]
fn commits_span_tables() {
    let db = open_memory(&Arc::new(InMemoryBackend::new()));
    let accounts = db.table("accounts").unwrap();
    let audit = db.table("audit").unwrap();
    let balance = |n: i64| Document::map([("balance", n)]);
    accounts.insert_row(None, RowKey::Int(1), balance(100)).unwrap();

    let txid = db
        .transaction(|txn| {
            accounts.update_row(Some(txn), &RowKey::Int(1), &Update::increment("balance", -30))?;
            audit.insert_row(Some(txn), RowKey::Int(1), Document::from("withdraw 30"))?;
            assert_eq!(txn.tables(), vec!["accounts".to_string(), "audit".to_string()]);
            Ok(txn.id())
        })
        .unwrap();
    assert!(txid.as_u64() > 0);

    assert_eq!(accounts.read_row(None, &RowKey::Int(1)).unwrap(), Some(balance(70)));
    assert_eq!(
        audit.read_row(None, &RowKey::Int(1)).unwrap(),
        Some(Document::from("withdraw 30"))
    );
    assert!(db.coordinator().journal().is_empty().unwrap());
}

#[test]
fn failed_closure_reverts_every_table() {
    let db = open_memory(&Arc::new(InMemoryBackend::new()));
    let a = db.table("a").unwrap();
    let b = db.table("b").unwrap();

    let result: Result<(), CoreError> = db.transaction(|txn| {
        a.insert_row(Some(txn), RowKey::Int(1), Document::from(1))?;
        b.insert_row(Some(txn), RowKey::Int(1), Document::from(1))?;
        Err(CoreError::invalid_query("abort"))
    });
    assert!(result.is_err());
    assert_eq!(a.read_row(None, &RowKey::Int(1)).unwrap(), None);
    assert_eq!(b.read_row(None, &RowKey::Int(1)).unwrap(), None);
}

#[test]
fn update_and_upsert() {
    let db = open_memory(&Arc::new(InMemoryBackend::new()));
    let table = db.table("people").unwrap();

    assert_eq!(
        table.upsert_row(None, RowKey::Int(1), person("ann", 20)).unwrap(),
        Upserted::Inserted
    );
    assert_eq!(
        table.upsert_row(None, RowKey::Int(1), person("ann", 21)).unwrap(),
        Upserted::Updated
    );

    assert!(table
        .update_row(None, &RowKey::Int(1), &Update::increment("age", 1))
        .unwrap());
    assert!(!table
        .update_row(None, &RowKey::Int(1), &Update::set("name", "ann"))
        .unwrap());
    assert!(matches!(
        table.update_row(None, &RowKey::Int(2), &Update::set("name", "bob")),
        Err(CoreError::KeyNotFound { .. })
    ));
    assert!(matches!(
        table.replace_row(None, RowKey::Int(2), person("bob", 1)),
        Err(CoreError::KeyNotFound { .. })
    ));

    let doc = table.read_row(None, &RowKey::Int(1)).unwrap().unwrap();
    assert_eq!(doc.get("age"), Some(&Document::from(22)));
}

#[test]
fn bulk_operations_count_matching_rows() {
    let db = open_memory(&Arc::new(InMemoryBackend::new()));
    let table = db.table("people").unwrap();
    for (k, age) in [(1, 10), (2, 20), (3, 30), (4, 40)] {
        table.insert_row(None, RowKey::Int(k), person("p", age)).unwrap();
    }

    let adults = Predicate::gte(Selector::field("age"), 18);
    let bump = |doc: &mut Document| doc.set_path("adult", Document::from(true));
    assert_eq!(table.update_all(None, &adults, &bump).unwrap(), 3);
    assert_eq!(table.update_all(None, &adults, &bump).unwrap(), 0);

    let old = Predicate::gt(Selector::field("age"), 25);
    assert_eq!(table.delete_all(None, &old).unwrap(), 2);

    let rows = collect_rows(table.query_table(None, &Predicate::All).unwrap()).unwrap();
    let keys: Vec<_> = rows.iter().map(|(k, _)| k.clone()).collect();
    assert_eq!(keys, vec![RowKey::Int(1), RowKey::Int(2)]);
    assert_eq!(rows[1].1.get("adult"), Some(&Document::from(true)));
    assert_eq!(rows[0].1.get("adult"), None);
}

#[test]
fn cursors_keep_their_snapshot() {
    let db = open_memory(&Arc::new(InMemoryBackend::new()));
    let table = db.table("things").unwrap();
    for k in [3, 1, 2] {
        table.insert_row(None, RowKey::Int(k), Document::from(k)).unwrap();
    }

    let mut cursor = table.query_table(None, &Predicate::All).unwrap();
    assert_eq!(table.open_cursors(), 1);
    table.replace_row(None, RowKey::Int(2), Document::from(200)).unwrap();
    table.insert_row(None, RowKey::Int(0), Document::from(0)).unwrap();

    let rows: Vec<_> = cursor.by_ref().map(Result::unwrap).collect();
    assert_eq!(
        rows,
        vec![
            (RowKey::Int(1), Document::from(1)),
            (RowKey::Int(2), Document::from(2)),
            (RowKey::Int(3), Document::from(3)),
        ]
    );
    // Exhausted cursors release themselves.
    assert_eq!(table.open_cursors(), 0);
    cursor.close().unwrap();
}

#[test]
fn conflicting_delete_aborts_later_transaction() {
    let db = open_memory(&Arc::new(InMemoryBackend::new()));
    let table = db.table("things").unwrap();
    table.insert_row(None, RowKey::Int(1), person("a", 1)).unwrap();

    let txn = db.begin().unwrap();
    assert!(table
        .update_row(Some(&txn), &RowKey::Int(1), &Update::increment("age", 1))
        .unwrap());
    table.delete_row(None, &RowKey::Int(1)).unwrap();

    let err = db.commit(&txn).unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(table.read_row(None, &RowKey::Int(1)).unwrap(), None);
    assert!(db.commit(&txn).is_err());
}

#[test]
fn stats_count_operations() {
    let db = open_memory(&Arc::new(InMemoryBackend::new()));
    let table = db.table("things").unwrap();
    table.insert_row(None, RowKey::Int(1), Document::from(1)).unwrap();
    table.read_row(None, &RowKey::Int(1)).unwrap();
    table.delete_row(None, &RowKey::Int(1)).unwrap();
    collect_rows(table.query_table(None, &Predicate::All).unwrap()).unwrap();

    let stats = table.stats();
    assert_eq!(stats.writes, 1);
    assert_eq!(stats.deletes, 1);
    assert_eq!(stats.scans, 1);
    assert_eq!(stats.commits, 2);
    assert!(stats.reads >= 1);
}
