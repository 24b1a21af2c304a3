use chrono::NaiveDate;
use tempfile::TempDir;

use libloan::{
    config::LoanPolicy,
    core::store::LibraryStore,
    engine::{
        borrowing::BorrowingEngine,
        clock::ManualClock,
        traits::{CatalogStore, FinePolicyStore, LoanLedger},
    },
    op::{EntityKind, Op},
    persist::{OpSink, sqlite::SqliteOpSink},
    services::{
        catalog::{BookSubmission, submit_book},
        membership::{BorrowerRegistration, register_borrower},
    },
};

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

/// Two books, two readers, one closed late loan and one open loan.
fn busy_engine() -> BorrowingEngine<LibraryStore, ManualClock> {
    let policy = LoanPolicy::default();
    let mut store = LibraryStore::new();
    store.put_fine_policy("Fiction", 5.0).expect("policy");
    for (title, category) in [("Dune", "Fiction"), ("Cosmos", "Science")] {
        submit_book(
            &mut store,
            BookSubmission {
                title: title.to_string(),
                category: Some(category.to_string()),
                total_copies: 2,
                ..BookSubmission::default()
            },
        )
        .expect("submit");
    }
    for name in ["ada", "bob"] {
        register_borrower(
            &mut store,
            BorrowerRegistration {
                name: name.to_string(),
                email: format!("{name}@example.com"),
                tier: None,
            },
            &policy,
        )
        .expect("register");
    }

    let clock = ManualClock::new(day(2023, 12, 18));
    let mut engine = BorrowingEngine::with_clock(store, policy, clock.clone());
    engine.borrow_book(1, 1).expect("ada borrows dune");
    engine.borrow_book(2, 2).expect("bob borrows cosmos");
    clock.set(day(2024, 1, 5));
    engine.return_book(1, 1).expect("ada returns late");
    engine
}

#[test]
fn sqlite_replay_round_trips_state_and_order() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("library.db");

    let mut engine = busy_engine();
    let mut sink = SqliteOpSink::open(&db_path).expect("open sqlite");
    let ops = engine.store_mut().drain_pending_ops();
    let last = sink.append_ops(&ops).expect("append");
    assert_eq!(last, engine.store().latest_op_seq());

    drop(sink);

    let sink2 = SqliteOpSink::open(&db_path).expect("reopen");
    let replayed = sink2.load_store().expect("replay");

    let orig = engine.store().export_snapshot();
    let replay = replayed.export_snapshot();
    assert_eq!(orig, replay);
    assert_eq!(replayed.latest_op_seq(), last);

    let closed = replayed.records_for_borrower(1);
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].fine_amount, 20.0);
    assert_eq!(replayed.open_records().len(), 1);
}

#[test]
fn replayed_store_continues_numbering() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("continue.db");

    let mut engine = busy_engine();
    let mut sink = SqliteOpSink::open(&db_path).expect("open sqlite");
    sink.append_ops(&engine.store_mut().drain_pending_ops()).expect("append");
    let before = engine.store().latest_op_seq();

    let store = sink.load_store().expect("replay");
    let clock = ManualClock::new(day(2024, 2, 1));
    let mut resumed = BorrowingEngine::with_clock(store, LoanPolicy::default(), clock);
    let loan = resumed.borrow_book(1, 2).expect("borrow after restart");
    assert_eq!(loan.record.id, 3);

    let ops = resumed.store_mut().drain_pending_ops();
    assert_eq!(ops.first().map(|o| o.seq), Some(before + 1));
    sink.append_ops(&ops).expect("append tail");
    assert_eq!(sink.latest_seq().expect("latest"), before + ops.len() as u64);
}

#[test]
fn snapshot_and_compaction_preserve_replay() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("snap.db");

    let mut engine = busy_engine();
    let mut sink = SqliteOpSink::open(&db_path).expect("open sqlite");
    sink.append_ops(&engine.store_mut().drain_pending_ops()).expect("append");

    let snapshot = engine.store().export_snapshot();
    let last_seq = engine.store().latest_op_seq();
    sink.write_snapshot(&snapshot, last_seq).expect("snapshot");
    let removed = sink.compact_through(last_seq).expect("compact");
    assert!(removed > 0);
    assert!(sink.load_events_after(0).expect("events").is_empty());

    // Tail written after the checkpoint must replay on top of it.
    engine.return_book(2, 2).expect("bob returns");
    sink.append_ops(&engine.store_mut().drain_pending_ops()).expect("append tail");

    drop(sink);

    let reopened = SqliteOpSink::open(&db_path).expect("reopen");
    let replayed = reopened.load_store().expect("replay");

    assert_eq!(replayed.export_snapshot(), engine.store().export_snapshot());
    assert!(replayed.open_records().is_empty());
    assert_eq!(replayed.find_book(2).expect("cosmos").available_copies, 2);
}

#[test]
fn entity_history_lists_every_write_of_one_record() {
    let mut engine = busy_engine();
    let mut sink = SqliteOpSink::open_in_memory().expect("open sqlite");
    sink.append_ops(&engine.store_mut().drain_pending_ops()).expect("append");

    let history = sink.entity_history(EntityKind::Record, 1).expect("history");
    let returns: Vec<_> = history
        .iter()
        .map(|stored| match &stored.op {
            Op::PutRecord { record } => record.return_date,
            other => panic!("unexpected op {other:?}"),
        })
        .collect();
    assert_eq!(returns, vec![None, Some(day(2024, 1, 5))]);
    assert!(history.windows(2).all(|w| w[0].seq < w[1].seq));

    assert!(sink.entity_history(EntityKind::Borrower, 99).expect("none").is_empty());
}

#[test]
fn pruning_keeps_the_newest_snapshots() {
    let mut engine = busy_engine();
    let mut sink = SqliteOpSink::open_in_memory().expect("open sqlite");
    sink.append_ops(&engine.store_mut().drain_pending_ops()).expect("append");

    let first = engine.store().latest_op_seq();
    sink.write_snapshot(&engine.store().export_snapshot(), first).expect("snapshot 1");
    engine.return_book(2, 2).expect("return");
    sink.append_ops(&engine.store_mut().drain_pending_ops()).expect("append tail");
    let second = engine.store().latest_op_seq();
    sink.write_snapshot(&engine.store().export_snapshot(), second).expect("snapshot 2");

    assert_eq!(sink.prune_snapshots(1).expect("prune"), 1);
    assert_eq!(sink.latest_snapshot_seq().expect("seq"), Some(second));
    let replayed = sink.load_store().expect("replay");
    assert_eq!(replayed.export_snapshot(), engine.store().export_snapshot());
}
