use chrono::NaiveDate;

use libloan::{
    book::Book,
    borrower::Borrower,
    config::LoanPolicy,
    core::store::LibraryStore,
    engine::{
        borrowing::BorrowingEngine,
        clock::ManualClock,
        traits::{CatalogStore, FinePolicyStore, LoanLedger},
    },
    error::LibraryError,
    loan::BorrowRecord,
    services::{
        catalog::{BookSubmission, BookUpdate, soft_delete_book, submit_book, update_book},
        membership::{BorrowerRegistration, register_borrower},
    },
};

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn add_book(store: &mut LibraryStore, title: &str, category: Option<&str>, copies: u32) -> Book {
    submit_book(
        store,
        BookSubmission {
            title: title.to_string(),
            category: category.map(str::to_string),
            total_copies: copies,
            ..BookSubmission::default()
        },
    )
    .expect("submit book")
}

fn add_borrower(store: &mut LibraryStore, name: &str) -> Borrower {
    register_borrower(
        store,
        BorrowerRegistration {
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            tier: None,
        },
        &LoanPolicy::default(),
    )
    .expect("register borrower")
}

struct Fixture {
    engine: BorrowingEngine<LibraryStore, ManualClock>,
    clock: ManualClock,
    book: Book,
    reader: Borrower,
}

/// One Fiction title at 5.0/day, borrowed so that it falls due on 2024-01-01.
fn borrowed_fiction() -> Fixture {
    let mut store = LibraryStore::new();
    store.put_fine_policy("Fiction", 5.0).expect("fine policy");
    let book = add_book(&mut store, "Dune", Some("Fiction"), 2);
    let reader = add_borrower(&mut store, "Ada");

    let clock = ManualClock::new(day(2023, 12, 18));
    let mut engine = BorrowingEngine::with_clock(store, LoanPolicy::default(), clock.clone());
    let loan = engine.borrow_book(reader.id, book.id).expect("borrow");
    assert_eq!(loan.record.due_date, day(2024, 1, 1));

    Fixture {
        engine,
        clock,
        book,
        reader,
    }
}

#[test]
fn late_return_charges_category_rate_per_day() {
    let mut fx = borrowed_fiction();
    fx.clock.set(day(2024, 1, 5));

    let loan = fx.engine.return_book(fx.reader.id, fx.book.id).expect("return");

    assert_eq!(loan.record.return_date, Some(day(2024, 1, 5)));
    assert_eq!(loan.record.fine_amount, 20.0);
    assert_eq!(loan.book.available_copies, 2);
    assert!(fx.engine.active_records().is_empty());
}

#[test]
fn category_match_ignores_case() {
    let mut store = LibraryStore::new();
    store.put_fine_policy("FICTION", 5.0).expect("fine policy");
    let book = add_book(&mut store, "Dune", Some("fiction"), 1);
    let reader = add_borrower(&mut store, "Ada");
    let clock = ManualClock::new(day(2023, 12, 18));
    let mut engine = BorrowingEngine::with_clock(store, LoanPolicy::default(), clock.clone());

    engine.borrow_book(reader.id, book.id).expect("borrow");
    clock.set(day(2024, 1, 3));
    let loan = engine.return_book(reader.id, book.id).expect("return");
    assert_eq!(loan.record.fine_amount, 10.0);
}

#[test]
fn return_on_due_date_is_free() {
    let mut fx = borrowed_fiction();
    fx.clock.set(day(2024, 1, 1));

    let loan = fx.engine.return_book(fx.reader.id, fx.book.id).expect("return");
    assert_eq!(loan.record.fine_amount, 0.0);
}

#[test]
fn early_return_is_free() {
    let mut fx = borrowed_fiction();
    fx.clock.set(day(2023, 12, 20));

    let loan = fx.engine.return_book(fx.reader.id, fx.book.id).expect("return");
    assert_eq!(loan.record.fine_amount, 0.0);
    assert_eq!(loan.record.return_date, Some(day(2023, 12, 20)));
}

#[test]
fn uncategorised_book_uses_default_rate() {
    let mut store = LibraryStore::new();
    store.put_fine_policy("Fiction", 5.0).expect("fine policy");
    let plain = add_book(&mut store, "Manual", None, 1);
    let poetry = add_book(&mut store, "Odes", Some("Poetry"), 1);
    let reader = add_borrower(&mut store, "Ada");
    let clock = ManualClock::new(day(2023, 12, 18));
    let mut engine = BorrowingEngine::with_clock(store, LoanPolicy::default(), clock.clone());

    engine.borrow_book(reader.id, plain.id).expect("borrow plain");
    engine.borrow_book(reader.id, poetry.id).expect("borrow poetry");
    clock.set(day(2024, 1, 3));

    assert_eq!(engine.return_book(reader.id, plain.id).expect("return").record.fine_amount, 20.0);
    assert_eq!(engine.return_book(reader.id, poetry.id).expect("return").record.fine_amount, 20.0);
    assert_eq!(engine.fine_rate(None), 10.0);
    assert_eq!(engine.fine_rate(Some("Poetry")), 10.0);
    assert_eq!(engine.fine_rate(Some("fiction")), 5.0);
}

#[test]
fn return_without_open_loan_is_not_found() {
    let mut fx = borrowed_fiction();
    fx.clock.set(day(2024, 1, 2));
    fx.engine.return_book(fx.reader.id, fx.book.id).expect("first return");
    let ops_before = fx.engine.store().latest_op_seq();

    let err = fx
        .engine
        .return_book(fx.reader.id, fx.book.id)
        .expect_err("already returned");
    assert_eq!(
        err,
        LibraryError::NotFound(format!(
            "Active borrow record not found for book id: {}",
            fx.book.id
        ))
    );
    assert_eq!(fx.engine.store().latest_op_seq(), ops_before);
}

#[test]
fn return_by_someone_else_is_not_found() {
    let mut fx = borrowed_fiction();

    let err = fx.engine.return_book(fx.reader.id + 100, fx.book.id).expect_err("stranger");
    assert!(matches!(err, LibraryError::NotFound(_)));
    assert_eq!(fx.engine.active_records().len(), 1);
}

#[test]
fn return_forces_availability_and_never_exceeds_total() {
    let mut fx = borrowed_fiction();
    // Shrink the catalog while the copy is out: 1 on shelf becomes 0 of 1.
    update_book(
        fx.engine.store_mut(),
        fx.book.id,
        BookUpdate {
            total_copies: 1,
            ..BookUpdate::default()
        },
    )
    .expect("update");
    let shrunk = fx.engine.store().find_book(fx.book.id).expect("book");
    assert_eq!(shrunk.available_copies, 0);
    assert!(!shrunk.is_available);

    let loan = fx.engine.return_book(fx.reader.id, fx.book.id).expect("return");
    assert_eq!(loan.book.available_copies, 1);
    assert_eq!(loan.book.total_copies, 1);
    assert!(loan.book.is_available);
}

#[test]
fn soft_deleted_book_can_still_come_back() {
    let mut fx = borrowed_fiction();
    soft_delete_book(fx.engine.store_mut(), fx.book.id).expect("delete");
    fx.clock.set(day(2024, 1, 2));

    let loan = fx.engine.return_book(fx.reader.id, fx.book.id).expect("return");
    assert!(loan.book.deleted);
    assert_eq!(loan.record.fine_amount, 5.0);
    assert!(fx.engine.store().find_book(fx.book.id).is_none());
}

#[test]
fn overdue_listing_uses_strict_due_date_boundary() {
    let fx = borrowed_fiction();

    assert!(fx.engine.overdue_records(day(2024, 1, 1)).is_empty());
    let overdue = fx.engine.overdue_records(day(2024, 1, 2));
    assert_eq!(overdue.len(), 1);
    assert_eq!(overdue[0].book_id, fx.book.id);

    fx.clock.set(day(2024, 1, 2));
    assert_eq!(fx.engine.overdue_today(), overdue);
}

#[test]
fn returned_loans_are_not_overdue() {
    let mut fx = borrowed_fiction();
    fx.clock.set(day(2024, 2, 1));
    fx.engine.return_book(fx.reader.id, fx.book.id).expect("return");

    assert!(fx.engine.overdue_records(day(2024, 3, 1)).is_empty());
}

#[test]
fn history_keeps_closed_records_and_is_repeatable() {
    let mut fx = borrowed_fiction();
    fx.clock.set(day(2024, 1, 5));
    fx.engine.return_book(fx.reader.id, fx.book.id).expect("return");
    fx.engine.borrow_book(fx.reader.id, fx.book.id).expect("borrow again");

    let first = fx.engine.borrow_history(fx.reader.id);
    let second = fx.engine.borrow_history(fx.reader.id);
    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
    assert_eq!(first.iter().filter(|r| r.is_open()).count(), 1);
    assert!(fx.engine.borrow_history(fx.reader.id + 100).is_empty());
}

#[test]
fn history_stays_in_ledger_order_after_a_return() {
    let mut store = LibraryStore::new();
    let dune = add_book(&mut store, "Dune", None, 1);
    let emma = add_book(&mut store, "Emma", None, 1);
    let reader = add_borrower(&mut store, "Ada");
    let clock = ManualClock::new(day(2024, 1, 1));
    let mut engine = BorrowingEngine::with_clock(store, LoanPolicy::default(), clock);

    engine.borrow_book(reader.id, dune.id).expect("borrow dune");
    engine.borrow_book(reader.id, emma.id).expect("borrow emma");
    engine.return_book(reader.id, dune.id).expect("return dune");

    let ids = |records: Vec<BorrowRecord>| records.iter().map(|r| r.id).collect::<Vec<_>>();
    assert_eq!(ids(engine.borrow_history(reader.id)), vec![1, 2]);

    let rebuilt = LibraryStore::from_snapshot(engine.store().export_snapshot()).expect("rebuild");
    assert_eq!(ids(rebuilt.records_for_borrower(reader.id)), vec![1, 2]);
}

#[test]
fn summaries_join_title_and_borrower_name() {
    let mut fx = borrowed_fiction();
    fx.clock.set(day(2024, 1, 5));
    fx.engine.return_book(fx.reader.id, fx.book.id).expect("return");

    let history = fx.engine.borrow_history(fx.reader.id);
    let summaries = fx.engine.summarize_all(&history).expect("summaries");

    assert_eq!(summaries.len(), 1);
    let summary = &summaries[0];
    assert_eq!(summary.book_title, "Dune");
    assert_eq!(summary.borrower_name, "Ada");
    assert_eq!(summary.borrow_date, day(2023, 12, 18));
    assert_eq!(summary.due_date, day(2024, 1, 1));
    assert_eq!(summary.return_date, Some(day(2024, 1, 5)));
    assert_eq!(summary.fine_amount, 20.0);
}
