use chrono::{Days, NaiveDate};
use tracing::{debug, instrument, warn};

use crate::{
    config::LoanPolicy,
    error::{LibraryError, LibraryResult},
    loan::{BorrowRecord, Loan, LoanSummary, NewBorrowRecord},
    types::{BookId, BorrowerId},
};

use super::{
    clock::{Clock, SystemClock},
    fines::{fine_for, fine_rate_for},
    traits::LibraryStores,
};

/// Borrow/return orchestration over an owned store.
///
/// Every mutating call runs inside one [`Transactional::with_transaction`]
/// scope, so a rejected borrow or return leaves the store untouched.
///
/// [`Transactional::with_transaction`]: super::traits::Transactional::with_transaction
#[derive(Debug)]
pub struct BorrowingEngine<S, C = SystemClock> {
    store: S,
    clock: C,
    policy: LoanPolicy,
}

impl<S: LibraryStores> BorrowingEngine<S, SystemClock> {
    /// Builds an engine dated by the local wall clock.
    pub fn new(store: S, policy: LoanPolicy) -> Self {
        Self::with_clock(store, policy, SystemClock)
    }
}

impl<S: LibraryStores, C: Clock> BorrowingEngine<S, C> {
    /// Builds an engine dated by `clock`.
    pub fn with_clock(store: S, policy: LoanPolicy, clock: C) -> Self {
        Self { store, clock, policy }
    }

    /// Backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Backing store, for neighbouring services that share it.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Releases the backing store.
    pub fn into_store(self) -> S {
        self.store
    }

    /// Active loan rules.
    pub fn policy(&self) -> &LoanPolicy {
        &self.policy
    }

    /// Date source.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Lends one copy of `book_id` to `borrower_id`, due after the loan period.
    #[instrument(skip(self), level = "debug")]
    pub fn borrow_book(&mut self, borrower_id: BorrowerId, book_id: BookId) -> LibraryResult<Loan> {
        let today = self.clock.today();
        let due_date = today
            .checked_add_days(Days::new(u64::from(self.policy.loan_period_days)))
            .ok_or_else(|| LibraryError::Unexpected(format!("due date out of range for {today}")))?;

        let result = self.store.with_transaction(|store| {
            let borrower = store
                .find_borrower(borrower_id)
                .ok_or_else(|| LibraryError::borrower_not_found(borrower_id))?;
            let mut book = store
                .find_book(book_id)
                .ok_or_else(|| LibraryError::book_not_found(book_id))?;

            let open_loans = store
                .records_for_borrower(borrower_id)
                .iter()
                .filter(|r| r.is_open())
                .count();
            if open_loans >= borrower.max_loans as usize {
                return Err(LibraryError::LimitExceeded(format!(
                    "Borrow limit exceeded for borrower: {}",
                    borrower.name
                )));
            }
            if book.available_copies < 1 {
                return Err(LibraryError::Unavailable(format!(
                    "No available copies for book: {}",
                    book.title
                )));
            }

            book.available_copies -= 1;
            book.refresh_availability();
            let book = store.save_book(book)?;

            let record = store.insert_record(NewBorrowRecord {
                book_id,
                borrower_id,
                borrow_date: today,
                due_date,
            })?;

            Ok(Loan { record, book, borrower })
        });

        match &result {
            Ok(loan) => debug!(
                record_id = loan.record.id,
                due = %loan.record.due_date,
                available = loan.book.available_copies,
                "book borrowed"
            ),
            Err(err) => warn!(%err, "borrow rejected"),
        }
        result
    }

    /// Closes the open loan of `book_id` held by `borrower_id`, charging any fine.
    #[instrument(skip(self), level = "debug")]
    pub fn return_book(&mut self, borrower_id: BorrowerId, book_id: BookId) -> LibraryResult<Loan> {
        let today = self.clock.today();
        let default_rate = self.policy.default_fine_per_day;

        let result = self.store.with_transaction(|store| {
            let mut record = store
                .records_for_borrower(borrower_id)
                .into_iter()
                .find(|r| r.book_id == book_id && r.is_open())
                .ok_or_else(|| {
                    LibraryError::NotFound(format!(
                        "Active borrow record not found for book id: {book_id}"
                    ))
                })?;
            let mut book = store
                .find_book_with_deleted(book_id)
                .ok_or_else(|| LibraryError::book_not_found(book_id))?;
            let borrower = store
                .find_borrower(borrower_id)
                .ok_or_else(|| LibraryError::borrower_not_found(borrower_id))?;

            record.return_date = Some(today);
            record.fine_amount = if today > record.due_date {
                let policies = store.fine_policies();
                let rate = fine_rate_for(book.category.as_deref(), &policies, default_rate);
                fine_for(record.due_date, today, rate)
            } else {
                0.0
            };
            let record = store.save_record(record)?;

            // Availability is forced on regardless of the count.
            book.available_copies = book.available_copies.saturating_add(1).min(book.total_copies);
            book.is_available = true;
            let book = store.save_book(book)?;

            Ok(Loan { record, book, borrower })
        });

        match &result {
            Ok(loan) => debug!(
                record_id = loan.record.id,
                fine = loan.record.fine_amount,
                available = loan.book.available_copies,
                "book returned"
            ),
            Err(err) => warn!(%err, "return rejected"),
        }
        result
    }

    /// Every loan that has not been returned.
    pub fn active_records(&self) -> Vec<BorrowRecord> {
        self.store.open_records()
    }

    /// Every loan, open or closed, of `borrower_id`.
    pub fn borrow_history(&self, borrower_id: BorrowerId) -> Vec<BorrowRecord> {
        self.store.records_for_borrower(borrower_id)
    }

    /// Open loans whose due date is strictly before `as_of`.
    pub fn overdue_records(&self, as_of: NaiveDate) -> Vec<BorrowRecord> {
        self.store.overdue_records(as_of)
    }

    /// Open loans already past due today.
    pub fn overdue_today(&self) -> Vec<BorrowRecord> {
        self.overdue_records(self.clock.today())
    }

    /// Daily fine applied to books of `category`.
    pub fn fine_rate(&self, category: Option<&str>) -> f64 {
        fine_rate_for(category, &self.store.fine_policies(), self.policy.default_fine_per_day)
    }

    /// Joins `record` with its book title and borrower name.
    pub fn summarize(&self, record: &BorrowRecord) -> LibraryResult<LoanSummary> {
        let book = self
            .store
            .find_book_with_deleted(record.book_id)
            .ok_or_else(|| LibraryError::book_not_found(record.book_id))?;
        let borrower = self
            .store
            .find_borrower(record.borrower_id)
            .ok_or_else(|| LibraryError::borrower_not_found(record.borrower_id))?;

        Ok(LoanSummary {
            id: record.id,
            book_id: book.id,
            book_title: book.title,
            borrower_id: borrower.id,
            borrower_name: borrower.name,
            borrow_date: record.borrow_date,
            due_date: record.due_date,
            return_date: record.return_date,
            fine_amount: record.fine_amount,
        })
    }

    /// [`Self::summarize`] over a batch, failing on the first dangling reference.
    pub fn summarize_all(&self, records: &[BorrowRecord]) -> LibraryResult<Vec<LoanSummary>> {
        records.iter().map(|r| self.summarize(r)).collect()
    }
}
