//! Store contracts the borrowing engine and services are written against.
//!
//! Lookups return owned snapshots; callers mutate the copy and hand it back
//! through the matching `save_*` method. Identity is assigned by the store in
//! the `insert_*` methods.

use chrono::NaiveDate;

use crate::{
    book::{Book, NewBook},
    borrower::{Borrower, NewBorrower},
    core::store::StoreResult,
    loan::{BorrowRecord, FinePolicy, NewBorrowRecord},
    types::{BookId, BorrowerId},
};

/// Book catalog.
pub trait CatalogStore {
    /// Looks up a non-deleted book.
    fn find_book(&self, id: BookId) -> Option<Book>;
    /// Looks up a book regardless of its soft-delete flag.
    fn find_book_with_deleted(&self, id: BookId) -> Option<Book>;
    /// Looks up the non-deleted book with exactly this title.
    fn find_book_by_title(&self, title: &str) -> Option<Book>;
    /// Looks up the non-deleted book with exactly this ISBN.
    fn find_book_by_isbn(&self, isbn: &str) -> Option<Book>;
    /// Non-deleted books whose category equals `category`.
    fn books_in_category(&self, category: &str) -> Vec<Book>;
    /// All non-deleted books in catalog order.
    fn all_books(&self) -> Vec<Book>;
    /// Assigns an id and stores a new book.
    fn insert_book(&mut self, draft: NewBook) -> StoreResult<Book>;
    /// Replaces an existing book.
    fn save_book(&mut self, book: Book) -> StoreResult<Book>;
}

/// Registered borrowers.
pub trait MembershipStore {
    /// Looks up a borrower.
    fn find_borrower(&self, id: BorrowerId) -> Option<Borrower>;
    /// Looks up the borrower registered with `email`.
    fn find_borrower_by_email(&self, email: &str) -> Option<Borrower>;
    /// Assigns an id and stores a new borrower.
    fn insert_borrower(&mut self, draft: NewBorrower) -> StoreResult<Borrower>;
}

/// Borrow record ledger.
pub trait LoanLedger {
    /// Every record of `borrower_id`, open and closed, in ledger order.
    fn records_for_borrower(&self, borrower_id: BorrowerId) -> Vec<BorrowRecord>;
    /// Every record without a return date.
    fn open_records(&self) -> Vec<BorrowRecord>;
    /// Open records whose due date is strictly before `as_of`.
    fn overdue_records(&self, as_of: NaiveDate) -> Vec<BorrowRecord>;
    /// Assigns an id and stores a new open record.
    fn insert_record(&mut self, draft: NewBorrowRecord) -> StoreResult<BorrowRecord>;
    /// Replaces an existing record.
    fn save_record(&mut self, record: BorrowRecord) -> StoreResult<BorrowRecord>;
}

/// Category fine rates.
pub trait FinePolicyStore {
    /// All policies in insertion order.
    fn fine_policies(&self) -> Vec<FinePolicy>;
    /// Inserts or replaces the rate for `category` (case-insensitive key).
    fn put_fine_policy(&mut self, category: &str, fine_per_day: f64) -> StoreResult<FinePolicy>;
}

/// Scoped atomicity.
pub trait Transactional {
    /// Runs `f` so that either all of its writes apply or, when it returns
    /// `Err`, none of them do.
    fn with_transaction<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self) -> Result<T, E>;
}

/// Everything the borrowing engine needs from its backing store.
pub trait LibraryStores:
    CatalogStore + MembershipStore + LoanLedger + FinePolicyStore + Transactional
{
}

impl<T> LibraryStores for T where
    T: CatalogStore + MembershipStore + LoanLedger + FinePolicyStore + Transactional
{
}
