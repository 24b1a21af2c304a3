//! Borrow records, fine policies, and loan views.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
    book::Book,
    borrower::Borrower,
    types::{BookId, BorrowerId, FinePolicyId, RecordId},
};

/// One lending of one book copy to one borrower.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BorrowRecord {
    /// Stable record identifier.
    pub id: RecordId,
    /// Lent book.
    pub book_id: BookId,
    /// Borrowing member.
    pub borrower_id: BorrowerId,
    /// Day the copy left the shelf.
    pub borrow_date: NaiveDate,
    /// Last day the copy may be returned without a fine.
    pub due_date: NaiveDate,
    /// Day the copy came back; `None` while the loan is open.
    pub return_date: Option<NaiveDate>,
    /// Fine charged at return.
    pub fine_amount: f64,
}

impl BorrowRecord {
    /// Returns true while the copy has not been returned.
    pub fn is_open(&self) -> bool {
        self.return_date.is_none()
    }

    /// Returns true when the record is open and its due date is strictly before `as_of`.
    pub fn is_overdue(&self, as_of: NaiveDate) -> bool {
        self.is_open() && self.due_date < as_of
    }
}

/// Insert payload used to open a new [`BorrowRecord`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewBorrowRecord {
    /// Lent book.
    pub book_id: BookId,
    /// Borrowing member.
    pub borrower_id: BorrowerId,
    /// Borrow day.
    pub borrow_date: NaiveDate,
    /// Due day.
    pub due_date: NaiveDate,
}

impl NewBorrowRecord {
    /// Materializes the draft under `id` as an open loan with no fine.
    pub fn into_record(self, id: RecordId) -> BorrowRecord {
        BorrowRecord {
            id,
            book_id: self.book_id,
            borrower_id: self.borrower_id,
            borrow_date: self.borrow_date,
            due_date: self.due_date,
            return_date: None,
            fine_amount: 0.0,
        }
    }
}

/// Per-category daily late fee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinePolicy {
    /// Stable policy identifier.
    pub id: FinePolicyId,
    /// Category name, matched case-insensitively.
    pub category: String,
    /// Fine charged per late day.
    pub fine_per_day: f64,
}

/// Borrow or return outcome with the linked entities as written.
#[derive(Debug, Clone, PartialEq)]
pub struct Loan {
    /// Created or closed record.
    pub record: BorrowRecord,
    /// Book after the copy count change.
    pub book: Book,
    /// Borrowing member.
    pub borrower: Borrower,
}

/// Flattened record view for listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanSummary {
    /// Record identifier.
    pub id: RecordId,
    /// Book identifier.
    pub book_id: BookId,
    /// Book title at summary time.
    pub book_title: String,
    /// Borrower identifier.
    pub borrower_id: BorrowerId,
    /// Borrower name.
    pub borrower_name: String,
    /// Borrow day.
    pub borrow_date: NaiveDate,
    /// Due day.
    pub due_date: NaiveDate,
    /// Return day, if returned.
    pub return_date: Option<NaiveDate>,
    /// Fine charged.
    pub fine_amount: f64,
}
