//! Runtime event stream payloads.

use crate::types::{BookId, BorrowerId, OpSeq, RecordId};

/// Events emitted from the single-writer runtime loop.
#[derive(Debug, Clone, PartialEq)]
pub enum LibraryEvent {
    /// A book was catalogued or edited.
    BookSaved {
        /// Saved book id.
        id: BookId,
    },
    /// A book was soft-deleted.
    BookDeleted {
        /// Deleted book id.
        id: BookId,
    },
    /// A borrower registered.
    BorrowerRegistered {
        /// New borrower id.
        id: BorrowerId,
    },
    /// A copy was lent.
    Borrowed {
        /// Opened record id.
        record_id: RecordId,
        /// Lent book id.
        book_id: BookId,
        /// Borrower id.
        borrower_id: BorrowerId,
    },
    /// A copy came back.
    Returned {
        /// Closed record id.
        record_id: RecordId,
        /// Returned book id.
        book_id: BookId,
        /// Fine charged.
        fine_amount: f64,
    },
    /// Persistence has reached at least this op sequence.
    DurableUpTo {
        /// Highest sequence known durable.
        op_seq: OpSeq,
    },
}
