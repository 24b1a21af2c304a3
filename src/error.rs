//! Caller-facing error taxonomy.
//!
//! Every operation the engine and services expose returns [`LibraryError`].
//! Store-level failures are folded in through `From<StoreError>` so that
//! constraint violations surface as [`LibraryError::Duplicate`] rather than
//! leaking index details.

use thiserror::Error;

use crate::{
    core::store::StoreError,
    types::{BookId, BorrowerId},
};

/// Result alias for engine and service operations.
pub type LibraryResult<T> = Result<T, LibraryError>;

/// Errors reported to callers of the lending core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LibraryError {
    /// A borrower, book, or open borrow record does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The borrower already holds their maximum number of open loans.
    #[error("{0}")]
    LimitExceeded(String),

    /// The book has no copy left on the shelf.
    #[error("{0}")]
    Unavailable(String),

    /// A unique field or the one-open-loan rule was violated.
    #[error("{0}")]
    Duplicate(String),

    /// Input rejected before touching the store.
    #[error("{0}")]
    InvalidInput(String),

    /// Anything else.
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

impl LibraryError {
    pub(crate) fn book_not_found(id: BookId) -> Self {
        Self::NotFound(format!("Book not found with id: {id}"))
    }

    pub(crate) fn borrower_not_found(id: BorrowerId) -> Self {
        Self::NotFound(format!("Borrower not found with id: {id}"))
    }

    /// Returns true for the rejections a caller can act on directly.
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, Self::Unexpected(_))
    }
}

impl From<StoreError> for LibraryError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::MissingBook(id) => Self::book_not_found(id),
            StoreError::MissingBorrower(id) => Self::borrower_not_found(id),
            StoreError::MissingRecord(id) => {
                Self::NotFound(format!("Borrow record not found with id: {id}"))
            }
            StoreError::DuplicateTitle(_) | StoreError::DuplicateIsbn(_) => {
                Self::Duplicate("A book with the same unique field already exists.".to_string())
            }
            StoreError::DuplicateEmail(_) => {
                Self::Duplicate("A borrower with this email already exists.".to_string())
            }
            StoreError::OpenLoanExists { book_id, .. } => Self::Duplicate(format!(
                "An active borrow record already exists for book id: {book_id}"
            )),
            other => Self::Unexpected(other.to_string()),
        }
    }
}
