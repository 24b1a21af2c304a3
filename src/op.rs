//! Mutation operation model and persistence wrappers.

use serde::{Deserialize, Serialize};

use crate::{
    book::Book,
    borrower::Borrower,
    loan::{BorrowRecord, FinePolicy},
    types::OpSeq,
};

/// Version number for serialized [`StoredOpEnvelope`] payloads.
pub const OP_FORMAT_VERSION: u16 = 1;

/// Committed write appended to the journal.
///
/// Every variant carries the full entity as written; replay is an upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    /// Book inserted or replaced.
    PutBook {
        /// Book as written.
        book: Book,
    },
    /// Borrower inserted.
    PutBorrower {
        /// Borrower as written.
        borrower: Borrower,
    },
    /// Borrow record inserted or closed.
    PutRecord {
        /// Record as written.
        record: BorrowRecord,
    },
    /// Fine policy inserted or replaced.
    PutFinePolicy {
        /// Policy as written.
        policy: FinePolicy,
    },
}

/// Entity family touched by an [`Op`]; stored as the journal's `kind` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// Catalog entry.
    Book,
    /// Registered member.
    Borrower,
    /// Borrow record.
    Record,
    /// Category fine rate.
    FinePolicy,
}

impl EntityKind {
    /// Stable integer code written to storage.
    pub fn code(self) -> i64 {
        match self {
            Self::Book => 1,
            Self::Borrower => 2,
            Self::Record => 3,
            Self::FinePolicy => 4,
        }
    }
}

impl Op {
    /// Entity family and id touched by this op.
    pub fn entity(&self) -> (EntityKind, u64) {
        match self {
            Op::PutBook { book } => (EntityKind::Book, book.id),
            Op::PutBorrower { borrower } => (EntityKind::Borrower, borrower.id),
            Op::PutRecord { record } => (EntityKind::Record, record.id),
            Op::PutFinePolicy { policy } => (EntityKind::FinePolicy, policy.id),
        }
    }
}

/// Journal row metadata plus operation payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredOp {
    /// Monotonic operation sequence.
    pub seq: OpSeq,
    /// Operation timestamp in milliseconds.
    pub ts_ms: u64,
    /// Operation body.
    pub op: Op,
}

/// Versioned wrapper for stable on-disk payload decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredOpEnvelope {
    /// Payload format version.
    pub format_version: u16,
    /// Wrapped operation.
    pub stored: StoredOp,
}

impl StoredOpEnvelope {
    /// Constructs an envelope using [`OP_FORMAT_VERSION`].
    pub fn new(stored: StoredOp) -> Self {
        Self {
            format_version: OP_FORMAT_VERSION,
            stored,
        }
    }
}
