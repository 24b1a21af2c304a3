//! Persistence abstraction and SQLite implementation.

/// SQLite-backed journal sink.
pub mod sqlite;

use thiserror::Error;

use crate::{
    core::store::{StoreError, StoreSnapshotV1},
    op::StoredOp,
    types::OpSeq,
};

/// Failures raised by an [`OpSink`].
#[derive(Debug, Error)]
pub enum PersistError {
    /// SQLite rejected a statement.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A payload failed to encode or decode.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Replayed state was rejected by the store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// Anything else.
    #[error("{0}")]
    Message(String),
}

/// Result alias for persistence calls.
pub type PersistResult<T> = Result<T, PersistError>;

/// Durable destination for committed ops.
pub trait OpSink: Send {
    /// Appends `ops` in order and returns the highest sequence now durable.
    ///
    /// A failed call must leave none of `ops` written; the runtime retries
    /// the whole batch.
    fn append_ops(&mut self, ops: &[StoredOp]) -> PersistResult<OpSeq>;
    /// Forces buffered writes to stable storage.
    fn flush(&mut self) -> PersistResult<()> {
        Ok(())
    }
    /// Records a full store snapshot covering everything up to `last_seq`.
    fn write_snapshot(
        &mut self,
        _snapshot: &StoreSnapshotV1,
        _last_seq: OpSeq,
    ) -> PersistResult<()> {
        Ok(())
    }
    /// Drops journal rows up to and including `seq`.
    fn compact_through(&mut self, _seq: OpSeq) -> PersistResult<usize> {
        Ok(0)
    }
}
