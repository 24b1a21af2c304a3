//! SQLite journal: one row per committed op plus periodic full snapshots.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, Params, Row, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    core::store::{LibraryStore, StoreSnapshotV1},
    op::{EntityKind, OP_FORMAT_VERSION, StoredOp, StoredOpEnvelope},
    types::OpSeq,
};

use super::{OpSink, PersistError, PersistResult};

const SNAPSHOT_FORMAT_VERSION: u16 = 1;

#[derive(Serialize, Deserialize)]
struct SnapshotEnvelope {
    format_version: u16,
    last_seq: OpSeq,
    snapshot: StoreSnapshotV1,
}

/// SQLite implementation of [`OpSink`].
pub struct SqliteOpSink {
    conn: Connection,
}

impl SqliteOpSink {
    /// Opens or creates the journal database at `path` in WAL mode.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let path = path.as_ref();
        let sink = Self::prepare(Connection::open(path)?)?;
        info!(path = %path.display(), "journal opened");
        Ok(sink)
    }

    /// Journal that lives only as long as the connection.
    pub fn open_in_memory() -> PersistResult<Self> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> PersistResult<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(Self { conn })
    }

    /// Rebuilds the store: newest snapshot first, then every op journaled after it.
    pub fn load_store(&self) -> PersistResult<LibraryStore> {
        let (mut store, from) = match self.latest_snapshot()? {
            Some(env) => (LibraryStore::from_snapshot(env.snapshot)?, env.last_seq),
            None => (LibraryStore::new(), 0),
        };

        let tail = self.load_events_after(from.max(store.latest_op_seq()))?;
        let replayed = tail.len();
        for stored in tail {
            store.apply_replayed_op(stored)?;
        }
        debug!(from, replayed, latest = store.latest_op_seq(), "store rebuilt from journal");
        Ok(store)
    }

    /// Ops with a sequence strictly greater than `seq`, oldest first.
    pub fn load_events_after(&self, seq: OpSeq) -> PersistResult<Vec<StoredOp>> {
        self.query_ops(
            "SELECT seq, ts_ms, payload FROM events WHERE seq > ?1 ORDER BY seq",
            params![seq as i64],
        )
    }

    /// Every journaled write of one entity, oldest first.
    ///
    /// Rows already compacted away are not returned.
    pub fn entity_history(&self, kind: EntityKind, id: u64) -> PersistResult<Vec<StoredOp>> {
        self.query_ops(
            "SELECT seq, ts_ms, payload FROM events \
             WHERE kind = ?1 AND entity_id = ?2 ORDER BY seq",
            params![kind.code(), id as i64],
        )
    }

    /// Highest journaled sequence, or 0 for an empty journal.
    pub fn latest_seq(&self) -> PersistResult<OpSeq> {
        let seq = self
            .conn
            .query_row("SELECT MAX(seq) FROM events", [], |row| row.get::<_, Option<i64>>(0))?;
        Ok(seq.map_or(0, |s| s as OpSeq))
    }

    /// Sequence covered by the newest snapshot, if any.
    pub fn latest_snapshot_seq(&self) -> PersistResult<Option<OpSeq>> {
        let seq = self
            .conn
            .query_row("SELECT last_seq FROM snapshots ORDER BY id DESC LIMIT 1", [], |row| {
                row.get::<_, i64>(0)
            })
            .optional()?;
        Ok(seq.map(|s| s as OpSeq))
    }

    /// Stores a snapshot covering every op up to and including `last_seq`.
    pub fn write_snapshot(
        &mut self,
        snapshot: &StoreSnapshotV1,
        last_seq: OpSeq,
    ) -> PersistResult<()> {
        let payload = serde_json::to_vec(&SnapshotEnvelope {
            format_version: SNAPSHOT_FORMAT_VERSION,
            last_seq,
            snapshot: snapshot.clone(),
        })?;
        self.conn.execute(
            "INSERT INTO snapshots(last_seq, ts_ms, payload) VALUES (?1, ?2, ?3)",
            params![last_seq as i64, now_ms() as i64, payload],
        )?;
        debug!(last_seq, bytes = payload.len(), "snapshot stored");
        Ok(())
    }

    /// Drops journal rows at or below `seq`; returns how many went.
    pub fn compact_through(&mut self, seq: OpSeq) -> PersistResult<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM events WHERE seq <= ?1", params![seq as i64])?;
        debug!(seq, removed, "journal compacted");
        Ok(removed)
    }

    /// Keeps only the newest `keep` snapshots; returns how many were dropped.
    pub fn prune_snapshots(&mut self, keep: usize) -> PersistResult<usize> {
        let removed = self.conn.execute(
            "DELETE FROM snapshots \
             WHERE id NOT IN (SELECT id FROM snapshots ORDER BY id DESC LIMIT ?1)",
            params![keep as i64],
        )?;
        Ok(removed)
    }

    fn query_ops<P: Params>(&self, sql: &str, args: P) -> PersistResult<Vec<StoredOp>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(args, stored_op_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn latest_snapshot(&self) -> PersistResult<Option<SnapshotEnvelope>> {
        let payload = self
            .conn
            .query_row("SELECT payload FROM snapshots ORDER BY id DESC LIMIT 1", [], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .optional()?;

        let Some(payload) = payload else {
            return Ok(None);
        };
        let env: SnapshotEnvelope = serde_json::from_slice(&payload)?;
        if env.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(PersistError::Message(format!(
                "snapshot format version {} is not readable",
                env.format_version
            )));
        }
        Ok(Some(env))
    }
}

impl OpSink for SqliteOpSink {
    fn append_ops(&mut self, ops: &[StoredOp]) -> PersistResult<OpSeq> {
        let Some(last) = ops.last() else {
            return self.latest_seq();
        };

        let tx = self.conn.transaction()?;
        {
            let mut insert = tx.prepare_cached(
                "INSERT INTO events(seq, ts_ms, kind, entity_id, payload) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for stored in ops {
                let (kind, entity_id) = stored.op.entity();
                let payload = serde_json::to_vec(&StoredOpEnvelope::new(stored.clone()))?;
                insert.execute(params![
                    stored.seq as i64,
                    stored.ts_ms as i64,
                    kind.code(),
                    entity_id as i64,
                    payload
                ])?;
            }
        }
        tx.commit()?;
        Ok(last.seq)
    }

    fn flush(&mut self) -> PersistResult<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }

    fn write_snapshot(&mut self, snapshot: &StoreSnapshotV1, last_seq: OpSeq) -> PersistResult<()> {
        SqliteOpSink::write_snapshot(self, snapshot, last_seq)
    }

    fn compact_through(&mut self, seq: OpSeq) -> PersistResult<usize> {
        SqliteOpSink::compact_through(self, seq)
    }
}

fn stored_op_from_row(row: &Row<'_>) -> rusqlite::Result<StoredOp> {
    let seq: i64 = row.get(0)?;
    let ts_ms: i64 = row.get(1)?;
    let payload: Vec<u8> = row.get(2)?;

    let envelope: StoredOpEnvelope = serde_json::from_slice(&payload).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Blob, Box::new(err))
    })?;
    if envelope.format_version != OP_FORMAT_VERSION {
        let msg = format!("op format version {} is not readable", envelope.format_version);
        return Err(rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Blob,
            Box::new(std::io::Error::other(msg)),
        ));
    }

    // Row columns are authoritative over the copy inside the payload.
    let mut stored = envelope.stored;
    stored.seq = seq as OpSeq;
    stored.ts_ms = ts_ms as u64;
    Ok(stored)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}
