use std::time::{SystemTime, UNIX_EPOCH};

use chrono::NaiveDate;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::{
    book::{Book, NewBook},
    borrower::{Borrower, NewBorrower},
    engine::{
        fines::same_category,
        traits::{CatalogStore, FinePolicyStore, LoanLedger, MembershipStore, Transactional},
    },
    loan::{BorrowRecord, FinePolicy, NewBorrowRecord},
    op::{Op, StoredOp},
    types::{BookId, BorrowerId, FinePolicyId, OpSeq, RecordId},
};

use super::indices::{VecIndex, push_to_vec_index, remove_from_vec_index};

/// Integrity violations rejected by [`LibraryStore`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("book {0} not found")]
    MissingBook(BookId),
    #[error("borrower {0} not found")]
    MissingBorrower(BorrowerId),
    #[error("borrow record {0} not found")]
    MissingRecord(RecordId),
    #[error("title already catalogued: {0}")]
    DuplicateTitle(String),
    #[error("isbn already catalogued: {0}")]
    DuplicateIsbn(String),
    #[error("email already registered: {0}")]
    DuplicateEmail(String),
    #[error("borrower {borrower_id} already has an open loan of book {book_id}")]
    OpenLoanExists { borrower_id: BorrowerId, book_id: BookId },
    #[error("borrow record {0} is already closed")]
    RecordClosed(RecordId),
    #[error("copy counts out of range for book {id}: {available} available of {total}")]
    InvalidCopies { id: BookId, available: u32, total: u32 },
    #[error("fine rate must be a non-negative number for category {0}")]
    InvalidFineRate(String),
}

/// Result alias for store calls.
pub type StoreResult<T> = Result<T, StoreError>;

/// Serializable full-state image used for checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshotV1 {
    pub next_book_id: BookId,
    pub next_borrower_id: BorrowerId,
    pub next_record_id: RecordId,
    pub next_policy_id: FinePolicyId,
    pub next_op_seq: OpSeq,
    pub books: Vec<Book>,
    pub borrowers: Vec<Borrower>,
    pub records: Vec<BorrowRecord>,
    pub fine_policies: Vec<FinePolicy>,
}

/// Prior state of one entity, captured before a write inside a transaction.
#[derive(Debug)]
enum Undo {
    Book(BookId, Option<Book>),
    Borrower(BorrowerId, Option<Borrower>),
    Record(RecordId, Option<BorrowRecord>),
    FinePolicy(FinePolicyId, Option<FinePolicy>),
}

#[derive(Debug, Clone, Copy)]
struct TxMark {
    undo_len: usize,
    pending_len: usize,
    next_op_seq: OpSeq,
    next_book_id: BookId,
    next_borrower_id: BorrowerId,
    next_record_id: RecordId,
    next_policy_id: FinePolicyId,
}

/// Authoritative in-memory library state.
///
/// Every committed write is journaled as a [`StoredOp`] that the runtime
/// drains and ships to an [`OpSink`](crate::persist::OpSink).
#[derive(Debug, Default)]
pub struct LibraryStore {
    books: HashMap<BookId, Book>,
    book_order: Vec<BookId>,
    by_title: HashMap<String, BookId>,
    by_isbn: HashMap<String, BookId>,
    by_category: VecIndex<String, BookId>,
    borrowers: HashMap<BorrowerId, Borrower>,
    borrower_order: Vec<BorrowerId>,
    by_email: HashMap<String, BorrowerId>,
    records: HashMap<RecordId, BorrowRecord>,
    record_order: Vec<RecordId>,
    by_borrower: VecIndex<BorrowerId, RecordId>,
    open_loans: HashMap<(BorrowerId, BookId), RecordId>,
    fine_policies: Vec<FinePolicy>,
    undo: Vec<Undo>,
    tx_depth: usize,
    pending_ops: Vec<StoredOp>,
    next_op_seq: OpSeq,
    next_book_id: BookId,
    next_borrower_id: BorrowerId,
    next_record_id: RecordId,
    next_policy_id: FinePolicyId,
}

impl LibraryStore {
    /// Empty store; ids and op sequences start at 1.
    pub fn new() -> Self {
        Self {
            next_op_seq: 1,
            next_book_id: 1,
            next_borrower_id: 1,
            next_record_id: 1,
            next_policy_id: 1,
            ..Self::default()
        }
    }

    /// Rebuilds a store from a checkpoint image.
    pub fn from_snapshot(snapshot: StoreSnapshotV1) -> StoreResult<Self> {
        let mut store = Self {
            next_book_id: snapshot.next_book_id,
            next_borrower_id: snapshot.next_borrower_id,
            next_record_id: snapshot.next_record_id,
            next_policy_id: snapshot.next_policy_id,
            next_op_seq: snapshot.next_op_seq,
            ..Self::default()
        };

        // Books and borrowers first: records reference both.
        for book in snapshot.books {
            store.put_book(book)?;
        }
        for borrower in snapshot.borrowers {
            store.put_borrower(borrower)?;
        }
        for record in snapshot.records {
            store.put_record(record)?;
        }
        for policy in snapshot.fine_policies {
            store.put_policy(policy)?;
        }

        Ok(store)
    }

    pub fn export_snapshot(&self) -> StoreSnapshotV1 {
        StoreSnapshotV1 {
            next_book_id: self.next_book_id,
            next_borrower_id: self.next_borrower_id,
            next_record_id: self.next_record_id,
            next_policy_id: self.next_policy_id,
            next_op_seq: self.next_op_seq,
            books: Self::ordered(&self.book_order, &self.books),
            borrowers: Self::ordered(&self.borrower_order, &self.borrowers),
            records: Self::ordered(&self.record_order, &self.records),
            fine_policies: self.fine_policies.clone(),
        }
    }

    /// Applies a journaled op without re-journaling it.
    pub fn apply_replayed_op(&mut self, stored: StoredOp) -> StoreResult<()> {
        match stored.op {
            Op::PutBook { book } => {
                self.next_book_id = self.next_book_id.max(book.id.saturating_add(1));
                self.put_book(book)?;
            }
            Op::PutBorrower { borrower } => {
                self.next_borrower_id = self.next_borrower_id.max(borrower.id.saturating_add(1));
                self.put_borrower(borrower)?;
            }
            Op::PutRecord { record } => {
                self.next_record_id = self.next_record_id.max(record.id.saturating_add(1));
                self.put_record(record)?;
            }
            Op::PutFinePolicy { policy } => {
                self.next_policy_id = self.next_policy_id.max(policy.id.saturating_add(1));
                self.put_policy(policy)?;
            }
        }
        self.bump_next_seq_from(stored.seq);
        Ok(())
    }

    pub fn get_book(&self, id: BookId) -> Option<&Book> {
        self.books.get(&id)
    }

    /// Takes every op committed since the last drain.
    pub fn drain_pending_ops(&mut self) -> Vec<StoredOp> {
        std::mem::take(&mut self.pending_ops)
    }

    pub fn pending_len(&self) -> usize {
        self.pending_ops.len()
    }

    /// Highest op sequence assigned so far, or 0.
    pub fn latest_op_seq(&self) -> OpSeq {
        self.next_op_seq.saturating_sub(1)
    }

    pub fn in_transaction(&self) -> bool {
        self.tx_depth > 0
    }

    fn ordered<K, V>(order: &[K], map: &HashMap<K, V>) -> Vec<V>
    where
        K: std::hash::Hash + Eq,
        V: Clone,
    {
        order.iter().filter_map(|id| map.get(id).cloned()).collect()
    }

    // Committed writes: capture undo state inside a transaction, then journal.

    fn write_book(&mut self, book: Book) -> StoreResult<Book> {
        let prev = self.put_book(book.clone())?;
        self.remember(Undo::Book(book.id, prev));
        self.journal(Op::PutBook { book: book.clone() });
        Ok(book)
    }

    fn write_borrower(&mut self, borrower: Borrower) -> StoreResult<Borrower> {
        let prev = self.put_borrower(borrower.clone())?;
        self.remember(Undo::Borrower(borrower.id, prev));
        self.journal(Op::PutBorrower {
            borrower: borrower.clone(),
        });
        Ok(borrower)
    }

    fn write_record(&mut self, record: BorrowRecord) -> StoreResult<BorrowRecord> {
        let prev = self.put_record(record.clone())?;
        self.remember(Undo::Record(record.id, prev));
        self.journal(Op::PutRecord {
            record: record.clone(),
        });
        Ok(record)
    }

    fn write_policy(&mut self, policy: FinePolicy) -> StoreResult<FinePolicy> {
        let prev = self.put_policy(policy.clone())?;
        self.remember(Undo::FinePolicy(policy.id, prev));
        self.journal(Op::PutFinePolicy {
            policy: policy.clone(),
        });
        Ok(policy)
    }

    fn remember(&mut self, undo: Undo) {
        if self.tx_depth > 0 {
            self.undo.push(undo);
        }
    }

    fn journal(&mut self, op: Op) {
        let seq = self.take_next_op_seq();
        self.pending_ops.push(StoredOp {
            seq,
            ts_ms: now_ms(),
            op,
        });
    }

    // Raw upserts: validate, maintain indices, return the replaced value.

    fn put_book(&mut self, book: Book) -> StoreResult<Option<Book>> {
        if book.available_copies > book.total_copies {
            return Err(StoreError::InvalidCopies {
                id: book.id,
                available: book.available_copies,
                total: book.total_copies,
            });
        }
        if !book.deleted {
            if self.by_title.get(&book.title).is_some_and(|id| *id != book.id) {
                return Err(StoreError::DuplicateTitle(book.title));
            }
            if let Some(isbn) = &book.isbn {
                if self.by_isbn.get(isbn).is_some_and(|id| *id != book.id) {
                    return Err(StoreError::DuplicateIsbn(isbn.clone()));
                }
            }
        }

        let prev = self.books.remove(&book.id);
        match &prev {
            Some(old) => self.unindex_book(old),
            None => self.book_order.push(book.id),
        }
        self.index_book(&book);
        self.books.insert(book.id, book);
        Ok(prev)
    }

    fn put_borrower(&mut self, borrower: Borrower) -> StoreResult<Option<Borrower>> {
        if self.by_email.get(&borrower.email).is_some_and(|id| *id != borrower.id) {
            return Err(StoreError::DuplicateEmail(borrower.email));
        }

        let prev = self.borrowers.remove(&borrower.id);
        match &prev {
            Some(old) => {
                self.by_email.remove(&old.email);
            }
            None => self.borrower_order.push(borrower.id),
        }
        self.by_email.insert(borrower.email.clone(), borrower.id);
        self.borrowers.insert(borrower.id, borrower);
        Ok(prev)
    }

    fn put_record(&mut self, record: BorrowRecord) -> StoreResult<Option<BorrowRecord>> {
        if !self.books.contains_key(&record.book_id) {
            return Err(StoreError::MissingBook(record.book_id));
        }
        if !self.borrowers.contains_key(&record.borrower_id) {
            return Err(StoreError::MissingBorrower(record.borrower_id));
        }
        if self.records.get(&record.id).is_some_and(|old| !old.is_open()) {
            return Err(StoreError::RecordClosed(record.id));
        }
        if record.is_open() {
            let key = (record.borrower_id, record.book_id);
            if self.open_loans.get(&key).is_some_and(|id| *id != record.id) {
                return Err(StoreError::OpenLoanExists {
                    borrower_id: record.borrower_id,
                    book_id: record.book_id,
                });
            }
        }

        // A rewrite keeps the record's place in its borrower's history.
        let prev = self.records.remove(&record.id);
        match &prev {
            Some(old) => self.clear_open_loan(old),
            None => {
                self.record_order.push(record.id);
                push_to_vec_index(&mut self.by_borrower, record.borrower_id, record.id);
            }
        }
        self.mark_open_loan(&record);
        self.records.insert(record.id, record);
        Ok(prev)
    }

    fn put_policy(&mut self, policy: FinePolicy) -> StoreResult<Option<FinePolicy>> {
        if !policy.fine_per_day.is_finite() || policy.fine_per_day < 0.0 {
            return Err(StoreError::InvalidFineRate(policy.category));
        }
        match self.fine_policies.iter_mut().find(|p| p.id == policy.id) {
            Some(slot) => Ok(Some(std::mem::replace(slot, policy))),
            None => {
                self.fine_policies.push(policy);
                Ok(None)
            }
        }
    }

    fn index_book(&mut self, book: &Book) {
        if book.deleted {
            return;
        }
        self.by_title.insert(book.title.clone(), book.id);
        if let Some(isbn) = &book.isbn {
            self.by_isbn.insert(isbn.clone(), book.id);
        }
        if let Some(category) = &book.category {
            push_to_vec_index(&mut self.by_category, category.clone(), book.id);
        }
    }

    fn unindex_book(&mut self, book: &Book) {
        if book.deleted {
            return;
        }
        if self.by_title.get(&book.title) == Some(&book.id) {
            self.by_title.remove(&book.title);
        }
        if let Some(isbn) = &book.isbn {
            if self.by_isbn.get(isbn) == Some(&book.id) {
                self.by_isbn.remove(isbn);
            }
        }
        if let Some(category) = &book.category {
            remove_from_vec_index(&mut self.by_category, category, &book.id);
        }
    }

    fn mark_open_loan(&mut self, record: &BorrowRecord) {
        if record.is_open() {
            self.open_loans
                .insert((record.borrower_id, record.book_id), record.id);
        }
    }

    fn clear_open_loan(&mut self, record: &BorrowRecord) {
        let key = (record.borrower_id, record.book_id);
        if self.open_loans.get(&key) == Some(&record.id) {
            self.open_loans.remove(&key);
        }
    }

    // Rollback.

    fn mark(&self) -> TxMark {
        TxMark {
            undo_len: self.undo.len(),
            pending_len: self.pending_ops.len(),
            next_op_seq: self.next_op_seq,
            next_book_id: self.next_book_id,
            next_borrower_id: self.next_borrower_id,
            next_record_id: self.next_record_id,
            next_policy_id: self.next_policy_id,
        }
    }

    fn rollback_to(&mut self, mark: TxMark) {
        let undone = self.undo.len().saturating_sub(mark.undo_len);
        while self.undo.len() > mark.undo_len {
            let Some(undo) = self.undo.pop() else {
                break;
            };
            self.restore(undo);
        }
        self.pending_ops.truncate(mark.pending_len);
        self.next_op_seq = mark.next_op_seq;
        self.next_book_id = mark.next_book_id;
        self.next_borrower_id = mark.next_borrower_id;
        self.next_record_id = mark.next_record_id;
        self.next_policy_id = mark.next_policy_id;
        warn!(undone, "transaction rolled back");
    }

    fn restore(&mut self, undo: Undo) {
        match undo {
            Undo::Book(id, prev) => {
                if let Some(current) = self.books.remove(&id) {
                    self.unindex_book(&current);
                }
                match prev {
                    Some(book) => {
                        self.index_book(&book);
                        self.books.insert(id, book);
                    }
                    None => Self::remove_from_order(&mut self.book_order, id),
                }
            }
            Undo::Borrower(id, prev) => {
                if let Some(current) = self.borrowers.remove(&id) {
                    self.by_email.remove(&current.email);
                }
                match prev {
                    Some(borrower) => {
                        self.by_email.insert(borrower.email.clone(), id);
                        self.borrowers.insert(id, borrower);
                    }
                    None => Self::remove_from_order(&mut self.borrower_order, id),
                }
            }
            Undo::Record(id, prev) => {
                let current = self.records.remove(&id);
                if let Some(current) = &current {
                    self.clear_open_loan(current);
                }
                match prev {
                    Some(record) => {
                        self.mark_open_loan(&record);
                        self.records.insert(id, record);
                    }
                    None => {
                        if let Some(current) = &current {
                            remove_from_vec_index(&mut self.by_borrower, &current.borrower_id, &id);
                        }
                        Self::remove_from_order(&mut self.record_order, id);
                    }
                }
            }
            Undo::FinePolicy(id, prev) => match prev {
                Some(policy) => {
                    if let Some(slot) = self.fine_policies.iter_mut().find(|p| p.id == id) {
                        *slot = policy;
                    }
                }
                None => self.fine_policies.retain(|p| p.id != id),
            },
        }
    }

    fn remove_from_order(order: &mut Vec<u64>, id: u64) {
        if let Some(pos) = order.iter().rposition(|x| *x == id) {
            order.remove(pos);
        }
    }

    fn take_next_op_seq(&mut self) -> OpSeq {
        let seq = self.next_op_seq;
        self.next_op_seq += 1;
        seq
    }

    fn bump_next_seq_from(&mut self, seq: OpSeq) {
        self.next_op_seq = self.next_op_seq.max(seq.saturating_add(1));
    }
}

impl CatalogStore for LibraryStore {
    fn find_book(&self, id: BookId) -> Option<Book> {
        self.books.get(&id).filter(|b| !b.deleted).cloned()
    }

    fn find_book_with_deleted(&self, id: BookId) -> Option<Book> {
        self.books.get(&id).cloned()
    }

    fn find_book_by_title(&self, title: &str) -> Option<Book> {
        self.by_title.get(title).and_then(|id| self.books.get(id)).cloned()
    }

    fn find_book_by_isbn(&self, isbn: &str) -> Option<Book> {
        self.by_isbn.get(isbn).and_then(|id| self.books.get(id)).cloned()
    }

    fn books_in_category(&self, category: &str) -> Vec<Book> {
        self.by_category
            .get(category)
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(|id| self.books.get(id).cloned())
            .collect()
    }

    fn all_books(&self) -> Vec<Book> {
        self.book_order
            .iter()
            .filter_map(|id| self.books.get(id))
            .filter(|b| !b.deleted)
            .cloned()
            .collect()
    }

    fn insert_book(&mut self, draft: NewBook) -> StoreResult<Book> {
        let book = self.write_book(draft.into_book(self.next_book_id))?;
        self.next_book_id += 1;
        Ok(book)
    }

    fn save_book(&mut self, book: Book) -> StoreResult<Book> {
        if !self.books.contains_key(&book.id) {
            return Err(StoreError::MissingBook(book.id));
        }
        self.write_book(book)
    }
}

impl MembershipStore for LibraryStore {
    fn find_borrower(&self, id: BorrowerId) -> Option<Borrower> {
        self.borrowers.get(&id).cloned()
    }

    fn find_borrower_by_email(&self, email: &str) -> Option<Borrower> {
        self.by_email.get(email).and_then(|id| self.borrowers.get(id)).cloned()
    }

    fn insert_borrower(&mut self, draft: NewBorrower) -> StoreResult<Borrower> {
        let borrower = self.write_borrower(draft.into_borrower(self.next_borrower_id))?;
        self.next_borrower_id += 1;
        Ok(borrower)
    }
}

impl LoanLedger for LibraryStore {
    fn records_for_borrower(&self, borrower_id: BorrowerId) -> Vec<BorrowRecord> {
        self.by_borrower
            .get(&borrower_id)
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(|id| self.records.get(id).cloned())
            .collect()
    }

    fn open_records(&self) -> Vec<BorrowRecord> {
        self.record_order
            .iter()
            .filter_map(|id| self.records.get(id))
            .filter(|r| r.is_open())
            .cloned()
            .collect()
    }

    fn overdue_records(&self, as_of: NaiveDate) -> Vec<BorrowRecord> {
        self.record_order
            .iter()
            .filter_map(|id| self.records.get(id))
            .filter(|r| r.is_overdue(as_of))
            .cloned()
            .collect()
    }

    fn insert_record(&mut self, draft: NewBorrowRecord) -> StoreResult<BorrowRecord> {
        let record = self.write_record(draft.into_record(self.next_record_id))?;
        self.next_record_id += 1;
        Ok(record)
    }

    fn save_record(&mut self, record: BorrowRecord) -> StoreResult<BorrowRecord> {
        if !self.records.contains_key(&record.id) {
            return Err(StoreError::MissingRecord(record.id));
        }
        self.write_record(record)
    }
}

impl FinePolicyStore for LibraryStore {
    fn fine_policies(&self) -> Vec<FinePolicy> {
        self.fine_policies.clone()
    }

    fn put_fine_policy(&mut self, category: &str, fine_per_day: f64) -> StoreResult<FinePolicy> {
        let existing = self
            .fine_policies
            .iter()
            .find(|p| same_category(&p.category, category))
            .map(|p| p.id);
        let id = existing.unwrap_or(self.next_policy_id);
        let policy = self.write_policy(FinePolicy {
            id,
            category: category.to_string(),
            fine_per_day,
        })?;
        if existing.is_none() {
            self.next_policy_id += 1;
        }
        Ok(policy)
    }
}

impl Transactional for LibraryStore {
    fn with_transaction<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self) -> Result<T, E>,
    {
        let mark = self.mark();
        self.tx_depth += 1;
        let out = f(self);
        self.tx_depth -= 1;

        match out {
            Ok(value) => {
                if self.tx_depth == 0 {
                    self.undo.clear();
                }
                Ok(value)
            }
            Err(err) => {
                self.rollback_to(mark);
                Err(err)
            }
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
