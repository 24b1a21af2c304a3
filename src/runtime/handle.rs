use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    sync::{Mutex, broadcast, mpsc, oneshot},
    time::{Duration, Instant},
};
use tracing::{info, warn};

use crate::{
    book::Book,
    borrower::Borrower,
    core::store::{LibraryStore, StoreSnapshotV1},
    engine::{borrowing::BorrowingEngine, clock::Clock, traits::FinePolicyStore},
    error::{LibraryError, LibraryResult},
    loan::{BorrowRecord, FinePolicy, Loan, LoanSummary},
    op::StoredOp,
    persist::{OpSink, PersistError},
    services::{
        catalog::{self, BookFilter, BookSubmission, BookUpdate, Page, PageRequest},
        membership::{self, BorrowerRegistration},
    },
    types::{BookId, BorrowerId, OpSeq},
};

use super::events::LibraryEvent;

/// Failures reported through a [`LibraryHandle`].
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Library(#[from] LibraryError),
    #[error("persistence error: {0}")]
    Persist(#[from] PersistError),
    #[error("runtime channel closed")]
    ChannelClosed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
/// Journal batching and checkpoint tuning.
pub struct RuntimeConfig {
    /// Write each committed transaction to the sink immediately.
    pub flush_on_commit: bool,
    /// Buffered ops that force a write.
    pub batch_max_ops: usize,
    /// Longest time an op may sit in the buffer.
    pub batch_max_latency_ms: u64,
    /// Commits queued for the persistence worker before writers wait.
    pub persist_queue_bound: usize,
    /// Ops between automatic checkpoints; zero disables them.
    pub snapshot_every_ops: usize,
    /// Drop journal rows covered by each checkpoint.
    pub compact_after_snapshot: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            flush_on_commit: true,
            batch_max_ops: 32,
            batch_max_latency_ms: 75,
            persist_queue_bound: 64,
            snapshot_every_ops: 2000,
            compact_after_snapshot: false,
        }
    }
}

/// Cloneable front door to the single-writer library task.
#[derive(Clone)]
pub struct LibraryHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<LibraryEvent>,
}

type Reply<T> = oneshot::Sender<Result<T, RuntimeError>>;

enum Command {
    SubmitBook {
        submission: BookSubmission,
        resp: Reply<Book>,
    },
    UpdateBook {
        id: BookId,
        update: BookUpdate,
        resp: Reply<Book>,
    },
    DeleteBook {
        id: BookId,
        resp: Reply<()>,
    },
    GetBook {
        id: BookId,
        resp: oneshot::Sender<LibraryResult<Book>>,
    },
    ListBooks {
        filter: BookFilter,
        page: PageRequest,
        resp: oneshot::Sender<Page<Book>>,
    },
    RegisterBorrower {
        registration: BorrowerRegistration,
        resp: Reply<Borrower>,
    },
    GetBorrower {
        id: BorrowerId,
        resp: oneshot::Sender<LibraryResult<Borrower>>,
    },
    SetFinePolicy {
        category: String,
        fine_per_day: f64,
        resp: Reply<FinePolicy>,
    },
    Borrow {
        borrower_id: BorrowerId,
        book_id: BookId,
        resp: Reply<Loan>,
    },
    Return {
        borrower_id: BorrowerId,
        book_id: BookId,
        resp: Reply<Loan>,
    },
    ActiveRecords {
        resp: oneshot::Sender<Vec<BorrowRecord>>,
    },
    History {
        borrower_id: BorrowerId,
        resp: oneshot::Sender<Vec<BorrowRecord>>,
    },
    Overdue {
        as_of: Option<NaiveDate>,
        resp: oneshot::Sender<Vec<BorrowRecord>>,
    },
    Summarize {
        records: Vec<BorrowRecord>,
        resp: oneshot::Sender<LibraryResult<Vec<LoanSummary>>>,
    },
    Flush {
        resp: Reply<OpSeq>,
    },
    Checkpoint {
        resp: Reply<()>,
    },
    Shutdown {
        resp: Reply<()>,
    },
}

enum PersistMsg {
    Commit(Vec<StoredOp>),
    Flush {
        resp: oneshot::Sender<Result<OpSeq, PersistError>>,
    },
    Checkpoint {
        snapshot: StoreSnapshotV1,
        last_seq: OpSeq,
        compact: bool,
        resp: oneshot::Sender<Result<(), PersistError>>,
    },
    Shutdown {
        resp: oneshot::Sender<Result<(), PersistError>>,
    },
}

struct Writer<'a, C> {
    engine: &'a mut BorrowingEngine<LibraryStore, C>,
    events_tx: &'a broadcast::Sender<LibraryEvent>,
    persist_tx: Option<&'a mpsc::Sender<PersistMsg>>,
    config: &'a RuntimeConfig,
    ops_since_snapshot: &'a mut usize,
}

/// Moves `engine` onto a tokio task that serializes every command.
///
/// With a `sink`, committed ops are shipped to a persistence worker and
/// [`LibraryEvent::DurableUpTo`] follows each successful write.
pub fn spawn_library<C>(
    engine: BorrowingEngine<LibraryStore, C>,
    sink: Option<Box<dyn OpSink>>,
    config: RuntimeConfig,
) -> LibraryHandle
where
    C: Clock + 'static,
{
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(256);
    let (events_tx, _) = broadcast::channel::<LibraryEvent>(1024);

    let (persist_tx_opt, mut durable_rx) = if let Some(sink) = sink {
        let bound = config.persist_queue_bound.max(1);
        let (persist_tx, persist_rx) = mpsc::channel::<PersistMsg>(bound);
        let (durable_tx, durable_rx) = mpsc::unbounded_channel::<Result<OpSeq, PersistError>>();
        spawn_persistence_worker(sink, persist_rx, durable_tx, config.clone());
        (Some(persist_tx), Some(durable_rx))
    } else {
        (None, None)
    };

    let events_tx_loop = events_tx.clone();
    info!(persistent = persist_tx_opt.is_some(), "library runtime starting");

    tokio::spawn(async move {
        let mut engine = engine;
        let mut ops_since_snapshot = 0usize;
        let mut worker_alive = true;

        loop {
            let cmd = if let Some(rx) = durable_rx.as_mut() {
                tokio::select! {
                    cmd = cmd_rx.recv() => cmd,
                    durable = rx.recv(), if worker_alive => {
                        match durable {
                            Some(Ok(op_seq)) => {
                                let _ = events_tx_loop.send(LibraryEvent::DurableUpTo { op_seq });
                            }
                            Some(Err(err)) => warn!(%err, "journal write failed"),
                            None => worker_alive = false,
                        }
                        continue;
                    }
                }
            } else {
                cmd_rx.recv().await
            };

            let Some(cmd) = cmd else {
                break;
            };

            let mut writer = Writer {
                engine: &mut engine,
                events_tx: &events_tx_loop,
                persist_tx: persist_tx_opt.as_ref(),
                config: &config,
                ops_since_snapshot: &mut ops_since_snapshot,
            };
            if writer.handle_command(cmd).await {
                break;
            }
        }

        info!("library runtime stopped");
    });

    LibraryHandle { cmd_tx, events_tx }
}

impl LibraryHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<LibraryEvent> {
        self.events_tx.subscribe()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    pub async fn submit_book(&self, submission: BookSubmission) -> Result<Book, RuntimeError> {
        self.request(|resp| Command::SubmitBook { submission, resp }).await?
    }

    pub async fn update_book(&self, id: BookId, update: BookUpdate) -> Result<Book, RuntimeError> {
        self.request(|resp| Command::UpdateBook { id, update, resp }).await?
    }

    pub async fn delete_book(&self, id: BookId) -> Result<(), RuntimeError> {
        self.request(|resp| Command::DeleteBook { id, resp }).await?
    }

    pub async fn get_book(&self, id: BookId) -> Result<Book, RuntimeError> {
        Ok(self.request(|resp| Command::GetBook { id, resp }).await??)
    }

    pub async fn list_books(
        &self,
        filter: BookFilter,
        page: PageRequest,
    ) -> Result<Page<Book>, RuntimeError> {
        self.request(|resp| Command::ListBooks { filter, page, resp }).await
    }

    pub async fn register_borrower(
        &self,
        registration: BorrowerRegistration,
    ) -> Result<Borrower, RuntimeError> {
        self.request(|resp| Command::RegisterBorrower { registration, resp }).await?
    }

    pub async fn get_borrower(&self, id: BorrowerId) -> Result<Borrower, RuntimeError> {
        Ok(self.request(|resp| Command::GetBorrower { id, resp }).await??)
    }

    pub async fn set_fine_policy(
        &self,
        category: impl Into<String>,
        fine_per_day: f64,
    ) -> Result<FinePolicy, RuntimeError> {
        let category = category.into();
        self.request(|resp| Command::SetFinePolicy {
            category,
            fine_per_day,
            resp,
        })
        .await?
    }

    pub async fn borrow_book(
        &self,
        borrower_id: BorrowerId,
        book_id: BookId,
    ) -> Result<Loan, RuntimeError> {
        self.request(|resp| Command::Borrow {
            borrower_id,
            book_id,
            resp,
        })
        .await?
    }

    pub async fn return_book(
        &self,
        borrower_id: BorrowerId,
        book_id: BookId,
    ) -> Result<Loan, RuntimeError> {
        self.request(|resp| Command::Return {
            borrower_id,
            book_id,
            resp,
        })
        .await?
    }

    pub async fn active_records(&self) -> Result<Vec<BorrowRecord>, RuntimeError> {
        self.request(|resp| Command::ActiveRecords { resp }).await
    }

    pub async fn borrow_history(
        &self,
        borrower_id: BorrowerId,
    ) -> Result<Vec<BorrowRecord>, RuntimeError> {
        self.request(|resp| Command::History { borrower_id, resp }).await
    }

    /// Overdue open loans as of `as_of`, or as of the engine's today when `None`.
    pub async fn overdue_records(
        &self,
        as_of: Option<NaiveDate>,
    ) -> Result<Vec<BorrowRecord>, RuntimeError> {
        self.request(|resp| Command::Overdue { as_of, resp }).await
    }

    pub async fn summarize(
        &self,
        records: Vec<BorrowRecord>,
    ) -> Result<Vec<LoanSummary>, RuntimeError> {
        Ok(self.request(|resp| Command::Summarize { records, resp }).await??)
    }

    pub async fn flush(&self) -> Result<OpSeq, RuntimeError> {
        self.request(|resp| Command::Flush { resp }).await?
    }

    pub async fn checkpoint(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Checkpoint { resp }).await?
    }

    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Shutdown { resp }).await?
    }
}

impl<C: Clock> Writer<'_, C> {
    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::SubmitBook { submission, resp } => {
                let res = catalog::submit_book(self.engine.store_mut(), submission);
                let out = self
                    .commit(res, |book| LibraryEvent::BookSaved { id: book.id })
                    .await;
                let _ = resp.send(out);
            }
            Command::UpdateBook { id, update, resp } => {
                let res = catalog::update_book(self.engine.store_mut(), id, update);
                let out = self
                    .commit(res, |book| LibraryEvent::BookSaved { id: book.id })
                    .await;
                let _ = resp.send(out);
            }
            Command::DeleteBook { id, resp } => {
                let res = catalog::soft_delete_book(self.engine.store_mut(), id);
                let out = self.commit(res, |_| LibraryEvent::BookDeleted { id }).await;
                let _ = resp.send(out);
            }
            Command::GetBook { id, resp } => {
                let _ = resp.send(catalog::get_book(self.engine.store(), id));
            }
            Command::ListBooks { filter, page, resp } => {
                let _ = resp.send(catalog::list_books(self.engine.store(), &filter, page));
            }
            Command::RegisterBorrower { registration, resp } => {
                let policy = self.engine.policy().clone();
                let res =
                    membership::register_borrower(self.engine.store_mut(), registration, &policy);
                let out = self
                    .commit(res, |b| LibraryEvent::BorrowerRegistered { id: b.id })
                    .await;
                let _ = resp.send(out);
            }
            Command::GetBorrower { id, resp } => {
                let _ = resp.send(membership::find_borrower(self.engine.store(), id));
            }
            Command::SetFinePolicy {
                category,
                fine_per_day,
                resp,
            } => {
                let res = self
                    .engine
                    .store_mut()
                    .put_fine_policy(&category, fine_per_day)
                    .map_err(LibraryError::from);
                let out = self.commit_quiet(res).await;
                let _ = resp.send(out);
            }
            Command::Borrow {
                borrower_id,
                book_id,
                resp,
            } => {
                let res = self.engine.borrow_book(borrower_id, book_id);
                let out = self
                    .commit(res, |loan| LibraryEvent::Borrowed {
                        record_id: loan.record.id,
                        book_id: loan.book.id,
                        borrower_id: loan.borrower.id,
                    })
                    .await;
                let _ = resp.send(out);
            }
            Command::Return {
                borrower_id,
                book_id,
                resp,
            } => {
                let res = self.engine.return_book(borrower_id, book_id);
                let out = self
                    .commit(res, |loan| LibraryEvent::Returned {
                        record_id: loan.record.id,
                        book_id: loan.book.id,
                        fine_amount: loan.record.fine_amount,
                    })
                    .await;
                let _ = resp.send(out);
            }
            Command::ActiveRecords { resp } => {
                let _ = resp.send(self.engine.active_records());
            }
            Command::History { borrower_id, resp } => {
                let _ = resp.send(self.engine.borrow_history(borrower_id));
            }
            Command::Overdue { as_of, resp } => {
                let records = match as_of {
                    Some(date) => self.engine.overdue_records(date),
                    None => self.engine.overdue_today(),
                };
                let _ = resp.send(records);
            }
            Command::Summarize { records, resp } => {
                let _ = resp.send(self.engine.summarize_all(&records));
            }
            Command::Flush { resp } => {
                let out = if let Some(tx) = self.persist_tx {
                    let (flush_tx, flush_rx) = oneshot::channel();
                    if tx.send(PersistMsg::Flush { resp: flush_tx }).await.is_err() {
                        Err(RuntimeError::ChannelClosed)
                    } else {
                        flush_rx
                            .await
                            .map_err(|_| RuntimeError::ChannelClosed)
                            .and_then(|r| r.map_err(RuntimeError::from))
                    }
                } else {
                    Ok(self.engine.store().latest_op_seq())
                };
                let _ = resp.send(out);
            }
            Command::Checkpoint { resp } => {
                let out = self.checkpoint().await;
                let _ = resp.send(out);
            }
            Command::Shutdown { resp } => {
                let out = if let Some(tx) = self.persist_tx {
                    let (done_tx, done_rx) = oneshot::channel();
                    if tx.send(PersistMsg::Shutdown { resp: done_tx }).await.is_err() {
                        Err(RuntimeError::ChannelClosed)
                    } else {
                        done_rx
                            .await
                            .map_err(|_| RuntimeError::ChannelClosed)
                            .and_then(|r| r.map_err(RuntimeError::from))
                    }
                } else {
                    Ok(())
                };
                let _ = resp.send(out);
                return true;
            }
        }

        false
    }

    /// Ships the ops committed by a successful mutation, then emits its event.
    async fn commit<T>(
        &mut self,
        res: LibraryResult<T>,
        event: impl FnOnce(&T) -> LibraryEvent,
    ) -> Result<T, RuntimeError> {
        let value = self.commit_quiet(res).await?;
        let _ = self.events_tx.send(event(&value));
        Ok(value)
    }

    async fn commit_quiet<T>(&mut self, res: LibraryResult<T>) -> Result<T, RuntimeError> {
        let value = res?;
        let ops = self.engine.store_mut().drain_pending_ops();
        if ops.is_empty() {
            return Ok(value);
        }

        let committed = ops.len();
        if let Some(tx) = self.persist_tx {
            tx.send(PersistMsg::Commit(ops))
                .await
                .map_err(|_| RuntimeError::ChannelClosed)?;
        } else {
            let _ = self.events_tx.send(LibraryEvent::DurableUpTo {
                op_seq: self.engine.store().latest_op_seq(),
            });
        }

        *self.ops_since_snapshot += committed;
        self.maybe_auto_checkpoint().await;
        Ok(value)
    }

    async fn checkpoint(&mut self) -> Result<(), RuntimeError> {
        let Some(tx) = self.persist_tx else {
            return Ok(());
        };

        let store = self.engine.store();
        let snapshot = store.export_snapshot();
        let last_seq = store.latest_op_seq();
        let (cp_tx, cp_rx) = oneshot::channel();
        tx.send(PersistMsg::Checkpoint {
            snapshot,
            last_seq,
            compact: self.config.compact_after_snapshot,
            resp: cp_tx,
        })
        .await
        .map_err(|_| RuntimeError::ChannelClosed)?;

        cp_rx.await.map_err(|_| RuntimeError::ChannelClosed)??;
        *self.ops_since_snapshot = 0;
        info!(last_seq, "checkpoint written");
        Ok(())
    }

    async fn maybe_auto_checkpoint(&mut self) {
        let every = self.config.snapshot_every_ops;
        if every == 0 || *self.ops_since_snapshot < every {
            return;
        }
        if let Err(err) = self.checkpoint().await {
            warn!(%err, "automatic checkpoint failed");
        }
    }
}

fn spawn_persistence_worker(
    sink: Box<dyn OpSink>,
    mut rx: mpsc::Receiver<PersistMsg>,
    durable_tx: mpsc::UnboundedSender<Result<OpSeq, PersistError>>,
    config: RuntimeConfig,
) {
    let mut worker = JournalWorker {
        sink: Arc::new(Mutex::new(sink)),
        buf: Vec::new(),
        last_durable: 0,
        durable_tx,
    };
    tokio::spawn(async move {
        let latency = Duration::from_millis(config.batch_max_latency_ms);
        let mut deadline = Instant::now() + latency;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else {
                        if worker.flush(true).await.is_err() {
                            warn!(lost = worker.buf.len(), "journal closed with unwritten ops");
                        }
                        break;
                    };

                    match msg {
                        PersistMsg::Commit(ops) => {
                            worker.buf.extend(ops);
                            if worker.buf.len() >= config.batch_max_ops || config.flush_on_commit {
                                let _ = worker.flush(true).await;
                                deadline = Instant::now() + latency;
                            }
                        }
                        PersistMsg::Flush { resp } => {
                            let result = worker.flush(true).await;
                            let _ = resp.send(result.map(|_| worker.last_durable));
                            deadline = Instant::now() + latency;
                        }
                        PersistMsg::Checkpoint { snapshot, last_seq, compact, resp } => {
                            let result = match worker.flush(true).await {
                                Err(err) => Err(err),
                                Ok(()) => worker.checkpoint(snapshot, last_seq, compact).await,
                            };
                            let _ = resp.send(result);
                            deadline = Instant::now() + latency;
                        }
                        PersistMsg::Shutdown { resp } => {
                            let result = worker.flush(true).await;
                            if result.is_err() {
                                warn!(lost = worker.buf.len(), "journal closed with unwritten ops");
                            }
                            let _ = resp.send(result);
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline), if !worker.buf.is_empty() => {
                    let _ = worker.flush(false).await;
                    deadline = Instant::now() + latency;
                }
            }
        }
    });
}

/// Persistence-side state: the sink and the ops not yet accepted by it.
struct JournalWorker {
    sink: Arc<Mutex<Box<dyn OpSink>>>,
    buf: Vec<StoredOp>,
    last_durable: OpSeq,
    durable_tx: mpsc::UnboundedSender<Result<OpSeq, PersistError>>,
}

impl JournalWorker {
    async fn flush(&mut self, call_flush: bool) -> Result<(), PersistError> {
        if self.buf.is_empty() {
            if call_flush {
                self.blocking(|sink| sink.flush()).await?;
            }
            return Ok(());
        }

        // The batch stays buffered until the sink accepts it, so a failed
        // append is retried ahead of anything committed later.
        let ops = self.buf.clone();
        let (appended, flushed) = self
            .blocking(move |sink| {
                let appended = sink.append_ops(&ops);
                let flushed = match &appended {
                    Ok(_) if call_flush => sink.flush(),
                    _ => Ok(()),
                };
                Ok((appended, flushed))
            })
            .await?;

        match appended {
            Ok(seq) => {
                self.buf.clear();
                self.last_durable = self.last_durable.max(seq);
                let _ = self.durable_tx.send(Ok(self.last_durable));
                flushed
            }
            Err(err) => {
                warn!(%err, pending = self.buf.len(), "journal append failed, keeping batch");
                let msg = format!("append failed: {err}");
                let _ = self.durable_tx.send(Err(PersistError::Message(msg)));
                Err(err)
            }
        }
    }

    async fn checkpoint(
        &self,
        snapshot: StoreSnapshotV1,
        last_seq: OpSeq,
        compact: bool,
    ) -> Result<(), PersistError> {
        self.blocking(move |sink| {
            sink.write_snapshot(&snapshot, last_seq)?;
            if compact {
                sink.compact_through(last_seq)?;
            }
            Ok(())
        })
        .await
    }

    /// Runs `f` against the sink on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, PersistError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn OpSink) -> Result<T, PersistError> + Send + 'static,
    {
        let sink = Arc::clone(&self.sink);
        tokio::task::spawn_blocking(move || {
            let mut sink = sink.blocking_lock();
            f(&mut **sink)
        })
        .await
        .map_err(|e| PersistError::Message(format!("join error: {e}")))?
    }
}
