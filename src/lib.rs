//! Library borrowing engine: catalog, membership, loans, and overdue fines,
//! backed by an authoritative in-memory store with an append-only SQLite
//! journal.
//!
//! # Examples
//!
//! In-memory usage with [`engine::borrowing::BorrowingEngine`]:
//! ```
//! use chrono::NaiveDate;
//! use libloan::{
//!     config::LoanPolicy,
//!     core::store::LibraryStore,
//!     engine::{borrowing::BorrowingEngine, clock::ManualClock},
//!     services::{
//!         catalog::{submit_book, BookSubmission},
//!         membership::{register_borrower, BorrowerRegistration},
//!     },
//! };
//!
//! let policy = LoanPolicy::default();
//! let mut store = LibraryStore::new();
//! let book = submit_book(&mut store, BookSubmission {
//!     title: "Dune".to_string(),
//!     category: Some("Fiction".to_string()),
//!     total_copies: 2,
//!     ..BookSubmission::default()
//! }).expect("submit");
//! let reader = register_borrower(&mut store, BorrowerRegistration {
//!     name: "Ada".to_string(),
//!     email: "ada@example.com".to_string(),
//!     tier: None,
//! }, &policy).expect("register");
//!
//! let clock = ManualClock::new(NaiveDate::from_ymd_opt(2024, 1, 1).expect("date"));
//! let mut engine = BorrowingEngine::with_clock(store, policy, clock);
//! let loan = engine.borrow_book(reader.id, book.id).expect("borrow");
//! assert_eq!(loan.book.available_copies, 1);
//! assert_eq!(loan.record.due_date, NaiveDate::from_ymd_opt(2024, 1, 15).expect("date"));
//! ```
//!
//! Runtime usage with SQLite sink:
//! ```no_run
//! use libloan::{
//!     config::LibraryConfig,
//!     engine::borrowing::BorrowingEngine,
//!     persist::sqlite::SqliteOpSink,
//!     runtime::handle::spawn_library,
//!     services::catalog::BookSubmission,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = LibraryConfig::load("library.json").expect("config");
//! let sink = SqliteOpSink::open("library.db").expect("open sqlite");
//! let store = sink.load_store().expect("replay");
//! let engine = BorrowingEngine::new(store, config.policy.clone());
//! let handle = spawn_library(engine, Some(Box::new(sink)), config.runtime.clone());
//! let _book = handle.submit_book(BookSubmission {
//!     title: "Dune".to_string(),
//!     total_copies: 3,
//!     ..BookSubmission::default()
//! }).await.expect("submit");
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```
#![warn(missing_docs)]

/// Catalog entries.
pub mod book;
/// Registered members.
pub mod borrower;
/// Loan policy and configuration loading.
pub mod config;
/// Core in-memory store and index helpers.
pub mod core;
/// Borrowing engine, store contracts, clocks, and fine arithmetic.
pub mod engine;
/// Caller-facing error kinds.
pub mod error;
/// Borrow records, fine policies, and loan views.
pub mod loan;
/// Mutation op model and persistence wrapper types.
pub mod op;
/// Persistence abstraction and SQLite implementation.
pub mod persist;
/// Single-writer runtime handle and events.
pub mod runtime;
/// Catalog and membership services.
pub mod services;
/// Shared primitive types and enums.
pub mod types;
