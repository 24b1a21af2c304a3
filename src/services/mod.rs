//! Catalog and membership services sharing the engine's store.

/// Catalog ingestion and maintenance.
pub mod catalog;
/// Borrower registration and lookup.
pub mod membership;
