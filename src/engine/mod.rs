//! Borrowing transaction engine.

/// Borrow/return orchestration and loan queries.
pub mod borrowing;
/// Calendar sources.
pub mod clock;
/// Fine-rate resolution and late-fee arithmetic.
pub mod fines;
/// Store contracts the engine depends on.
pub mod traits;
