//! Borrower registration.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    borrower::{Borrower, NewBorrower},
    config::LoanPolicy,
    engine::traits::{MembershipStore, Transactional},
    error::{LibraryError, LibraryResult},
    types::{BorrowerId, MembershipTier},
};

/// Registration request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowerRegistration {
    /// Display name.
    pub name: String,
    /// Contact email.
    pub email: String,
    /// Requested tier; BASIC when absent.
    pub tier: Option<MembershipTier>,
}

/// Registers a borrower with the loan cap of their tier.
pub fn register_borrower<S>(
    store: &mut S,
    registration: BorrowerRegistration,
    policy: &LoanPolicy,
) -> LibraryResult<Borrower>
where
    S: MembershipStore + Transactional,
{
    let name = registration.name.trim();
    if name.is_empty() {
        return Err(LibraryError::InvalidInput("Name must be provided".to_string()));
    }
    let email = registration.email.trim();
    if email.is_empty() {
        return Err(LibraryError::InvalidInput("Email must be provided".to_string()));
    }

    let tier = registration.tier.unwrap_or_default();
    let draft = NewBorrower {
        name: name.to_string(),
        email: email.to_string(),
        tier,
        max_loans: tier.loan_limit(policy),
    };

    store.with_transaction(|store| {
        if store.find_borrower_by_email(&draft.email).is_some() {
            return Err(LibraryError::Duplicate(
                "A borrower with this email already exists.".to_string(),
            ));
        }
        let borrower = store.insert_borrower(draft)?;
        debug!(borrower_id = borrower.id, tier = ?borrower.tier, "borrower registered");
        Ok(borrower)
    })
}

/// Borrower by id.
pub fn find_borrower<S: MembershipStore>(store: &S, id: BorrowerId) -> LibraryResult<Borrower> {
    store
        .find_borrower(id)
        .ok_or_else(|| LibraryError::borrower_not_found(id))
}
