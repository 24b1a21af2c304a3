//! Registered borrowers.

use serde::{Deserialize, Serialize};

use crate::types::{BorrowerId, MembershipTier};

/// Registered library member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Borrower {
    /// Stable borrower identifier.
    pub id: BorrowerId,
    /// Display name.
    pub name: String,
    /// Contact email, globally unique.
    pub email: String,
    /// Membership tier at registration.
    pub tier: MembershipTier,
    /// Open-loan cap derived from the tier at registration.
    pub max_loans: u32,
}

/// Insert payload used to create a new [`Borrower`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBorrower {
    /// Display name.
    pub name: String,
    /// Contact email.
    pub email: String,
    /// Membership tier.
    pub tier: MembershipTier,
    /// Open-loan cap.
    pub max_loans: u32,
}

impl NewBorrower {
    /// Materializes the draft under `id`.
    pub fn into_borrower(self, id: BorrowerId) -> Borrower {
        Borrower {
            id,
            name: self.name,
            email: self.email,
            tier: self.tier,
            max_loans: self.max_loans,
        }
    }
}
