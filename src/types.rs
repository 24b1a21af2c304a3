//! Shared primitive IDs and membership enums.

use serde::{Deserialize, Serialize};

use crate::config::LoanPolicy;

/// Monotonic book identifier.
pub type BookId = u64;
/// Monotonic borrower identifier.
pub type BorrowerId = u64;
/// Monotonic borrow record identifier.
pub type RecordId = u64;
/// Monotonic fine policy identifier.
pub type FinePolicyId = u64;
/// Monotonic operation sequence number.
pub type OpSeq = u64;

/// Membership tier chosen at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MembershipTier {
    /// Standard membership.
    #[default]
    Basic,
    /// Extended membership with a higher loan cap.
    Premium,
}

impl MembershipTier {
    /// Maximum number of simultaneous open loans for this tier under `policy`.
    pub fn loan_limit(self, policy: &LoanPolicy) -> u32 {
        match self {
            Self::Basic => policy.basic_loan_limit,
            Self::Premium => policy.premium_loan_limit,
        }
    }
}
