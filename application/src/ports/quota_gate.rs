//! Budget and quota gate port
//!
//! Consulted once before a session starts and debited once after it
//! terminates. `check` and `debit` are not transactional with each other;
//! a session counted by `check` whose `debit` never lands can overshoot
//! the quota by at most that one session.

use async_trait::async_trait;
use council_domain::{CompanyId, SessionId, Usage, UserId};
use thiserror::Error;

/// Why admission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyKind {
    OverMonthlyQuota,
    PaymentRequired,
    KeyInvalid,
    CompanyDisabled,
}

impl DenyKind {
    pub fn code(&self) -> &'static str {
        match self {
            DenyKind::OverMonthlyQuota => "over_monthly_quota",
            DenyKind::PaymentRequired => "payment_required",
            DenyKind::KeyInvalid => "key_invalid",
            DenyKind::CompanyDisabled => "company_disabled",
        }
    }
}

impl std::fmt::Display for DenyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// The pre-flight admission decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Proceed. `remaining` is the quota left before this session, when
    /// the gate knows it.
    Allow { remaining: Option<u64> },
    Deny { kind: DenyKind, message: String },
}

/// Errors talking to the quota collaborator itself
#[derive(Error, Debug)]
pub enum QuotaError {
    #[error("quota service unavailable: {0}")]
    Unavailable(String),
}

/// Quota oracle and usage sink.
#[async_trait]
pub trait QuotaGate: Send + Sync {
    /// May this caller run one session right now?
    async fn check(
        &self,
        user: &UserId,
        company: Option<&CompanyId>,
    ) -> Result<Admission, QuotaError>;

    /// Debit the usage a terminated session actually consumed. Called for
    /// sessions that ended `complete` or `stopped`. Must be idempotent per
    /// session id: a second call for the same session is a no-op.
    async fn debit(
        &self,
        user: &UserId,
        company: Option<&CompanyId>,
        session: &SessionId,
        usage: &Usage,
    ) -> Result<(), QuotaError>;
}
