//! In-process quota gate for self-hosted and development deployments.
//!
//! Counts sessions per user per calendar month. `check` reserves a slot
//! (which is what bounds overshoot to at most one session per user when a
//! debit never lands); `debit` records consumed usage and is idempotent
//! per session id.

use async_trait::async_trait;
use council_application::ports::quota_gate::{Admission, DenyKind, QuotaError, QuotaGate};
use council_domain::{CompanyId, SessionId, Usage, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::debug;

#[derive(Default)]
struct MonthState {
    month: String,
    sessions: HashMap<UserId, u64>,
    debited: HashSet<SessionId>,
    consumed: HashMap<UserId, Usage>,
}

/// Monthly per-user session quota held in process memory.
pub struct LocalQuotaGate {
    monthly_sessions: Option<u64>,
    state: Mutex<MonthState>,
}

impl LocalQuotaGate {
    pub fn new(monthly_sessions: Option<u64>) -> Self {
        Self {
            monthly_sessions,
            state: Mutex::new(MonthState::default()),
        }
    }

    /// Unlimited gate: admits everyone, still tracks debits.
    pub fn unlimited() -> Self {
        Self::new(None)
    }

    pub fn consumed(&self, user: &UserId) -> Usage {
        self.lock().consumed.get(user).copied().unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MonthState> {
        let mut state = self.state.lock().expect("quota state lock poisoned");
        let month = current_month();
        if state.month != month {
            *state = MonthState {
                month,
                ..MonthState::default()
            };
        }
        state
    }
}

fn current_month() -> String {
    chrono::Utc::now().format("%Y-%m").to_string()
}

#[async_trait]
impl QuotaGate for LocalQuotaGate {
    async fn check(
        &self,
        user: &UserId,
        _company: Option<&CompanyId>,
    ) -> Result<Admission, QuotaError> {
        let mut state = self.lock();
        let used = state.sessions.entry(user.clone()).or_insert(0);

        match self.monthly_sessions {
            Some(limit) if *used >= limit => Ok(Admission::Deny {
                kind: DenyKind::OverMonthlyQuota,
                message: format!("monthly session quota of {} exhausted", limit),
            }),
            Some(limit) => {
                let remaining = limit - *used;
                *used += 1;
                Ok(Admission::Allow {
                    remaining: Some(remaining),
                })
            }
            None => {
                *used += 1;
                Ok(Admission::Allow { remaining: None })
            }
        }
    }

    async fn debit(
        &self,
        user: &UserId,
        _company: Option<&CompanyId>,
        session: &SessionId,
        usage: &Usage,
    ) -> Result<(), QuotaError> {
        let mut state = self.lock();
        if !state.debited.insert(session.clone()) {
            debug!(session = %session, "duplicate debit ignored");
            return Ok(());
        }
        state
            .consumed
            .entry(user.clone())
            .or_default()
            .add(usage);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserId {
        UserId::new("u1")
    }

    #[tokio::test]
    async fn admits_until_the_monthly_limit() {
        let gate = LocalQuotaGate::new(Some(2));

        assert_eq!(
            gate.check(&user(), None).await.unwrap(),
            Admission::Allow { remaining: Some(2) }
        );
        assert_eq!(
            gate.check(&user(), None).await.unwrap(),
            Admission::Allow { remaining: Some(1) }
        );
        match gate.check(&user(), None).await.unwrap() {
            Admission::Deny { kind, .. } => assert_eq!(kind, DenyKind::OverMonthlyQuota),
            other => panic!("expected deny, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn quotas_are_per_user() {
        let gate = LocalQuotaGate::new(Some(1));
        gate.check(&UserId::new("u1"), None).await.unwrap();
        assert!(matches!(
            gate.check(&UserId::new("u2"), None).await.unwrap(),
            Admission::Allow { .. }
        ));
    }

    #[tokio::test]
    async fn debit_is_idempotent_per_session() {
        let gate = LocalQuotaGate::unlimited();
        let session = SessionId::new("s1");
        let usage = Usage::new(100, 50, 3);

        gate.debit(&user(), None, &session, &usage).await.unwrap();
        gate.debit(&user(), None, &session, &usage).await.unwrap();

        assert_eq!(gate.consumed(&user()), usage);
    }

    #[tokio::test]
    async fn distinct_sessions_accumulate() {
        let gate = LocalQuotaGate::unlimited();
        gate.debit(&user(), None, &SessionId::new("s1"), &Usage::new(10, 0, 0))
            .await
            .unwrap();
        gate.debit(&user(), None, &SessionId::new("s2"), &Usage::new(5, 0, 0))
            .await
            .unwrap();
        assert_eq!(gate.consumed(&user()).input_tokens, 15);
    }
}
