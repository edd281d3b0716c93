//! Remote quota service client.
//!
//! The billing collaborator is consulted as an oracle: `check` before a
//! session, `debit` after. Idempotency of `debit` is keyed on the session
//! id, which travels with every debit call.

use async_trait::async_trait;
use council_application::ports::quota_gate::{Admission, DenyKind, QuotaError, QuotaGate};
use council_domain::{CompanyId, SessionId, Usage, UserId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
struct CheckRequest<'a> {
    user_id: &'a str,
    company_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct CheckResponse {
    allow: bool,
    #[serde(default)]
    remaining: Option<u64>,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Serialize)]
struct DebitRequest<'a> {
    user_id: &'a str,
    company_id: Option<&'a str>,
    session_id: &'a str,
    usage: &'a Usage,
}

/// Parse the service's deny kind string; unknown kinds read as a payment
/// problem, the most conservative user-visible message.
fn parse_deny_kind(kind: Option<&str>) -> DenyKind {
    match kind {
        Some("over_monthly_quota") => DenyKind::OverMonthlyQuota,
        Some("key_invalid") => DenyKind::KeyInvalid,
        Some("company_disabled") => DenyKind::CompanyDisabled,
        _ => DenyKind::PaymentRequired,
    }
}

/// Quota gate backed by the remote billing service.
pub struct HttpQuotaGate {
    client: reqwest::Client,
    base_url: String,
}

impl HttpQuotaGate {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl QuotaGate for HttpQuotaGate {
    async fn check(
        &self,
        user: &UserId,
        company: Option<&CompanyId>,
    ) -> Result<Admission, QuotaError> {
        let response = self
            .client
            .post(format!("{}/v1/quota/check", self.base_url))
            .json(&CheckRequest {
                user_id: user.as_str(),
                company_id: company.map(|c| c.as_str()),
            })
            .send()
            .await
            .map_err(|e| QuotaError::Unavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| QuotaError::Unavailable(e.to_string()))?;

        let body: CheckResponse = response
            .json()
            .await
            .map_err(|e| QuotaError::Unavailable(e.to_string()))?;

        if body.allow {
            Ok(Admission::Allow {
                remaining: body.remaining,
            })
        } else {
            Ok(Admission::Deny {
                kind: parse_deny_kind(body.kind.as_deref()),
                message: body.message.unwrap_or_else(|| "quota denied".to_string()),
            })
        }
    }

    async fn debit(
        &self,
        user: &UserId,
        company: Option<&CompanyId>,
        session: &SessionId,
        usage: &Usage,
    ) -> Result<(), QuotaError> {
        debug!(session = %session, "debiting quota service");
        self.client
            .post(format!("{}/v1/quota/debit", self.base_url))
            .json(&DebitRequest {
                user_id: user.as_str(),
                company_id: company.map(|c| c.as_str()),
                session_id: session.as_str(),
                usage,
            })
            .send()
            .await
            .map_err(|e| QuotaError::Unavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| QuotaError::Unavailable(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_kinds_parse_with_conservative_default() {
        assert_eq!(
            parse_deny_kind(Some("over_monthly_quota")),
            DenyKind::OverMonthlyQuota
        );
        assert_eq!(parse_deny_kind(Some("key_invalid")), DenyKind::KeyInvalid);
        assert_eq!(
            parse_deny_kind(Some("company_disabled")),
            DenyKind::CompanyDisabled
        );
        assert_eq!(parse_deny_kind(Some("mystery")), DenyKind::PaymentRequired);
        assert_eq!(parse_deny_kind(None), DenyKind::PaymentRequired);
    }
}
