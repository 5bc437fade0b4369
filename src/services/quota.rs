//! Daily per-user quota counters.
//!
//! The counter owns atomicity: at most `daily_limit` consumptions succeed for
//! one user on one calendar day, and exhausted attempts do not increment.

use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::{AuthenticatedUser, SupabaseConfig};

pub const DEFAULT_DAILY_LIMIT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaState {
    pub allowed: bool,
    pub remaining: u32,
    pub used: u32,
    pub daily_limit: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    #[error("quota transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("quota service returned HTTP {status}")]
    Status { status: u16 },
    #[error("quota service returned no row")]
    MissingRow,
    #[error("quota row malformed: {0}")]
    Malformed(String),
}

#[async_trait::async_trait]
pub trait QuotaCounter: Send + Sync {
    /// Atomically consume one unit for today.
    async fn consume(&self, user: &AuthenticatedUser) -> Result<QuotaState, QuotaError>;

    /// Read today's usage without consuming.
    async fn peek(&self, user: &AuthenticatedUser) -> Result<QuotaState, QuotaError>;

    /// Short backend name for health output.
    fn backend(&self) -> &'static str;

    /// Limit enforced locally, or `None` when the backing store decides it.
    fn configured_limit(&self) -> Option<u32>;
}

pub type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

/// Process-local counter keyed by (user, UTC day).  Suitable for a single
/// instance; multi-instance deployments use [`SupabaseQuota`].
pub struct InMemoryQuota {
    daily_limit: u32,
    counts: DashMap<(String, NaiveDate), u32>,
    last_day: Mutex<Option<NaiveDate>>,
    clock: Clock,
}

impl InMemoryQuota {
    pub fn new(daily_limit: u32) -> Self {
        Self::with_clock(daily_limit, Arc::new(|| chrono::Utc::now().date_naive()))
    }

    pub fn with_clock(daily_limit: u32, clock: Clock) -> Self {
        Self {
            daily_limit,
            counts: DashMap::new(),
            last_day: Mutex::new(None),
            clock,
        }
    }

    fn today(&self) -> NaiveDate {
        let today = (self.clock)();
        if let Ok(mut last) = self.last_day.lock() {
            if *last != Some(today) {
                self.counts.retain(|(_, day), _| *day == today);
                *last = Some(today);
            }
        }
        today
    }

    fn state(&self, used: u32, allowed: bool) -> QuotaState {
        QuotaState {
            allowed,
            remaining: self.daily_limit.saturating_sub(used),
            used,
            daily_limit: self.daily_limit,
        }
    }
}

#[async_trait::async_trait]
impl QuotaCounter for InMemoryQuota {
    async fn consume(&self, user: &AuthenticatedUser) -> Result<QuotaState, QuotaError> {
        let key = (user.user_id.clone(), self.today());
        // The entry guard holds the shard lock for the compare-and-increment.
        let mut used = self.counts.entry(key).or_insert(0);
        if *used >= self.daily_limit {
            return Ok(self.state(*used, false));
        }
        *used += 1;
        Ok(self.state(*used, true))
    }

    async fn peek(&self, user: &AuthenticatedUser) -> Result<QuotaState, QuotaError> {
        let key = (user.user_id.clone(), self.today());
        let used = self.counts.get(&key).map(|v| *v).unwrap_or(0);
        Ok(self.state(used, used < self.daily_limit))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }

    fn configured_limit(&self) -> Option<u32> {
        Some(self.daily_limit)
    }
}

/// Counter backed by database functions exposed through the REST RPC
/// interface.  The database performs the atomic increment-and-compare.
pub struct SupabaseQuota {
    cfg: SupabaseConfig,
    client: reqwest::Client,
}

/// Row shape returned by the RPC functions.  The peek function omits
/// `allowed`.
#[derive(Debug, Deserialize)]
struct QuotaRow {
    allowed: Option<bool>,
    remaining: Option<i64>,
    used: Option<i64>,
    daily_limit: Option<i64>,
}

impl SupabaseQuota {
    pub fn new(cfg: SupabaseConfig) -> reqwest::Result<Self> {
        let client = cfg.http_client()?;
        Ok(Self { cfg, client })
    }

    async fn call(&self, function: &str, user: &AuthenticatedUser) -> Result<QuotaRow, QuotaError> {
        let resp = self
            .client
            .post(self.cfg.endpoint(&format!("rest/v1/rpc/{}", function)))
            .header("apikey", &self.cfg.anon_key)
            .bearer_auth(&user.access_token)
            .json(&serde_json::json!({ "p_user_id": user.user_id }))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(QuotaError::Status {
                status: status.as_u16(),
            });
        }
        let body: serde_json::Value = resp.json().await?;
        parse_quota_row(body)
    }
}

/// Functions may return a set (array of rows) or a single row.
fn parse_quota_row(body: serde_json::Value) -> Result<QuotaRow, QuotaError> {
    let row = match body {
        serde_json::Value::Array(rows) => rows.into_iter().next(),
        serde_json::Value::Null => None,
        other => Some(other),
    }
    .ok_or(QuotaError::MissingRow)?;
    serde_json::from_value(row).map_err(|e| QuotaError::Malformed(e.to_string()))
}

fn non_negative(v: Option<i64>, default: u32) -> u32 {
    v.map(|n| n.clamp(0, u32::MAX as i64) as u32).unwrap_or(default)
}

impl QuotaRow {
    fn into_state(self, require_allowed: bool) -> Result<QuotaState, QuotaError> {
        let remaining = non_negative(self.remaining, 0);
        let allowed = match self.allowed {
            Some(a) => a,
            None if require_allowed => {
                return Err(QuotaError::Malformed("missing `allowed`".into()));
            }
            None => remaining > 0,
        };
        Ok(QuotaState {
            allowed,
            remaining,
            used: non_negative(self.used, 0),
            daily_limit: non_negative(self.daily_limit, DEFAULT_DAILY_LIMIT),
        })
    }
}

#[async_trait::async_trait]
impl QuotaCounter for SupabaseQuota {
    async fn consume(&self, user: &AuthenticatedUser) -> Result<QuotaState, QuotaError> {
        self.call("consume_mbti_ai_quota", user).await?.into_state(true)
    }

    async fn peek(&self, user: &AuthenticatedUser) -> Result<QuotaState, QuotaError> {
        self.call("get_mbti_ai_quota", user).await?.into_state(false)
    }

    fn backend(&self) -> &'static str {
        "supabase"
    }

    fn configured_limit(&self) -> Option<u32> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicI64, Ordering};

    fn user(id: &str) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: id.to_string(),
            access_token: "t".to_string(),
        }
    }

    #[tokio::test]
    async fn fourth_call_is_refused_without_incrementing() {
        let quota = InMemoryQuota::new(3);
        let nurse = user("n1");
        for expected_remaining in [2, 1, 0] {
            let s = quota.consume(&nurse).await.unwrap();
            assert!(s.allowed);
            assert_eq!(s.remaining, expected_remaining);
        }
        let s = quota.consume(&nurse).await.unwrap();
        assert!(!s.allowed);
        assert_eq!(s.remaining, 0);
        assert_eq!(s.used, 3);
        let s = quota.consume(&nurse).await.unwrap();
        assert_eq!(s.used, 3);

        let other = quota.consume(&user("n2")).await.unwrap();
        assert!(other.allowed);
        assert_eq!(other.remaining, 2);
    }

    #[tokio::test]
    async fn concurrent_consumers_never_exceed_the_limit() {
        let quota = Arc::new(InMemoryQuota::new(5));
        let mut handles = Vec::new();
        for _ in 0..32 {
            let q = quota.clone();
            handles.push(tokio::spawn(async move {
                q.consume(&user("shared")).await.unwrap().allowed
            }));
        }
        let mut allowed = 0;
        for h in handles {
            if h.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 5);
    }

    #[tokio::test]
    async fn counts_reset_on_a_new_day() {
        let day = Arc::new(AtomicI64::new(0));
        let d = day.clone();
        let base = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
        let quota = InMemoryQuota::with_clock(
            1,
            Arc::new(move || base + chrono::Days::new(d.load(Ordering::SeqCst) as u64)),
        );
        let nurse = user("n1");
        assert!(quota.consume(&nurse).await.unwrap().allowed);
        assert!(!quota.consume(&nurse).await.unwrap().allowed);
        day.store(1, Ordering::SeqCst);
        assert!(quota.consume(&nurse).await.unwrap().allowed);
        assert_eq!(quota.counts.len(), 1);
    }

    #[tokio::test]
    async fn peek_does_not_consume() {
        let quota = InMemoryQuota::new(3);
        let nurse = user("n1");
        quota.consume(&nurse).await.unwrap();
        let s = quota.peek(&nurse).await.unwrap();
        assert_eq!((s.used, s.remaining, s.daily_limit), (1, 2, 3));
        assert_eq!(quota.peek(&nurse).await.unwrap().used, 1);
    }

    #[test]
    fn rows_parse_from_array_or_object() {
        let row = parse_quota_row(json!([{"allowed": true, "remaining": 2, "used": 1, "daily_limit": 3}]))
            .unwrap()
            .into_state(true)
            .unwrap();
        assert_eq!(row.remaining, 2);
        let row = parse_quota_row(json!({"remaining": -4, "used": 3}))
            .unwrap()
            .into_state(false)
            .unwrap();
        assert_eq!((row.allowed, row.remaining, row.daily_limit), (false, 0, 3));
    }

    #[test]
    fn missing_or_malformed_rows_are_errors() {
        assert!(matches!(parse_quota_row(json!([])), Err(QuotaError::MissingRow)));
        assert!(matches!(parse_quota_row(json!(null)), Err(QuotaError::MissingRow)));
        assert!(matches!(
            parse_quota_row(json!({"remaining": "two"})),
            Err(QuotaError::Malformed(_))
        ));
        let row = parse_quota_row(json!({"remaining": 1})).unwrap();
        assert!(matches!(row.into_state(true), Err(QuotaError::Malformed(_))));
    }
}
