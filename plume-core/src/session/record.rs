use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted authenticated browser state for one platform/account.
///
/// The browser profile directory remains the authoritative cookie jar; this
/// record is the recovery copy that survives profile corruption and lets a
/// fresh browser instance resume a login without user interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub platform_id: String,
    pub account_hint: Option<String>,
    pub cookies: Vec<CookieRecord>,
    pub local_storage: BTreeMap<String, String>,
    /// Seeds the deterministic fingerprint noise so one persisted session keeps
    /// one stable device identity across runs.
    pub fingerprint_seed: u64,
    pub created_at: DateTime<Utc>,
    pub last_validated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default)]
    pub path: Option<String>,
    /// Seconds since the unix epoch; session cookies carry no expiry.
    #[serde(default)]
    pub expires: Option<f64>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
}

impl SessionRecord {
    pub fn new(platform_id: impl Into<String>, fingerprint_seed: u64) -> Self {
        let now = Utc::now();
        Self {
            platform_id: platform_id.into(),
            account_hint: None,
            cookies: Vec::new(),
            local_storage: BTreeMap::new(),
            fingerprint_seed,
            created_at: now,
            last_validated_at: now,
        }
    }

    pub fn age_days(&self) -> i64 {
        (Utc::now() - self.created_at).num_days()
    }

    /// Staleness by age alone. A usable session additionally needs a passing
    /// liveness probe, which only the login orchestrator can run.
    pub fn is_expired(&self, max_age_days: i64) -> bool {
        self.age_days() >= max_age_days
    }

    pub fn touch_validated(&mut self) {
        self.last_validated_at = Utc::now();
    }
}
