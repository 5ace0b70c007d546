use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::LoginSection;
use crate::session::{SessionRecord, SessionStore, StoreError};
use crate::telemetry::AutomationTelemetry;

use super::surface::LoginSurface;

pub type LoginResult<T> = Result<T, LoginError>;

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("login timed out after {0} seconds")]
    Timeout(u64),
    #[error("login failed: {0}")]
    Failed(String),
    #[error("session store error: {0}")]
    Store(#[from] StoreError),
    #[error("login surface error: {0}")]
    Surface(String),
}

/// External view of a login outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Valid,
    /// The interactive surface is presented and completion rests with the
    /// user. Only returned when the orchestrator is configured not to block.
    AwaitingUser,
    Failed(String),
}

/// Internal state machine positions; terminal states are `Valid` and `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    NoSession,
    Validating,
    AwaitingInteractiveLogin,
    Valid,
    Failed,
}

/// Establishes a valid session: reuse persisted state when it still probes
/// alive, otherwise drive the interactive flow and persist what it produced.
/// One login attempt per platform may be in flight; concurrent callers block
/// on the per-platform guard rather than opening a second interactive surface,
/// because two simultaneous login UIs corrupt one browser profile.
pub struct LoginOrchestrator {
    store: Arc<SessionStore>,
    config: LoginSection,
    max_age_days: i64,
    telemetry: Option<Arc<AutomationTelemetry>>,
    guards: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl LoginOrchestrator {
    pub fn new(store: Arc<SessionStore>, config: LoginSection, max_age_days: i64) -> Self {
        Self {
            store,
            config,
            max_age_days,
            telemetry: None,
            guards: AsyncMutex::new(HashMap::new()),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<AutomationTelemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    async fn platform_guard(&self, platform: &str) -> Arc<AsyncMutex<()>> {
        let mut guards = self.guards.lock().await;
        Arc::clone(
            guards
                .entry(platform.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    /// Runs the state machine to completion against `surface`. Returns
    /// `Ok(status)` for every orderly outcome including timeout; `Err` is
    /// reserved for store/surface transport failures.
    pub async fn ensure_login(
        &self,
        platform: &str,
        surface: &mut dyn LoginSurface,
    ) -> LoginResult<SessionStatus> {
        let guard = self.platform_guard(platform).await;
        let _held = guard.lock().await;
        let started = Instant::now();

        let mut state = LoginState::NoSession;
        debug!(platform, state = ?state, "login flow started");
        let record = self.store.load(platform)?;

        if let Some(mut record) = record {
            if record.is_expired(self.max_age_days) {
                info!(
                    platform,
                    age_days = record.age_days(),
                    "session record expired, interactive login required"
                );
            } else {
                state = LoginState::Validating;
                debug!(platform, state = ?state, "validating persisted session");
                surface.apply_session(&record).await?;
                match surface.probe_authenticated().await {
                    Ok(true) => {
                        record.touch_validated();
                        self.store.save(platform, &record)?;
                        self.record_login(platform, "valid", false, started);
                        return Ok(SessionStatus::Valid);
                    }
                    Ok(false) => {
                        info!(platform, "liveness probe failed, session no longer grants access");
                    }
                    Err(err) => {
                        warn!(platform, error = %err, "liveness probe errored, falling back to interactive login");
                    }
                }
            }
        } else {
            debug!(platform, "no persisted session");
        }

        state = LoginState::AwaitingInteractiveLogin;
        debug!(platform, state = ?state, "entering interactive login");
        let qr = surface.begin_interactive().await?;
        info!(platform, qr_captured = qr.is_some(), "login surface presented");

        if self.config.interactive_timeout_seconds == 0 {
            // Non-blocking mode: the caller owns the wait.
            self.record_login(platform, "awaiting_user", true, started);
            return Ok(SessionStatus::AwaitingUser);
        }

        let deadline = Instant::now() + Duration::from_secs(self.config.interactive_timeout_seconds);
        let poll_interval = Duration::from_secs(self.config.poll_interval_seconds.max(1));
        loop {
            if surface.poll_authenticated().await? {
                break;
            }
            if Instant::now() >= deadline {
                state = LoginState::Failed;
                warn!(platform, state = ?state, "interactive login timed out");
                self.record_login(platform, "timeout", true, started);
                return Ok(SessionStatus::Failed(format!(
                    "login timed out after {} seconds",
                    self.config.interactive_timeout_seconds
                )));
            }
            sleep(poll_interval).await;
        }

        let captured = surface.capture_session().await?;
        let previous_seed = self
            .store
            .load(platform)?
            .map(|record| record.fingerprint_seed);
        let mut record = SessionRecord::new(
            platform,
            previous_seed.unwrap_or_else(|| rand::thread_rng().gen()),
        );
        record.cookies = captured.cookies;
        record.local_storage = captured.local_storage;
        record.account_hint = captured.account_hint;
        self.store.save(platform, &record)?;

        state = LoginState::Valid;
        info!(platform, state = ?state, "interactive login completed");
        self.record_login(platform, "valid", true, started);
        Ok(SessionStatus::Valid)
    }

    fn record_login(&self, platform: &str, outcome: &str, interactive: bool, started: Instant) {
        if let Some(telemetry) = &self.telemetry {
            if let Err(err) = telemetry.record_login(
                platform,
                outcome,
                interactive,
                started.elapsed().as_millis() as i64,
            ) {
                warn!(error = %err, "failed to record login telemetry");
            }
        }
    }
}
