use std::path::PathBuf;
use std::sync::Arc;

use rand::Rng;
use serde::Serialize;
use tracing::info;

use crate::browser::BrowserSupervisor;
use crate::config::ConfigBundle;
use crate::engine::{
    target_entry, ActionEngine, ActionSurface, ActionTarget, EngineError, LiveSurface,
    ResolveOptions, SubmitReport, VerifyMode,
};
use crate::login::{LiveLoginSurface, LoginOrchestrator, SessionStatus};
use crate::ops::{self, Comment, CommentHarvest, Draft, NoteContent, OpError, OpResult, SearchHit};
use crate::retry::RetryPolicy;
use crate::session::SessionStore;
use crate::telemetry::{AutomationTelemetry, FailureContext, FailureStage};

/// Store-level view of a session; cheap and side-effect free, so repeated
/// calls without an intervening invalidation agree with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub valid: bool,
    pub age_days: i64,
}

/// Single-target operation for the generic `run_action` entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOperation {
    Click,
    EnterText,
    ReadText,
    Submit,
}

#[derive(Debug, Clone)]
pub enum ActionOutcome {
    Done,
    Text(String),
    Submitted(SubmitReport),
}

/// The narrow contract the core exposes to its collaborators (CLI, wrappers).
/// Owns the session store, the browser singleton, the login orchestrator and
/// hands each operation a per-platform page behind a per-label lock.
pub struct PlumeService {
    bundle: ConfigBundle,
    store: Arc<SessionStore>,
    supervisor: Arc<BrowserSupervisor>,
    orchestrator: LoginOrchestrator,
    retry: RetryPolicy,
    telemetry: Arc<AutomationTelemetry>,
}

impl PlumeService {
    pub fn new(bundle: ConfigBundle) -> OpResult<Self> {
        let sessions_dir = bundle
            .plume
            .resolve_path(&bundle.plume.paths.data_dir)
            .join("sessions");
        let store = Arc::new(SessionStore::new(
            sessions_dir,
            bundle.plume.session.backup_enabled,
        )?);

        let profile_dir: PathBuf = bundle.plume.resolve_path(&bundle.plume.paths.profile_dir);
        let supervisor = Arc::new(BrowserSupervisor::new(
            Arc::new(bundle.browser.clone()),
            profile_dir,
        ));

        let telemetry = Arc::new(
            AutomationTelemetry::new(
                bundle
                    .plume
                    .resolve_path(&bundle.plume.observability.failure_log),
                bundle
                    .plume
                    .resolve_path(&bundle.plume.observability.metrics_db),
            )
            .map_err(|err| OpError::InvalidInput(format!("telemetry init failed: {err}")))?,
        );

        let orchestrator = LoginOrchestrator::new(
            Arc::clone(&store),
            bundle.plume.login.clone(),
            bundle.plume.session.max_age_days,
        )
        .with_telemetry(Arc::clone(&telemetry));

        let retry = RetryPolicy::new(bundle.plume.retry.clone());

        Ok(Self {
            bundle,
            store,
            supervisor,
            orchestrator,
            retry,
            telemetry,
        })
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Tags a surfaced error with the stage that failed, so the caller knows
    /// whether the fix is "log in again", "get a fresh link", or "retry".
    fn record_failure(&self, platform: &str, target: Option<&str>, error: &OpError) {
        let stage = match error {
            OpError::LoginRequired(_) | OpError::Login(_) => FailureStage::Login,
            OpError::Engine(EngineError::ActionVerificationFailed { .. }) => {
                FailureStage::Verification
            }
            OpError::Engine(EngineError::NavigationStale) => FailureStage::Navigation,
            _ => FailureStage::Resolution,
        };
        let context = FailureContext {
            timestamp: chrono::Utc::now(),
            platform: platform.to_string(),
            stage,
            target: target.map(|t| t.to_string()),
            error_message: error.to_string(),
            attempt: self.retry.max_attempts(),
        };
        if let Err(err) = self.telemetry.record_failure(&context) {
            tracing::warn!(error = %err, "failed to record failure telemetry");
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn engine_for(&self, platform: &str) -> ActionEngine {
        ActionEngine::new(platform, self.bundle.browser.engine.clone())
            .with_telemetry(Arc::clone(&self.telemetry))
    }

    fn fingerprint_seed(&self, platform: &str) -> u64 {
        self.store
            .load(platform)
            .ok()
            .flatten()
            .map(|record| record.fingerprint_seed)
            .unwrap_or_else(|| rand::thread_rng().gen())
    }

    async fn surface_for(&self, platform: &str) -> OpResult<LiveSurface> {
        self.supervisor.acquire().await?;
        let page = self
            .supervisor
            .get_page(platform, self.fingerprint_seed(platform))
            .await?;
        Ok(LiveSurface::new(
            page,
            self.bundle.browser.human_simulation.clone(),
            &self.bundle.browser.engine,
        ))
    }

    /// Establishes a valid session for the platform, reusing persisted state
    /// when it still probes alive.
    pub async fn ensure_login(&self, platform: &str) -> OpResult<SessionStatus> {
        let platform_cfg = self
            .bundle
            .browser
            .platform(platform)
            .map_err(|err| OpError::InvalidInput(err.to_string()))?
            .clone();
        self.supervisor.acquire().await?;
        let page = self
            .supervisor
            .get_page(platform, self.fingerprint_seed(platform))
            .await?;
        let lock = self.supervisor.page_lock(platform).await?;
        let _guard = lock.lock().await;

        let mut surface = LiveLoginSurface::new(
            page,
            platform_cfg,
            self.bundle.browser.human_simulation.clone(),
            self.bundle.plume.login.capture_qr,
        );
        Ok(self.orchestrator.ensure_login(platform, &mut surface).await?)
    }

    /// Store-level session view. No probe, no DOM access; calling this twice
    /// in a row returns identical answers.
    pub fn get_session_info(&self, platform: &str) -> OpResult<SessionInfo> {
        let record = self.store.load(platform)?;
        Ok(match record {
            Some(record) => SessionInfo {
                valid: !record.is_expired(self.bundle.plume.session.max_age_days),
                age_days: record.age_days(),
            },
            None => SessionInfo {
                valid: false,
                age_days: 0,
            },
        })
    }

    pub fn invalidate_session(&self, platform: &str) -> OpResult<()> {
        info!(platform, "invalidating session");
        self.store.invalidate(platform)?;
        Ok(())
    }

    async fn require_valid_login(&self, platform: &str) -> OpResult<()> {
        match self.ensure_login(platform).await? {
            SessionStatus::Valid => Ok(()),
            SessionStatus::AwaitingUser => Err(OpError::LoginRequired(
                "interactive login is pending user action".into(),
            )),
            SessionStatus::Failed(reason) => Err(OpError::LoginRequired(reason)),
        }
    }

    /// Generic single-target operation for external collaborators.
    pub async fn run_action(
        &self,
        platform: &str,
        target: ActionTarget,
        operation: ActionOperation,
        payload: Option<String>,
        scope_hint: Option<String>,
    ) -> OpResult<ActionOutcome> {
        self.require_valid_login(platform).await?;
        let platform_cfg = self
            .bundle
            .browser
            .platform(platform)
            .map_err(|err| OpError::InvalidInput(err.to_string()))?
            .clone();
        let engine = self.engine_for(platform);
        let lock = self.supervisor.page_lock(platform).await?;
        let _guard = lock.lock().await;
        let mut surface = self.surface_for(platform).await?;

        let entry = target_entry(&platform_cfg.targets, target);
        let opts = ResolveOptions {
            reset_page_state: false,
            scope_hint,
        };
        let resolution = engine.resolve(&mut surface, target, entry, &opts).await?;

        match operation {
            ActionOperation::Click => {
                engine.click(&mut surface, resolution.element).await?;
                Ok(ActionOutcome::Done)
            }
            ActionOperation::EnterText => {
                let text = payload.ok_or_else(|| {
                    OpError::InvalidInput("enter-text operation requires a payload".into())
                })?;
                engine
                    .enter_text(&mut surface, resolution.element, &text)
                    .await?;
                Ok(ActionOutcome::Done)
            }
            ActionOperation::ReadText => {
                let text = surface.read_text(resolution.element).await?;
                Ok(ActionOutcome::Text(text))
            }
            ActionOperation::Submit => {
                let submit_entry =
                    target_entry(&platform_cfg.targets, ActionTarget::SubmitControl);
                let report = engine
                    .submit(
                        &mut surface,
                        resolution.element,
                        submit_entry,
                        &VerifyMode::InputCleared,
                    )
                    .await?;
                Ok(ActionOutcome::Submitted(report))
            }
        }
    }

    pub async fn search(
        &self,
        platform: &str,
        keywords: &str,
        limit: usize,
    ) -> OpResult<Vec<SearchHit>> {
        self.require_valid_login(platform).await?;
        let platform_cfg = self
            .bundle
            .browser
            .platform(platform)
            .map_err(|err| OpError::InvalidInput(err.to_string()))?
            .clone();
        let engine = self.engine_for(platform);
        let lock = self.supervisor.page_lock(platform).await?;
        let _guard = lock.lock().await;
        let mut surface = self.surface_for(platform).await?;
        ops::search(&engine, &mut surface, &platform_cfg, keywords, limit).await
    }

    pub async fn read_note(&self, platform: &str, url: &str) -> OpResult<NoteContent> {
        self.require_valid_login(platform).await?;
        let engine = self.engine_for(platform);
        let lock = self.supervisor.page_lock(platform).await?;
        let _guard = lock.lock().await;
        let mut surface = self.surface_for(platform).await?;
        ops::read_note(&engine, &mut surface, url).await
    }

    pub async fn read_comments(&self, platform: &str, url: &str) -> OpResult<Vec<Comment>> {
        Ok(self.read_comments_with_state(platform, url).await?.comments)
    }

    /// Comment read that also hands back the page-state token, per the
    /// engine's read/write reconciliation contract.
    pub async fn read_comments_with_state(
        &self,
        platform: &str,
        url: &str,
    ) -> OpResult<CommentHarvest> {
        self.require_valid_login(platform).await?;
        let platform_cfg = self
            .bundle
            .browser
            .platform(platform)
            .map_err(|err| OpError::InvalidInput(err.to_string()))?
            .clone();
        let engine = self.engine_for(platform);
        let lock = self.supervisor.page_lock(platform).await?;
        let _guard = lock.lock().await;
        let mut surface = self.surface_for(platform).await?;
        ops::read_comments(&engine, &mut surface, &platform_cfg, url, 8).await
    }

    pub async fn post_comment(
        &self,
        platform: &str,
        url: &str,
        text: &str,
    ) -> OpResult<SubmitReport> {
        self.require_valid_login(platform).await?;
        let platform_cfg = self
            .bundle
            .browser
            .platform(platform)
            .map_err(|err| OpError::InvalidInput(err.to_string()))?
            .clone();
        let engine = self.engine_for(platform);
        let lock = self.supervisor.page_lock(platform).await?;
        let _guard = lock.lock().await;

        let engine_ref = &engine;
        let platform_ref = &platform_cfg;
        let outcome = self
            .retry
            .run_filtered("post_comment", OpError::is_recoverable, |attempt| async move {
                let mut surface = self.surface_for(platform).await?;
                if attempt > 0 {
                    // Stronger reset policy on the retry.
                    surface.reset_state().await?;
                }
                ops::post_comment(engine_ref, &mut surface, platform_ref, url, text).await
            })
            .await
            .map_err(|err| {
                self.record_failure(platform, Some("comment_input"), &err);
                err
            })?;
        Ok(outcome.result)
    }

    pub async fn publish(&self, platform: &str, draft: &Draft) -> OpResult<()> {
        self.require_valid_login(platform).await?;
        let platform_cfg = self
            .bundle
            .browser
            .platform(platform)
            .map_err(|err| OpError::InvalidInput(err.to_string()))?
            .clone();
        let engine = self.engine_for(platform);
        let lock = self.supervisor.page_lock(platform).await?;
        let _guard = lock.lock().await;

        let engine_ref = &engine;
        let platform_ref = &platform_cfg;
        let outcome = self
            .retry
            .run_filtered("publish", OpError::is_recoverable, |attempt| async move {
                let mut surface = self.surface_for(platform).await?;
                if attempt > 0 {
                    surface.reset_state().await?;
                }
                ops::publish(engine_ref, &mut surface, platform_ref, draft).await
            })
            .await
            .map_err(|err| {
                self.record_failure(platform, Some("publish_control"), &err);
                err
            })?;
        Ok(outcome.result)
    }

    pub async fn shutdown(&self) -> OpResult<()> {
        self.supervisor.shutdown().await?;
        Ok(())
    }
}
