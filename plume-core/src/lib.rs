pub mod browser;
pub mod config;
pub mod engine;
pub mod error;
pub mod login;
pub mod ops;
pub mod retry;
pub mod service;
pub mod session;
pub mod telemetry;

pub use browser::{BrowserError, BrowserResult, BrowserSupervisor};
pub use config::{
    load_browser_config, load_plume_config, BrowserConfig, ConfigBundle, PlumeConfig,
};
pub use engine::{
    ActionEngine, ActionSurface, ActionTarget, EngineError, EngineResult, LiveSurface,
    PageStateToken, Resolution, ResolveOptions, ResolutionStrategy, SubmitMethod, SubmitReport,
    VerifyMode,
};
pub use error::{ConfigError, Result};
pub use login::{LoginError, LoginOrchestrator, LoginState, LoginSurface, SessionStatus};
pub use ops::{Comment, CommentHarvest, Draft, NoteContent, OpError, OpResult, SearchHit};
pub use retry::{RetryOutcome, RetryPolicy};
pub use service::{ActionOperation, ActionOutcome, PlumeService, SessionInfo};
pub use session::{CookieRecord, SessionRecord, SessionStore, StoreError};
pub use telemetry::{AutomationTelemetry, FailureStage, TelemetryError};
