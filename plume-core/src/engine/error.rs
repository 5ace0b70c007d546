use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Every strategy in the ladder was tried and exhausted its budget.
    #[error("element not found for target {target} (all strategies exhausted)")]
    ElementNotFound { target: String },
    /// The action ran but the verification check never confirmed its effect.
    #[error("action verification failed: {action}")]
    ActionVerificationFailed { action: String },
    /// The page was closed or navigated away between resolve and perform.
    #[error("target page went stale")]
    NavigationStale,
    #[error("surface error: {0}")]
    Surface(String),
}

impl EngineError {
    pub fn surface(err: impl std::fmt::Display) -> Self {
        EngineError::Surface(err.to_string())
    }
}
