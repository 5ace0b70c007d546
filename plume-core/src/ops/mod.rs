mod comments;
mod notes;
mod publish;
mod search;

use thiserror::Error;

use crate::browser::BrowserError;
use crate::engine::EngineError;
use crate::login::LoginError;
use crate::session::StoreError;

pub use comments::{post_comment, read_comments, Comment, CommentHarvest};
pub use notes::{read_note, NoteContent};
pub use publish::{publish, Draft, MediaKind};
pub use search::{search, SearchHit};

pub type OpResult<T> = Result<T, OpError>;

#[derive(Debug, Error)]
pub enum OpError {
    #[error("login required: {0}")]
    LoginRequired(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
    #[error("login error: {0}")]
    Login(#[from] LoginError),
    #[error("session store error: {0}")]
    Store(#[from] StoreError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl OpError {
    /// Recoverable at the operation level: the caller may retry the whole
    /// feature operation, typically with a stronger reset policy.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            OpError::Engine(
                EngineError::ElementNotFound { .. }
                    | EngineError::ActionVerificationFailed { .. }
                    | EngineError::NavigationStale
            )
        )
    }
}
