mod orchestrator;
mod surface;

pub use orchestrator::{LoginError, LoginOrchestrator, LoginResult, LoginState, SessionStatus};
pub use surface::{CapturedSession, LiveLoginSurface, LoginSurface};
