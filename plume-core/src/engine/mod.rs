mod actions;
mod error;
mod page_state;
mod resolver;
mod surface;
mod target;

pub use actions::{SubmitMethod, SubmitReport, VerifyMode};
pub use error::{EngineError, EngineResult};
pub use page_state::PageStateToken;
pub use resolver::{target_entry, ActionEngine, Resolution, ResolveOptions, SCRIPT_LOCATED_MARKER};
pub use surface::{ActionSurface, ElementHit, ElementRef, KeyChord, LiveSurface};
pub use target::{build_ladder, ActionTarget, ResolutionStrategy};
