use tracing::{debug, trace, warn};

use crate::config::TargetEntry;

use super::error::{EngineError, EngineResult};
use super::resolver::{ActionEngine, ResolveOptions};
use super::surface::{ActionSurface, ElementRef, KeyChord};
use super::target::ActionTarget;

/// How a submission is confirmed. The empty-input signal is known to be weak
/// (the UI may reset the box for unrelated reasons), so callers that can
/// afford a second read ask for the echo check as well.
#[derive(Debug, Clone)]
pub enum VerifyMode {
    InputCleared,
    /// Input cleared AND `expected_text` appears in the list produced by
    /// `list_script` (a page script returning an array of visible item texts).
    InputClearedAndEcho {
        expected_text: String,
        list_script: String,
    },
}

/// Which rung of the submission ladder landed; diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMethod {
    Control,
    EnterKey,
    ModifierEnter,
    ScriptedForm,
}

#[derive(Debug, Clone)]
pub struct SubmitReport {
    pub method: SubmitMethod,
    pub attempted: Vec<SubmitMethod>,
}

impl ActionEngine {
    /// Checkpoint before any perform: the page must still be where the caller
    /// resolved its element.
    async fn guard_stale(&self, surface: &mut dyn ActionSurface) -> EngineResult<()> {
        if surface.is_stale().await? {
            return Err(EngineError::NavigationStale);
        }
        Ok(())
    }

    pub async fn click(
        &self,
        surface: &mut dyn ActionSurface,
        element: ElementRef,
    ) -> EngineResult<()> {
        self.guard_stale(surface).await?;
        surface.click(element).await?;
        surface.settle().await;
        Ok(())
    }

    /// Types `text` character by character, re-reads the element and compares,
    /// retrying entry once on mismatch. Bulk paste is deliberately absent;
    /// anti-bot defenses silently drop it.
    pub async fn enter_text(
        &self,
        surface: &mut dyn ActionSurface,
        element: ElementRef,
        text: &str,
    ) -> EngineResult<()> {
        self.guard_stale(surface).await?;

        for attempt in 0..2 {
            if attempt > 0 {
                warn!("typed content mismatch, clearing and retyping");
                surface.clear_text(element).await?;
            }
            surface.type_text(element, text).await?;
            surface.settle().await;
            let read_back = surface.read_text(element).await?;
            if read_back == text {
                return Ok(());
            }
            trace!(expected = text, got = %read_back, "entry verification mismatch");
        }

        Err(EngineError::ActionVerificationFailed {
            action: "text entry".into(),
        })
    }

    /// Submission ladder: explicit control, Enter, Ctrl+Enter, scripted form
    /// submit. Success is judged by the verification probe after every
    /// attempt, never by the method's own return value, because several of
    /// these methods complete without throwing yet silently no-op.
    pub async fn submit(
        &self,
        surface: &mut dyn ActionSurface,
        input: ElementRef,
        submit_entry: &TargetEntry,
        verify: &VerifyMode,
    ) -> EngineResult<SubmitReport> {
        self.guard_stale(surface).await?;
        let mut attempted = Vec::new();

        // (a) explicit submit control, when one resolves
        match self
            .resolve(
                surface,
                ActionTarget::SubmitControl,
                submit_entry,
                &ResolveOptions::default(),
            )
            .await
        {
            Ok(control) => {
                attempted.push(SubmitMethod::Control);
                surface.click(control.element).await?;
                if self.submission_confirmed(surface, input, verify).await? {
                    return Ok(SubmitReport {
                        method: SubmitMethod::Control,
                        attempted,
                    });
                }
            }
            Err(EngineError::ElementNotFound { .. }) => {
                debug!("no explicit submit control, falling through to key submit");
            }
            Err(err) => return Err(err),
        }

        // (b) single key submit
        attempted.push(SubmitMethod::EnterKey);
        surface.press_key(input, KeyChord::Enter).await?;
        if self.submission_confirmed(surface, input, verify).await? {
            return Ok(SubmitReport {
                method: SubmitMethod::EnterKey,
                attempted,
            });
        }

        // (c) modifier+key submit
        attempted.push(SubmitMethod::ModifierEnter);
        surface.press_key(input, KeyChord::CtrlEnter).await?;
        if self.submission_confirmed(surface, input, verify).await? {
            return Ok(SubmitReport {
                method: SubmitMethod::ModifierEnter,
                attempted,
            });
        }

        // (d) scripted form submit
        attempted.push(SubmitMethod::ScriptedForm);
        surface.submit_form(input).await?;
        if self.submission_confirmed(surface, input, verify).await? {
            return Ok(SubmitReport {
                method: SubmitMethod::ScriptedForm,
                attempted,
            });
        }

        Err(EngineError::ActionVerificationFailed {
            action: "submission".into(),
        })
    }

    async fn submission_confirmed(
        &self,
        surface: &mut dyn ActionSurface,
        input: ElementRef,
        verify: &VerifyMode,
    ) -> EngineResult<bool> {
        surface.settle().await;
        let remaining = surface.read_text(input).await?;
        if !remaining.is_empty() {
            return Ok(false);
        }
        match verify {
            VerifyMode::InputCleared => Ok(true),
            VerifyMode::InputClearedAndEcho {
                expected_text,
                list_script,
            } => {
                let value = surface.eval(list_script).await?;
                let echoed = value
                    .as_array()
                    .map(|items| {
                        items.iter().any(|item| {
                            item.as_str()
                                .map(|text| text.contains(expected_text.as_str()))
                                .unwrap_or(false)
                        })
                    })
                    .unwrap_or(false);
                if !echoed {
                    debug!("input cleared but posted text not echoed in list");
                }
                Ok(echoed)
            }
        }
    }
}
