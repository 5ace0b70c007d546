use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, trace};

use crate::config::{EngineSection, TargetEntry, TargetTables};
use crate::telemetry::{AutomationTelemetry, ResolutionContext};

use super::error::{EngineError, EngineResult};
use super::surface::{ActionSurface, ElementHit, ElementRef};
use super::target::{build_ladder, ActionTarget, ResolutionStrategy};

/// Marker attribute a fallback script sets on the element it located.
pub const SCRIPT_LOCATED_MARKER: &str = "data-plume-located";

#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Scroll-to-top and collapse panels before the first attempt. Required
    /// before posting when a read operation may have run against this page.
    pub reset_page_state: bool,
    /// Optional container selector narrowing strategy 1.
    pub scope_hint: Option<String>,
}

impl ResolveOptions {
    pub fn with_reset() -> Self {
        Self {
            reset_page_state: true,
            ..Self::default()
        }
    }
}

/// A successful resolution, carrying which rung won for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct Resolution {
    pub element: ElementRef,
    pub strategy: &'static str,
    pub strategy_index: usize,
}

pub fn target_entry<'a>(tables: &'a TargetTables, target: ActionTarget) -> &'a TargetEntry {
    match target {
        ActionTarget::CommentInput => &tables.comment_input,
        ActionTarget::SubmitControl => &tables.submit_control,
        ActionTarget::CommentArea => &tables.comment_area,
        ActionTarget::MoreComments => &tables.more_comments,
        ActionTarget::CommentItem => &tables.comment_item,
        ActionTarget::SearchInput => &tables.search_input,
        ActionTarget::TitleInput => &tables.title_input,
        ActionTarget::BodyEditor => &tables.body_editor,
        ActionTarget::PublishControl => &tables.publish_control,
        ActionTarget::MediaTabImage => &tables.media_tab_image,
        ActionTarget::MediaTabVideo => &tables.media_tab_video,
        ActionTarget::FileInput => &tables.file_input,
    }
}

/// Walks the strategy ladder for a target. First success wins; each strategy
/// has a fixed attempt budget and exhaustion of the whole ladder is
/// `ElementNotFound`, never a hang.
pub struct ActionEngine {
    platform: String,
    config: EngineSection,
    telemetry: Option<Arc<AutomationTelemetry>>,
}

impl ActionEngine {
    pub fn new(platform: impl Into<String>, config: EngineSection) -> Self {
        Self {
            platform: platform.into(),
            config,
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<AutomationTelemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub async fn resolve(
        &self,
        surface: &mut dyn ActionSurface,
        target: ActionTarget,
        entry: &TargetEntry,
        opts: &ResolveOptions,
    ) -> EngineResult<Resolution> {
        if opts.reset_page_state {
            surface.reset_state().await?;
        }

        let started = Instant::now();
        let ladder = build_ladder(entry, &self.config);
        for (index, strategy) in ladder.iter().enumerate() {
            for attempt in 0..self.config.strategy_attempts.max(1) {
                trace!(
                    target = %target,
                    strategy = strategy.name(),
                    attempt,
                    "resolution attempt"
                );
                if let Some(hit) = self
                    .attempt_strategy(surface, strategy, entry, opts)
                    .await?
                {
                    let resolution = Resolution {
                        element: hit.element,
                        strategy: strategy.name(),
                        strategy_index: index,
                    };
                    debug!(
                        target = %target,
                        strategy = resolution.strategy,
                        index,
                        "target resolved"
                    );
                    self.record_resolution(target, &resolution, started);
                    return Ok(resolution);
                }
                surface.settle().await;
            }
        }

        Err(EngineError::ElementNotFound {
            target: target.as_str().to_string(),
        })
    }

    async fn attempt_strategy(
        &self,
        surface: &mut dyn ActionSurface,
        strategy: &ResolutionStrategy,
        entry: &TargetEntry,
        opts: &ResolveOptions,
    ) -> EngineResult<Option<ElementHit>> {
        match strategy {
            ResolutionStrategy::ScopedSelector { selectors, min_y } => {
                self.try_selectors(surface, selectors, *min_y, opts.scope_hint.as_deref())
                    .await
            }
            ResolutionStrategy::SemanticText { phrases } => surface.query_text(phrases).await,
            ResolutionStrategy::TriggerThenRetry { trigger_selectors } => {
                let Some(trigger) = self
                    .try_selectors(surface, trigger_selectors, None, None)
                    .await?
                else {
                    return Ok(None);
                };
                surface.click(trigger.element).await?;
                surface.settle().await;
                self.try_precise(surface, entry, opts).await
            }
            ResolutionStrategy::ProgressiveScroll { stops } => {
                for stop in stops {
                    surface.scroll_to_fraction(*stop).await?;
                    if let Some(hit) = self.try_precise(surface, entry, opts).await? {
                        return Ok(Some(hit));
                    }
                }
                Ok(None)
            }
            ResolutionStrategy::ScriptFallback { script } => {
                let value = surface.eval(script).await?;
                let located = value.as_bool().unwrap_or(false);
                if !located {
                    return Ok(None);
                }
                surface
                    .query_selector(&format!("[{SCRIPT_LOCATED_MARKER}='1']"))
                    .await
            }
        }
    }

    /// Re-runs the precise rungs (1–2) once each; used by trigger and scroll
    /// strategies after they have changed page state.
    async fn try_precise(
        &self,
        surface: &mut dyn ActionSurface,
        entry: &TargetEntry,
        opts: &ResolveOptions,
    ) -> EngineResult<Option<ElementHit>> {
        if let Some(hit) = self
            .try_selectors(surface, &entry.selectors, entry.min_y, opts.scope_hint.as_deref())
            .await?
        {
            return Ok(Some(hit));
        }
        if !entry.phrases.is_empty() {
            return surface.query_text(&entry.phrases).await;
        }
        Ok(None)
    }

    async fn try_selectors(
        &self,
        surface: &mut dyn ActionSurface,
        selectors: &[String],
        min_y: Option<f64>,
        scope_hint: Option<&str>,
    ) -> EngineResult<Option<ElementHit>> {
        for selector in selectors {
            if let Some(hint) = scope_hint {
                let scoped = format!("{hint} {selector}");
                if let Some(hit) = surface.query_selector(&scoped).await? {
                    if position_ok(&hit, min_y) {
                        return Ok(Some(hit));
                    }
                }
            }
            if let Some(hit) = surface.query_selector(selector).await? {
                if position_ok(&hit, min_y) {
                    return Ok(Some(hit));
                }
                trace!(selector = %selector, top = hit.top, "match rejected by position heuristic");
            }
        }
        Ok(None)
    }

    fn record_resolution(&self, target: ActionTarget, resolution: &Resolution, started: Instant) {
        if let Some(telemetry) = &self.telemetry {
            let context = ResolutionContext {
                timestamp: Utc::now(),
                platform: self.platform.clone(),
                target: target.as_str().to_string(),
                strategy: resolution.strategy.to_string(),
                strategy_index: resolution.strategy_index,
                duration_ms: started.elapsed().as_millis() as i64,
            };
            if let Err(err) = telemetry.record_resolution(&context) {
                tracing::warn!(error = %err, "failed to record resolution telemetry");
            }
        }
    }
}

fn position_ok(hit: &ElementHit, min_y: Option<f64>) -> bool {
    match min_y {
        Some(threshold) => hit.top >= threshold,
        None => true,
    }
}
