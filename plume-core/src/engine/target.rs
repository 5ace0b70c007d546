use crate::config::{EngineSection, TargetEntry};

/// A logical UI intent. The DOM offers no stable contract, so every target is
/// re-resolved per call through an ordered strategy ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionTarget {
    CommentInput,
    SubmitControl,
    CommentArea,
    MoreComments,
    CommentItem,
    SearchInput,
    TitleInput,
    BodyEditor,
    PublishControl,
    MediaTabImage,
    MediaTabVideo,
    FileInput,
}

impl ActionTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionTarget::CommentInput => "comment_input",
            ActionTarget::SubmitControl => "submit_control",
            ActionTarget::CommentArea => "comment_area",
            ActionTarget::MoreComments => "more_comments",
            ActionTarget::CommentItem => "comment_item",
            ActionTarget::SearchInput => "search_input",
            ActionTarget::TitleInput => "title_input",
            ActionTarget::BodyEditor => "body_editor",
            ActionTarget::PublishControl => "publish_control",
            ActionTarget::MediaTabImage => "media_tab_image",
            ActionTarget::MediaTabVideo => "media_tab_video",
            ActionTarget::FileInput => "file_input",
        }
    }
}

impl std::fmt::Display for ActionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rung of the fallback ladder, ordered precise to permissive.
#[derive(Debug, Clone)]
pub enum ResolutionStrategy {
    /// Purpose-built selectors, filtered by a position heuristic: matches above
    /// `min_y` are rejected so a page-top search bar cannot stand in for a
    /// comment box.
    ScopedSelector {
        selectors: Vec<String>,
        min_y: Option<f64>,
    },
    /// Visible text or placeholder containing a known phrase.
    SemanticText { phrases: Vec<String> },
    /// Click an "open the editor" affordance, then re-run the precise rungs.
    TriggerThenRetry { trigger_selectors: Vec<String> },
    /// Scroll through relative offsets re-attempting the precise rungs; lazy
    /// content may not exist until scrolled into view.
    ProgressiveScroll { stops: Vec<f64> },
    /// Mark the element from injected script when simulated interaction cannot
    /// reach it.
    ScriptFallback { script: String },
}

impl ResolutionStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            ResolutionStrategy::ScopedSelector { .. } => "scoped_selector",
            ResolutionStrategy::SemanticText { .. } => "semantic_text",
            ResolutionStrategy::TriggerThenRetry { .. } => "trigger_then_retry",
            ResolutionStrategy::ProgressiveScroll { .. } => "progressive_scroll",
            ResolutionStrategy::ScriptFallback { .. } => "script_fallback",
        }
    }
}

/// Builds the ladder for one target from its config entry. Rungs whose inputs
/// are absent in config are skipped, order is otherwise fixed.
pub fn build_ladder(entry: &TargetEntry, engine: &EngineSection) -> Vec<ResolutionStrategy> {
    let mut ladder = Vec::new();
    if !entry.selectors.is_empty() {
        ladder.push(ResolutionStrategy::ScopedSelector {
            selectors: entry.selectors.clone(),
            min_y: entry.min_y,
        });
    }
    if !entry.phrases.is_empty() {
        ladder.push(ResolutionStrategy::SemanticText {
            phrases: entry.phrases.clone(),
        });
    }
    if !entry.trigger_selectors.is_empty() {
        ladder.push(ResolutionStrategy::TriggerThenRetry {
            trigger_selectors: entry.trigger_selectors.clone(),
        });
    }
    if !entry.selectors.is_empty() || !entry.phrases.is_empty() {
        ladder.push(ResolutionStrategy::ProgressiveScroll {
            stops: engine.scroll_stops.clone(),
        });
    }
    if let Some(script) = &entry.fallback_script {
        ladder.push(ResolutionStrategy::ScriptFallback {
            script: script.clone(),
        });
    }
    ladder
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> EngineSection {
        EngineSection {
            strategy_attempts: 2,
            scroll_stops: vec![0.3, 0.5, 0.7, 0.9],
            selector_timeout_seconds: 5,
            settle_delay_ms: [0, 0],
        }
    }

    #[test]
    fn ladder_preserves_strategy_order() {
        let entry = TargetEntry {
            selectors: vec!["#content-textarea".into()],
            phrases: vec!["say something".into()],
            min_y: Some(200.0),
            trigger_selectors: vec!["span.comment-affordance".into()],
            fallback_script: Some("return true;".into()),
        };
        let ladder = build_ladder(&entry, &engine());
        let names: Vec<_> = ladder.iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "scoped_selector",
                "semantic_text",
                "trigger_then_retry",
                "progressive_scroll",
                "script_fallback"
            ]
        );
    }

    #[test]
    fn empty_rungs_are_skipped() {
        let entry = TargetEntry {
            selectors: vec![],
            phrases: vec!["send".into()],
            min_y: None,
            trigger_selectors: vec![],
            fallback_script: None,
        };
        let ladder = build_ladder(&entry, &engine());
        let names: Vec<_> = ladder.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["semantic_text", "progressive_scroll"]);
    }
}
