use serde::Deserialize;
use tracing::{debug, info, trace};

use crate::config::PlatformSection;
use crate::engine::{
    target_entry, ActionEngine, ActionSurface, ActionTarget, EngineError, PageStateToken,
    ResolveOptions, SubmitReport, VerifyMode,
};

use super::{OpError, OpResult};

#[derive(Debug, Clone, Deserialize)]
pub struct Comment {
    pub author: String,
    pub body: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Output of a comment read. The page-state token is part of the contract:
/// reading deliberately expands and scrolls the page, and the caller (or the
/// next write operation) uses the token to know that residue exists.
#[derive(Debug, Clone)]
pub struct CommentHarvest {
    pub comments: Vec<Comment>,
    pub page_state: PageStateToken,
}

/// Expands and harvests the comment section. Read-only on content, but leaves
/// the page scrolled and expanded; the returned token records exactly that.
pub async fn read_comments(
    engine: &ActionEngine,
    surface: &mut dyn ActionSurface,
    platform: &PlatformSection,
    url: &str,
    expand_rounds: usize,
) -> OpResult<CommentHarvest> {
    surface.navigate(url).await?;

    // Activate the comment section; some layouts only render the list after
    // the area is brought into view and touched.
    let area_entry = target_entry(&platform.targets, ActionTarget::CommentArea);
    match engine
        .resolve(surface, ActionTarget::CommentArea, area_entry, &ResolveOptions::default())
        .await
    {
        Ok(area) => {
            let _ = engine.click(surface, area.element).await;
        }
        Err(EngineError::ElementNotFound { .. }) => {
            trace!("no discrete comment area, scrolling instead");
            surface.scroll_to_fraction(1.0).await?;
        }
        Err(err) => return Err(err.into()),
    }
    surface.eval(MARK_EXPANDED_SCRIPT).await?;

    let more_entry = target_entry(&platform.targets, ActionTarget::MoreComments);
    for round in 0..expand_rounds.max(1) {
        surface
            .scroll_to_fraction(0.5 + 0.5 * (round as f64 + 1.0) / expand_rounds.max(1) as f64)
            .await?;
        match engine
            .resolve(surface, ActionTarget::MoreComments, more_entry, &ResolveOptions::default())
            .await
        {
            Ok(more) => {
                trace!(round, "expanding more comments");
                let _ = engine.click(surface, more.element).await;
            }
            Err(EngineError::ElementNotFound { .. }) => break,
            Err(err) => return Err(err.into()),
        }
    }

    let script = comment_list_script(platform, true);
    let comments: Vec<Comment> = serde_json::from_value(surface.eval(&script).await?)
        .map_err(|err| OpError::InvalidInput(format!("unparseable comment payload: {err}")))?;
    let page_state = surface.capture_state().await?;
    debug!(count = comments.len(), "comments harvested");
    Ok(CommentHarvest {
        comments,
        page_state,
    })
}

/// Posts a comment. The first resolution attempt always requests a page-state
/// reset: a prior read against this page leaves expansion/scroll residue that
/// breaks input-box resolution. Within the same call the reset is not
/// repeated; having just performed it is the only evidence that relaxing is
/// safe.
pub async fn post_comment(
    engine: &ActionEngine,
    surface: &mut dyn ActionSurface,
    platform: &PlatformSection,
    url: &str,
    text: &str,
) -> OpResult<SubmitReport> {
    if text.trim().is_empty() {
        return Err(OpError::InvalidInput("empty comment text".into()));
    }
    if let Some(param) = &platform.access_token_param {
        if !url.contains(&format!("{param}=")) {
            return Err(OpError::InvalidInput(format!(
                "content url must carry the {param} parameter; use a url produced by search"
            )));
        }
    }

    surface.navigate(url).await?;

    let input_entry = target_entry(&platform.targets, ActionTarget::CommentInput);
    let resolution = engine
        .resolve(
            surface,
            ActionTarget::CommentInput,
            input_entry,
            &ResolveOptions::with_reset(),
        )
        .await?;

    let element = match engine.enter_text(surface, resolution.element, text).await {
        Ok(()) => resolution.element,
        Err(EngineError::ActionVerificationFailed { .. }) => {
            // The reset already ran in this call; re-resolve without it.
            let second = engine
                .resolve(
                    surface,
                    ActionTarget::CommentInput,
                    input_entry,
                    &ResolveOptions::default(),
                )
                .await?;
            engine.enter_text(surface, second.element, text).await?;
            second.element
        }
        Err(err) => return Err(err.into()),
    };

    let submit_entry = target_entry(&platform.targets, ActionTarget::SubmitControl);
    let verify = build_verify(platform, text);
    let report = engine.submit(surface, element, submit_entry, &verify).await?;
    info!(method = ?report.method, "comment submitted");
    Ok(report)
}

/// The empty-input success signal is weak on its own; when the page exposes a
/// comment list, require the posted text to actually appear in it.
fn build_verify(platform: &PlatformSection, text: &str) -> VerifyMode {
    let items = &target_entry(&platform.targets, ActionTarget::CommentItem).selectors;
    if items.is_empty() {
        VerifyMode::InputCleared
    } else {
        VerifyMode::InputClearedAndEcho {
            expected_text: text.to_string(),
            list_script: comment_list_script(platform, false),
        }
    }
}

fn comment_list_script(platform: &PlatformSection, structured: bool) -> String {
    let entry = target_entry(&platform.targets, ActionTarget::CommentItem);
    let selectors = if entry.selectors.is_empty() {
        DEFAULT_COMMENT_SELECTORS.join(", ")
    } else {
        entry.selectors.join(", ")
    };
    if structured {
        format!(
            r#"
(() => {{
    const items = document.querySelectorAll('{selectors}');
    const firstText = (root, selectors) => {{
        for (const selector of selectors) {{
            const el = root.querySelector(selector);
            if (el && el.textContent && el.textContent.trim()) {{
                return el.textContent.trim();
            }}
        }}
        return null;
    }};
    const comments = [];
    for (const item of items) {{
        const author = firstText(item, ['a.user-name', 'span.user-name', '.name', '.nickname', 'a[href*="/user/profile"]']);
        const body = firstText(item, ['span.comment-content', 'div.comment-text', 'div.content', 'span.text', 'p.text']);
        const timestamp = firstText(item, ['span.time', 'div.time', 'span.date', 'span[class*="time"]']);
        if (author && body && body.length > 1) {{
            comments.push({{ author, body, timestamp }});
        }}
    }}
    return comments;
}})()
"#
        )
    } else {
        format!(
            r#"
(() => {{
    const items = document.querySelectorAll('{selectors}');
    return Array.from(items).map(item => (item.innerText || '').trim()).filter(Boolean);
}})()
"#
        )
    }
}

const DEFAULT_COMMENT_SELECTORS: &[&str] = &[
    "div.comment-item",
    "div.commentItem",
    ".comment-root",
    "section.comment",
];

/// Comment reads mark the container so the page-state probe sees the
/// expansion as residue.
const MARK_EXPANDED_SCRIPT: &str = r#"
(() => {
    const container = document.querySelector('div.comment-list, div.comments-container, div[class*="comment"]');
    if (container) {
        container.setAttribute('data-plume-expanded', 'comments');
        return true;
    }
    return false;
})()
"#;
