use serde::Deserialize;
use tracing::debug;

use crate::engine::{ActionEngine, ActionSurface};

use super::OpResult;

#[derive(Debug, Clone, Deserialize)]
pub struct NoteContent {
    pub title: String,
    pub author: String,
    pub body: String,
}

/// Reads one content page: navigate, walk the document once so lazy sections
/// materialize, then extract through a selector ladder. Read-only; the page
/// residue it leaves (scroll position) is restored before returning.
pub async fn read_note(
    _engine: &ActionEngine,
    surface: &mut dyn ActionSurface,
    url: &str,
) -> OpResult<NoteContent> {
    surface.navigate(url).await?;

    // Sweep down then back so lazy-loaded sections exist before extraction.
    surface.scroll_to_fraction(1.0).await?;
    surface.scroll_to_fraction(0.5).await?;
    surface.scroll_to_fraction(0.0).await?;

    let note: NoteContent = serde_json::from_value(surface.eval(NOTE_EXTRACTION_SCRIPT).await?)
        .map_err(|err| {
            super::OpError::InvalidInput(format!("unparseable note payload: {err}"))
        })?;
    debug!(title = %note.title, "note content extracted");
    Ok(note)
}

const NOTE_EXTRACTION_SCRIPT: &str = r#"
(() => {
    const firstText = (selectors) => {
        for (const selector of selectors) {
            const el = document.querySelector(selector);
            if (el && el.textContent && el.textContent.trim()) {
                return el.textContent.trim();
            }
        }
        return '';
    };
    return {
        title: firstText(['#detail-title', 'div.title', 'h1', 'div.note-content div.title']) || 'unknown title',
        author: firstText(['.user-nickname', '.author-nickname', '.nickname', 'span.username', 'a.user-info']) || 'unknown author',
        body: firstText(['.note-content', '#detail-desc', 'div.content', 'div.desc']) || '',
    };
})()
"#;
