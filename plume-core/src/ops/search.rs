use regex::Regex;
use serde::Deserialize;
use tracing::{debug, trace};
use url::Url;

use crate::config::PlatformSection;
use crate::engine::{ActionEngine, ActionSurface};

use super::{OpError, OpResult};

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub rank: usize,
    pub title: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct RawCard {
    href: String,
    #[serde(default)]
    title: Option<String>,
}

/// Keyword search: open the platform's search page, harvest result cards, and
/// rewrite card permalinks into canonical content URLs carrying the access
/// token the posting flow later requires.
pub async fn search(
    _engine: &ActionEngine,
    surface: &mut dyn ActionSurface,
    platform: &PlatformSection,
    keywords: &str,
    limit: usize,
) -> OpResult<Vec<SearchHit>> {
    if keywords.trim().is_empty() {
        return Err(OpError::InvalidInput("empty search keywords".into()));
    }
    let encoded: String = url::form_urlencoded::byte_serialize(keywords.as_bytes()).collect();
    let search_url = format!("{}{}", platform.search_url, encoded);
    surface.navigate(&search_url).await?;

    let raw: Vec<RawCard> = serde_json::from_value(surface.eval(CARD_EXTRACTION_SCRIPT).await?)
        .map_err(|err| OpError::InvalidInput(format!("unparseable search results: {err}")))?;
    trace!(cards = raw.len(), "extracted search cards");

    let origin = page_origin(&platform.home_url);
    let mut hits = Vec::new();
    for card in raw {
        if hits.len() >= limit {
            break;
        }
        let Some(permalink) = canonical_permalink(&origin, &card.href) else {
            continue;
        };
        if hits.iter().any(|hit: &SearchHit| hit.url == permalink) {
            continue;
        }
        hits.push(SearchHit {
            rank: hits.len() + 1,
            title: card
                .title
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "untitled".to_string()),
            url: permalink,
        });
    }
    debug!(query = keywords, results = hits.len(), "search completed");
    Ok(hits)
}

fn page_origin(home_url: &str) -> String {
    Url::parse(home_url)
        .ok()
        .map(|parsed| parsed.origin().ascii_serialization())
        .unwrap_or_else(|| home_url.trim_end_matches('/').to_string())
}

/// Result cards link through a search-scoped route; the canonical content
/// route is what the read/post flows need, and the access token must survive
/// the rewrite or the content page refuses to load.
fn canonical_permalink(origin: &str, href: &str) -> Option<String> {
    let absolute = if href.starts_with("http") {
        href.to_string()
    } else {
        format!("{origin}{href}")
    };

    let id_pattern = Regex::new(r"/(?:search_result|explore|item)/([0-9a-f]+)").ok()?;
    let token_pattern = Regex::new(r"xsec_token=([^&]+)").ok()?;

    let content_id = id_pattern.captures(&absolute)?.get(1)?.as_str().to_string();
    match token_pattern.captures(&absolute) {
        Some(captures) => {
            let token = captures.get(1)?.as_str();
            Some(format!(
                "{origin}/explore/{content_id}?xsec_token={token}&xsec_source="
            ))
        }
        None => Some(absolute),
    }
}

const CARD_EXTRACTION_SCRIPT: &str = r#"
(() => {
    const cards = document.querySelectorAll('section.note-item, div.note-item, section[class*="note"], div[data-index]');
    const results = [];
    for (const card of cards) {
        const link = card.querySelector('a[href*="/search_result/"], a[href*="/explore/"], a[href*="/item/"]');
        if (!link) {
            continue;
        }
        let title = null;
        for (const selector of [
            'a span.title-content',
            'div.note-card-title',
            '.title span',
            'a.title',
            'span[class*="title"]',
        ]) {
            const el = card.querySelector(selector);
            if (el && el.textContent && el.textContent.trim().length > 3) {
                title = el.textContent.trim();
                break;
            }
        }
        if (!title) {
            let longest = '';
            for (const el of card.querySelectorAll('a span, a div, h2, h3')) {
                const text = el.textContent ? el.textContent.trim() : '';
                if (text.length > longest.length) {
                    longest = text;
                }
            }
            title = longest || null;
        }
        results.push({ href: link.getAttribute('href'), title });
    }
    return results;
})()
"#;
