use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType,
};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use rand::Rng;
use serde::Deserialize;
use tokio::time::sleep;
use tracing::trace;

use crate::browser::HumanPacer;
use crate::config::{EngineSection, HumanSimulationSection};

use super::error::{EngineError, EngineResult};
use super::page_state::PageStateToken;

/// Opaque handle to an element the surface has located. Only valid against the
/// surface that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementRef(pub u64);

#[derive(Debug, Clone, Copy)]
pub struct ElementHit {
    pub element: ElementRef,
    /// Document-relative y offset, for the position heuristic.
    pub top: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyChord {
    Enter,
    CtrlEnter,
    Escape,
}

/// Everything the action engine needs from a live page. The live adapter wraps
/// a chromiumoxide page plus the human pacer; tests provide scripted fakes so
/// ladder behavior is checkable without a browser.
#[async_trait(?Send)]
pub trait ActionSurface {
    /// Navigate and settle; re-pins the staleness anchor.
    async fn navigate(&mut self, url: &str) -> EngineResult<()>;
    /// First visible match for a CSS selector.
    async fn query_selector(&mut self, selector: &str) -> EngineResult<Option<ElementHit>>;
    /// First visible element whose placeholder or text contains any phrase.
    async fn query_text(&mut self, phrases: &[String]) -> EngineResult<Option<ElementHit>>;
    async fn click(&mut self, element: ElementRef) -> EngineResult<()>;
    async fn type_text(&mut self, element: ElementRef, text: &str) -> EngineResult<()>;
    async fn clear_text(&mut self, element: ElementRef) -> EngineResult<()>;
    async fn read_text(&mut self, element: ElementRef) -> EngineResult<String>;
    async fn press_key(&mut self, element: ElementRef, chord: KeyChord) -> EngineResult<()>;
    /// Scroll to a relative offset of the full document height.
    async fn scroll_to_fraction(&mut self, fraction: f64) -> EngineResult<()>;
    async fn eval(&mut self, script: &str) -> EngineResult<serde_json::Value>;
    async fn capture_state(&mut self) -> EngineResult<PageStateToken>;
    /// Coarse reconciliation: scroll to top and collapse expanded panels.
    async fn reset_state(&mut self) -> EngineResult<()>;
    /// Script-level submit of the element's enclosing form; last rung of the
    /// submission ladder.
    async fn submit_form(&mut self, element: ElementRef) -> EngineResult<()>;
    /// Attach local files to a file input element.
    async fn attach_files(
        &mut self,
        element: ElementRef,
        paths: &[std::path::PathBuf],
    ) -> EngineResult<()>;
    /// True when the page navigated away or closed since `pin_location`.
    async fn is_stale(&mut self) -> EngineResult<bool>;
    /// Short jittered pause between interaction steps.
    async fn settle(&mut self);
}

const HIT_MARKER: &str = "data-plume-hit";

#[derive(Debug, Deserialize)]
struct TextProbeResult {
    found: bool,
    #[serde(default)]
    top: f64,
}

#[derive(Debug, Deserialize)]
struct StateProbeResult {
    scroll_y: f64,
    #[serde(default)]
    panels: Vec<String>,
}

/// Chromiumoxide-backed surface. Element handles index into a per-surface
/// registry; the registry lives as long as the operation, matching the
/// lifecycle of the page state it describes.
pub struct LiveSurface {
    page: Page,
    pacer: HumanPacer,
    elements: Vec<Element>,
    settle_delay_ms: [u64; 2],
    pinned_url: Option<String>,
}

impl LiveSurface {
    pub fn new(page: Page, human: HumanSimulationSection, engine: &EngineSection) -> Self {
        Self {
            page,
            pacer: HumanPacer::new(human),
            elements: Vec::new(),
            settle_delay_ms: engine.settle_delay_ms,
            pinned_url: None,
        }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn pacer(&mut self) -> &mut HumanPacer {
        &mut self.pacer
    }

    /// Remembers the current location; `is_stale` reports drift from it.
    pub async fn pin_location(&mut self) -> EngineResult<()> {
        self.pinned_url = self
            .page
            .url()
            .await
            .map_err(EngineError::surface)?;
        Ok(())
    }

    fn register(&mut self, element: Element) -> ElementRef {
        self.elements.push(element);
        ElementRef(self.elements.len() as u64 - 1)
    }

    fn element(&self, handle: ElementRef) -> EngineResult<&Element> {
        self.elements
            .get(handle.0 as usize)
            .ok_or_else(|| EngineError::Surface(format!("unknown element handle {}", handle.0)))
    }

    async fn element_value(&self, handle: ElementRef) -> EngineResult<serde_json::Value> {
        let element = self.element(handle)?;
        let returns = element
            .call_js_fn(
                "function() { \
                     if (this.value !== undefined && this.value !== null && this.value !== '') { return String(this.value); } \
                     return this.innerText || this.textContent || ''; \
                 }",
                false,
            )
            .await
            .map_err(EngineError::surface)?;
        Ok(returns.result.value.unwrap_or(serde_json::Value::Null))
    }

    async fn dispatch_key(&self, key: &str, text: Option<&str>, modifiers: i64) -> EngineResult<()> {
        let mut down = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyDown)
            .key(key.to_string())
            .code(key.to_string());
        if modifiers != 0 {
            down = down.modifiers(modifiers);
        }
        self.page
            .execute(down.build().map_err(EngineError::surface)?)
            .await
            .map_err(EngineError::surface)?;

        if let Some(text) = text {
            let mut ch = DispatchKeyEventParams::builder()
                .r#type(DispatchKeyEventType::Char)
                .key(key.to_string())
                .code(key.to_string())
                .text(text.to_string());
            if modifiers != 0 {
                ch = ch.modifiers(modifiers);
            }
            self.page
                .execute(ch.build().map_err(EngineError::surface)?)
                .await
                .map_err(EngineError::surface)?;
        }

        let mut up = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyUp)
            .key(key.to_string())
            .code(key.to_string());
        if modifiers != 0 {
            up = up.modifiers(modifiers);
        }
        self.page
            .execute(up.build().map_err(EngineError::surface)?)
            .await
            .map_err(EngineError::surface)?;
        Ok(())
    }
}

#[async_trait(?Send)]
impl ActionSurface for LiveSurface {
    async fn navigate(&mut self, url: &str) -> EngineResult<()> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(EngineError::surface)?;
        self.page
            .goto(params)
            .await
            .map_err(EngineError::surface)?;
        self.page
            .wait_for_navigation()
            .await
            .map_err(EngineError::surface)?;
        self.pacer.navigation_settle().await;
        // A navigation invalidates every handle issued so far.
        self.elements.clear();
        self.pin_location().await
    }

    async fn query_selector(&mut self, selector: &str) -> EngineResult<Option<ElementHit>> {
        let elements = match self.page.find_elements(selector).await {
            Ok(elements) => elements,
            // An unmatched or malformed selector is an absence, not a failure;
            // the ladder exists to walk past it.
            Err(err) => {
                trace!(selector, error = %err, "selector query failed");
                return Ok(None);
            }
        };
        for element in elements {
            if let Ok(bbox) = element.bounding_box().await {
                if bbox.width > 0.0 && bbox.height > 0.0 {
                    let top = bbox.y;
                    let handle = self.register(element);
                    return Ok(Some(ElementHit {
                        element: handle,
                        top,
                    }));
                }
            }
        }
        Ok(None)
    }

    async fn query_text(&mut self, phrases: &[String]) -> EngineResult<Option<ElementHit>> {
        if phrases.is_empty() {
            return Ok(None);
        }
        let phrases_json =
            serde_json::to_string(phrases).map_err(EngineError::surface)?;
        let script = format!(
            r#"
(() => {{
    const phrases = {phrases_json};
    for (const previous of document.querySelectorAll('[{HIT_MARKER}]')) {{
        previous.removeAttribute('{HIT_MARKER}');
    }}
    const candidates = document.querySelectorAll(
        'input, textarea, [contenteditable="true"], button, a, span, p, div'
    );
    for (const el of candidates) {{
        const rect = el.getBoundingClientRect();
        if (rect.width <= 0 || rect.height <= 0) {{
            continue;
        }}
        const haystack = ((el.placeholder || '') + ' ' + (el.innerText || '')).toLowerCase();
        if (phrases.some(p => haystack.includes(p.toLowerCase()))) {{
            el.setAttribute('{HIT_MARKER}', '1');
            return {{ found: true, top: rect.top + window.scrollY }};
        }}
    }}
    return {{ found: false, top: 0 }};
}})()
"#
        );
        let probe: TextProbeResult = self
            .page
            .evaluate(script.as_str())
            .await
            .map_err(EngineError::surface)?
            .into_value()
            .map_err(EngineError::surface)?;
        if !probe.found {
            return Ok(None);
        }
        match self.page.find_element(format!("[{HIT_MARKER}='1']")).await {
            Ok(element) => {
                let handle = self.register(element);
                Ok(Some(ElementHit {
                    element: handle,
                    top: probe.top,
                }))
            }
            Err(_) => Ok(None),
        }
    }

    async fn click(&mut self, element: ElementRef) -> EngineResult<()> {
        let element = self
            .elements
            .get(element.0 as usize)
            .ok_or_else(|| EngineError::Surface(format!("unknown element handle {}", element.0)))?;
        let _ = element.scroll_into_view().await;
        self.pacer
            .click_element(element)
            .await
            .map_err(EngineError::surface)
    }

    async fn type_text(&mut self, element: ElementRef, text: &str) -> EngineResult<()> {
        let element = self
            .elements
            .get(element.0 as usize)
            .ok_or_else(|| EngineError::Surface(format!("unknown element handle {}", element.0)))?;
        let _ = element.scroll_into_view().await;
        self.pacer
            .type_text(element, text)
            .await
            .map_err(EngineError::surface)
    }

    async fn clear_text(&mut self, element: ElementRef) -> EngineResult<()> {
        let element = self.element(element)?;
        element
            .call_js_fn(
                "function() { \
                     if (this.value !== undefined && this.value !== null) { this.value = ''; } \
                     if (this.isContentEditable) { this.innerText = ''; } \
                     this.dispatchEvent(new Event('input', { bubbles: true })); \
                 }",
                false,
            )
            .await
            .map_err(EngineError::surface)?;
        Ok(())
    }

    async fn read_text(&mut self, element: ElementRef) -> EngineResult<String> {
        let value = self.element_value(element).await?;
        Ok(value.as_str().unwrap_or_default().trim().to_string())
    }

    async fn press_key(&mut self, element: ElementRef, chord: KeyChord) -> EngineResult<()> {
        {
            let element = self.element(element)?;
            element
                .call_js_fn("function() { this.focus(); }", false)
                .await
                .map_err(EngineError::surface)?;
        }
        match chord {
            KeyChord::Enter => self.dispatch_key("Enter", Some("\r"), 0).await,
            // Ctrl carries modifier bit 2 in the CDP input domain.
            KeyChord::CtrlEnter => self.dispatch_key("Enter", Some("\r"), 2).await,
            KeyChord::Escape => self.dispatch_key("Escape", None, 0).await,
        }
    }

    async fn scroll_to_fraction(&mut self, fraction: f64) -> EngineResult<()> {
        let fraction = fraction.clamp(0.0, 1.0);
        let script = format!(
            "window.scrollTo({{ top: document.body.scrollHeight * {fraction}, behavior: 'smooth' }});"
        );
        self.page
            .evaluate(script.as_str())
            .await
            .map_err(EngineError::surface)?;
        self.settle().await;
        Ok(())
    }

    async fn eval(&mut self, script: &str) -> EngineResult<serde_json::Value> {
        self.page
            .evaluate(script)
            .await
            .map_err(EngineError::surface)?
            .into_value()
            .map_err(EngineError::surface)
    }

    async fn capture_state(&mut self) -> EngineResult<PageStateToken> {
        let probe: StateProbeResult = self
            .page
            .evaluate(STATE_PROBE_SCRIPT)
            .await
            .map_err(EngineError::surface)?
            .into_value()
            .map_err(EngineError::surface)?;
        Ok(PageStateToken::new(probe.scroll_y, probe.panels))
    }

    async fn reset_state(&mut self) -> EngineResult<()> {
        self.page
            .evaluate(RESET_STATE_SCRIPT)
            .await
            .map_err(EngineError::surface)?;
        // Escape closes whatever modal layer still has focus.
        self.dispatch_key("Escape", None, 0).await?;
        self.settle().await;
        Ok(())
    }

    async fn submit_form(&mut self, element: ElementRef) -> EngineResult<()> {
        let element = self.element(element)?;
        element
            .call_js_fn(
                "function() { \
                     const form = this.form || this.closest('form'); \
                     if (form) { \
                         if (form.requestSubmit) { form.requestSubmit(); } else { form.submit(); } \
                     } else { \
                         this.dispatchEvent(new KeyboardEvent('keydown', { key: 'Enter', bubbles: true })); \
                     } \
                 }",
                false,
            )
            .await
            .map_err(EngineError::surface)?;
        Ok(())
    }

    async fn attach_files(
        &mut self,
        element: ElementRef,
        paths: &[std::path::PathBuf],
    ) -> EngineResult<()> {
        let files: Vec<String> = paths
            .iter()
            .map(|path| path.to_string_lossy().to_string())
            .collect();
        let element = self.element(element)?;
        let params = SetFileInputFilesParams::builder()
            .files(files)
            .backend_node_id(element.backend_node_id.clone())
            .build()
            .map_err(EngineError::surface)?;
        self.page
            .execute(params)
            .await
            .map_err(EngineError::surface)?;
        Ok(())
    }

    async fn is_stale(&mut self) -> EngineResult<bool> {
        let current = match self.page.url().await {
            Ok(url) => url,
            Err(_) => return Ok(true),
        };
        match (&self.pinned_url, &current) {
            (Some(pinned), Some(current)) => Ok(pinned != current),
            (Some(_), None) => Ok(true),
            (None, _) => Ok(false),
        }
    }

    async fn settle(&mut self) {
        let lo = self.settle_delay_ms[0].min(self.settle_delay_ms[1]);
        let hi = self.settle_delay_ms[0].max(self.settle_delay_ms[1]);
        if hi == 0 {
            return;
        }
        let ms = rand::thread_rng().gen_range(lo..=hi);
        sleep(std::time::Duration::from_millis(ms)).await;
    }
}

const STATE_PROBE_SCRIPT: &str = r#"
(() => {
    const panels = [];
    for (const el of document.querySelectorAll('[aria-expanded="true"], [data-plume-expanded]')) {
        panels.push(el.id || el.className || el.tagName.toLowerCase());
    }
    return { scroll_y: window.scrollY, panels };
})()
"#;

const RESET_STATE_SCRIPT: &str = r#"
(() => {
    window.scrollTo({ top: 0, behavior: 'auto' });
    for (const el of document.querySelectorAll('[data-plume-expanded]')) {
        el.removeAttribute('data-plume-expanded');
    }
})()
"#;
