#![allow(dead_code)]

use std::collections::VecDeque;

use async_trait::async_trait;
use serde_json::json;

use plume_core::config::{PlatformSection, TargetEntry, TargetTables};
use plume_core::engine::{
    ActionSurface, ElementHit, ElementRef, EngineResult, KeyChord, PageStateToken,
};

/// When a scripted node is considered present and visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Always,
    /// Appears only after the trigger affordance was clicked.
    AfterTriggerClick,
    /// Lazy-loaded: appears once the page has scrolled at least this far.
    AfterScroll(u32),
    /// Resolvable only when the page carries no read residue.
    WhenPristine,
}

#[derive(Debug, Clone)]
pub struct FakeNode {
    pub selector: String,
    pub phrases: Vec<String>,
    pub top: f64,
    pub text: String,
    pub visibility: Visibility,
    pub is_trigger: bool,
    pub clears_input_on_click: bool,
}

impl FakeNode {
    pub fn new(selector: &str) -> Self {
        Self {
            selector: selector.to_string(),
            phrases: Vec::new(),
            top: 400.0,
            text: String::new(),
            visibility: Visibility::Always,
            is_trigger: false,
            clears_input_on_click: false,
        }
    }

    pub fn phrases(mut self, phrases: &[&str]) -> Self {
        self.phrases = phrases.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn top(mut self, top: f64) -> Self {
        self.top = top;
        self
    }

    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn trigger(mut self) -> Self {
        self.is_trigger = true;
        self
    }

    pub fn clears_input_on_click(mut self) -> Self {
        self.clears_input_on_click = true;
        self
    }
}

/// Which submission rungs actually land on this fake page. A `false` rung
/// completes without error but leaves the input untouched (the silent no-op
/// the verification ladder exists to catch).
#[derive(Debug, Clone, Copy)]
pub struct SubmitRules {
    pub enter_clears: bool,
    pub ctrl_enter_clears: bool,
    pub form_clears: bool,
}

impl Default for SubmitRules {
    fn default() -> Self {
        Self {
            enter_clears: true,
            ctrl_enter_clears: true,
            form_clears: true,
        }
    }
}

/// Scripted DOM standing in for a live page. Single-page-app semantics:
/// navigating to the URL already shown keeps all accumulated state, which is
/// exactly the situation the read/post reconciliation contract exists for.
pub struct FakeSurface {
    pub nodes: Vec<FakeNode>,
    handles: Vec<usize>,
    pub url: String,
    pub trigger_clicked: bool,
    pub scroll_percent: u32,
    pub pristine: bool,
    pub resets: usize,
    pub navigations: Vec<String>,
    pub clicks: Vec<String>,
    pub scroll_history: Vec<u32>,
    pub fallback_scripts_run: usize,
    pub submit_rules: SubmitRules,
    /// Selector of the node treated as "the input" by submit rules.
    pub input_selector: String,
    pub comment_payload: serde_json::Value,
    pub echoed_texts: Vec<String>,
    last_typed: Option<String>,
    /// Scripted mismatches: the next N type_text calls land garbled.
    pub garble_next_typing: usize,
    pub stale: bool,
}

impl FakeSurface {
    pub fn new(nodes: Vec<FakeNode>) -> Self {
        Self {
            nodes,
            handles: Vec::new(),
            url: String::new(),
            trigger_clicked: false,
            scroll_percent: 0,
            pristine: true,
            resets: 0,
            navigations: Vec::new(),
            clicks: Vec::new(),
            scroll_history: Vec::new(),
            fallback_scripts_run: 0,
            submit_rules: SubmitRules::default(),
            input_selector: String::new(),
            comment_payload: json!([]),
            echoed_texts: Vec::new(),
            last_typed: None,
            garble_next_typing: 0,
            stale: false,
        }
    }

    fn node_visible(&self, node: &FakeNode) -> bool {
        match node.visibility {
            Visibility::Always => true,
            Visibility::AfterTriggerClick => self.trigger_clicked,
            Visibility::AfterScroll(threshold) => self.scroll_percent >= threshold,
            Visibility::WhenPristine => self.pristine,
        }
    }

    fn register(&mut self, index: usize) -> ElementRef {
        self.handles.push(index);
        ElementRef((self.handles.len() - 1) as u64)
    }

    fn node_index(&self, handle: ElementRef) -> usize {
        self.handles[handle.0 as usize]
    }

    fn clear_input(&mut self) {
        let selector = self.input_selector.clone();
        if let Some(node) = self.nodes.iter_mut().find(|node| node.selector == selector) {
            node.text.clear();
        }
        if let Some(text) = self.last_typed.take() {
            self.echoed_texts.push(text);
        }
    }
}

#[async_trait(?Send)]
impl ActionSurface for FakeSurface {
    async fn navigate(&mut self, url: &str) -> EngineResult<()> {
        self.navigations.push(url.to_string());
        if self.url != url {
            // Full load: fresh document, no residue.
            self.url = url.to_string();
            self.pristine = true;
            self.scroll_percent = 0;
            self.trigger_clicked = false;
        }
        Ok(())
    }

    async fn query_selector(&mut self, selector: &str) -> EngineResult<Option<ElementHit>> {
        let found = self
            .nodes
            .iter()
            .enumerate()
            .find(|(_, node)| node.selector == selector && self.node_visible(node))
            .map(|(index, node)| (index, node.top));
        Ok(found.map(|(index, top)| {
            let element = self.register(index);
            ElementHit { element, top }
        }))
    }

    async fn query_text(&mut self, phrases: &[String]) -> EngineResult<Option<ElementHit>> {
        let found = self
            .nodes
            .iter()
            .enumerate()
            .find(|(_, node)| {
                self.node_visible(node)
                    && node
                        .phrases
                        .iter()
                        .any(|have| phrases.iter().any(|want| have.contains(want.as_str())))
            })
            .map(|(index, node)| (index, node.top));
        Ok(found.map(|(index, top)| {
            let element = self.register(index);
            ElementHit { element, top }
        }))
    }

    async fn click(&mut self, element: ElementRef) -> EngineResult<()> {
        let index = self.node_index(element);
        let (selector, is_trigger, clears) = {
            let node = &self.nodes[index];
            (
                node.selector.clone(),
                node.is_trigger,
                node.clears_input_on_click,
            )
        };
        self.clicks.push(selector);
        if is_trigger {
            self.trigger_clicked = true;
        }
        if clears {
            self.clear_input();
        }
        Ok(())
    }

    async fn type_text(&mut self, element: ElementRef, text: &str) -> EngineResult<()> {
        let garbled = if self.garble_next_typing > 0 {
            self.garble_next_typing -= 1;
            true
        } else {
            false
        };
        let index = self.node_index(element);
        let node = &mut self.nodes[index];
        if garbled {
            node.text.push_str(&text[..text.len() / 2]);
        } else {
            node.text.push_str(text);
            self.last_typed = Some(text.to_string());
        }
        Ok(())
    }

    async fn clear_text(&mut self, element: ElementRef) -> EngineResult<()> {
        let index = self.node_index(element);
        self.nodes[index].text.clear();
        Ok(())
    }

    async fn read_text(&mut self, element: ElementRef) -> EngineResult<String> {
        let index = self.node_index(element);
        Ok(self.nodes[index].text.clone())
    }

    async fn press_key(&mut self, element: ElementRef, chord: KeyChord) -> EngineResult<()> {
        let index = self.node_index(element);
        let is_input = self.nodes[index].selector == self.input_selector;
        let clears = match chord {
            KeyChord::Enter => self.submit_rules.enter_clears,
            KeyChord::CtrlEnter => self.submit_rules.ctrl_enter_clears,
            KeyChord::Escape => false,
        };
        if is_input && clears {
            self.clear_input();
        }
        Ok(())
    }

    async fn scroll_to_fraction(&mut self, fraction: f64) -> EngineResult<()> {
        self.scroll_percent = (fraction * 100.0).round() as u32;
        self.scroll_history.push(self.scroll_percent);
        Ok(())
    }

    async fn eval(&mut self, script: &str) -> EngineResult<serde_json::Value> {
        if script.contains("data-plume-expanded") {
            // Expansion marker: the read leaves residue behind.
            self.pristine = false;
            return Ok(json!(true));
        }
        if script.contains("comments.push") {
            return Ok(self.comment_payload.clone());
        }
        if script.contains("Array.from(items)") {
            return Ok(json!(self.echoed_texts.clone()));
        }
        // Anything else is treated as a resolution fallback script.
        self.fallback_scripts_run += 1;
        Ok(json!(false))
    }

    async fn capture_state(&mut self) -> EngineResult<PageStateToken> {
        let panels = if self.pristine {
            vec![]
        } else {
            vec!["comments".to_string()]
        };
        Ok(PageStateToken::new(self.scroll_percent as f64 * 10.0, panels))
    }

    async fn reset_state(&mut self) -> EngineResult<()> {
        self.resets += 1;
        self.pristine = true;
        self.scroll_percent = 0;
        Ok(())
    }

    async fn submit_form(&mut self, element: ElementRef) -> EngineResult<()> {
        let index = self.node_index(element);
        let is_input = self.nodes[index].selector == self.input_selector;
        if is_input && self.submit_rules.form_clears {
            self.clear_input();
        }
        Ok(())
    }

    async fn attach_files(
        &mut self,
        _element: ElementRef,
        _paths: &[std::path::PathBuf],
    ) -> EngineResult<()> {
        Ok(())
    }

    async fn is_stale(&mut self) -> EngineResult<bool> {
        Ok(self.stale)
    }

    async fn settle(&mut self) {}
}

pub fn empty_entry() -> TargetEntry {
    TargetEntry {
        selectors: vec![],
        phrases: vec![],
        min_y: None,
        trigger_selectors: vec![],
        fallback_script: None,
    }
}

pub fn entry(selectors: &[&str]) -> TargetEntry {
    TargetEntry {
        selectors: selectors.iter().map(|s| s.to_string()).collect(),
        ..empty_entry()
    }
}

pub fn engine_section() -> plume_core::config::EngineSection {
    plume_core::config::EngineSection {
        strategy_attempts: 1,
        scroll_stops: vec![0.3, 0.5, 0.7, 0.9],
        selector_timeout_seconds: 5,
        settle_delay_ms: [0, 0],
    }
}

/// A platform table wired to the fake page's selectors.
pub fn test_platform() -> PlatformSection {
    PlatformSection {
        home_url: "https://social.example".into(),
        search_url: "https://social.example/search_result?keyword=".into(),
        creator_url: Some("https://creator.social.example/publish".into()),
        login_indicator_text: "log in".into(),
        login_button_selectors: vec!["button.login".into()],
        qr_image_selectors: vec!["img.qr".into()],
        access_token_param: Some("xsec_token".into()),
        targets: TargetTables {
            comment_input: TargetEntry {
                selectors: vec!["#comment-input".into()],
                phrases: vec!["say something".into()],
                min_y: Some(200.0),
                trigger_selectors: vec!["span.open-editor".into()],
                fallback_script: None,
            },
            submit_control: entry(&["button.send"]),
            comment_area: entry(&["div.comments"]),
            more_comments: TargetEntry {
                selectors: vec!["span.more-comments".into()],
                ..empty_entry()
            },
            comment_item: entry(&["div.comment-item"]),
            search_input: entry(&["#search-input"]),
            title_input: entry(&["input.title"]),
            body_editor: entry(&["div.editor"]),
            publish_control: entry(&["button.publish"]),
            media_tab_image: entry(&["div.tab-image"]),
            media_tab_video: entry(&["div.tab-video"]),
            file_input: entry(&["input.file"]),
        },
    }
}

/// Poll script results for login-surface fakes.
pub type PollScript = VecDeque<bool>;
