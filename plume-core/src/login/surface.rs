use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, TimeSinceEpoch};
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, NavigateParams};
use chromiumoxide::page::{Page, ScreenshotParams};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::browser::HumanPacer;
use crate::config::{HumanSimulationSection, PlatformSection};
use crate::session::{CookieRecord, SessionRecord};

use super::orchestrator::{LoginError, LoginResult};

/// What an interactive login leaves behind for the session record.
#[derive(Debug, Clone)]
pub struct CapturedSession {
    pub cookies: Vec<CookieRecord>,
    pub local_storage: BTreeMap<String, String>,
    pub account_hint: Option<String>,
}

/// The DOM side of the login flow. The orchestrator's state machine runs
/// against this seam so tests can script probe outcomes without a browser.
#[async_trait(?Send)]
pub trait LoginSurface {
    /// Apply a persisted session (cookies + local storage) to the page.
    async fn apply_session(&mut self, record: &SessionRecord) -> LoginResult<()>;
    /// Navigate to the low-cost authenticated page and report whether the
    /// session grants access (true = authenticated).
    async fn probe_authenticated(&mut self) -> LoginResult<bool>;
    /// Present the interactive login surface; returns a base64 PNG of the QR
    /// code when one could be captured.
    async fn begin_interactive(&mut self) -> LoginResult<Option<String>>;
    /// Cheap re-check while the user completes the interactive flow.
    async fn poll_authenticated(&mut self) -> LoginResult<bool>;
    /// Capture the authenticated state for persistence.
    async fn capture_session(&mut self) -> LoginResult<CapturedSession>;
}

#[derive(Debug, Deserialize)]
struct IndicatorProbe {
    login_required: bool,
}

/// Chromiumoxide-backed login surface for one platform page.
pub struct LiveLoginSurface {
    page: Page,
    platform: PlatformSection,
    pacer: HumanPacer,
    capture_qr: bool,
}

impl LiveLoginSurface {
    pub fn new(
        page: Page,
        platform: PlatformSection,
        human: HumanSimulationSection,
        capture_qr: bool,
    ) -> Self {
        Self {
            page,
            platform,
            pacer: HumanPacer::new(human),
            capture_qr,
        }
    }

    async fn goto_home(&mut self) -> LoginResult<()> {
        let params = NavigateParams::builder()
            .url(self.platform.home_url.clone())
            .build()
            .map_err(|err| LoginError::Surface(err.to_string()))?;
        self.page
            .goto(params)
            .await
            .map_err(|err| LoginError::Surface(err.to_string()))?;
        self.page
            .wait_for_navigation()
            .await
            .map_err(|err| LoginError::Surface(err.to_string()))?;
        self.pacer.navigation_settle().await;
        Ok(())
    }

    async fn indicator_visible(&mut self) -> LoginResult<bool> {
        let indicator =
            serde_json::to_string(&self.platform.login_indicator_text).unwrap_or_default();
        let script = format!(
            r#"
(() => {{
    const needle = {indicator};
    const candidates = document.querySelectorAll('button, a, span, div');
    for (const el of candidates) {{
        const rect = el.getBoundingClientRect();
        if (rect.width <= 0 || rect.height <= 0) {{
            continue;
        }}
        const text = (el.innerText || '').trim();
        if (text === needle) {{
            return {{ login_required: true }};
        }}
    }}
    return {{ login_required: false }};
}})()
"#
        );
        let probe: IndicatorProbe = self
            .page
            .evaluate(script.as_str())
            .await
            .map_err(|err| LoginError::Surface(err.to_string()))?
            .into_value()
            .map_err(|err| LoginError::Surface(err.to_string()))?;
        Ok(probe.login_required)
    }

    async fn capture_qr_image(&mut self) -> Option<String> {
        for selector in &self.platform.qr_image_selectors {
            if let Ok(element) = self.page.find_element(selector.clone()).await {
                match element.screenshot(CaptureScreenshotFormat::Png).await {
                    Ok(bytes) => return Some(BASE64.encode(bytes)),
                    Err(err) => {
                        debug!(selector, error = %err, "qr element screenshot failed");
                    }
                }
            }
        }
        // Fall back to the whole page; the QR is on it somewhere.
        match self
            .page
            .screenshot(ScreenshotParams::builder().build())
            .await
        {
            Ok(bytes) => Some(BASE64.encode(bytes)),
            Err(err) => {
                warn!(error = %err, "page screenshot for qr capture failed");
                None
            }
        }
    }
}

#[async_trait(?Send)]
impl LoginSurface for LiveLoginSurface {
    async fn apply_session(&mut self, record: &SessionRecord) -> LoginResult<()> {
        let mut params = Vec::with_capacity(record.cookies.len());
        for cookie in &record.cookies {
            let mut builder = CookieParam::builder()
                .name(cookie.name.clone())
                .value(cookie.value.clone())
                .domain(cookie.domain.clone())
                .secure(cookie.secure)
                .http_only(cookie.http_only);
            if let Some(path) = &cookie.path {
                builder = builder.path(path.clone());
            }
            if let Some(expires) = cookie.expires {
                builder = builder.expires(TimeSinceEpoch::new(expires));
            }
            params.push(
                builder
                    .build()
                    .map_err(|err| LoginError::Surface(err.to_string()))?,
            );
        }
        if !params.is_empty() {
            self.page
                .set_cookies(params)
                .await
                .map_err(|err| LoginError::Surface(err.to_string()))?;
        }

        self.goto_home().await?;

        if !record.local_storage.is_empty() {
            let entries = serde_json::to_string(&record.local_storage)
                .map_err(|err| LoginError::Surface(err.to_string()))?;
            let script = format!(
                r#"
(() => {{
    const entries = {entries};
    for (const [key, value] of Object.entries(entries)) {{
        try {{ window.localStorage.setItem(key, value); }} catch (_) {{}}
    }}
    return true;
}})()
"#
            );
            self.page
                .evaluate(script.as_str())
                .await
                .map_err(|err| LoginError::Surface(err.to_string()))?;
        }
        Ok(())
    }

    async fn probe_authenticated(&mut self) -> LoginResult<bool> {
        self.goto_home().await?;
        Ok(!self.indicator_visible().await?)
    }

    async fn begin_interactive(&mut self) -> LoginResult<Option<String>> {
        for selector in &self.platform.login_button_selectors {
            if let Ok(element) = self.page.find_element(selector.clone()).await {
                if let Err(err) = self.pacer.click_element(&element).await {
                    debug!(selector, error = %err, "login button click failed");
                    continue;
                }
                self.pacer.navigation_settle().await;
                break;
            }
        }
        if self.capture_qr {
            Ok(self.capture_qr_image().await)
        } else {
            Ok(None)
        }
    }

    async fn poll_authenticated(&mut self) -> LoginResult<bool> {
        Ok(!self.indicator_visible().await?)
    }

    async fn capture_session(&mut self) -> LoginResult<CapturedSession> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .map_err(|err| LoginError::Surface(err.to_string()))?
            .into_iter()
            .map(|cookie| CookieRecord {
                name: cookie.name,
                value: cookie.value,
                domain: cookie.domain,
                path: Some(cookie.path),
                expires: Some(cookie.expires),
                secure: cookie.secure,
                http_only: cookie.http_only,
            })
            .collect();

        let local_storage: BTreeMap<String, String> = self
            .page
            .evaluate(LOCAL_STORAGE_DUMP_SCRIPT)
            .await
            .map_err(|err| LoginError::Surface(err.to_string()))?
            .into_value()
            .unwrap_or_default();

        Ok(CapturedSession {
            cookies,
            local_storage,
            account_hint: None,
        })
    }
}

const LOCAL_STORAGE_DUMP_SCRIPT: &str = r#"
(() => {
    const entries = {};
    try {
        for (let i = 0; i < window.localStorage.length; i++) {
            const key = window.localStorage.key(i);
            entries[key] = window.localStorage.getItem(key);
        }
    } catch (_) {}
    return entries;
})()
"#;
