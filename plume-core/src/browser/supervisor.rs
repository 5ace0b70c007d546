use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use chromiumoxide::page::Page;
use futures::StreamExt;
use rand::{seq::SliceRandom, Rng};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{BrowserConfig, ViewportSection};

use super::error::{BrowserError, BrowserResult};
use super::fingerprint::FingerprintMasker;
use super::stealth;

#[derive(Debug, Clone)]
pub struct ViewportSpec {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
}

/// Chromium's per-profile lock artifacts. Left behind when the process dies
/// without releasing the profile.
const STALE_LOCK_FILES: &[&str] = &["SingletonLock", "SingletonSocket", "SingletonCookie"];

struct PageSlot {
    page: Page,
    lock: Arc<AsyncMutex<()>>,
}

struct BrowserHandle {
    browser: Browser,
    handler_task: Option<JoinHandle<()>>,
    user_agent: String,
    pages: HashMap<String, PageSlot>,
}

/// Owns the single browser process and its logical pages. Relaunching is
/// expensive, so the handle is created lazily on first use and lives until
/// `shutdown` or an unrecoverable crash.
pub struct BrowserSupervisor {
    config: Arc<BrowserConfig>,
    profile_dir: PathBuf,
    inner: AsyncMutex<Option<BrowserHandle>>,
}

impl BrowserSupervisor {
    pub fn new(config: Arc<BrowserConfig>, profile_dir: PathBuf) -> Self {
        Self {
            config,
            profile_dir,
            inner: AsyncMutex::new(None),
        }
    }

    pub fn profile_dir(&self) -> &Path {
        &self.profile_dir
    }

    /// Launches the browser if it is not already running. A launch failure is
    /// retried once after clearing stale profile locks; a second failure is
    /// fatal for this process.
    pub async fn acquire(&self) -> BrowserResult<()> {
        let mut guard = self.inner.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        *guard = Some(self.launch().await?);
        Ok(())
    }

    async fn launch(&self) -> BrowserResult<BrowserHandle> {
        std::fs::create_dir_all(&self.profile_dir)
            .map_err(|err| BrowserError::Profile(format!("failed to create profile dir: {err}")))?;

        let viewport = self.select_viewport();
        let user_agent = self.select_user_agent();

        match self.try_launch(&viewport, &user_agent).await {
            Ok(handle) => Ok(handle),
            Err(first) => {
                warn!(error = %first, "browser launch failed, clearing stale profile locks");
                self.clear_stale_locks();
                self.try_launch(&viewport, &user_agent)
                    .await
                    .map_err(|second| {
                        BrowserError::Unavailable(format!(
                            "launch failed twice (after lock cleanup): {second}"
                        ))
                    })
            }
        }
    }

    async fn try_launch(
        &self,
        viewport: &ViewportSpec,
        user_agent: &str,
    ) -> BrowserResult<BrowserHandle> {
        let chromium_config = self.build_chromium_config(viewport, user_agent)?;
        info!(
            profile = %self.profile_dir.display(),
            ua = %user_agent,
            width = viewport.width,
            height = viewport.height,
            "launching chromium instance"
        );

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "chromium handler reported error");
                }
            }
        });

        Ok(BrowserHandle {
            browser,
            handler_task: Some(handler_task),
            user_agent: user_agent.to_string(),
            pages: HashMap::new(),
        })
    }

    fn clear_stale_locks(&self) {
        for name in STALE_LOCK_FILES {
            let path = self.profile_dir.join(name);
            if path.exists() {
                let removed = if path.is_dir() {
                    std::fs::remove_dir_all(&path)
                } else {
                    std::fs::remove_file(&path)
                };
                match removed {
                    Ok(()) => info!(lock = name, "removed stale profile lock"),
                    Err(err) => warn!(lock = name, error = %err, "failed to remove stale lock"),
                }
            }
        }
    }

    /// Returns the page for `label`, creating it on first use. Repeated calls
    /// with one label return the same page instance so DOM continuity is
    /// preserved per feature.
    pub async fn get_page(&self, label: &str, fingerprint_seed: u64) -> BrowserResult<Page> {
        let mut guard = self.inner.lock().await;
        let handle = guard
            .as_mut()
            .ok_or_else(|| BrowserError::Unexpected("browser not acquired".into()))?;

        if let Some(slot) = handle.pages.get(label) {
            return Ok(slot.page.clone());
        }

        let params = CreateTargetParams::new("about:blank");
        let page = handle.browser.new_page(params).await?;
        self.configure_page(&page, &handle.user_agent, fingerprint_seed)
            .await?;
        handle.pages.insert(
            label.to_string(),
            PageSlot {
                page: page.clone(),
                lock: Arc::new(AsyncMutex::new(())),
            },
        );
        debug!(label, "created browser page");
        Ok(page)
    }

    /// Per-label serialization lock. DOM state is shared mutable state with no
    /// transactional isolation, so callers must hold this across an operation.
    pub async fn page_lock(&self, label: &str) -> BrowserResult<Arc<AsyncMutex<()>>> {
        let guard = self.inner.lock().await;
        let handle = guard
            .as_ref()
            .ok_or_else(|| BrowserError::Unexpected("browser not acquired".into()))?;
        handle
            .pages
            .get(label)
            .map(|slot| Arc::clone(&slot.lock))
            .ok_or_else(|| BrowserError::PageGone(label.to_string()))
    }

    /// Cancellation path: closes one page without touching the process, so the
    /// persisted profile cannot be corrupted by a mid-operation kill.
    pub async fn close_page(&self, label: &str) -> BrowserResult<()> {
        let mut guard = self.inner.lock().await;
        let handle = guard
            .as_mut()
            .ok_or_else(|| BrowserError::Unexpected("browser not acquired".into()))?;
        if let Some(slot) = handle.pages.remove(label) {
            if let Err(err) = slot.page.close().await {
                warn!(label, error = %err, "failed to close page cleanly");
            }
        }
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.inner.lock().await.is_some()
    }

    pub async fn shutdown(&self) -> BrowserResult<()> {
        let mut guard = self.inner.lock().await;
        if let Some(mut handle) = guard.take() {
            info!(profile = %self.profile_dir.display(), "shutting down chromium instance");
            if let Err(err) = handle.browser.close().await {
                warn!(error = %err, "failed to close browser gracefully");
            }
            if let Some(task) = handle.handler_task.take() {
                if let Err(err) = task.await {
                    warn!(error = %err, "browser handler join error");
                }
            }
        }
        Ok(())
    }

    async fn configure_page(
        &self,
        page: &Page,
        user_agent: &str,
        fingerprint_seed: u64,
    ) -> BrowserResult<()> {
        page.enable_stealth_mode_with_agent(user_agent).await?;

        let mut params_builder =
            SetUserAgentOverrideParams::builder().user_agent(user_agent.to_string());
        if let Some(accept) = &self.config.flags.accept_language {
            params_builder = params_builder.accept_language(accept.clone());
        }
        let params = params_builder
            .build()
            .map_err(BrowserError::Configuration)?;
        page.set_user_agent(params).await?;

        stealth::apply(page, &self.config.flags).await?;
        let masker = FingerprintMasker::new(self.config.fingerprint.clone(), fingerprint_seed);
        masker.apply(page).await?;
        Ok(())
    }

    fn select_viewport(&self) -> ViewportSpec {
        let ViewportSection {
            resolutions,
            jitter_pixels,
            device_scale_factor,
        } = &self.config.viewport;

        let mut rng = rand::thread_rng();
        let base = resolutions.choose(&mut rng).cloned().unwrap_or([1366, 768]);
        let jitter = *jitter_pixels as i32;
        let width = (base[0] as i32 + rng.gen_range(-jitter..=jitter)).clamp(640, 2560) as u32;
        let height = (base[1] as i32 + rng.gen_range(-jitter..=jitter)).clamp(480, 1600) as u32;
        let scale = rng.gen_range(device_scale_factor[0]..=device_scale_factor[1]) as f64;
        ViewportSpec {
            width,
            height,
            device_scale_factor: scale,
        }
    }

    fn select_user_agent(&self) -> String {
        let mut rng = rand::thread_rng();
        if self.config.user_agents.pool.is_empty() {
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_4) AppleWebKit/605.1.15 (KHTML, like Gecko)"
                .to_string()
        } else {
            self.config
                .user_agents
                .pool
                .choose(&mut rng)
                .cloned()
                .unwrap_or_else(|| self.config.user_agents.pool[0].clone())
        }
    }

    fn build_chromium_config(
        &self,
        viewport: &ViewportSpec,
        user_agent: &str,
    ) -> BrowserResult<ChromiumConfig> {
        let mut builder = ChromiumConfig::builder()
            .user_data_dir(&self.profile_dir)
            .viewport(ChromiumViewport {
                width: viewport.width,
                height: viewport.height,
                device_scale_factor: Some(viewport.device_scale_factor),
                emulating_mobile: false,
                is_landscape: viewport.width >= viewport.height,
                has_touch: false,
            });

        if let Some(executable) = &self.config.chromium.executable_path {
            builder = builder.chrome_executable(executable);
        }
        if !self.config.chromium.headless {
            builder = builder.with_head();
        }
        if !self.config.chromium.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(timeout) = self.config.chromium.request_timeout_seconds {
            builder = builder.request_timeout(Duration::from_secs(timeout));
        }

        let mut args = vec![
            format!("--user-agent={user_agent}"),
            format!("--window-size={},{}", viewport.width, viewport.height),
        ];

        if self.config.chromium.disable_gpu {
            args.push("--disable-gpu".into());
        }
        if self.config.flags.mute_audio {
            args.push("--mute-audio".into());
        }
        if let Some(lang) = &self.config.flags.lang {
            args.push(format!("--lang={lang}"));
        }
        for feature in &self.config.flags.disable_blink_features {
            args.push(format!("--disable-blink-features={feature}"));
        }
        if self.config.flags.no_first_run {
            args.push("--no-first-run".into());
            args.push("--no-default-browser-check".into());
        }
        if self.config.flags.disable_automation_controlled {
            args.push("--disable-features=AutomationControlled".into());
            args.push("--exclude-switches=enable-automation".into());
        }
        if let Some(accept) = &self.config.flags.accept_language {
            args.push(format!("--accept-lang={accept}"));
        }
        args.push("--disable-background-timer-throttling".into());
        args.push("--disable-infobars".into());
        args.push("--disable-sync".into());
        args.push("--password-store=basic".into());

        builder = builder.args(args);

        builder.build().map_err(BrowserError::Configuration)
    }
}

impl std::fmt::Debug for BrowserSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserSupervisor")
            .field("profile_dir", &self.profile_dir)
            .finish_non_exhaustive()
    }
}
