use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::page::Page;

use crate::config::FlagsSection;

use super::error::{BrowserError, BrowserResult};

/// Automation-marker scrubbing applied before the first document script runs.
/// Covers what the launch flags cannot: `navigator.webdriver`, driver-injected
/// globals, and an empty plugin list.
pub async fn apply(page: &Page, flags: &FlagsSection) -> BrowserResult<()> {
    inject(page, BASE_STEALTH_SCRIPT.to_string()).await?;

    if let Some(lang) = &flags.lang {
        let languages_script = format!(
            "Object.defineProperty(navigator, 'language', {{ get: () => '{lang}' }});\nObject.defineProperty(navigator, 'languages', {{ get: () => ['{lang}', 'en-US'] }});"
        );
        inject(page, languages_script).await?;
    }
    if let Some(timezone) = &flags.timezone {
        let tz_script = format!(
            r#"
            (() => {{
                const original = Intl.DateTimeFormat.prototype.resolvedOptions;
                Intl.DateTimeFormat.prototype.resolvedOptions = function() {{
                    const options = original.apply(this, arguments);
                    options.timeZone = '{timezone}';
                    return options;
                }};
            }})();
            "#
        );
        inject(page, tz_script).await?;
    }
    Ok(())
}

async fn inject(page: &Page, script: String) -> BrowserResult<()> {
    page.evaluate_on_new_document(
        AddScriptToEvaluateOnNewDocumentParams::builder()
            .source(script)
            .build()
            .map_err(BrowserError::Configuration)?,
    )
    .await?;
    Ok(())
}

const BASE_STEALTH_SCRIPT: &str = r#"
(() => {
    try {
        delete navigator.webdriver;
        delete Navigator.prototype.webdriver;
    } catch (_) {}
    try {
        Object.defineProperty(navigator, 'webdriver', {
            get: () => undefined,
            configurable: true,
            enumerable: false,
        });
    } catch (_) {
        navigator.__defineGetter__('webdriver', () => undefined);
    }

    for (const marker of [
        '__driver_evaluate',
        '__webdriver_evaluate',
        '__selenium_evaluate',
        '__webdriver_script_fn',
        '__driver_unwrapped',
        '__webdriver_unwrapped',
        '__selenium_unwrapped',
    ]) {
        try { delete navigator[marker]; } catch (_) {}
    }
    for (const marker of ['__playwright', '__puppeteer', '_selenium', 'selenium']) {
        try { delete window[marker]; } catch (_) {}
    }

    try {
        Object.defineProperty(navigator, 'plugins', {
            get: () => {
                const plugins = [
                    { name: 'Chrome PDF Plugin', filename: 'internal-pdf-viewer', length: 1 },
                    { name: 'Chrome PDF Viewer', filename: 'mhjfbmdgcfjbbpaeojofohoefgiehjai', length: 1 },
                    { name: 'Native Client', filename: 'internal-nacl-plugin', length: 2 },
                ];
                Object.setPrototypeOf(plugins, PluginArray.prototype);
                return plugins;
            },
            enumerable: true,
        });
    } catch (_) {}

    try {
        Object.defineProperty(navigator, 'hardwareConcurrency', { get: () => 8 });
        Object.defineProperty(navigator, 'deviceMemory', { get: () => 8 });
    } catch (_) {}

    if (!window.chrome) {
        try {
            Object.defineProperty(window, 'chrome', {
                get: () => ({ app: { isInstalled: false }, runtime: {} }),
                enumerable: true,
            });
        } catch (_) {}
    }

    try {
        const originalQuery = window.navigator.permissions.query;
        window.navigator.permissions.query = (parameters) =>
            parameters.name === 'notifications'
                ? Promise.resolve({ state: Notification.permission })
                : originalQuery(parameters);
    } catch (_) {}
})();
"#;
