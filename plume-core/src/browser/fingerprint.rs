use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::page::Page;
use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::FingerprintSection;

use super::error::{BrowserError, BrowserResult};

/// Injects fingerprint-mask scripts on every new document. Noise parameters
/// derive from the session's fingerprint seed so the masked identity stays
/// stable for the lifetime of a persisted session instead of shifting on
/// every launch, which is itself a detection signal.
#[derive(Debug, Clone)]
pub struct FingerprintMasker {
    config: FingerprintSection,
    seed: u64,
}

impl FingerprintMasker {
    pub fn new(config: FingerprintSection, seed: u64) -> Self {
        Self { config, seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub async fn apply(&self, page: &Page) -> BrowserResult<()> {
        if self.config.enable_canvas_noise {
            self.inject_canvas_noise(page).await?;
        }
        if self.config.enable_webgl_mask {
            self.mask_webgl(page).await?;
        }
        if self.config.enable_audio_mask {
            self.mask_audio_context(page).await?;
        }
        Ok(())
    }

    async fn inject_canvas_noise(&self, page: &Page) -> BrowserResult<()> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let lo = self.config.canvas_noise_range[0];
        let hi = self.config.canvas_noise_range[1];
        let delta = if lo >= hi { lo } else { rng.gen_range(lo..=hi) };
        let script = format!(
            r#"
            (() => {{
                const delta = {delta};
                const originalToDataURL = HTMLCanvasElement.prototype.toDataURL;
                HTMLCanvasElement.prototype.toDataURL = function() {{
                    try {{
                        const ctx = this.getContext('2d');
                        if (ctx) {{
                            const imageData = ctx.getImageData(0, 0, this.width, this.height);
                            for (let i = 0; i < imageData.data.length; i += 4) {{
                                imageData.data[i] = Math.min(255, Math.max(0, imageData.data[i] + delta));
                            }}
                            ctx.putImageData(imageData, 0, 0);
                        }}
                    }} catch (_) {{}}
                    return originalToDataURL.apply(this, arguments);
                }};
            }})();
            "#
        );
        inject(page, script).await
    }

    async fn mask_webgl(&self, page: &Page) -> BrowserResult<()> {
        let vendor = self
            .config
            .webgl_vendor
            .clone()
            .unwrap_or_else(|| "Intel Inc.".to_string());
        let renderer = self
            .config
            .webgl_renderer
            .clone()
            .unwrap_or_else(|| "Intel Iris OpenGL Engine".to_string());
        let script = format!(
            r#"
            (() => {{
                const spoofParam = (proto) => {{
                    if (!proto || !proto.getParameter) {{
                        return;
                    }}
                    const original = proto.getParameter;
                    proto.getParameter = function(param) {{
                        if (param === 37445) {{
                            return '{vendor}';
                        }}
                        if (param === 37446) {{
                            return '{renderer}';
                        }}
                        return original.apply(this, arguments);
                    }};
                }};
                spoofParam(WebGLRenderingContext?.prototype);
                spoofParam(WebGL2RenderingContext?.prototype);
            }})();
            "#
        );
        inject(page, script).await
    }

    async fn mask_audio_context(&self, page: &Page) -> BrowserResult<()> {
        let noise = self.config.audio_noise;
        let script = format!(
            r#"
            (() => {{
                const noiseLevel = {noise};
                const origGetChannelData = AudioBuffer?.prototype?.getChannelData;
                if (!origGetChannelData) {{
                    return;
                }}
                AudioBuffer.prototype.getChannelData = function(channel) {{
                    const data = origGetChannelData.call(this, channel);
                    if (data) {{
                        for (let i = 0; i < data.length; i++) {{
                            data[i] = data[i] + (Math.random() * noiseLevel - noiseLevel / 2);
                        }}
                    }}
                    return data;
                }};
            }})();
            "#
        );
        inject(page, script).await
    }
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
