use std::ops::RangeInclusive;
use std::time::Duration;

use rand::rngs::ThreadRng;
use rand::{thread_rng, Rng};
use tokio::time::sleep;

use chromiumoxide::element::Element;
use chromiumoxide::page::Page;

use crate::config::HumanSimulationSection;

use super::error::{BrowserError, BrowserResult};

/// Paces every simulated interaction. Uniform timing is the cheapest
/// automation signature to detect, so each wait draws from a configured range.
#[derive(Debug)]
pub struct HumanPacer {
    config: HumanSimulationSection,
    rng: ThreadRng,
}

impl HumanPacer {
    pub fn new(config: HumanSimulationSection) -> Self {
        Self {
            config,
            rng: thread_rng(),
        }
    }

    /// Settle delay after navigation, before the page is touched.
    pub async fn navigation_settle(&mut self) {
        let delay = self.random_duration(self.config.navigation_jitter_ms);
        sleep(delay).await;
    }

    pub async fn click_element(&mut self, element: &Element) -> BrowserResult<()> {
        let hesitation = self.random_duration(self.config.click_hesitation_ms);
        sleep(hesitation).await;
        element
            .click()
            .await
            .map_err(|err| BrowserError::Unexpected(format!("failed to click element: {err}")))?;
        Ok(())
    }

    /// Character-by-character entry. Bulk insertion is silently dropped by
    /// some anti-bot defenses, so there is no paste path.
    pub async fn type_text(&mut self, element: &Element, text: &str) -> BrowserResult<()> {
        element.click().await.map_err(|err| {
            BrowserError::Unexpected(format!("failed to focus element before typing: {err}"))
        })?;
        for ch in text.chars() {
            element.type_str(ch.to_string()).await.map_err(|err| {
                BrowserError::Unexpected(format!("failed to type character: {err}"))
            })?;
            sleep(self.typing_delay()).await;
        }
        Ok(())
    }

    pub async fn scroll_by(&mut self, page: &Page, delta: f64) -> BrowserResult<()> {
        let pause = self.random_duration(self.config.scroll_pause_ms);
        let js = format!("window.scrollBy({{ top: {delta}, behavior: 'smooth' }});");
        page.evaluate(js.as_str()).await.map_err(|err| {
            BrowserError::Unexpected(format!("failed to execute scroll script: {err}"))
        })?;
        sleep(pause).await;
        Ok(())
    }

    fn typing_delay(&mut self) -> Duration {
        let cadence_range = RangeInclusive::new(
            self.config.typing_cadence_cpm[0],
            self.config.typing_cadence_cpm[1],
        );
        let cadence = self.rng.gen_range(cadence_range).max(60) as f64;
        let base_delay = 60.0 / cadence;
        let jitter_range = RangeInclusive::new(
            self.config.typing_jitter_ms[0],
            self.config.typing_jitter_ms[1],
        );
        let jitter_ms = self.rng.gen_range(jitter_range);
        Duration::from_secs_f64(base_delay + jitter_ms as f64 / 1000.0)
    }

    fn random_duration(&mut self, bounds: [u32; 2]) -> Duration {
        let lo = bounds[0].min(bounds[1]);
        let hi = bounds[0].max(bounds[1]);
        Duration::from_millis(self.rng.gen_range(lo..=hi) as u64)
    }
}
