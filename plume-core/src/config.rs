use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PlumeConfig {
    pub system: SystemSection,
    pub paths: PathsSection,
    pub session: SessionSection,
    pub login: LoginSection,
    pub retry: RetrySection,
    pub observability: ObservabilitySection,
}

impl PlumeConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemSection {
    pub node_name: String,
    pub environment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    pub data_dir: String,
    pub profile_dir: String,
    pub logs_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    /// Records older than this are treated as unusable regardless of probe outcome.
    pub max_age_days: i64,
    pub backup_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginSection {
    pub interactive_timeout_seconds: u64,
    pub poll_interval_seconds: u64,
    pub probe_timeout_seconds: u64,
    pub capture_qr: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    pub max_attempts: usize,
    pub backoff_schedule_ms: Vec<u64>,
    pub jitter_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilitySection {
    pub failure_log: String,
    pub metrics_db: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    pub chromium: ChromiumSection,
    pub flags: FlagsSection,
    pub user_agents: UserAgentSection,
    pub viewport: ViewportSection,
    pub human_simulation: HumanSimulationSection,
    pub fingerprint: FingerprintSection,
    pub engine: EngineSection,
    pub platforms: BTreeMap<String, PlatformSection>,
}

impl BrowserConfig {
    pub fn platform(&self, id: &str) -> Result<&PlatformSection> {
        self.platforms
            .get(id)
            .ok_or_else(|| ConfigError::UnknownPlatform(id.to_string()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChromiumSection {
    pub executable_path: Option<String>,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub request_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlagsSection {
    pub no_first_run: bool,
    pub disable_automation_controlled: bool,
    pub disable_blink_features: Vec<String>,
    pub mute_audio: bool,
    pub lang: Option<String>,
    pub accept_language: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentSection {
    pub pool: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViewportSection {
    pub resolutions: Vec<[u32; 2]>,
    pub jitter_pixels: u32,
    pub device_scale_factor: [f32; 2],
}

#[derive(Debug, Clone, Deserialize)]
pub struct HumanSimulationSection {
    pub typing_cadence_cpm: [u32; 2],
    pub typing_jitter_ms: [u32; 2],
    pub click_hesitation_ms: [u32; 2],
    pub scroll_pause_ms: [u32; 2],
    pub navigation_jitter_ms: [u32; 2],
}

#[derive(Debug, Clone, Deserialize)]
pub struct FingerprintSection {
    pub enable_canvas_noise: bool,
    pub enable_webgl_mask: bool,
    pub enable_audio_mask: bool,
    pub canvas_noise_range: [i32; 2],
    pub audio_noise: f64,
    pub webgl_vendor: Option<String>,
    pub webgl_renderer: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    /// Attempts granted to each resolution strategy before moving down the ladder.
    pub strategy_attempts: usize,
    /// Relative document offsets visited by the progressive scroll strategy.
    pub scroll_stops: Vec<f64>,
    pub selector_timeout_seconds: u64,
    pub settle_delay_ms: [u64; 2],
}

/// Selector tables for one target platform. The UI ships no stable contract,
/// so every entry is an ordered ladder rather than a single selector.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformSection {
    pub home_url: String,
    pub search_url: String,
    pub creator_url: Option<String>,
    /// Visible only when the session is not authenticated.
    pub login_indicator_text: String,
    pub login_button_selectors: Vec<String>,
    pub qr_image_selectors: Vec<String>,
    /// URLs for content pages must carry this query parameter to be routable.
    pub access_token_param: Option<String>,
    pub targets: TargetTables,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetTables {
    pub comment_input: TargetEntry,
    pub submit_control: TargetEntry,
    pub comment_area: TargetEntry,
    pub more_comments: TargetEntry,
    pub comment_item: TargetEntry,
    pub search_input: TargetEntry,
    pub title_input: TargetEntry,
    pub body_editor: TargetEntry,
    pub publish_control: TargetEntry,
    pub media_tab_image: TargetEntry,
    pub media_tab_video: TargetEntry,
    pub file_input: TargetEntry,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TargetEntry {
    #[serde(default)]
    pub selectors: Vec<String>,
    #[serde(default)]
    pub phrases: Vec<String>,
    /// Matches above this document-relative y offset are rejected; keeps a
    /// page-top search bar from masquerading as a comment box.
    #[serde(default)]
    pub min_y: Option<f64>,
    /// Clicked first when the editable element only appears after an
    /// affordance is activated.
    #[serde(default)]
    pub trigger_selectors: Vec<String>,
    #[serde(default)]
    pub fallback_script: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConfigBundle {
    pub plume: PlumeConfig,
    pub browser: BrowserConfig,
}

impl ConfigBundle {
    pub fn from_directory<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let plume = load_plume_config(dir.join("plume.toml"))?;
        let browser = load_browser_config(dir.join("browser.toml"))?;
        Ok(Self { plume, browser })
    }
}

pub fn load_plume_config<P: AsRef<Path>>(path: P) -> Result<PlumeConfig> {
    load_toml(path)
}

pub fn load_browser_config<P: AsRef<Path>>(path: P) -> Result<BrowserConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_configs() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs");
        let bundle = ConfigBundle::from_directory(dir).expect("configs should parse");
        assert_eq!(bundle.plume.system.node_name, "plume-primary");
        assert_eq!(bundle.plume.session.max_age_days, 30);
        assert!(bundle.browser.user_agents.pool.len() >= 2);
        let rednote = bundle.browser.platform("rednote").unwrap();
        assert!(!rednote.targets.comment_input.selectors.is_empty());
        assert!(bundle.browser.platform("nope").is_err());
    }

    #[test]
    fn resolve_path_keeps_absolute() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs");
        let bundle = ConfigBundle::from_directory(dir).unwrap();
        assert_eq!(
            bundle.plume.resolve_path("/tmp/x"),
            PathBuf::from("/tmp/x")
        );
        assert!(bundle
            .plume
            .resolve_path("sessions")
            .ends_with("sessions"));
    }
}
