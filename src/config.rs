use serde::{Deserialize, Serialize};

use crate::paths::AppPaths;
use crate::retry::ATTEMPTS_PER_ROUND;
use crate::ytdlp::{DOWNLOAD_TIMEOUT_SECS, RESOLVE_TIMEOUT_SECS};
use crate::{EngineError, Result};

/// Knobs for one run. Not persisted; the presentation layer builds this per
/// "Start" action.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub attempts_per_round: u32,
    /// `None` = keep asking for as long as the user grants more rounds.
    pub max_escalation_rounds: Option<u32>,
    pub download_timeout_secs: u64,
    pub resolve_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            attempts_per_round: ATTEMPTS_PER_ROUND,
            max_escalation_rounds: None,
            download_timeout_secs: DOWNLOAD_TIMEOUT_SECS,
            resolve_timeout_secs: RESOLVE_TIMEOUT_SECS,
        }
    }
}

/// Settings the presentation layer persists between sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub download_dir: Option<String>,
    pub cookies_path: Option<String>,
    pub last_url: String,
    pub last_mode: String,
    pub captions_lang: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_dir: None,
            cookies_path: None,
            last_url: String::new(),
            last_mode: "video".to_string(),
            captions_lang: "en".to_string(),
        }
    }
}

pub fn load_settings(paths: &AppPaths) -> Result<Settings> {
    let path = paths.settings_path();
    if !path.exists() {
        return Ok(Settings::default());
    }
    let bytes = std::fs::read(&path)?;
    let parsed: Settings = serde_json::from_slice(&bytes).map_err(|e| {
        EngineError::Config(format!(
            "failed to parse settings at {}: {e}",
            path.to_string_lossy()
        ))
    })?;
    Ok(parsed)
}

pub fn save_settings(paths: &AppPaths, settings: &Settings) -> Result<()> {
    let path = paths.settings_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    std::fs::write(&path, format!("{json}\n"))?;
    Ok(())
}

/// Quality selector menus offered before per-URL formats are loaded.
pub fn default_video_selectors() -> &'static [&'static str] {
    &[
        "best",
        "bestvideo[height<=1080]+bestaudio",
        "bestvideo[height<=720]+bestaudio",
        "worst",
    ]
}

pub fn default_audio_selectors() -> &'static [&'static str] {
    &["bestaudio", "bestaudio[ext=mp3]", "bestaudio/best"]
}

pub fn default_caption_languages() -> &'static [&'static str] {
    &["en", "ar"]
}
