// App config (`edu_chat_config.json` in the data dir) + env overrides.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub(super) const CONFIG_FILE_NAME: &str = "edu_chat_config.json";

const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;
const DEFAULT_SEND_FOLLOW_UP_DELAYS_MS: [u64; 2] = [1_000, 3_000];
const DEFAULT_REACTION_FOLLOW_UP_DELAYS_MS: [u64; 3] = [500, 1_500, 3_000];
const DEFAULT_NEAR_BOTTOM_THRESHOLD_PX: f64 = 100.0;
const DEFAULT_REACTION_OVERLAY_TTL_MS: i64 = 15_000;
const DEFAULT_ECHO_MATCH_WINDOW_MS: i64 = 120_000;
const DEFAULT_TOAST_DISMISS_MS: u64 = 4_000;
// Below this the poller would hammer the server faster than a typical round trip.
const MIN_POLL_INTERVAL_MS: u64 = 250;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub(crate) struct AppConfig {
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub send_follow_up_delays_ms: Option<Vec<u64>>,
    #[serde(default)]
    pub reaction_follow_up_delays_ms: Option<Vec<u64>>,
    #[serde(default)]
    pub near_bottom_threshold_px: Option<f64>,
    #[serde(default)]
    pub reaction_overlay_ttl_ms: Option<i64>,
    #[serde(default)]
    pub echo_match_window_ms: Option<i64>,
    #[serde(default)]
    pub toast_dismiss_ms: Option<u64>,
}

impl AppConfig {
    pub(crate) fn api_base_url(&self) -> Option<String> {
        if let Ok(url) = std::env::var("EDU_CHAT_API_URL") {
            let url = url.trim();
            if !url.is_empty() {
                return Some(url.trim_end_matches('/').to_string());
            }
        }
        self.api_base_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.trim_end_matches('/').to_string())
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        let from_env = std::env::var("EDU_CHAT_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok());
        let ms = from_env
            .or(self.poll_interval_ms)
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS)
            .max(MIN_POLL_INTERVAL_MS);
        Duration::from_millis(ms)
    }

    pub(crate) fn send_follow_up_delays(&self) -> Vec<Duration> {
        self.send_follow_up_delays_ms
            .clone()
            .unwrap_or_else(|| DEFAULT_SEND_FOLLOW_UP_DELAYS_MS.to_vec())
            .into_iter()
            .map(Duration::from_millis)
            .collect()
    }

    pub(crate) fn reaction_follow_up_delays(&self) -> Vec<Duration> {
        self.reaction_follow_up_delays_ms
            .clone()
            .unwrap_or_else(|| DEFAULT_REACTION_FOLLOW_UP_DELAYS_MS.to_vec())
            .into_iter()
            .map(Duration::from_millis)
            .collect()
    }

    pub(crate) fn near_bottom_threshold_px(&self) -> f64 {
        self.near_bottom_threshold_px
            .filter(|v| v.is_finite() && *v >= 0.0)
            .unwrap_or(DEFAULT_NEAR_BOTTOM_THRESHOLD_PX)
    }

    pub(crate) fn reaction_overlay_ttl_ms(&self) -> i64 {
        self.reaction_overlay_ttl_ms
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_REACTION_OVERLAY_TTL_MS)
    }

    pub(crate) fn echo_match_window_ms(&self) -> i64 {
        self.echo_match_window_ms
            .filter(|v| *v >= 0)
            .unwrap_or(DEFAULT_ECHO_MATCH_WINDOW_MS)
    }

    pub(crate) fn toast_dismiss(&self) -> Duration {
        Duration::from_millis(self.toast_dismiss_ms.unwrap_or(DEFAULT_TOAST_DISMISS_MS))
    }
}

pub(crate) fn load_app_config(data_dir: &str) -> AppConfig {
    let path = Path::new(data_dir).join(CONFIG_FILE_NAME);
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(_) => return AppConfig::default(),
    };
    match serde_json::from_str::<AppConfig>(&raw) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(%e, path = %path.display(), "invalid app config; using defaults");
            AppConfig::default()
        }
    }
}
