use serde::Deserialize;
use std::time::Duration;

use crate::services::fallback::FallbackConfig;
use crate::services::poller::PollConfig;
use crate::services::prepare::PrepareConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Base URL of the EatFit24 API (e.g., "https://eatfit24.ru/api/v1")
    pub api_base_url: String,

    /// Telegram WebApp init data used as the request credential
    #[serde(default)]
    pub telegram_init_data: Option<String>,

    /// Telegram user id for the backend's debug authentication mode
    #[serde(default)]
    pub debug_telegram_id: Option<i64>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_poll_initial_delay_ms")]
    pub poll_initial_delay_ms: u64,

    #[serde(default = "default_poll_backoff_factor")]
    pub poll_backoff_factor: f64,

    #[serde(default = "default_poll_max_delay_ms")]
    pub poll_max_delay_ms: u64,

    #[serde(default = "default_poll_max_duration_secs")]
    pub poll_max_duration_secs: u64,

    #[serde(default = "default_poll_max_network_retries")]
    pub poll_max_network_retries: u32,

    #[serde(default = "default_fallback_base_delay_ms")]
    pub fallback_base_delay_ms: u64,

    #[serde(default = "default_fallback_max_attempts")]
    pub fallback_max_attempts: u32,

    /// Longest photo edge after compression, in pixels
    #[serde(default = "default_max_image_dimension")]
    pub max_image_dimension: u32,

    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Prometheus exporter bind address (e.g., "127.0.0.1:9100"). Disabled when unset.
    #[serde(default)]
    pub metrics_bind_addr: Option<String>,
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_poll_initial_delay_ms() -> u64 {
    1000
}

fn default_poll_backoff_factor() -> f64 {
    1.5
}

fn default_poll_max_delay_ms() -> u64 {
    5000
}

fn default_poll_max_duration_secs() -> u64 {
    60
}

fn default_poll_max_network_retries() -> u32 {
    3
}

fn default_fallback_base_delay_ms() -> u64 {
    1000
}

fn default_fallback_max_attempts() -> u32 {
    3
}

fn default_max_image_dimension() -> u32 {
    1920
}

fn default_jpeg_quality() -> u8 {
    85
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            initial_delay: Duration::from_millis(self.poll_initial_delay_ms),
            backoff_factor: self.poll_backoff_factor,
            max_delay: Duration::from_millis(self.poll_max_delay_ms),
            max_duration: Duration::from_secs(self.poll_max_duration_secs),
            max_network_retries: self.poll_max_network_retries,
        }
    }

    pub fn fallback_config(&self) -> FallbackConfig {
        FallbackConfig {
            base_delay: Duration::from_millis(self.fallback_base_delay_ms),
            max_attempts: self.fallback_max_attempts,
        }
    }

    pub fn prepare_config(&self) -> PrepareConfig {
        PrepareConfig {
            max_dimension: self.max_image_dimension,
            jpeg_quality: self.jpeg_quality.clamp(1, 100),
            max_upload_bytes: self.max_upload_bytes,
        }
    }
}
