use crate::error::{ClientError, Result};
use resilience::RetryConfig;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api: ApiConfig,
    pub realtime: RealtimeConfig,
    pub feed: FeedConfig,
    /// Location of the device-local key-value store
    pub store_path: PathBuf,
    pub toasts_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    /// Fixed per-request timeout
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub hub_url: String,
    pub socket_url: String,
    /// Backoff shared by the hub's automatic reconnect and the fallback timer
    pub reconnect: RetryConfig,
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub page_size: u32,
    /// How long a read item stays visible under the unread filter
    pub read_transition_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                base_url: "http://localhost:5000".to_string(),
                request_timeout: Duration::from_secs(15),
            },
            realtime: RealtimeConfig {
                hub_url: "ws://localhost:5000/notificationHub".to_string(),
                socket_url: "ws://localhost:5001".to_string(),
                reconnect: RetryConfig::default(),
            },
            feed: FeedConfig {
                page_size: 10,
                read_transition_delay: Duration::from_millis(500),
            },
            store_path: PathBuf::from(".koi/session.json"),
            toasts_enabled: true,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        Ok(ClientConfig {
            api: ApiConfig {
                base_url: env::var("KOI_API_BASE_URL").unwrap_or(defaults.api.base_url),
                request_timeout: Duration::from_millis(parse_var(
                    "KOI_REQUEST_TIMEOUT_MS",
                    defaults.api.request_timeout.as_millis() as u64,
                )?),
            },
            realtime: RealtimeConfig {
                hub_url: env::var("KOI_HUB_URL").unwrap_or(defaults.realtime.hub_url),
                socket_url: env::var("KOI_SOCKET_URL").unwrap_or(defaults.realtime.socket_url),
                reconnect: RetryConfig {
                    max_retries: parse_var(
                        "KOI_RECONNECT_MAX_ATTEMPTS",
                        defaults.realtime.reconnect.max_retries,
                    )?,
                    initial_backoff: Duration::from_millis(parse_var(
                        "KOI_RECONNECT_BASE_MS",
                        defaults.realtime.reconnect.initial_backoff.as_millis() as u64,
                    )?),
                    max_backoff: Duration::from_millis(parse_var(
                        "KOI_RECONNECT_CAP_MS",
                        defaults.realtime.reconnect.max_backoff.as_millis() as u64,
                    )?),
                    ..defaults.realtime.reconnect
                },
            },
            feed: FeedConfig {
                page_size: parse_var("KOI_PAGE_SIZE", defaults.feed.page_size)?,
                read_transition_delay: Duration::from_millis(parse_var(
                    "KOI_READ_TRANSITION_DELAY_MS",
                    defaults.feed.read_transition_delay.as_millis() as u64,
                )?),
            },
            store_path: env::var("KOI_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.store_path),
            toasts_enabled: parse_var("KOI_TOASTS_ENABLED", defaults.toasts_enabled)?,
        })
    }
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ClientError::Config(format!("{} must be valid: {}", key, e))),
        Err(_) => Ok(default),
    }
}
