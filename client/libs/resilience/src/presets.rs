/// Preset configurations for the client's remote boundaries
use crate::retry::RetryConfig;
use crate::timeout::TimeoutConfig;
use std::time::Duration;

/// Configuration bundle for a remote boundary
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub timeout: TimeoutConfig,
    pub retry: Option<RetryConfig>,
}

/// Notification hub (primary realtime boundary)
///
/// - Timeout: 15s for the connect + handshake
/// - Retry: 5 attempts, 1s doubling, capped at 30s
pub fn hub_config() -> ServiceConfig {
    ServiceConfig {
        timeout: TimeoutConfig {
            duration: Duration::from_secs(15),
        },
        retry: Some(RetryConfig {
            max_retries: 5,
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: false,
        }),
    }
}

/// Domain event socket (secondary realtime boundary)
///
/// - Timeout: 20s for the engine handshake
/// - Retry: 5 attempts, 1s doubling, capped at 5s
pub fn event_socket_config() -> ServiceConfig {
    ServiceConfig {
        timeout: TimeoutConfig {
            duration: Duration::from_secs(20),
        },
        retry: Some(RetryConfig {
            max_retries: 5,
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: false,
        }),
    }
}

/// REST API
///
/// - Timeout: 15s fixed request timeout
/// - No retry (a timeout is surfaced as a normal failure)
pub fn rest_config() -> ServiceConfig {
    ServiceConfig {
        timeout: TimeoutConfig {
            duration: Duration::from_secs(15),
        },
        retry: None,
    }
}
