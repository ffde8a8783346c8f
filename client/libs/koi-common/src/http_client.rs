//! Authenticated REST client
//!
//! Behaves like the app's request interceptor:
//! - attaches `Authorization: Bearer <token>`, re-read from local storage per request
//! - shows a success toast when a mutating call returns a `message`
//! - shows an error toast with the server message (or a generic fallback) on failure
//! - on 401 clears the session and calls the unauthorized handler, except for
//!   guest sessions calling allow-listed public endpoints
//! - applies a fixed request timeout; a timeout is an ordinary failure, never retried

use parking_lot::RwLock;
use reqwest::{Client, Method, StatusCode};
use resilience::timeout::{with_timeout_result, TimeoutError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ApiConfig;
use crate::error::{ClientError, Result};
use crate::storage::{LocalStore, SessionStore};
use crate::toast::{Toast, ToastSink};

/// Endpoints a guest may call without being sent to sign-in on 401
pub const DEFAULT_PUBLIC_PATHS: &[&str] = &[
    "/api/v1/koishows",
    "/api/v1/competition-categories",
    "/api/v1/livestreams",
    "/api/v1/votes/results",
];

type UnauthorizedHandler = Arc<dyn Fn() + Send + Sync>;

/// REST client shared by every feature of the app
pub struct ApiClient {
    client: Client,
    base_url: String,
    timeout: Duration,
    store: Arc<dyn LocalStore>,
    toasts: Arc<dyn ToastSink>,
    public_paths: Vec<String>,
    on_unauthorized: RwLock<Option<UnauthorizedHandler>>,
}

impl ApiClient {
    pub fn new(config: &ApiConfig, store: Arc<dyn LocalStore>, toasts: Arc<dyn ToastSink>) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.request_timeout,
            store,
            toasts,
            public_paths: DEFAULT_PUBLIC_PATHS.iter().map(|p| p.to_string()).collect(),
            on_unauthorized: RwLock::new(None),
        }
    }

    pub fn with_public_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.public_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Handler invoked after a 401 cleared the session (navigate to sign-in)
    pub fn set_on_unauthorized<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_unauthorized.write() = Some(Arc::new(handler));
    }

    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        self.send(Method::GET, path, query, None).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let body = serde_json::to_value(body)?;
        self.send(Method::POST, path, &[], Some(body)).await
    }

    pub async fn put<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let body = serde_json::to_value(body)?;
        self.send(Method::PUT, path, &[], Some(body)).await
    }

    pub async fn patch<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let body = serde_json::to_value(body)?;
        self.send(Method::PATCH, path, &[], Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(Method::DELETE, path, &[], None).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.request(method.clone(), &url);

        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(token) = self.store.auth_token() {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        debug!(%method, path, "REST request");

        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        };

        let (status, text) = match with_timeout_result(self.timeout, exchange).await {
            Ok(result) => result,
            Err(TimeoutError::Elapsed(duration)) => {
                return Err(self.fail(ClientError::Timeout(duration)));
            }
            Err(TimeoutError::OperationFailed(e)) if e.is_timeout() => {
                return Err(self.fail(ClientError::Timeout(self.timeout)));
            }
            Err(TimeoutError::OperationFailed(e)) => {
                return Err(self.fail(ClientError::Transport(e.to_string())));
            }
        };

        let payload: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        if status == StatusCode::UNAUTHORIZED {
            return Err(self.handle_unauthorized(path));
        }

        if !status.is_success() {
            let message = extract_message(&payload);
            warn!(%method, path, status = status.as_u16(), "REST request failed");
            return Err(self.fail(ClientError::Http {
                status: status.as_u16(),
                message,
            }));
        }

        if is_mutating(&method) {
            if let Some(message) = extract_message(&payload) {
                self.toasts.show(Toast::success("Success", message));
            }
        }

        let data = match payload {
            Value::Object(mut map) if map.contains_key("data") => {
                map.remove("data").unwrap_or(Value::Null)
            }
            other => other,
        };

        Ok(serde_json::from_value(data)?)
    }

    fn handle_unauthorized(&self, path: &str) -> ClientError {
        if self.store.is_guest() && self.is_public(path) {
            debug!(path, "401 on public endpoint in guest mode, not redirecting");
            return ClientError::Unauthorized;
        }

        info!(path, "Session rejected, clearing stored credentials");
        if let Err(e) = self.store.clear_session() {
            warn!(error = %e, "Failed to clear session");
        }

        let handler = self.on_unauthorized.read().clone();
        if let Some(handler) = handler {
            handler();
        }

        self.fail(ClientError::Unauthorized)
    }

    fn is_public(&self, path: &str) -> bool {
        self.public_paths.iter().any(|p| path.starts_with(p.as_str()))
    }

    fn fail(&self, error: ClientError) -> ClientError {
        self.toasts.show(Toast::error("Error", error.user_message()));
        error
    }
}

fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn extract_message(payload: &Value) -> Option<String> {
    payload
        .get("message")
        .and_then(Value::as_str)
        .filter(|m| !m.trim().is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_message() {
        assert_eq!(
            extract_message(&json!({"message": "Voted"})).as_deref(),
            Some("Voted")
        );
        assert_eq!(extract_message(&json!({"message": ""})), None);
        assert_eq!(extract_message(&json!([1, 2])), None);
    }

    #[test]
    fn test_mutating_methods() {
        assert!(is_mutating(&Method::POST));
        assert!(is_mutating(&Method::DELETE));
        assert!(!is_mutating(&Method::GET));
    }
}
