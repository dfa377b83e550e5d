//! Bearer credentials for the Spotify Web API.
//!
//! The authorization-code exchange happens elsewhere; this module starts from
//! an issued access token and, when a refresh token and client credentials
//! are available, keeps it fresh from a background timer thread.
//!
//! Readers get a copy of the token string, so a refresh never races with a
//! request that is already in flight.

use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{after, bounded, select, Sender};
use log::{info, warn};
use serde::Deserialize;

use crate::error::{LoaderError, Result};
use crate::transport::{ApiRequest, ApiResponse, Method, Transport};

/// Refresh this long before the token expires.
const REFRESH_MARGIN: Duration = Duration::from_secs(30);

/// Delay before retrying a failed background refresh.
const REFRESH_RETRY: Duration = Duration::from_secs(30);

/// Lifetime assumed when the accounts service omits `expires_in`.
const FALLBACK_LIFETIME: Duration = Duration::from_secs(3600);

pub trait CredentialProvider: Send + Sync {
    /// Current bearer token, valid for at least the next request.
    fn bearer_token(&self) -> Result<String>;
}

// ============================================================================
// Static Token
// ============================================================================

/// Fixed token with no refresh capability.
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl CredentialProvider for StaticToken {
    fn bearer_token(&self) -> Result<String> {
        if self.token.is_empty() {
            return Err(LoaderError::NoCredential);
        }
        Ok(self.token.clone())
    }
}

// ============================================================================
// Refreshing Credentials
// ============================================================================

/// Application credentials used with the `refresh_token` grant.
#[derive(Clone, Debug)]
pub struct RefreshSettings {
    pub accounts_url: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug)]
struct TokenState {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<Instant>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64, // seconds
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

struct Shared {
    state: RwLock<TokenState>,
    transport: Arc<dyn Transport>,
    settings: RefreshSettings,
}

impl Shared {
    fn refresh(&self) -> Result<Duration> {
        let refresh_token = self
            .state
            .read()
            .map_err(|_| LoaderError::NoCredential)?
            .refresh_token
            .clone()
            .ok_or(LoaderError::NoCredential)?;

        let request = ApiRequest::new(Method::Post, self.settings.accounts_url.as_str())
            .form("grant_type", "refresh_token")
            .form("refresh_token", refresh_token)
            .form("client_id", self.settings.client_id.as_str())
            .form("client_secret", self.settings.client_secret.as_str());
        let response = self.transport.send(&request)?;
        let token = parse_token_response(&response)?;

        let expires_in = Duration::from_secs(token.expires_in);
        let mut state = self
            .state
            .write()
            .map_err(|_| LoaderError::TokenRefresh("token state poisoned".to_string()))?;
        state.access_token = token.access_token;
        // Spotify only sometimes rotates the refresh token.
        if let Some(rotated) = token.refresh_token {
            state.refresh_token = Some(rotated);
        }
        state.expires_at = expiry_from(expires_in);
        Ok(expires_in)
    }

    /// Refreshes and returns the delay until the next scheduled refresh.
    fn refresh_and_schedule(&self) -> Result<Duration> {
        let expires_in = self.refresh()?;
        if expires_in.is_zero() {
            return Ok(refresh_delay(FALLBACK_LIFETIME));
        }
        Ok(refresh_delay(expires_in))
    }
}

fn parse_token_response(response: &ApiResponse) -> Result<TokenResponse> {
    if let Ok(err) = serde_json::from_str::<TokenErrorResponse>(&response.body) {
        let message = match err.error_description {
            Some(description) => format!("{}: {}", err.error, description),
            None => err.error,
        };
        return Err(LoaderError::TokenRefresh(message));
    }
    if !response.is_success() {
        return Err(LoaderError::TokenRefresh(format!(
            "accounts service returned {}",
            response.status
        )));
    }
    serde_json::from_str(&response.body).map_err(|source| LoaderError::Decode {
        context: "token response".to_string(),
        source,
    })
}

fn expiry_from(expires_in: Duration) -> Option<Instant> {
    if expires_in.is_zero() {
        None
    } else {
        Some(Instant::now() + expires_in)
    }
}

fn refresh_delay(expires_in: Duration) -> Duration {
    expires_in
        .saturating_sub(REFRESH_MARGIN)
        .max(Duration::from_secs(1))
}

/// Access token kept fresh by a background timer.
///
/// Dropping the value stops the timer thread.
pub struct RefreshingCredentials {
    shared: Arc<Shared>,
    shutdown: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl RefreshingCredentials {
    /// Starts the refresh timer. An `expires_in` of zero means the lifetime is
    /// unknown; the token is refreshed immediately.
    pub fn start(
        transport: Arc<dyn Transport>,
        settings: RefreshSettings,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_in: Duration,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: RwLock::new(TokenState {
                access_token: access_token.into(),
                refresh_token: Some(refresh_token.into()),
                expires_at: expiry_from(expires_in),
            }),
            transport,
            settings,
        });

        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let timer_shared = Arc::clone(&shared);
        let first_delay = if expires_in.is_zero() {
            Duration::ZERO
        } else {
            refresh_delay(expires_in)
        };

        let worker = std::thread::spawn(move || {
            let mut delay = first_delay;
            loop {
                select! {
                    recv(shutdown_rx) -> _ => break,
                    recv(after(delay)) -> _ => {
                        info!("Refreshing auth token");
                        delay = match timer_shared.refresh_and_schedule() {
                            Ok(next) => next,
                            Err(err) => {
                                warn!("Token refresh failed, retrying in {:?}: {}", REFRESH_RETRY, err);
                                REFRESH_RETRY
                            }
                        };
                    }
                }
            }
        });

        Self {
            shared,
            shutdown: Some(shutdown_tx),
            worker: Some(worker),
        }
    }

    /// Refreshes synchronously, independent of the timer.
    pub fn refresh_now(&self) -> Result<()> {
        self.shared.refresh().map(|_| ())
    }
}

impl CredentialProvider for RefreshingCredentials {
    fn bearer_token(&self) -> Result<String> {
        let expired = {
            let state = self
                .shared
                .state
                .read()
                .map_err(|_| LoaderError::NoCredential)?;
            state.expires_at.is_some_and(|at| Instant::now() >= at)
        };
        // Timer may be late (e.g. after a suspend); never hand out a dead token.
        if expired {
            self.shared.refresh()?;
        }

        let state = self
            .shared
            .state
            .read()
            .map_err(|_| LoaderError::NoCredential)?;
        if state.access_token.is_empty() {
            return Err(LoaderError::NoCredential);
        }
        Ok(state.access_token.clone())
    }
}

impl Drop for RefreshingCredentials {
    fn drop(&mut self) {
        // Disconnecting the channel wakes the timer thread.
        self.shutdown.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeAccounts {
        responses: Mutex<Vec<ApiResponse>>,
        requests: Mutex<Vec<ApiRequest>>,
    }

    impl FakeAccounts {
        fn new(responses: Vec<ApiResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    impl Transport for FakeAccounts {
        fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
            self.requests.lock().unwrap().push(request.clone());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(LoaderError::Transport("no response scripted".to_string()));
            }
            Ok(responses.remove(0))
        }
    }

    fn settings() -> RefreshSettings {
        RefreshSettings {
            accounts_url: "https://accounts.test/api/token".to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
        }
    }

    fn ok(body: &str) -> ApiResponse {
        ApiResponse {
            status: 200,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_static_token() {
        assert_eq!(StaticToken::new("abc").bearer_token().unwrap(), "abc");
        assert!(matches!(
            StaticToken::new("").bearer_token(),
            Err(LoaderError::NoCredential)
        ));
    }

    #[test]
    fn test_refresh_now_replaces_token() {
        let accounts = FakeAccounts::new(vec![ok(
            r#"{"access_token":"fresh","expires_in":3600,"refresh_token":"rotated"}"#,
        )]);
        let creds = RefreshingCredentials::start(
            accounts.clone(),
            settings(),
            "stale",
            "refresh-1",
            Duration::from_secs(3600),
        );

        assert_eq!(creds.bearer_token().unwrap(), "stale");
        creds.refresh_now().unwrap();
        assert_eq!(creds.bearer_token().unwrap(), "fresh");

        let requests = accounts.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::Post);
        assert!(requests[0]
            .form
            .contains(&("grant_type".to_string(), "refresh_token".to_string())));
        assert!(requests[0]
            .form
            .contains(&("refresh_token".to_string(), "refresh-1".to_string())));
        drop(requests);

        let state = creds.shared.state.read().unwrap();
        assert_eq!(state.refresh_token.as_deref(), Some("rotated"));
    }

    #[test]
    fn test_refresh_error_body() {
        let accounts = FakeAccounts::new(vec![ApiResponse {
            status: 400,
            body: r#"{"error":"invalid_grant","error_description":"Refresh token revoked"}"#
                .to_string(),
        }]);
        let creds = RefreshingCredentials::start(
            accounts,
            settings(),
            "stale",
            "refresh-1",
            Duration::from_secs(3600),
        );

        let err = creds.refresh_now().unwrap_err();
        assert!(matches!(err, LoaderError::TokenRefresh(ref m) if m == "invalid_grant: Refresh token revoked"));
        // Failed refresh keeps the previous token.
        assert_eq!(creds.bearer_token().unwrap(), "stale");
    }

    #[test]
    fn test_timer_refreshes_unknown_lifetime_immediately() {
        let accounts = FakeAccounts::new(vec![ok(
            r#"{"access_token":"fresh","expires_in":3600}"#,
        )]);
        let creds = RefreshingCredentials::start(
            accounts.clone(),
            settings(),
            "initial",
            "refresh-1",
            Duration::ZERO,
        );

        let deadline = Instant::now() + Duration::from_secs(5);
        while creds.bearer_token().unwrap() != "fresh" {
            assert!(Instant::now() < deadline, "timer never refreshed");
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(accounts.requests.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_lifetime_uses_fallback_schedule() {
        let accounts = FakeAccounts::new(vec![ok(r#"{"access_token":"fresh"}"#)]);
        let creds = RefreshingCredentials::start(
            accounts.clone(),
            settings(),
            "initial",
            "refresh-1",
            Duration::from_secs(3600),
        );

        let next = creds.shared.refresh_and_schedule().unwrap();
        assert_eq!(next, Duration::from_secs(3570));
        assert_eq!(creds.bearer_token().unwrap(), "fresh");
        // Unknown lifetime never triggers an inline refresh.
        assert_eq!(creds.shared.state.read().unwrap().expires_at, None);
        assert_eq!(accounts.requests.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_refresh_delay_margin() {
        assert_eq!(refresh_delay(Duration::from_secs(3600)), Duration::from_secs(3570));
        assert_eq!(refresh_delay(Duration::from_secs(10)), Duration::from_secs(1));
    }
}
