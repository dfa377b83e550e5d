//! HTTP transport seam.
//!
//! The Spotify client and the token refresher only see [`Transport`]; the
//! production implementation is a blocking `ureq` agent.

use std::time::Duration;

use log::debug;

use crate::config::LoaderConfig;
use crate::error::{LoaderError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
        }
    }
}

/// One outgoing request. The bearer token is captured by value at call time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub bearer: Option<String>,
    /// `application/x-www-form-urlencoded` body, used by the accounts service.
    pub form: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            bearer: None,
            form: Vec::new(),
        }
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn bearer(mut self, token: String) -> Self {
        self.bearer = Some(token);
        self
    }

    pub fn form(mut self, key: &str, value: impl Into<String>) -> Self {
        self.form.push((key.to_string(), value.into()));
        self
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Status and raw body. Non-success statuses are responses, not errors, so
/// callers can decode the remote error payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub trait Transport: Send + Sync {
    fn send(&self, request: &ApiRequest) -> Result<ApiResponse>;
}

/// Transport backed by `ureq`.
pub struct UreqTransport {
    http_client: ureq::Agent,
}

impl UreqTransport {
    pub fn new(config: &LoaderConfig) -> Self {
        Self::with_timeouts(config.connect_timeout, config.read_timeout)
    }

    pub fn with_timeouts(connect: Duration, read: Duration) -> Self {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(connect)
            .timeout_read(read)
            .timeout_write(read)
            .build();
        Self { http_client }
    }
}

impl Transport for UreqTransport {
    fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        debug!("API {} {}", request.method.as_str(), request.url);

        let mut call = self
            .http_client
            .request(request.method.as_str(), &request.url);
        for (key, value) in &request.query {
            call = call.query(key, value);
        }
        if let Some(token) = &request.bearer {
            call = call.set("Authorization", &format!("Bearer {token}"));
        }

        let result = match request.method {
            Method::Get => call.call(),
            _ if !request.form.is_empty() => {
                let form: Vec<(&str, &str)> = request
                    .form
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                call.send_form(&form)
            }
            // Spotify rejects body-less PUTs without a Content-Length.
            _ => call.send_string(""),
        };

        let response = match result {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(transport)) => {
                return Err(LoaderError::Transport(transport.to_string()))
            }
        };

        let status = response.status();
        let body = response
            .into_string()
            .map_err(|err| LoaderError::Transport(err.to_string()))?;
        Ok(ApiResponse { status, body })
    }
}
