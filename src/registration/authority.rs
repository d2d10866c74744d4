//! Remote authorization service client

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// A successful verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    /// How long the service allows the result to be cached
    pub ttl: Option<Duration>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthorityError {
    /// Worth retrying
    #[error("network error: {0}")]
    Network(String),

    /// Final
    #[error("rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait AuthorizationService: Send + Sync {
    async fn verify(&self, app_key: &str, fingerprint: &str) -> Result<Verification, AuthorityError>;
}

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    app_key: &'a str,
    fingerprint: &'a str,
    sdk_version: &'a str,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    valid: bool,
    #[serde(default)]
    ttl_secs: Option<u64>,
    #[serde(default)]
    message: String,
}

/// JSON-over-HTTP authorization service
pub struct HttpAuthorizationService {
    client: reqwest::Client,
    url: String,
}

impl HttpAuthorizationService {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl AuthorizationService for HttpAuthorizationService {
    async fn verify(&self, app_key: &str, fingerprint: &str) -> Result<Verification, AuthorityError> {
        let request = VerifyRequest {
            app_key,
            fingerprint,
            sdk_version: env!("CARGO_PKG_VERSION"),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AuthorityError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthorityError::Rejected(format!("{}: {}", status, body.trim())));
        }
        if !status.is_success() {
            return Err(AuthorityError::Network(format!("service returned {}", status)));
        }

        let body: VerifyResponse = response
            .json()
            .await
            .map_err(|e| AuthorityError::Network(format!("malformed response: {}", e)))?;

        if body.valid {
            Ok(Verification {
                ttl: body.ttl_secs.map(Duration::from_secs),
            })
        } else {
            Err(AuthorityError::Rejected(body.message))
        }
    }
}
