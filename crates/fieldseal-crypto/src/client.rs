//! Authenticated HTTP client for the trusted boundary.
//!
//! Every call carries the caller's bearer credential and a per-request timeout.
//! Transport failures and 5xx responses are retried with exponential backoff up
//! to `max_attempts`; authentication and configuration errors are returned at
//! once.

use fieldseal_core::config::KeysConfig;
use fieldseal_core::{SealError, SealResult};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::wire::ErrorBody;

pub struct BoundaryClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<SecretString>,
    max_attempts: u32,
    backoff: Duration,
}

impl BoundaryClient {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<SecretString>,
        timeout: Duration,
        max_attempts: u32,
        backoff: Duration,
    ) -> SealResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SealError::Configuration(format!("building HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            max_attempts: max_attempts.max(1),
            backoff,
        })
    }

    /// Build from `[keys]`, reading the bearer credential from `bearer_token_env`.
    pub fn from_config(keys: &KeysConfig) -> SealResult<Self> {
        let token = std::env::var(&keys.bearer_token_env)
            .ok()
            .filter(|t| !t.is_empty())
            .map(SecretString::from);
        Self::new(
            keys.boundary_url.clone(),
            token,
            Duration::from_secs(keys.request_timeout_secs),
            keys.max_attempts,
            Duration::from_millis(keys.backoff_ms),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST `body` as JSON to `path` and decode a JSON response.
    pub async fn post_json<Req, Resp>(&self, path: &str, body: &Req) -> SealResult<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let token = self.token.as_ref().ok_or_else(|| {
            SealError::Authentication("no bearer credential available for boundary request".into())
        })?;
        let url = format!("{}{}", self.base_url, path);

        let mut delay = self.backoff;
        let mut attempt = 1;
        loop {
            let err = match self
                .http
                .post(&url)
                .bearer_auth(token.expose_secret())
                .json(body)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => {
                    debug!(url = %url, attempt, "boundary: ok");
                    return resp
                        .json::<Resp>()
                        .await
                        .map_err(|e| SealError::Transport(format!("decoding response: {e}")));
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let body = resp.json::<ErrorBody>().await.ok();
                    ErrorBody::into_error(body, status)
                }
                Err(e) => SealError::Transport(format!("{url}: {e}")),
            };

            if !err.is_transient() || attempt >= self.max_attempts {
                return Err(err);
            }
            warn!(
                url = %url,
                attempt,
                max_attempts = self.max_attempts,
                backoff_ms = delay.as_millis() as u64,
                "boundary: transient failure, retrying: {err}"
            );
            tokio::time::sleep(delay).await;
            delay = delay.saturating_mul(2);
            attempt += 1;
        }
    }
}

impl std::fmt::Debug for BoundaryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundaryClient")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}
