//! EMQX v5 REST client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::Serialize;
use tracing::{debug, info, warn};

use qiot_core::{BrokerConfig, Error, Result};

use crate::broker::{ActionPayload, BrokerApi, CreateOutcome, RemoteAction, RulePayload, ACTION_TYPE};

const ACTIONS_PATH: &str = "/api/v5/actions";
const RULES_PATH: &str = "/api/v5/rules";

/// Basic-auth client for the EMQX management API.
#[derive(Debug, Clone)]
pub struct EmqxClient {
    client: Client,
    base_url: String,
    user: String,
    password: String,
    timeout: Duration,
}

impl EmqxClient {
    pub fn new(
        base_url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user: user.into(),
            password: password.into(),
            timeout,
        }
    }

    /// Build a client from configuration; the base URL is mandatory.
    pub fn from_config(config: &BrokerConfig) -> Result<Self> {
        Ok(Self::new(
            config.target()?,
            config.user.as_str(),
            config.password.as_str(),
            Duration::from_secs(config.timeout_secs),
        ))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .basic_auth(&self.user, Some(&self.password))
            .header("Accept", "application/json")
            .timeout(self.timeout)
    }

    /// Send a request and return the status code and body text.
    async fn send<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&T>,
    ) -> Result<(u16, String)> {
        let mut request = self.request(method.clone(), path);
        if let Some(body) = body {
            request = request.json(body);
        }
        debug!(category = "broker", method = %method, path = %path, "EMQX request");

        let response = request.send().await.map_err(|e| {
            warn!(
                category = "broker",
                method = %method,
                url = %format!("{}{}", self.base_url, path),
                error = %e,
                "EMQX request failed"
            );
            if e.is_timeout() {
                Error::Timeout(format!("{} {}", method, path))
            } else {
                Error::Transport(format!("{} {}: {}", method, path, e))
            }
        })?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("Failed to read EMQX response: {}", e)))?;
        debug!(category = "broker", status, body = %text, "EMQX response");
        Ok((status, text))
    }

    /// Send and require a 2xx answer.
    async fn send_ok<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&T>,
    ) -> Result<String> {
        let (status, text) = self.send(method.clone(), path, body).await?;
        if !(200..300).contains(&status) {
            warn!(
                category = "broker",
                method = %method,
                path = %path,
                status,
                body = %text,
                "EMQX rejected request"
            );
            return Err(Error::Remote { status, body: text });
        }
        Ok(text)
    }
}

#[async_trait]
impl BrokerApi for EmqxClient {
    async fn list_actions(&self) -> Result<Vec<RemoteAction>> {
        let text = self
            .send_ok::<()>(Method::GET, ACTIONS_PATH, None)
            .await?;
        let actions: Vec<RemoteAction> = serde_json::from_str(&text)?;
        info!(category = "broker", count = actions.len(), "Fetched configured actions");
        Ok(actions)
    }

    async fn create_action(&self, payload: &ActionPayload) -> Result<()> {
        info!(
            category = "broker",
            action = payload.name.as_deref().unwrap_or_default(),
            "Creating action"
        );
        self.send_ok(Method::POST, ACTIONS_PATH, Some(payload))
            .await
            .map(|_| ())
    }

    async fn update_action(&self, name: &str, payload: &ActionPayload) -> Result<()> {
        let path = format!(
            "{}/{}:{}",
            ACTIONS_PATH,
            ACTION_TYPE,
            urlencoding::encode(name)
        );
        info!(category = "broker", action = %name, "Updating action");
        self.send_ok(Method::PUT, &path, Some(payload))
            .await
            .map(|_| ())
    }

    async fn create_rule(&self, payload: &RulePayload) -> Result<CreateOutcome> {
        info!(category = "broker", rule = %payload.name, "Creating rule");
        let (status, body) = self.send(Method::POST, RULES_PATH, Some(payload)).await?;
        if status == 201 {
            Ok(CreateOutcome::Created)
        } else {
            Ok(CreateOutcome::Rejected { status, body })
        }
    }

    async fn update_rule(&self, id: &str, payload: &RulePayload) -> Result<()> {
        let path = format!("{}/{}", RULES_PATH, urlencoding::encode(id));
        info!(category = "broker", rule = %id, "Updating rule");
        self.send_ok(Method::PUT, &path, Some(payload))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_requires_base_url() {
        let config = BrokerConfig::default();
        assert!(matches!(
            EmqxClient::from_config(&config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = EmqxClient::new("http://emqx:18083/", "u", "p", Duration::from_secs(1));
        assert_eq!(client.base_url(), "http://emqx:18083");
    }
}
