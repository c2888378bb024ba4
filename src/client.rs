//! Thin HTTP client for a running gateway.

use anyhow::Context;
use serde_json::{json, Map, Value};

pub struct GatewayClient {
    base: String,
    http: reqwest::Client,
}

impl GatewayClient {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// POST an observation to `/identify`. Returns the status code and body
    /// whether or not the gateway accepted it.
    pub async fn identify(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> anyhow::Result<(u16, Value)> {
        let mut body = Map::new();
        if let Some(email) = email {
            body.insert("email".into(), json!(email));
        }
        if let Some(phone) = phone_number {
            body.insert("phoneNumber".into(), json!(phone));
        }
        let response = self
            .http
            .post(format!("{}/identify", self.base))
            .json(&Value::Object(body))
            .send()
            .await
            .with_context(|| format!("failed to reach {}", self.base))?;
        let status = response.status().as_u16();
        let body = response.json().await.context("gateway returned a non-JSON body")?;
        Ok((status, body))
    }

    pub async fn health(&self) -> anyhow::Result<Value> {
        let response = self
            .http
            .get(format!("{}/health", self.base))
            .send()
            .await
            .with_context(|| format!("failed to reach {}", self.base))?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}
