//! REST transport for the request side of the protocol.
//!
//! Streamed endpoints answer `200` with an empty body; the reply arrives later
//! over the duplex channel. Synchronous endpoints answer with JSON.

use std::time::Duration;

use serde_json::Value;

use crate::api::ApiError;

/// Thin reqwest wrapper: base URL, bearer auth, per-request timeout.
#[derive(Debug, Clone)]
pub struct RestClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let base: String = base_url.into();
        Self {
            client: reqwest::Client::new(),
            base_url: base.trim_end_matches('/').to_owned(),
            timeout,
        }
    }

    fn endpoint(&self, resource: &str) -> String {
        format!("{}/{}", self.base_url, resource.trim_start_matches('/'))
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty()
    }

    pub async fn post(&self, resource: &str, body: &Value, token: &str) -> Result<Value, ApiError> {
        if !self.is_configured() {
            return Err(ApiError::NotConfigured);
        }
        let resp = self
            .client
            .post(self.endpoint(resource))
            .bearer_auth(token)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::RequestFailed(e.to_string()))?;
        decode(resp).await
    }

    pub async fn get(
        &self,
        resource: &str,
        params: &[(String, String)],
        token: &str,
    ) -> Result<Value, ApiError> {
        if !self.is_configured() {
            return Err(ApiError::NotConfigured);
        }
        let resp = self
            .client
            .get(self.endpoint(resource))
            .bearer_auth(token)
            .timeout(self.timeout)
            .query(params)
            .send()
            .await
            .map_err(|e| ApiError::RequestFailed(e.to_string()))?;
        decode(resp).await
    }
}

/// Map non-2xx to [`ApiError::Status`]; parse the body, treating empty as null.
async fn decode(resp: reqwest::Response) -> Result<Value, ApiError> {
    let status = resp.status();
    let text = resp
        .text()
        .await
        .map_err(|e| ApiError::RequestFailed(e.to_string()))?;
    if !status.is_success() {
        return Err(ApiError::Status { status: status.as_u16(), body: text });
    }
    parse_body(&text)
}

fn parse_body(text: &str) -> Result<Value, ApiError> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(text).map_err(|e| ApiError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_cleanly() {
        let c = RestClient::new("https://api.example.test/prod/", Duration::from_secs(30));
        assert_eq!(c.endpoint("rephrase"), "https://api.example.test/prod/rephrase");
        assert_eq!(c.endpoint("/submission"), "https://api.example.test/prod/submission");
    }

    #[test]
    fn empty_body_is_null() {
        assert_eq!(parse_body("").unwrap(), Value::Null);
        assert_eq!(parse_body("  \n").unwrap(), Value::Null);
        assert_eq!(parse_body(r#""<Acme>""#).unwrap(), Value::from("<Acme>"));
        assert!(matches!(parse_body("{oops"), Err(ApiError::Decode(_))));
    }

    #[tokio::test]
    async fn unconfigured_client_refuses() {
        let c = RestClient::new("", Duration::from_secs(1));
        assert!(!c.is_configured());
        let err = c.post("x", &Value::Null, "t").await.unwrap_err();
        assert!(matches!(err, ApiError::NotConfigured));
    }
}
