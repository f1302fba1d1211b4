use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::http::RestClient;
use crate::session::{ChannelError, ChannelSession};

/// Boxed future returned by the object-safe traits in this module.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Error type for backend operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error("api base url not configured")]
    NotConfigured,
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("http {status}: {body}")]
    Status { status: u16, body: String },
    #[error("undecodable response: {0}")]
    Decode(String),
    #[error("channel: {0}")]
    Channel(#[from] ChannelError),
    #[error("credentials: {0}")]
    Credentials(String),
}

/// Source of bearer tokens and the signed-in user's display name.
/// Token retrieval itself lives outside this crate.
pub trait Credentials: Send + Sync {
    /// Token for REST calls.
    fn id_token(&self) -> BoxFuture<'_, Result<String, ApiError>>;
    /// Token for the duplex channel handshake.
    fn access_token(&self) -> BoxFuture<'_, Result<String, ApiError>>;
    fn user_name(&self) -> BoxFuture<'_, Result<String, ApiError>>;
}

/// Fixed credentials, typically read from the environment.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    id_token: String,
    access_token: String,
    user_name: String,
}

impl StaticCredentials {
    pub fn new(
        id_token: impl Into<String>,
        access_token: impl Into<String>,
        user_name: impl Into<String>,
    ) -> Self {
        Self {
            id_token: id_token.into(),
            access_token: access_token.into(),
            user_name: user_name.into(),
        }
    }

    /// Reads `QUILL_ID_TOKEN`, `QUILL_ACCESS_TOKEN` and `QUILL_USER_NAME`.
    /// The access token falls back to the id token.
    pub fn from_env() -> Self {
        let id_token = std::env::var("QUILL_ID_TOKEN").unwrap_or_default();
        let access_token = std::env::var("QUILL_ACCESS_TOKEN").unwrap_or_else(|_| id_token.clone());
        let user_name = std::env::var("QUILL_USER_NAME").unwrap_or_default();
        Self { id_token, access_token, user_name }
    }
}

impl Credentials for StaticCredentials {
    fn id_token(&self) -> BoxFuture<'_, Result<String, ApiError>> {
        let token = self.id_token.clone();
        Box::pin(async move { Ok(token) })
    }

    fn access_token(&self) -> BoxFuture<'_, Result<String, ApiError>> {
        let token = self.access_token.clone();
        Box::pin(async move { Ok(token) })
    }

    fn user_name(&self) -> BoxFuture<'_, Result<String, ApiError>> {
        let name = self.user_name.clone();
        Box::pin(async move {
            if name.is_empty() {
                Err(ApiError::Credentials("no user name".into()))
            } else {
                Ok(name)
            }
        })
    }
}

/// Everything the controllers need from the remote side.
pub trait Backend: Send + Sync {
    /// Fire a request whose reply streams back over the duplex channel.
    /// The channel is made live first and its ids are added to the payload.
    fn dispatch<'a>(&'a self, resource: &'a str, payload: Value) -> BoxFuture<'a, Result<(), ApiError>>;

    /// POST with a synchronous JSON reply.
    fn call<'a>(&'a self, resource: &'a str, payload: Value) -> BoxFuture<'a, Result<Value, ApiError>>;

    /// GET with query parameters.
    fn query<'a>(
        &'a self,
        resource: &'a str,
        params: Vec<(String, String)>,
    ) -> BoxFuture<'a, Result<Value, ApiError>>;

    fn user_name(&self) -> BoxFuture<'_, Result<String, ApiError>>;
}

/// Production [`Backend`]: REST calls plus the shared channel session.
pub struct ApiClient {
    rest: RestClient,
    session: Arc<ChannelSession>,
    credentials: Arc<dyn Credentials>,
}

impl ApiClient {
    pub fn new(rest: RestClient, session: Arc<ChannelSession>, credentials: Arc<dyn Credentials>) -> Self {
        Self { rest, session, credentials }
    }

    pub fn session(&self) -> &Arc<ChannelSession> {
        &self.session
    }
}

/// Add the session and channel ids every streamed request carries.
pub fn attach_channel_ids(payload: &mut Value, session_id: &str, channel_id: &str) {
    if let Value::Object(map) = payload {
        map.insert("session_id".into(), Value::from(session_id));
        map.insert("websocket_id".into(), Value::from(channel_id));
    }
}

impl Backend for ApiClient {
    fn dispatch<'a>(&'a self, resource: &'a str, mut payload: Value) -> BoxFuture<'a, Result<(), ApiError>> {
        Box::pin(async move {
            let channel_id = self.session.ensure_active().await?;
            attach_channel_ids(&mut payload, &self.session.session_id().to_string(), &channel_id);
            let token = self.credentials.id_token().await?;
            tracing::debug!(resource, "dispatching streamed request");
            self.rest.post(resource, &payload, &token).await?;
            Ok(())
        })
    }

    fn call<'a>(&'a self, resource: &'a str, payload: Value) -> BoxFuture<'a, Result<Value, ApiError>> {
        Box::pin(async move {
            let token = self.credentials.id_token().await?;
            self.rest.post(resource, &payload, &token).await
        })
    }

    fn query<'a>(
        &'a self,
        resource: &'a str,
        params: Vec<(String, String)>,
    ) -> BoxFuture<'a, Result<Value, ApiError>> {
        Box::pin(async move {
            let token = self.credentials.id_token().await?;
            self.rest.get(resource, &params, &token).await
        })
    }

    fn user_name(&self) -> BoxFuture<'_, Result<String, ApiError>> {
        self.credentials.user_name()
    }
}

/// How a recorded request reached the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Dispatch,
    Call,
    Query,
}

/// One request seen by [`MockBackend`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub kind: CallKind,
    pub resource: String,
    pub payload: Value,
}

/// Mock backend for testing: records requests and returns canned replies.
#[derive(Debug, Default)]
pub struct MockBackend {
    calls: Mutex<Vec<RecordedCall>>,
    replies: Mutex<HashMap<String, Result<Value, ApiError>>>,
    dispatch_failure: Mutex<Option<ApiError>>,
    user_name: Mutex<Option<String>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply for `call`/`query` to `resource`. Unset resources answer `null`.
    pub fn reply(&self, resource: &str, reply: Result<Value, ApiError>) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.insert(resource.to_owned(), reply);
        }
    }

    /// Make every subsequent `dispatch` fail (or succeed again with `None`).
    pub fn fail_dispatch(&self, error: Option<ApiError>) {
        if let Ok(mut f) = self.dispatch_failure.lock() {
            *f = error;
        }
    }

    pub fn set_user_name(&self, name: &str) {
        if let Ok(mut n) = self.user_name.lock() {
            *n = Some(name.to_owned());
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Recorded requests to one resource.
    pub fn calls_to(&self, resource: &str) -> Vec<RecordedCall> {
        self.calls().into_iter().filter(|c| c.resource == resource).collect()
    }

    fn record(&self, kind: CallKind, resource: &str, payload: Value) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall { kind, resource: resource.to_owned(), payload });
        }
    }

    fn canned(&self, resource: &str) -> Result<Value, ApiError> {
        self.replies
            .lock()
            .ok()
            .and_then(|r| r.get(resource).cloned())
            .unwrap_or(Ok(Value::Null))
    }
}

impl Backend for MockBackend {
    fn dispatch<'a>(&'a self, resource: &'a str, mut payload: Value) -> BoxFuture<'a, Result<(), ApiError>> {
        attach_channel_ids(&mut payload, "mock-session", "mock-channel");
        self.record(CallKind::Dispatch, resource, payload);
        let failure = self.dispatch_failure.lock().ok().and_then(|f| f.clone());
        Box::pin(async move {
            match failure {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
    }

    fn call<'a>(&'a self, resource: &'a str, payload: Value) -> BoxFuture<'a, Result<Value, ApiError>> {
        self.record(CallKind::Call, resource, payload);
        let reply = self.canned(resource);
        Box::pin(async move { reply })
    }

    fn query<'a>(
        &'a self,
        resource: &'a str,
        params: Vec<(String, String)>,
    ) -> BoxFuture<'a, Result<Value, ApiError>> {
        let payload = Value::Object(params.into_iter().map(|(k, v)| (k, Value::from(v))).collect());
        self.record(CallKind::Query, resource, payload);
        let reply = self.canned(resource);
        Box::pin(async move { reply })
    }

    fn user_name(&self) -> BoxFuture<'_, Result<String, ApiError>> {
        let name = self.user_name.lock().ok().and_then(|n| n.clone());
        Box::pin(async move { name.ok_or_else(|| ApiError::Credentials("no user name".into())) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn attaches_ids_to_objects_only() {
        let mut payload = json!({"query": "hi"});
        attach_channel_ids(&mut payload, "s-1", "c-1");
        assert_eq!(payload["session_id"], "s-1");
        assert_eq!(payload["websocket_id"], "c-1");

        let mut scalar = json!("hi");
        attach_channel_ids(&mut scalar, "s-1", "c-1");
        assert_eq!(scalar, json!("hi"));
    }

    #[tokio::test]
    async fn mock_records_and_replies() {
        let mock = MockBackend::new();
        mock.reply("extract_name", Ok(json!("<Acme>")));
        mock.dispatch("rephrase", json!({"query": "x"})).await.unwrap();
        let name = mock.call("extract_name", json!({})).await.unwrap();
        assert_eq!(name, json!("<Acme>"));
        assert_eq!(mock.call("other", json!({})).await.unwrap(), Value::Null);

        let calls = mock.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].kind, CallKind::Dispatch);
        assert_eq!(calls[0].payload["websocket_id"], "mock-channel");
        assert_eq!(mock.calls_to("extract_name").len(), 1);
    }

    #[tokio::test]
    async fn mock_dispatch_failure() {
        let mock = MockBackend::new();
        mock.fail_dispatch(Some(ApiError::RequestFailed("boom".into())));
        assert!(mock.dispatch("x", json!({})).await.is_err());
        mock.fail_dispatch(None);
        assert!(mock.dispatch("x", json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn static_credentials() {
        let creds = StaticCredentials::new("id", "acc", "");
        assert_eq!(creds.id_token().await.unwrap(), "id");
        assert_eq!(creds.access_token().await.unwrap(), "acc");
        assert!(creds.user_name().await.is_err());
    }
}
