//! HTTP JSON provider.
//!
//! A [`RestProvider`] is bound to a base URL once at startup and hands out
//! leaf steps that GET a path below it and resolve to the parsed body.

use crate::context::Context;
use crate::errors::StepError;
use crate::steps::Step;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a [`RestProvider`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestConfig {
    /// Base URL every path is resolved against.
    pub prefix_url: String,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Headers sent with every request.
    pub headers: HashMap<String, String>,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            prefix_url: String::new(),
            timeout_ms: 10_000,
            headers: HashMap::new(),
        }
    }
}

impl RestConfig {
    /// Creates a config for `prefix_url`.
    #[must_use]
    pub fn new(prefix_url: impl Into<String>) -> Self {
        Self {
            prefix_url: prefix_url.into(),
            ..Self::default()
        }
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Adds a default header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Joins a base URL and a relative path with exactly one slash.
#[must_use]
pub fn join_url(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let path = path.trim_start_matches('/');

    match (prefix.is_empty(), path.is_empty()) {
        (true, _) => path.to_string(),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{prefix}/{path}"),
    }
}

/// Issues JSON requests below a fixed base URL.
#[derive(Clone)]
pub struct RestProvider {
    client: reqwest::Client,
    config: Arc<RestConfig>,
}

impl RestProvider {
    /// Creates a provider and its HTTP client.
    ///
    /// # Errors
    ///
    /// Returns a `BadRequest` error if a configured header is invalid, or an
    /// `Internal` error if the client cannot be built.
    pub fn new(config: RestConfig) -> Result<Self, StepError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| StepError::bad_request(format!("invalid header name '{name}'")).with_source(e))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| StepError::bad_request(format!("invalid value for header '{name}'")).with_source(e))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .default_headers(headers)
            .build()
            .map_err(|e| StepError::internal("failed to build HTTP client").with_source(e))?;

        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &RestConfig {
        &self.config
    }

    /// Resolves `path` against the base URL.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        join_url(&self.config.prefix_url, path)
    }

    /// GETs `path` and parses the body as JSON.
    ///
    /// Non-success statuses become [`ErrorKind::Http`](crate::errors::ErrorKind::Http)
    /// failures carrying the upstream status.
    pub async fn get_json(&self, path: &str) -> Result<serde_json::Value, StepError> {
        let url = self.url(path);
        tracing::debug!(url = %url, "GET");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| transport_error(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(url = %url, status = status.as_u16(), "Upstream returned an error status");
            return Err(StepError::http(
                status.as_u16(),
                format!("GET {url} returned {status}"),
            ));
        }

        response.json().await.map_err(|e| {
            StepError::upstream(format!("GET {url} returned an invalid JSON body")).with_source(e)
        })
    }

    /// Creates a step that GETs the path built from its input.
    pub fn get<I, F>(&self, path: F) -> RestGet<I, serde_json::Value, F>
    where
        F: Fn(&I, &Context) -> String + Send + Sync,
    {
        self.get_as(path)
    }

    /// Creates a step that GETs a path and deserializes the body into `T`.
    pub fn get_as<I, T, F>(&self, path: F) -> RestGet<I, T, F>
    where
        F: Fn(&I, &Context) -> String + Send + Sync,
    {
        RestGet {
            provider: self.clone(),
            path,
            _marker: PhantomData,
        }
    }
}

impl fmt::Debug for RestProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestProvider")
            .field("prefix_url", &self.config.prefix_url)
            .finish_non_exhaustive()
    }
}

fn transport_error(url: &str, error: reqwest::Error) -> StepError {
    tracing::warn!(url = %url, error = %error, "Upstream request failed");
    if error.is_timeout() {
        StepError::timeout(format!("GET {url} timed out")).with_source(error)
    } else {
        StepError::upstream(format!("GET {url} failed")).with_source(error)
    }
}

/// A leaf step issuing one GET per invocation.
pub struct RestGet<I, T, F> {
    provider: RestProvider,
    path: F,
    _marker: PhantomData<fn(I) -> T>,
}

impl<I, T, F> fmt::Debug for RestGet<I, T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestGet")
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<I, T, F> Step<I, T> for RestGet<I, T, F>
where
    F: Fn(&I, &Context) -> String + Send + Sync,
    I: Send + 'static,
    T: DeserializeOwned + Send + 'static,
{
    fn name(&self) -> &str {
        "rest_get"
    }

    async fn run(&self, input: I, ctx: &Context) -> Result<T, StepError> {
        let path = (self.path)(&input, ctx);
        let body = self.provider.get_json(&path).await?;

        serde_json::from_value(body).map_err(|e| {
            StepError::upstream(format!("unexpected response shape from {path}")).with_source(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use axum::http::{StatusCode, Uri};
    use axum::routing::get;
    use axum::{Json, Router};
    use tokio::net::TcpListener;

    /// Serves `router` on an ephemeral port and returns its `/api/v2` base URL.
    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        format!("http://{addr}/api/v2")
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("https://pokeapi.co/api/v2", "pokemon"), "https://pokeapi.co/api/v2/pokemon");
        assert_eq!(join_url("https://pokeapi.co/api/v2/", "/pokemon/1"), "https://pokeapi.co/api/v2/pokemon/1");
        assert_eq!(join_url("", "pokemon"), "pokemon");
        assert_eq!(join_url("https://pokeapi.co", ""), "https://pokeapi.co");
    }

    #[test]
    fn test_config_serde_defaults() {
        let config: RestConfig =
            serde_json::from_str(r#"{"prefix_url": "https://pokeapi.co/api/v2"}"#).unwrap();
        assert_eq!(config.timeout_ms, 10_000);
        assert!(config.headers.is_empty());
    }

    #[test]
    fn test_invalid_header_rejected() {
        let err = RestProvider::new(RestConfig::new("http://localhost").with_header("bad header", "x"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn test_get_resolves_body() {
        let base = serve(Router::new().fallback(|uri: Uri| async move {
            Json(serde_json::json!({ "path": uri.path(), "name": "pikachu" }))
        }))
        .await;
        let provider = RestProvider::new(RestConfig::new(base)).unwrap();
        let get_pokemon = provider.get(|id: &u32, _ctx: &Context| format!("pokemon/{id}"));

        let body = get_pokemon.run(25, &Context::detached()).await.unwrap();

        assert_eq!(body["name"], "pikachu");
        assert_eq!(body["path"], "/api/v2/pokemon/25");
    }

    #[tokio::test]
    async fn test_get_as_typed() {
        #[derive(Debug, Deserialize)]
        struct Pokemon {
            name: String,
        }

        let base = serve(Router::new().route(
            "/api/v2/pokemon/{id}",
            get(|| async { Json(serde_json::json!({ "name": "bulbasaur", "order": 1 })) }),
        ))
        .await;
        let provider = RestProvider::new(RestConfig::new(base)).unwrap();
        let get_pokemon = provider.get_as::<u32, Pokemon, _>(|id, _ctx| format!("pokemon/{id}"));

        let pokemon = get_pokemon.run(1, &Context::detached()).await.unwrap();
        assert_eq!(pokemon.name, "bulbasaur");
    }

    #[tokio::test]
    async fn test_default_headers_are_sent() {
        let base = serve(Router::new().fallback(|headers: axum::http::HeaderMap| async move {
            let agent = headers
                .get("x-client")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            Json(serde_json::json!({ "client": agent }))
        }))
        .await;
        let provider =
            RestProvider::new(RestConfig::new(base).with_header("x-client", "stepflow")).unwrap();

        let body = provider.get_json("pokemon").await.unwrap();
        assert_eq!(body["client"], "stepflow");
    }

    #[tokio::test]
    async fn test_non_success_status() {
        let base = serve(Router::new().fallback(|| async {
            (StatusCode::NOT_FOUND, Json(serde_json::json!({ "detail": "Not found." })))
        }))
        .await;
        let provider = RestProvider::new(RestConfig::new(base)).unwrap();

        let err = provider.get_json("pokemon/99999").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Http(404));
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_invalid_json_is_upstream_error() {
        let base = serve(Router::new().fallback(|| async { "not json" })).await;
        let provider = RestProvider::new(RestConfig::new(base)).unwrap();

        let err = provider.get_json("pokemon").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Upstream);
    }

    #[tokio::test]
    async fn test_slow_upstream_times_out() {
        let base = serve(Router::new().fallback(|| async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Json(serde_json::json!({}))
        }))
        .await;
        let provider = RestProvider::new(
            RestConfig::new(base).with_timeout(Duration::from_millis(50)),
        )
        .unwrap();

        let err = provider.get_json("pokemon").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let provider = RestProvider::new(RestConfig::new(format!("http://{addr}"))).unwrap();
        let err = provider.get_json("pokemon").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert!(std::error::Error::source(&err).is_some());
    }
}
