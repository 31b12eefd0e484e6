use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::{Map, Value};

use crate::auth::Principal;
use crate::error::StoreError;
use crate::storage::{Collection, EntityStore};

/// [`EntityStore`] backed by a remote CRUD service.
///
/// The principal is whoever owns `token`; the server stamps it, so the
/// `principal` arguments of the trait are not sent.
#[derive(Clone)]
pub struct HttpEntityClient {
    pub base_url: String,
    pub token: Option<String>,
    client: reqwest::Client,
}

impl HttpEntityClient {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client: reqwest::Client::new(),
        }
    }

    fn request(&self, method: Method, collection: Collection, id: Option<&str>) -> RequestBuilder {
        let url = match id {
            Some(id) => format!("{}/{}/{}", self.base_url, collection, id),
            None => format!("{}/{}", self.base_url, collection),
        };
        let mut rb = self.client.request(method, url);
        if let Some(token) = &self.token {
            rb = rb.bearer_auth(token);
        }
        rb
    }
}

async fn read_response(resp: reqwest::Response, collection: Collection, id: Option<&str>) -> Result<Value, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }
    let message = resp
        .json::<Value>()
        .await
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| status.to_string());
    Err(match status {
        StatusCode::BAD_REQUEST => StoreError::Validation(message),
        StatusCode::UNAUTHORIZED => StoreError::Auth,
        StatusCode::NOT_FOUND => StoreError::not_found(collection.as_str(), id.unwrap_or_default()),
        _ => StoreError::Server(message),
    })
}

#[async_trait]
impl EntityStore for HttpEntityClient {
    async fn create(&self, collection: Collection, _principal: &Principal, payload: Value) -> Result<Value, StoreError> {
        let resp = self.request(Method::POST, collection, None).json(&payload).send().await?;
        read_response(resp, collection, None).await
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Value, StoreError> {
        let resp = self.request(Method::GET, collection, Some(id)).send().await?;
        read_response(resp, collection, Some(id)).await
    }

    async fn list(&self, collection: Collection, filter: Option<&Map<String, Value>>) -> Result<Vec<Value>, StoreError> {
        // Filter values travel JSON-encoded so numbers and strings stay distinct.
        let query: Vec<(String, String)> = filter
            .map(|f| f.iter().map(|(k, v)| (k.clone(), v.to_string())).collect())
            .unwrap_or_default();
        let resp = self.request(Method::GET, collection, None).query(&query).send().await?;
        let body = read_response(resp, collection, None).await?;
        match body {
            Value::Array(items) => Ok(items),
            other => Err(StoreError::Server(format!("expected a list of {}, got {}", collection, other))),
        }
    }

    async fn update(
        &self,
        collection: Collection,
        _principal: &Principal,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<Value, StoreError> {
        let resp = self.request(Method::PATCH, collection, Some(id)).json(&patch).send().await?;
        read_response(resp, collection, Some(id)).await
    }

    async fn delete(&self, collection: Collection, _principal: &Principal, id: &str) -> Result<(), StoreError> {
        let resp = self.request(Method::DELETE, collection, Some(id)).send().await?;
        read_response(resp, collection, Some(id)).await.map(|_| ())
    }
}
