use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

/// The authenticated caller. Stamped into `created_by` / `updated_by`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Principal(pub String);

/// Static bearer tokens mapped to principals.
#[derive(Debug, Clone, Default)]
pub struct TokenTable {
    tokens: Arc<HashMap<String, Principal>>,
}

impl TokenTable {
    /// Parses `token=principal` pairs separated by commas.
    pub fn parse(pairs: &str) -> Self {
        let tokens = pairs
            .split(',')
            .filter_map(|pair| {
                let (token, principal) = pair.split_once('=')?;
                let (token, principal) = (token.trim(), principal.trim());
                (!token.is_empty() && !principal.is_empty())
                    .then(|| (token.to_string(), Principal(principal.to_string())))
            })
            .collect();
        Self { tokens: Arc::new(tokens) }
    }

    pub fn from_env() -> Self {
        Self::parse(&std::env::var("CHAT_REFS_TOKENS").unwrap_or_default())
    }

    pub fn lookup(&self, token: &str) -> Option<&Principal> {
        self.tokens.get(token)
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
}

/// Rejects requests without a known bearer token; otherwise injects the [`Principal`].
pub async fn require_bearer(State(tokens): State<TokenTable>, mut request: Request, next: Next) -> Response {
    let principal = bearer_token(&request).and_then(|t| tokens.lookup(t)).cloned();
    match principal {
        Some(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        None => {
            warn!(path = %request.uri().path(), "rejected unauthenticated request");
            (StatusCode::UNAUTHORIZED, Json(json!({ "message": "authentication required" }))).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_skips_malformed_pairs() {
        let table = TokenTable::parse("abc=alice, def = bob,broken,=nobody,ghi=");
        assert_eq!(table.lookup("abc"), Some(&Principal("alice".into())));
        assert_eq!(table.lookup("def"), Some(&Principal("bob".into())));
        assert!(table.lookup("broken").is_none());
        assert!(table.lookup("ghi").is_none());
        assert!(TokenTable::parse("").is_empty());
    }
}
