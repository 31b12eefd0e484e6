use thiserror::Error;

use crate::entities::ReferenceKind;

/// Contract violations raised by the reference core itself.
///
/// These are not retried or recovered from at the call site; surfaces report
/// them as a generic "couldn't attach that" notice.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown reference kind: {0}")]
    UnknownReferenceKind(String),

    #[error("{kind} must be persisted before it can be referenced")]
    MissingIdentity { kind: ReferenceKind },

    #[error("draft has already been submitted")]
    DraftAlreadySubmitted,

    #[error("malformed {kind} entity: {source}")]
    MalformedEntity {
        kind: ReferenceKind,
        #[source]
        source: serde_json::Error,
    },
}

/// Outcomes surfaced by the persistence collaborator, passed through unchanged.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{collection} {id} not found")]
    NotFound { collection: String, id: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("authentication required")]
    Auth,

    #[error("server error: {0}")]
    Server(String),
}

impl StoreError {
    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound { collection: collection.into(), id: id.into() }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Server(err.to_string())
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        Self::Server(err.to_string())
    }
}

/// Either side of a submit: the draft rejected it, or the store did.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
