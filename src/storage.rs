use std::fmt;
use std::marker::PhantomData;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteRow, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use tracing::info;
use uuid::Uuid;

use crate::auth::Principal;
use crate::entities::{FileReference, Message, Task, TaskResponse, UrlReference};
use crate::error::StoreError;
use crate::references::ReferenceSet;
use crate::session::Chat;

/// Entity kinds the persistence layer keeps, one CRUD surface each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Messages,
    Files,
    TaskResponses,
    UrlReferences,
    Tasks,
    Chats,
}

impl Collection {
    pub const ALL: [Collection; 6] = [
        Collection::Messages,
        Collection::Files,
        Collection::TaskResponses,
        Collection::UrlReferences,
        Collection::Tasks,
        Collection::Chats,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Messages => "messages",
            Collection::Files => "files",
            Collection::TaskResponses => "task_responses",
            Collection::UrlReferences => "url_references",
            Collection::Tasks => "tasks",
            Collection::Chats => "chats",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed record stored in one collection.
pub trait Document: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: Collection;

    fn check(&self) -> Result<(), String> {
        Ok(())
    }

    fn normalize(&mut self) {}
}

impl Document for Message {
    const COLLECTION: Collection = Collection::Messages;
}

impl Document for FileReference {
    const COLLECTION: Collection = Collection::Files;

    fn check(&self) -> Result<(), String> {
        if self.filename.trim().is_empty() {
            return Err("filename must not be empty".into());
        }
        Ok(())
    }
}

impl Document for TaskResponse {
    const COLLECTION: Collection = Collection::TaskResponses;

    fn check(&self) -> Result<(), String> {
        if self.task_name.trim().is_empty() {
            return Err("task_name must not be empty".into());
        }
        Ok(())
    }
}

impl Document for UrlReference {
    const COLLECTION: Collection = Collection::UrlReferences;

    fn check(&self) -> Result<(), String> {
        url::Url::parse(&self.url).map(|_| ()).map_err(|e| format!("invalid url {:?}: {}", self.url, e))
    }
}

impl Document for Task {
    const COLLECTION: Collection = Collection::Tasks;

    fn check(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".into());
        }
        Ok(())
    }
}

impl Document for Chat {
    const COLLECTION: Collection = Collection::Chats;

    fn normalize(&mut self) {
        self.normalize_tasks();
    }
}

// Stamped by the store; never taken from a payload.
const RESERVED_FIELDS: [&str; 3] = ["id", "created_by", "updated_by"];

fn strip_reserved(body: &mut Map<String, Value>) {
    for field in RESERVED_FIELDS {
        body.remove(field);
    }
}

fn normalized<T: Document>(doc: Value) -> Result<Value, StoreError> {
    let mut typed: T = serde_json::from_value(doc)
        .map_err(|e| StoreError::Validation(format!("invalid {} payload: {}", T::COLLECTION, e)))?;
    typed.check().map_err(StoreError::Validation)?;
    typed.normalize();
    serde_json::to_value(&typed).map_err(|e| StoreError::Server(e.to_string()))
}

/// Validates `doc` against the collection's schema and fills in defaults.
pub fn normalize_document(collection: Collection, doc: Value) -> Result<Value, StoreError> {
    match collection {
        Collection::Messages => normalized::<Message>(doc),
        Collection::Files => normalized::<FileReference>(doc),
        Collection::TaskResponses => normalized::<TaskResponse>(doc),
        Collection::UrlReferences => normalized::<UrlReference>(doc),
        Collection::Tasks => normalized::<Task>(doc),
        Collection::Chats => normalized::<Chat>(doc),
    }
}

/// Persisted messages only accept new references; task responses never change.
fn check_mutable(collection: Collection, existing: &Value, patch: &Map<String, Value>) -> Result<(), StoreError> {
    match collection {
        Collection::TaskResponses => Err(StoreError::Validation("task responses are immutable".into())),
        Collection::Messages if patch.keys().any(|k| k != "references") => {
            Err(StoreError::Validation("messages are immutable except for references".into()))
        }
        Collection::Messages => match patch.get("references") {
            Some(next) => check_references_grow(existing.get("references"), next),
            None => Ok(()),
        },
        _ => Ok(()),
    }
}

fn decode_references(value: Option<&Value>) -> Result<ReferenceSet, StoreError> {
    match value {
        None | Some(Value::Null) => Ok(ReferenceSet::default()),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| StoreError::Validation(format!("invalid references: {}", e))),
    }
}

// Every reference already on the message must survive the patch.
fn check_references_grow(current: Option<&Value>, next: &Value) -> Result<(), StoreError> {
    let current = decode_references(current)?;
    let next = decode_references(Some(next))?;
    match current.iter().find(|r| !next.contains(r.kind(), r.key())) {
        Some(dropped) => Err(StoreError::Validation(format!(
            "cannot detach {} {:?} from a persisted message",
            dropped.kind(),
            dropped.key()
        ))),
        None => Ok(()),
    }
}

fn into_object(payload: Value) -> Result<Map<String, Value>, StoreError> {
    match payload {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Validation(format!("expected a JSON object, got {}", other))),
    }
}

// Query strings lose JSON types, so a filter value of `2024` also matches the string "2024".
fn field_matches(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        Some(a) if a == expected => true,
        Some(Value::String(a)) => !expected.is_string() && *a == expected.to_string(),
        _ => false,
    }
}

fn matches_filter(doc: &Value, filter: Option<&Map<String, Value>>) -> bool {
    filter.map_or(true, |f| f.iter().all(|(k, v)| field_matches(doc.get(k), v)))
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn create(&self, collection: Collection, principal: &Principal, payload: Value) -> Result<Value, StoreError>;
    async fn get(&self, collection: Collection, id: &str) -> Result<Value, StoreError>;
    async fn list(&self, collection: Collection, filter: Option<&Map<String, Value>>) -> Result<Vec<Value>, StoreError>;
    async fn update(
        &self,
        collection: Collection,
        principal: &Principal,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<Value, StoreError>;
    async fn delete(&self, collection: Collection, principal: &Principal, id: &str) -> Result<(), StoreError>;
}

/// JSON documents in a single sqlite table keyed by `(collection, id)`.
#[derive(Clone)]
pub struct SqliteEntityStore {
    pool: Pool<Sqlite>,
}

impl SqliteEntityStore {
    pub async fn initialize(database_url: Option<String>) -> anyhow::Result<Self> {
        let url = match database_url {
            Some(u) => u,
            None => resolve_default_db_url()?,
        };
        let options = url.parse::<SqliteConnectOptions>()?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);
        let pool = Pool::<Sqlite>::connect_with(options).await?;
        sqlx::query("PRAGMA busy_timeout = 5000;").execute(&pool).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!(%url, "document store ready");
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub fn pool(&self) -> &Pool<Sqlite> { &self.pool }
}

fn resolve_default_db_url() -> anyhow::Result<String> {
    let base = std::env::var("XDG_DATA_HOME").ok().map(PathBuf::from).unwrap_or_else(|| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        PathBuf::from(home).join(".local").join("share")
    });
    let dir = base.join("chat_references");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("chat_references.db");
    Ok(format!("sqlite://{}", path.to_string_lossy()))
}

fn row_to_document(row: &SqliteRow) -> Result<Value, StoreError> {
    let body: String = row.get("body_json");
    let mut doc: Value = serde_json::from_str(&body)
        .map_err(|e| StoreError::Server(format!("corrupt document body: {}", e)))?;
    if let Some(obj) = doc.as_object_mut() {
        obj.insert("id".into(), Value::String(row.get("id")));
        obj.insert("created_by".into(), Value::String(row.get("created_by")));
        obj.insert("updated_by".into(), Value::String(row.get("updated_by")));
    }
    Ok(doc)
}

#[async_trait]
impl EntityStore for SqliteEntityStore {
    async fn create(&self, collection: Collection, principal: &Principal, payload: Value) -> Result<Value, StoreError> {
        let mut body = into_object(payload)?;
        strip_reserved(&mut body);
        let mut doc = normalize_document(collection, Value::Object(body))?;
        let id = Uuid::new_v4().to_string();
        doc["id"] = Value::String(id.clone());
        let now: DateTime<Utc> = Utc::now();
        sqlx::query("INSERT INTO documents (collection, id, body_json, created_by, updated_by, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)")
            .bind(collection.as_str())
            .bind(&id)
            .bind(doc.to_string())
            .bind(&principal.0)
            .bind(&principal.0)
            .bind(now.to_rfc3339())
            .bind(now.to_rfc3339())
            .execute(&self.pool).await?;
        info!(%collection, %id, principal = %principal.0, "document created");
        self.get(collection, &id).await
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Value, StoreError> {
        let row = sqlx::query("SELECT id, body_json, created_by, updated_by FROM documents WHERE collection = ?1 AND id = ?2")
            .bind(collection.as_str())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(r) = row else { return Err(StoreError::not_found(collection.as_str(), id)) };
        row_to_document(&r)
    }

    async fn list(&self, collection: Collection, filter: Option<&Map<String, Value>>) -> Result<Vec<Value>, StoreError> {
        let rows = sqlx::query("SELECT id, body_json, created_by, updated_by FROM documents WHERE collection = ?1 ORDER BY created_at ASC, rowid ASC")
            .bind(collection.as_str())
            .fetch_all(&self.pool).await?;
        let mut out = Vec::with_capacity(rows.len());
        for r in &rows {
            let doc = row_to_document(r)?;
            if matches_filter(&doc, filter) {
                out.push(doc);
            }
        }
        Ok(out)
    }

    async fn update(
        &self,
        collection: Collection,
        principal: &Principal,
        id: &str,
        mut patch: Map<String, Value>,
    ) -> Result<Value, StoreError> {
        strip_reserved(&mut patch);
        let existing = self.get(collection, id).await?;
        check_mutable(collection, &existing, &patch)?;
        let mut merged = into_object(existing)?;
        strip_reserved(&mut merged);
        merged.extend(patch);
        let mut doc = normalize_document(collection, Value::Object(merged))?;
        doc["id"] = Value::String(id.to_string());
        let res = sqlx::query("UPDATE documents SET body_json = ?1, updated_by = ?2, updated_at = ?3 WHERE collection = ?4 AND id = ?5")
            .bind(doc.to_string())
            .bind(&principal.0)
            .bind(Utc::now().to_rfc3339())
            .bind(collection.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::not_found(collection.as_str(), id));
        }
        info!(%collection, %id, principal = %principal.0, "document updated");
        self.get(collection, id).await
    }

    async fn delete(&self, collection: Collection, principal: &Principal, id: &str) -> Result<(), StoreError> {
        let res = sqlx::query("DELETE FROM documents WHERE collection = ?1 AND id = ?2")
            .bind(collection.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::not_found(collection.as_str(), id));
        }
        info!(%collection, %id, principal = %principal.0, "document deleted");
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(doc: Value) -> Result<T, StoreError> {
    serde_json::from_value(doc).map_err(|e| StoreError::Server(format!("stored document does not decode: {}", e)))
}

/// Typed CRUD over one collection of any [`EntityStore`].
pub struct Repository<'a, T> {
    store: &'a dyn EntityStore,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T: Document> Repository<'a, T> {
    pub fn new(store: &'a dyn EntityStore) -> Self {
        Self { store, _marker: PhantomData }
    }

    pub async fn create(&self, principal: &Principal, entity: &T) -> Result<T, StoreError> {
        let payload = serde_json::to_value(entity).map_err(|e| StoreError::Validation(e.to_string()))?;
        decode(self.store.create(T::COLLECTION, principal, payload).await?)
    }

    pub async fn get(&self, id: &str) -> Result<T, StoreError> {
        decode(self.store.get(T::COLLECTION, id).await?)
    }

    pub async fn list(&self, filter: Option<&Map<String, Value>>) -> Result<Vec<T>, StoreError> {
        self.store.list(T::COLLECTION, filter).await?.into_iter().map(decode::<T>).collect()
    }

    pub async fn update(&self, principal: &Principal, id: &str, patch: Map<String, Value>) -> Result<T, StoreError> {
        decode(self.store.update(T::COLLECTION, principal, id, patch).await?)
    }

    pub async fn delete(&self, principal: &Principal, id: &str) -> Result<(), StoreError> {
        self.store.delete(T::COLLECTION, principal, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Reference, TaskStatus};
    use serde_json::json;
    use tempfile::tempdir;

    async fn store() -> (SqliteEntityStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let url = format!("sqlite://{}", path.to_string_lossy());
        (SqliteEntityStore::initialize(Some(url)).await.unwrap(), dir)
    }

    fn alice() -> Principal {
        Principal("alice".into())
    }

    #[tokio::test]
    async fn create_get_list_delete_roundtrip() {
        let (store, _dir) = store().await;
        let created = store
            .create(Collection::Files, &alice(), json!({"id": "forged", "filename": "a.txt", "created_by": "mallory"}))
            .await
            .unwrap();
        let id = created["id"].as_str().unwrap().to_string();
        assert_ne!(id, "forged");
        assert_eq!(created["created_by"], "alice");
        assert_eq!(created["updated_by"], "alice");

        let got = store.get(Collection::Files, &id).await.unwrap();
        assert_eq!(got["filename"], "a.txt");
        assert!(matches!(store.get(Collection::Tasks, &id).await, Err(StoreError::NotFound { .. })));

        let list = store.list(Collection::Files, None).await.unwrap();
        assert_eq!(list.len(), 1);

        store.delete(Collection::Files, &alice(), &id).await.unwrap();
        assert!(store.list(Collection::Files, None).await.unwrap().is_empty());
        assert!(matches!(store.delete(Collection::Files, &alice(), &id).await, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn invalid_payloads_are_rejected() {
        let (store, _dir) = store().await;
        let err = store.create(Collection::UrlReferences, &alice(), json!({"url": "not a url"})).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        let err = store.create(Collection::Files, &alice(), json!({"storage_ref": "x"})).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        let err = store.create(Collection::Files, &alice(), json!(["a"])).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn update_merges_and_stamps_updater() {
        let (store, _dir) = store().await;
        let chat = store.create(Collection::Chats, &alice(), json!({"name": "planning"})).await.unwrap();
        let id = chat["id"].as_str().unwrap();
        let mut patch = Map::new();
        patch.insert("available_tasks".into(), json!(["t1", "t2", "t1"]));
        let updated = store.update(Collection::Chats, &Principal("bob".into()), id, patch).await.unwrap();
        assert_eq!(updated["name"], "planning");
        assert_eq!(updated["available_tasks"], json!(["t1", "t2"]));
        assert_eq!(updated["created_by"], "alice");
        assert_eq!(updated["updated_by"], "bob");

        let missing = store.update(Collection::Chats, &alice(), "nope", Map::new()).await;
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn persisted_messages_only_accept_reference_updates() {
        let (store, _dir) = store().await;
        let repo = Repository::<Message>::new(&store);
        let msg = repo.create(&alice(), &Message::user("hello")).await.unwrap();

        let mut patch = Map::new();
        patch.insert("content".into(), json!("rewritten"));
        assert!(matches!(repo.update(&alice(), &msg.id, patch).await, Err(StoreError::Validation(_))));

        let refs = ReferenceSet::default().add(Reference::StringOutput("out".into()));
        let mut patch = Map::new();
        patch.insert("references".into(), serde_json::to_value(&refs).unwrap());
        let updated = repo.update(&alice(), &msg.id, patch).await.unwrap();
        assert_eq!(updated.content, "hello");
        assert_eq!(updated.references, refs);
    }

    #[tokio::test]
    async fn persisted_message_references_only_grow() {
        let (store, _dir) = store().await;
        let repo = Repository::<Message>::new(&store);
        let mut msg = Message::user("see output");
        msg.references = ReferenceSet::default().add(Reference::StringOutput("out".into()));
        let msg = repo.create(&alice(), &msg).await.unwrap();

        let mut patch = Map::new();
        patch.insert("references".into(), json!({}));
        let err = repo.update(&alice(), &msg.id, patch).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(repo.get(&msg.id).await.unwrap().references.len(), 1);

        let grown = msg.references.add(Reference::StringOutput("more".into()));
        let mut patch = Map::new();
        patch.insert("references".into(), serde_json::to_value(&grown).unwrap());
        let updated = repo.update(&alice(), &msg.id, patch).await.unwrap();
        assert_eq!(updated.references, grown);
    }

    #[tokio::test]
    async fn numeric_looking_filters_match_string_fields() {
        let (store, _dir) = store().await;
        for name in ["2024", "true", "plan"] {
            store.create(Collection::Tasks, &alice(), json!({ "name": name })).await.unwrap();
        }
        for (value, expected) in [(json!(2024), "2024"), (json!(true), "true"), (json!("plan"), "plan")] {
            let mut filter = Map::new();
            filter.insert("name".into(), value);
            let found = store.list(Collection::Tasks, Some(&filter)).await.unwrap();
            assert_eq!(found.len(), 1);
            assert_eq!(found[0]["name"], expected);
        }

        let mut filter = Map::new();
        filter.insert("name".into(), json!("2025"));
        assert!(store.list(Collection::Tasks, Some(&filter)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn task_responses_are_immutable_and_filterable() {
        let (store, _dir) = store().await;
        let repo = Repository::<TaskResponse>::new(&store);
        for (name, status) in [("Summarize", TaskStatus::Complete), ("Search", TaskStatus::Failed)] {
            let response = TaskResponse {
                id: String::new(),
                task_id: None,
                task_name: name.into(),
                task_description: None,
                status,
                result_code: if status == TaskStatus::Complete { 0 } else { 1 },
                task_outputs: None,
                result_diagnostic: None,
                task_inputs: None,
                usage_metrics: None,
                execution_history: None,
            };
            repo.create(&alice(), &response).await.unwrap();
        }
        let mut filter = Map::new();
        filter.insert("status".into(), json!("failed"));
        let failed = repo.list(Some(&filter)).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].task_name, "Search");

        let err = repo.update(&alice(), &failed[0].id, Map::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn pragmas_and_migrations_applied() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let url = format!("sqlite://{}", path.to_string_lossy());
        let store = SqliteEntityStore::initialize(Some(url.clone())).await.unwrap();

        let row = sqlx::query("PRAGMA journal_mode;").fetch_one(store.pool()).await.unwrap();
        let mode: String = row.get(0);
        assert!(mode.eq_ignore_ascii_case("wal"), "journal_mode should be WAL, got {}", mode);

        // Migrations idempotent: re-run initialize on same file
        let _again = SqliteEntityStore::initialize(Some(url)).await.unwrap();
    }
}
