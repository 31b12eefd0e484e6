use std::collections::HashMap;
use std::{net::SocketAddr, sync::Arc};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Extension, Json, Router};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::auth::{require_bearer, Principal, TokenTable};
use crate::entities::{Message, Task, TaskResponse};
use crate::error::{CoreError, StoreError};
use crate::references::ReferenceSet;
use crate::resolver::{self, AttachRequest, Resolution};
use crate::session::Chat;
use crate::settings::{resolve_label_settings, LabelOverrides, LabelSettings};
use crate::storage::{Collection, EntityStore, Repository};
use crate::views::{self, Chip, DetailGroup, MessageCardView, TaskMembership, TaskResultView};

/// One lock per chat id. Chat documents are rewritten whole, so every
/// read-modify-write of a chat runs under its lock.
#[derive(Clone, Default)]
pub struct ChatLocks {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl ChatLocks {
    pub async fn lock(&self, chat_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(chat_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EntityStore>,
    pub labels: LabelSettings,
    pub chat_locks: ChatLocks,
}

impl AppState {
    pub fn new(store: Arc<dyn EntityStore>, labels: LabelSettings) -> Self {
        Self { store, labels, chat_locks: ChatLocks::default() }
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let status = match &err {
            StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            StoreError::Validation(_) => StatusCode::BAD_REQUEST,
            StoreError::Auth => StatusCode::UNAUTHORIZED,
            StoreError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, message: err.to_string() }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let status = match &err {
            CoreError::DraftAlreadySubmitted => StatusCode::CONFLICT,
            _ => StatusCode::BAD_REQUEST,
        };
        Self { status, message: err.to_string() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = %self.status, message = %self.message, "request failed");
        }
        (self.status, Json(json!({ "message": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn count(collection: Collection, op: &'static str) {
    counter!("chat_references_requests_total", "collection" => collection.as_str(), "op" => op).increment(1);
}

async fn create_entity(
    state: AppState,
    collection: Collection,
    principal: Principal,
    body: Value,
) -> ApiResult<(StatusCode, Json<Value>)> {
    count(collection, "create");
    let doc = state.store.create(collection, &principal, body).await?;
    Ok((StatusCode::CREATED, Json(doc)))
}

// `?status=failed` and `?result_code=0` both work: values are JSON if they parse, strings otherwise.
fn query_filter(params: HashMap<String, String>) -> Option<Map<String, Value>> {
    if params.is_empty() {
        return None;
    }
    Some(
        params
            .into_iter()
            .map(|(k, v)| {
                let value = serde_json::from_str(&v).unwrap_or(Value::String(v));
                (k, value)
            })
            .collect(),
    )
}

async fn list_entities(state: AppState, collection: Collection, params: HashMap<String, String>) -> ApiResult<Json<Vec<Value>>> {
    count(collection, "list");
    let filter = query_filter(params);
    Ok(Json(state.store.list(collection, filter.as_ref()).await?))
}

async fn get_entity(state: AppState, collection: Collection, id: String) -> ApiResult<Json<Value>> {
    count(collection, "get");
    Ok(Json(state.store.get(collection, &id).await?))
}

async fn patch_entity(
    state: AppState,
    collection: Collection,
    principal: Principal,
    id: String,
    patch: Map<String, Value>,
) -> ApiResult<Json<Value>> {
    count(collection, "update");
    Ok(Json(state.store.update(collection, &principal, &id, patch).await?))
}

async fn delete_entity(state: AppState, collection: Collection, principal: Principal, id: String) -> ApiResult<Json<Value>> {
    count(collection, "delete");
    state.store.delete(collection, &principal, &id).await?;
    Ok(Json(json!({ "message": format!("{} deleted", id) })))
}

fn crud_routes(router: Router<AppState>, collection: Collection) -> Router<AppState> {
    router
        .route(
            &format!("/{}", collection),
            post(move |State(state): State<AppState>, Extension(principal): Extension<Principal>, Json(body): Json<Value>| {
                create_entity(state, collection, principal, body)
            })
            .get(move |State(state): State<AppState>, Query(params): Query<HashMap<String, String>>| {
                list_entities(state, collection, params)
            }),
        )
        .route(
            &format!("/{}/:id", collection),
            get(move |State(state): State<AppState>, Path(id): Path<String>| get_entity(state, collection, id))
                .patch(
                    move |State(state): State<AppState>,
                          Extension(principal): Extension<Principal>,
                          Path(id): Path<String>,
                          Json(patch): Json<Map<String, Value>>| {
                        patch_entity(state, collection, principal, id, patch)
                    },
                )
                .delete(
                    move |State(state): State<AppState>, Extension(principal): Extension<Principal>, Path(id): Path<String>| {
                        delete_entity(state, collection, principal, id)
                    },
                ),
        )
}

#[derive(Debug, Deserialize)]
pub struct AddTaskBody {
    pub task_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddTaskResponse {
    pub chat_id: String,
    pub task_id: String,
    pub already_added: bool,
    pub available_tasks: Vec<String>,
}

async fn add_task_to_chat(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(chat_id): Path<String>,
    Json(body): Json<AddTaskBody>,
) -> ApiResult<Json<AddTaskResponse>> {
    let chats = Repository::<Chat>::new(state.store.as_ref());
    let _guard = state.chat_locks.lock(&chat_id).await;
    let mut chat = chats.get(&chat_id).await?;
    let task = Repository::<Task>::new(state.store.as_ref()).get(&body.task_id).await?;
    let added = chat.add_task(&task);
    if added {
        let mut patch = Map::new();
        patch.insert("available_tasks".into(), json!(chat.available_tasks));
        chat = chats.update(&principal, &chat_id, patch).await?;
    }
    Ok(Json(AddTaskResponse {
        chat_id,
        task_id: task.id,
        already_added: !added,
        available_tasks: chat.available_tasks,
    }))
}

async fn task_membership(
    State(state): State<AppState>,
    Path((chat_id, task_id)): Path<(String, String)>,
) -> ApiResult<Json<TaskMembership>> {
    let chat = Repository::<Chat>::new(state.store.as_ref()).get(&chat_id).await?;
    let task = Repository::<Task>::new(state.store.as_ref()).get(&task_id).await?;
    Ok(Json(views::task_membership_view(&chat, &task)))
}

/// Stores `message` and appends it to the chat history. If the chat cannot
/// be updated the stored message is removed again, so a failed submit
/// leaves nothing behind. Callers hold the chat's lock.
async fn append_to_chat(
    store: &dyn EntityStore,
    principal: &Principal,
    chat_id: &str,
    message: &Message,
) -> Result<Message, StoreError> {
    let chats = Repository::<Chat>::new(store);
    let messages = Repository::<Message>::new(store);
    let mut chat = chats.get(chat_id).await?;
    let stored = messages.create(principal, message).await?;
    chat.append_message(stored.clone());
    let mut patch = Map::new();
    patch.insert("messages".into(), json!(chat.messages));
    if let Err(err) = chats.update(principal, chat_id, patch).await {
        if let Err(cleanup) = messages.delete(principal, &stored.id).await {
            warn!(%chat_id, message_id = %stored.id, error = %cleanup, "orphaned message after failed submit");
        }
        return Err(err);
    }
    Ok(stored)
}

/// Persists a submitted draft and appends it to the chat history.
async fn submit_message(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(chat_id): Path<String>,
    Json(message): Json<Message>,
) -> ApiResult<(StatusCode, Json<Message>)> {
    let _guard = state.chat_locks.lock(&chat_id).await;
    let stored = append_to_chat(state.store.as_ref(), &principal, &chat_id, &message).await?;
    counter!("chat_references_messages_submitted_total").increment(1);
    info!(%chat_id, message_id = %stored.id, references = stored.references.len(), "message submitted");
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn chat_transcript(State(state): State<AppState>, Path(chat_id): Path<String>) -> ApiResult<String> {
    let chat = Repository::<Chat>::new(state.store.as_ref()).get(&chat_id).await?;
    Ok(views::chat_transcript(&chat, &state.labels))
}

async fn task_result(State(state): State<AppState>, Path(task_id): Path<String>) -> ApiResult<Json<TaskResultView>> {
    let task = Repository::<Task>::new(state.store.as_ref()).get(&task_id).await?;
    let mut filter = Map::new();
    filter.insert("task_id".into(), Value::String(task_id));
    let responses = Repository::<TaskResponse>::new(state.store.as_ref()).list(Some(&filter)).await?;
    Ok(Json(views::task_result_view(&task, responses.last())))
}

async fn message_card(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<MessageCardView>> {
    let message = Repository::<Message>::new(state.store.as_ref()).get(&id).await?;
    Ok(Json(views::message_card_view(&message, &state.labels)))
}

#[derive(Debug, Deserialize)]
pub struct AttachBody {
    #[serde(default)]
    pub references: ReferenceSet,
    #[serde(flatten)]
    pub request: AttachRequest,
}

async fn attach_reference(Json(body): Json<AttachBody>) -> ApiResult<Json<Resolution>> {
    let resolution = resolver::resolve_request(&body.references, body.request)?;
    counter!("chat_references_attach_total", "kind" => resolution.kind.as_str()).increment(1);
    Ok(Json(resolution))
}

#[derive(Debug, Deserialize)]
pub struct ViewBody {
    #[serde(default)]
    pub references: ReferenceSet,
    #[serde(default)]
    pub labels: Option<LabelOverrides>,
}

#[derive(Debug, Serialize)]
pub struct ReferenceViews {
    pub has_any: bool,
    pub chips: Vec<Chip>,
    pub groups: Vec<DetailGroup>,
}

async fn view_references(State(state): State<AppState>, Json(body): Json<ViewBody>) -> Json<ReferenceViews> {
    let labels = resolve_label_settings(&state.labels, body.labels.as_ref());
    Json(ReferenceViews {
        has_any: body.references.has_any(),
        chips: views::to_chip_list(&body.references, &labels),
        groups: views::to_detail_groups(&body.references, &labels),
    })
}

pub fn router(state: AppState, tokens: TokenTable) -> Router {
    let app = Collection::ALL.into_iter().fold(Router::new(), crud_routes);
    app.route("/chats/:id/tasks", post(add_task_to_chat))
        .route("/chats/:id/tasks/:task_id", get(task_membership))
        .route("/chats/:id/messages", post(submit_message))
        .route("/chats/:id/transcript", get(chat_transcript))
        .route("/tasks/:id/result", get(task_result))
        .route("/messages/:id/card", get(message_card))
        .route("/references/attach", post(attach_reference))
        .route("/references/view", post(view_references))
        .layer(middleware::from_fn_with_state(tokens, require_bearer))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState, tokens: TokenTable) -> anyhow::Result<()> {
    if tokens.is_empty() {
        warn!("no bearer tokens configured; every request will be rejected");
    }
    let app = router(state, tokens);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
