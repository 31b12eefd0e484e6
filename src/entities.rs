use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::navigation::ViewTarget;
use crate::references::ReferenceSet;
use crate::settings::LabelSettings;

/// Opaque identifier assigned by the persistence layer. Empty means unpersisted.
pub type EntityId = String;

/// The closed set of things a message can reference.
///
/// Declaration order is the display order used by every aggregation view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ReferenceKind {
    Message,
    File,
    TaskResponse,
    #[serde(rename = "URLReference")]
    UrlReference,
    StringOutput,
}

impl ReferenceKind {
    pub const ALL: [ReferenceKind; 5] = [
        ReferenceKind::Message,
        ReferenceKind::File,
        ReferenceKind::TaskResponse,
        ReferenceKind::UrlReference,
        ReferenceKind::StringOutput,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReferenceKind::Message => "Message",
            ReferenceKind::File => "File",
            ReferenceKind::TaskResponse => "TaskResponse",
            ReferenceKind::UrlReference => "URLReference",
            ReferenceKind::StringOutput => "StringOutput",
        }
    }

    /// Name of the sub-collection inside a [`ReferenceSet`].
    pub fn group(self) -> &'static str {
        match self {
            ReferenceKind::Message => "messages",
            ReferenceKind::File => "files",
            ReferenceKind::TaskResponse => "task_responses",
            ReferenceKind::UrlReference => "url_references",
            ReferenceKind::StringOutput => "string_outputs",
        }
    }

    /// Prefix shown in front of the label on a reference chip.
    pub fn chip_prefix(self) -> &'static str {
        match self {
            ReferenceKind::Message => "Message",
            ReferenceKind::File => "File",
            ReferenceKind::TaskResponse => "Task",
            ReferenceKind::UrlReference => "URL",
            ReferenceKind::StringOutput => "Output",
        }
    }

    /// Everything except string outputs is identified by a persisted id.
    pub fn has_identity(self) -> bool {
        !matches!(self, ReferenceKind::StringOutput)
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferenceKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Message" | "messages" => Ok(ReferenceKind::Message),
            "File" | "files" => Ok(ReferenceKind::File),
            "TaskResponse" | "task_responses" => Ok(ReferenceKind::TaskResponse),
            "URLReference" | "url_references" | "search_results" => Ok(ReferenceKind::UrlReference),
            "StringOutput" | "string_outputs" | "string_output" => Ok(ReferenceKind::StringOutput),
            other => Err(CoreError::UnknownReferenceKind(other.to_string())),
        }
    }
}

/// Catalog entry shared by every referenceable entity shape.
pub trait Referenceable: Clone {
    const KIND: ReferenceKind;

    /// Dedup key: the id for identity-bearing kinds, the value otherwise.
    fn key(&self) -> &str;

    /// Compact label, without the chip prefix.
    fn label(&self, settings: &LabelSettings) -> String;

    fn identity(&self) -> Option<&str> {
        Self::KIND.has_identity().then(|| self.key())
    }

    fn view_target(&self) -> Option<ViewTarget> {
        self.identity().map(|id| ViewTarget { kind: Self::KIND, id: id.to_string() })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Assistant,
    System,
    Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GeneratedBy {
    #[default]
    User,
    Llm,
    Tool,
}

/// What a message mainly carries; decides how it is rendered as context text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    Audio,
    Video,
    File,
    TaskResponse,
    Multiple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Complete,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Complete => "complete",
            TaskStatus::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: EntityId,
    #[serde(default)]
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub generated_by: GeneratedBy,
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_name: Option<String>,
    /// Process that produced the message, usually a task or tool name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default)]
    pub references: ReferenceSet,
    #[serde(default)]
    pub creation_metadata: Map<String, Value>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(),
            role: Role::User,
            content: content.into(),
            generated_by: GeneratedBy::User,
            message_type: MessageType::Text,
            assistant_name: None,
            step: None,
            references: ReferenceSet::default(),
            creation_metadata: Map::new(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReference {
    #[serde(default)]
    pub id: EntityId,
    pub filename: String,
    #[serde(default)]
    pub storage_ref: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResponse {
    #[serde(default)]
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<EntityId>,
    pub task_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_description: Option<String>,
    pub status: TaskStatus,
    pub result_code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_outputs: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_diagnostic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_inputs: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_metrics: Option<Map<String, Value>>,
    /// Steps the task went through, oldest first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_history: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlReference {
    #[serde(default)]
    pub id: EntityId,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// A bare task output string. Equal values are the same reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StringOutput(pub String);

impl From<&str> for StringOutput {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// An invocable unit of work; see [`TaskResponse`] for a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub id: EntityId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters_schema: Value,
}

impl Referenceable for Message {
    const KIND: ReferenceKind = ReferenceKind::Message;
    fn key(&self) -> &str { &self.id }
    fn label(&self, settings: &LabelSettings) -> String { settings.truncate(&self.content) }
}

impl Referenceable for FileReference {
    const KIND: ReferenceKind = ReferenceKind::File;
    fn key(&self) -> &str { &self.id }
    fn label(&self, _: &LabelSettings) -> String { self.filename.clone() }
}

impl Referenceable for TaskResponse {
    const KIND: ReferenceKind = ReferenceKind::TaskResponse;
    fn key(&self) -> &str { &self.id }
    fn label(&self, _: &LabelSettings) -> String { self.task_name.clone() }
}

impl Referenceable for UrlReference {
    const KIND: ReferenceKind = ReferenceKind::UrlReference;
    fn key(&self) -> &str { &self.id }
    fn label(&self, _: &LabelSettings) -> String { self.url.clone() }
}

impl Referenceable for StringOutput {
    const KIND: ReferenceKind = ReferenceKind::StringOutput;
    fn key(&self) -> &str { &self.0 }
    fn label(&self, settings: &LabelSettings) -> String { settings.truncate(&self.0) }
}

/// One attached entity, tagged with its kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "entity")]
pub enum Reference {
    Message(Message),
    File(FileReference),
    TaskResponse(TaskResponse),
    #[serde(rename = "URLReference")]
    UrlReference(UrlReference),
    StringOutput(StringOutput),
}

impl Reference {
    /// Decodes a raw `(kind tag, entity)` pair as it arrives from an attach surface.
    pub fn from_tagged(tag: &str, entity: Value) -> Result<Self, CoreError> {
        let kind: ReferenceKind = tag.parse()?;
        let malformed = |source| CoreError::MalformedEntity { kind, source };
        let reference = match kind {
            ReferenceKind::Message => Reference::Message(serde_json::from_value(entity).map_err(malformed)?),
            ReferenceKind::File => Reference::File(serde_json::from_value(entity).map_err(malformed)?),
            ReferenceKind::TaskResponse => Reference::TaskResponse(serde_json::from_value(entity).map_err(malformed)?),
            ReferenceKind::UrlReference => Reference::UrlReference(serde_json::from_value(entity).map_err(malformed)?),
            ReferenceKind::StringOutput => Reference::StringOutput(serde_json::from_value(entity).map_err(malformed)?),
        };
        Ok(reference)
    }

    pub fn kind(&self) -> ReferenceKind {
        match self {
            Reference::Message(_) => ReferenceKind::Message,
            Reference::File(_) => ReferenceKind::File,
            Reference::TaskResponse(_) => ReferenceKind::TaskResponse,
            Reference::UrlReference(_) => ReferenceKind::UrlReference,
            Reference::StringOutput(_) => ReferenceKind::StringOutput,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Reference::Message(m) => m.key(),
            Reference::File(f) => f.key(),
            Reference::TaskResponse(t) => t.key(),
            Reference::UrlReference(u) => u.key(),
            Reference::StringOutput(s) => s.key(),
        }
    }

    pub fn label(&self, settings: &LabelSettings) -> String {
        match self {
            Reference::Message(m) => m.label(settings),
            Reference::File(f) => f.label(settings),
            Reference::TaskResponse(t) => t.label(settings),
            Reference::UrlReference(u) => u.label(settings),
            Reference::StringOutput(s) => s.label(settings),
        }
    }

    pub fn view_target(&self) -> Option<ViewTarget> {
        match self {
            Reference::Message(m) => m.view_target(),
            Reference::File(f) => f.view_target(),
            Reference::TaskResponse(t) => t.view_target(),
            Reference::UrlReference(u) => u.view_target(),
            Reference::StringOutput(s) => s.view_target(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn labels_follow_catalog_rules() {
        let settings = LabelSettings::default();
        let mut msg = Message::user("The quarterly numbers look off by a few percent");
        msg.id = "m1".into();
        assert_eq!(msg.label(&settings), "The quarterly number...");

        let short = Message { content: "hi".into(), ..msg.clone() };
        assert_eq!(short.label(&settings), "hi");

        let file = FileReference { id: "f1".into(), filename: "report.pdf".into(), storage_ref: "s3://x".into() };
        assert_eq!(file.label(&settings), "report.pdf");

        let url = UrlReference { id: "u1".into(), url: "https://example.com/a".into(), title: None };
        assert_eq!(url.label(&settings), "https://example.com/a");

        assert_eq!(StringOutput::from("exactly twenty chars").label(&settings), "exactly twenty chars");
        assert_eq!(StringOutput::from("twenty-one characters").label(&settings), "twenty-one character...");
    }

    #[test]
    fn only_string_outputs_lack_identity() {
        for kind in ReferenceKind::ALL {
            assert_eq!(kind.has_identity(), kind != ReferenceKind::StringOutput);
        }
        assert!(StringOutput::from("abc").view_target().is_none());
    }

    #[test]
    fn kind_tags_accept_canonical_names_and_group_aliases() {
        for kind in ReferenceKind::ALL {
            assert_eq!(kind.as_str().parse::<ReferenceKind>().unwrap(), kind);
            assert_eq!(kind.group().parse::<ReferenceKind>().unwrap(), kind);
        }
        assert_eq!("search_results".parse::<ReferenceKind>().unwrap(), ReferenceKind::UrlReference);
        let err = "Agent".parse::<ReferenceKind>().unwrap_err();
        assert!(matches!(err, CoreError::UnknownReferenceKind(tag) if tag == "Agent"));
    }

    #[test]
    fn from_tagged_decodes_each_kind() {
        let r = Reference::from_tagged("File", json!({"id": "f1", "filename": "a.txt"})).unwrap();
        assert_eq!(r.kind(), ReferenceKind::File);
        assert_eq!(r.key(), "f1");

        let r = Reference::from_tagged("StringOutput", json!("plain text")).unwrap();
        assert_eq!(r, Reference::StringOutput(StringOutput::from("plain text")));

        let r = Reference::from_tagged("TaskResponse", json!({
            "id": "t1", "task_name": "Summarize", "status": "complete", "result_code": 0
        })).unwrap();
        assert_eq!(r.view_target(), Some(ViewTarget { kind: ReferenceKind::TaskResponse, id: "t1".into() }));

        let err = Reference::from_tagged("File", json!({"id": "f1"})).unwrap_err();
        assert!(matches!(err, CoreError::MalformedEntity { kind: ReferenceKind::File, .. }));
    }

    #[test]
    fn message_requires_content() {
        let err = serde_json::from_value::<Message>(json!({ "message": "authentication required" }));
        assert!(err.is_err());

        let m: Message = serde_json::from_value(json!({ "content": "hi", "type": "task_response" })).unwrap();
        assert_eq!(m.message_type, MessageType::TaskResponse);
        assert_eq!(m.role, Role::User);
        assert_eq!(serde_json::to_value(&m).unwrap()["type"], "task_response");
    }

    #[test]
    fn reference_serializes_with_kind_tag() {
        let r = Reference::UrlReference(UrlReference { id: "u1".into(), url: "https://a.b".into(), title: None });
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["kind"], "URLReference");
        assert_eq!(v["entity"]["url"], "https://a.b");
        let back: Reference = serde_json::from_value(v).unwrap();
        assert_eq!(back, r);
    }
}
