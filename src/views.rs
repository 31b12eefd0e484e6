//! Pure projections of reference sets, tasks and messages into view models.
//!
//! Nothing here fails: absent optional fields become [`PLACEHOLDER`].

use serde::Serialize;

use crate::entities::{
    FileReference, GeneratedBy, Message, MessageType, Reference, ReferenceKind, Referenceable, Task, TaskResponse,
};
use crate::navigation::ViewTarget;
use crate::references::ReferenceSet;
use crate::session::Chat;
use crate::settings::LabelSettings;

pub const PLACEHOLDER: &str = "N/A";
pub const NO_REFERENCES: &str = "No references";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chip {
    pub kind: ReferenceKind,
    pub label: String,
    pub view_target: Option<ViewTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetailGroup {
    pub group: &'static str,
    pub kind: ReferenceKind,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaskMembership {
    pub already_added: bool,
}

fn chips<'a, T: Referenceable>(items: &'a [T], settings: &'a LabelSettings) -> impl Iterator<Item = Chip> + 'a {
    items.iter().map(move |item| Chip {
        kind: T::KIND,
        label: format!("{}: {}", T::KIND.chip_prefix(), item.label(settings)),
        view_target: item.view_target(),
    })
}

fn labels<T: Referenceable>(items: &[T], settings: &LabelSettings) -> Vec<String> {
    items.iter().map(|item| item.label(settings)).collect()
}

/// Compact chips in the fixed kind order. Empty input gives an empty list.
pub fn to_chip_list(set: &ReferenceSet, settings: &LabelSettings) -> Vec<Chip> {
    chips(&set.messages, settings)
        .chain(chips(&set.files, settings))
        .chain(chips(&set.task_responses, settings))
        .chain(chips(&set.url_references, settings))
        .chain(chips(&set.string_outputs, settings))
        .collect()
}

/// One label list per non-empty kind, in the fixed kind order.
pub fn to_detail_groups(set: &ReferenceSet, settings: &LabelSettings) -> Vec<DetailGroup> {
    ReferenceKind::ALL
        .into_iter()
        .map(|kind| {
            let labels = match kind {
                ReferenceKind::Message => labels(&set.messages, settings),
                ReferenceKind::File => labels(&set.files, settings),
                ReferenceKind::TaskResponse => labels(&set.task_responses, settings),
                ReferenceKind::UrlReference => labels(&set.url_references, settings),
                ReferenceKind::StringOutput => labels(&set.string_outputs, settings),
            };
            DetailGroup { group: kind.group(), kind, labels }
        })
        .filter(|g| !g.labels.is_empty())
        .collect()
}

pub fn detail_group<'a>(groups: &'a [DetailGroup], kind: ReferenceKind) -> Option<&'a DetailGroup> {
    groups.iter().find(|g| g.kind == kind)
}

pub fn task_membership_view(chat: &Chat, task: &Task) -> TaskMembership {
    TaskMembership { already_added: chat.is_task_in_chat(&task.id) }
}

/// Task results browser entry: a task and its most recent execution, if any.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskResultView {
    pub task_name: String,
    pub description: String,
    pub status: String,
    pub result_code: String,
    pub outputs: String,
    pub diagnostic: String,
    pub usage_metrics: String,
    pub view_target: Option<ViewTarget>,
}

fn json_or_placeholder<T: Serialize>(value: Option<&T>) -> String {
    value
        .and_then(|v| serde_json::to_string(v).ok())
        .unwrap_or_else(|| PLACEHOLDER.to_string())
}

pub fn task_result_view(task: &Task, latest: Option<&TaskResponse>) -> TaskResultView {
    let description = latest
        .and_then(|r| r.task_description.clone())
        .or_else(|| task.description.clone())
        .unwrap_or_else(|| PLACEHOLDER.to_string());
    match latest {
        Some(response) => TaskResultView {
            task_name: response.task_name.clone(),
            description,
            status: response.status.to_string(),
            result_code: response.result_code.to_string(),
            outputs: json_or_placeholder(response.task_outputs.as_ref()),
            diagnostic: response.result_diagnostic.clone().unwrap_or_else(|| PLACEHOLDER.to_string()),
            usage_metrics: json_or_placeholder(response.usage_metrics.as_ref()),
            view_target: response.view_target(),
        },
        None => TaskResultView {
            task_name: task.name.clone(),
            description,
            status: PLACEHOLDER.to_string(),
            result_code: PLACEHOLDER.to_string(),
            outputs: PLACEHOLDER.to_string(),
            diagnostic: PLACEHOLDER.to_string(),
            usage_metrics: PLACEHOLDER.to_string(),
            view_target: None,
        },
    }
}

/// Everything the message card dialog shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageCardView {
    pub title: String,
    pub content: String,
    pub assistant: String,
    pub generated_by: String,
    pub references: Vec<Chip>,
    pub references_summary: Option<String>,
    pub metadata: String,
    pub created_at: String,
}

pub fn message_card_view(message: &Message, settings: &LabelSettings) -> MessageCardView {
    let references = to_chip_list(&message.references, settings);
    let references_summary = references.is_empty().then(|| NO_REFERENCES.to_string());
    MessageCardView {
        title: enum_name(&message.role),
        content: message.content.clone(),
        assistant: message.assistant_name.clone().unwrap_or_else(|| PLACEHOLDER.to_string()),
        generated_by: enum_name(&message.generated_by),
        references,
        references_summary,
        metadata: serde_json::to_string_pretty(&message.creation_metadata).unwrap_or_else(|_| "{}".into()),
        created_at: message.created_at.to_rfc3339(),
    }
}

/// One entry per non-empty kind, e.g. `files: report.pdf, notes.txt`.
pub fn references_summary(set: &ReferenceSet, settings: &LabelSettings) -> String {
    let groups = to_detail_groups(set, settings);
    if groups.is_empty() {
        return NO_REFERENCES.to_string();
    }
    groups
        .iter()
        .map(|g| format!("{}: {}", g.group, g.labels.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Full text of every reference, in display order.
pub fn references_detail(set: &ReferenceSet) -> String {
    if !set.has_any() {
        return NO_REFERENCES.to_string();
    }
    set.iter().map(|r| reference_text(&r)).collect::<Vec<_>>().join("\n\n")
}

fn reference_text(reference: &Reference) -> String {
    match reference {
        Reference::Message(m) => format!("Message from {}: {}", enum_name(&m.role), m.content),
        Reference::File(f) => file_text(f),
        Reference::TaskResponse(t) => task_response_text(t),
        Reference::UrlReference(u) => match &u.title {
            Some(title) => format!("URL: {} ({})", u.url, title),
            None => format!("URL: {}", u.url),
        },
        Reference::StringOutput(s) => format!("Output: {}", s.0),
    }
}

fn file_text(file: &FileReference) -> String {
    format!("File: {}", file.filename)
}

pub fn task_response_text(response: &TaskResponse) -> String {
    format!(
        "{}: {}\nTask Output:\n{}",
        response.task_name,
        response.task_description.as_deref().unwrap_or(PLACEHOLDER),
        json_or_placeholder(response.task_outputs.as_ref()),
    )
}

/// Renders a message as a model sees it in the chat history.
pub fn message_context_text(message: &Message, settings: &LabelSettings) -> String {
    let role = enum_name(&message.role);
    let speaker = match message.assistant_name.as_deref().filter(|n| !n.is_empty()) {
        Some(name) => format!("{} ({})", role, name),
        None => role.clone(),
    };
    let mut parts = Vec::new();
    match message.message_type {
        MessageType::Image | MessageType::Audio | MessageType::Video | MessageType::File => {
            parts.push(format!("{}: {}", role, message.content));
            parts.extend(message.references.files.iter().map(file_text));
        }
        MessageType::Text => {
            parts.push(format!("{}: {}", speaker, message.content));
            if message.references.has_any() {
                parts.push(format!("References: {}", references_summary(&message.references, settings)));
            }
        }
        MessageType::TaskResponse => {
            let generated_by = match message.generated_by {
                GeneratedBy::Tool => String::new(),
                other => format!(" (generated by {})", enum_name(&other)),
            };
            let step = message.step.as_deref().unwrap_or_default();
            parts.push(format!("{} - Step: {}{}: {}", role, step, generated_by, message.content));
            parts.extend(message.references.task_responses.iter().map(task_response_text));
        }
        MessageType::Multiple => {
            parts.push(format!("{}: {}", speaker, message.content));
            parts.push(references_detail(&message.references));
        }
    }
    parts.join("\n")
}

/// The whole chat history as context text, one block per message.
pub fn chat_transcript(chat: &Chat, settings: &LabelSettings) -> String {
    chat.messages
        .iter()
        .map(|m| message_context_text(m, settings))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn enum_name<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        _ => PLACEHOLDER.to_string(),
    }
}
