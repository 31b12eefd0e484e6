use serde::{Deserialize, Deserializer, Serialize};

use crate::entities::{
    FileReference, Message, Reference, ReferenceKind, Referenceable, StringOutput, TaskResponse, UrlReference,
};

/// Per-kind, ordered, deduplicated references attached to a message.
///
/// Every operation returns a new set and leaves `self` untouched, so a set
/// already rendered elsewhere never changes under its viewers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSet {
    #[serde(default, deserialize_with = "nullable_vec", skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
    #[serde(default, deserialize_with = "nullable_vec", skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileReference>,
    #[serde(default, deserialize_with = "nullable_vec", skip_serializing_if = "Vec::is_empty")]
    pub task_responses: Vec<TaskResponse>,
    #[serde(
        default,
        alias = "search_results",
        deserialize_with = "nullable_vec",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub url_references: Vec<UrlReference>,
    #[serde(default, deserialize_with = "nullable_vec", skip_serializing_if = "Vec::is_empty")]
    pub string_outputs: Vec<StringOutput>,
}

// `null` and a missing field both mean "no references of this kind".
fn nullable_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<Vec<T>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

fn with_item<T: Referenceable>(items: &[T], item: T) -> Option<Vec<T>> {
    if items.iter().any(|existing| existing.key() == item.key()) {
        return None;
    }
    let mut out = items.to_vec();
    out.push(item);
    Some(out)
}

fn without_key<T: Referenceable>(items: &[T], key: &str) -> Option<Vec<T>> {
    let pos = items.iter().position(|existing| existing.key() == key)?;
    let mut out = items.to_vec();
    out.remove(pos);
    Some(out)
}

fn union<T: Referenceable>(left: &[T], right: &[T]) -> Vec<T> {
    let mut out = left.to_vec();
    for item in right {
        if !out.iter().any(|existing| existing.key() == item.key()) {
            out.push(item.clone());
        }
    }
    out
}

impl ReferenceSet {
    pub fn has_any(&self) -> bool {
        !(self.messages.is_empty()
            && self.files.is_empty()
            && self.task_responses.is_empty()
            && self.url_references.is_empty()
            && self.string_outputs.is_empty())
    }

    pub fn len(&self) -> usize {
        self.messages.len()
            + self.files.len()
            + self.task_responses.len()
            + self.url_references.len()
            + self.string_outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_any()
    }

    /// Existence check by id, or by value for string outputs.
    pub fn contains(&self, kind: ReferenceKind, key: &str) -> bool {
        fn has<T: Referenceable>(items: &[T], key: &str) -> bool {
            items.iter().any(|i| i.key() == key)
        }
        match kind {
            ReferenceKind::Message => has(&self.messages, key),
            ReferenceKind::File => has(&self.files, key),
            ReferenceKind::TaskResponse => has(&self.task_responses, key),
            ReferenceKind::UrlReference => has(&self.url_references, key),
            ReferenceKind::StringOutput => has(&self.string_outputs, key),
        }
    }

    /// Appends `reference` unless an entry with the same key is present.
    /// The flag is true when the set actually grew.
    pub fn attach(&self, reference: Reference) -> (Self, bool) {
        let mut next = self.clone();
        let grew = match reference {
            Reference::Message(m) => with_item(&self.messages, m).map(|v| next.messages = v),
            Reference::File(f) => with_item(&self.files, f).map(|v| next.files = v),
            Reference::TaskResponse(t) => with_item(&self.task_responses, t).map(|v| next.task_responses = v),
            Reference::UrlReference(u) => with_item(&self.url_references, u).map(|v| next.url_references = v),
            Reference::StringOutput(s) => with_item(&self.string_outputs, s).map(|v| next.string_outputs = v),
        }
        .is_some();
        (next, grew)
    }

    pub fn add(&self, reference: Reference) -> Self {
        self.attach(reference).0
    }

    /// Drops the entry with the given id (or value); absent entries are ignored.
    pub fn remove(&self, kind: ReferenceKind, key: &str) -> Self {
        let mut next = self.clone();
        match kind {
            ReferenceKind::Message => without_key(&self.messages, key).map(|v| next.messages = v),
            ReferenceKind::File => without_key(&self.files, key).map(|v| next.files = v),
            ReferenceKind::TaskResponse => without_key(&self.task_responses, key).map(|v| next.task_responses = v),
            ReferenceKind::UrlReference => without_key(&self.url_references, key).map(|v| next.url_references = v),
            ReferenceKind::StringOutput => without_key(&self.string_outputs, key).map(|v| next.string_outputs = v),
        };
        next
    }

    /// Per-kind union: `self`'s entries in order, then `other`'s new ones.
    pub fn merge(&self, other: &ReferenceSet) -> Self {
        Self {
            messages: union(&self.messages, &other.messages),
            files: union(&self.files, &other.files),
            task_responses: union(&self.task_responses, &other.task_responses),
            url_references: union(&self.url_references, &other.url_references),
            string_outputs: union(&self.string_outputs, &other.string_outputs),
        }
    }

    /// All references in display order.
    pub fn iter(&self) -> impl Iterator<Item = Reference> + '_ {
        self.messages
            .iter()
            .cloned()
            .map(Reference::Message)
            .chain(self.files.iter().cloned().map(Reference::File))
            .chain(self.task_responses.iter().cloned().map(Reference::TaskResponse))
            .chain(self.url_references.iter().cloned().map(Reference::UrlReference))
            .chain(self.string_outputs.iter().cloned().map(Reference::StringOutput))
    }
}

#[cfg(test)]
pub(crate) mod strategies {
    use super::*;
    use crate::entities::TaskStatus;
    use proptest::prelude::*;

    // Small id pools so generated sequences collide often.
    pub fn arb_reference() -> impl Strategy<Value = Reference> {
        prop_oneof![
            ("m[0-3]", ".{0,30}").prop_map(|(id, content)| {
                let mut m = Message::user(content);
                m.id = id;
                Reference::Message(m)
            }),
            ("f[0-3]", "[a-z]{1,8}\\.pdf").prop_map(|(id, filename)| {
                Reference::File(FileReference { id, filename, storage_ref: String::new() })
            }),
            ("t[0-3]", "[A-Z][a-z]{2,8}").prop_map(|(id, task_name)| {
                Reference::TaskResponse(TaskResponse {
                    id,
                    task_id: None,
                    task_name,
                    task_description: None,
                    status: TaskStatus::Complete,
                    result_code: 0,
                    task_outputs: None,
                    result_diagnostic: None,
                    task_inputs: None,
                    usage_metrics: None,
                    execution_history: None,
                })
            }),
            ("u[0-3]", "[a-z]{1,6}").prop_map(|(id, host)| {
                Reference::UrlReference(UrlReference { id, url: format!("https://{host}.com"), title: None })
            }),
            "[ab]{0,3}".prop_map(|s| Reference::StringOutput(StringOutput(s))),
        ]
    }

    pub fn arb_set() -> impl Strategy<Value = ReferenceSet> {
        prop::collection::vec(arb_reference(), 0..12)
            .prop_map(|refs| refs.into_iter().fold(ReferenceSet::default(), |set, r| set.add(r)))
    }
}
