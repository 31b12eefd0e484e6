use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::draft::Draft;
use crate::entities::{EntityId, Message, Task};

/// A chat session: its message history and the tasks the assistant may call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    #[serde(default)]
    pub id: EntityId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Ordered, never holds the same task id twice.
    #[serde(default)]
    pub available_tasks: Vec<EntityId>,
}

impl Chat {
    pub fn is_task_in_chat(&self, task_id: &str) -> bool {
        self.available_tasks.iter().any(|id| id == task_id)
    }

    /// Makes `task` callable from this chat. Returns false if it already was.
    pub fn add_task(&mut self, task: &Task) -> bool {
        if self.is_task_in_chat(&task.id) {
            return false;
        }
        self.available_tasks.push(task.id.clone());
        debug!(chat_id = %self.id, task_id = %task.id, "task added to chat");
        true
    }

    /// Drops duplicate task ids, keeping the first occurrence.
    pub fn normalize_tasks(&mut self) {
        let mut seen = Vec::with_capacity(self.available_tasks.len());
        self.available_tasks.retain(|id| {
            if seen.contains(id) {
                false
            } else {
                seen.push(id.clone());
                true
            }
        });
    }

    pub fn append_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// A fresh composer draft for the next message in this chat.
    pub fn start_draft(&self) -> Draft {
        Draft::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draft::DraftState;
    use serde_json::json;

    fn task(id: &str) -> Task {
        Task { id: id.into(), name: id.into(), description: None, parameters_schema: json!({}) }
    }

    #[test]
    fn adding_a_task_twice_keeps_one_entry() {
        let mut chat = Chat { id: "c1".into(), ..Chat::default() };
        assert!(chat.add_task(&task("t1")));
        assert!(!chat.add_task(&task("t1")));
        assert!(chat.add_task(&task("t2")));
        assert_eq!(chat.available_tasks, ["t1", "t2"]);
    }

    #[test]
    fn each_draft_starts_empty_and_lands_in_history() {
        let mut chat = Chat { id: "c1".into(), ..Chat::default() };
        let mut draft = chat.start_draft();
        assert_eq!(draft.state(), DraftState::Empty);
        draft.add_string_output("42").unwrap();
        chat.append_message(draft.freeze("the answer").unwrap());

        let next = chat.start_draft();
        assert_eq!(next.state(), DraftState::Empty);
        assert!(!next.references().has_any());
        assert_eq!(chat.messages.len(), 1);
        assert_eq!(chat.messages[0].references.string_outputs.len(), 1);
    }

    #[test]
    fn normalize_tasks_removes_duplicates_in_order() {
        let mut chat = Chat { available_tasks: vec!["b".into(), "a".into(), "b".into(), "a".into()], ..Chat::default() };
        chat.normalize_tasks();
        assert_eq!(chat.available_tasks, ["b", "a"]);
    }
}
