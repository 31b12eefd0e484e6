use std::future::Future;

use serde::Serialize;
use tracing::{debug, info};

use crate::entities::{FileReference, Message, Reference, ReferenceKind, StringOutput, TaskResponse, UrlReference};
use crate::error::{CoreError, Error, StoreError};
use crate::references::ReferenceSet;
use crate::resolver::{self, AttachRequest, Resolution};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DraftState {
    Empty,
    Drafting,
    Submitted,
}

/// The message being composed. Owned by exactly one composer at a time.
#[derive(Debug, Clone)]
pub struct Draft {
    state: DraftState,
    references: ReferenceSet,
}

impl Default for Draft {
    fn default() -> Self {
        Self::new()
    }
}

impl Draft {
    pub fn new() -> Self {
        Self { state: DraftState::Empty, references: ReferenceSet::default() }
    }

    pub fn state(&self) -> DraftState {
        self.state
    }

    pub fn references(&self) -> &ReferenceSet {
        &self.references
    }

    fn ensure_open(&self) -> Result<(), CoreError> {
        match self.state {
            DraftState::Submitted => Err(CoreError::DraftAlreadySubmitted),
            _ => Ok(()),
        }
    }

    /// Attaches a reference. On error nothing about the draft changes.
    pub fn add(&mut self, reference: Reference) -> Result<Resolution, CoreError> {
        self.ensure_open()?;
        let resolution = resolver::resolve(&self.references, reference)?;
        self.references = resolution.references.clone();
        self.state = DraftState::Drafting;
        Ok(resolution)
    }

    pub fn attach(&mut self, request: AttachRequest) -> Result<Resolution, CoreError> {
        self.ensure_open()?;
        self.add(resolver::normalize(request)?)
    }

    /// Detaches by id (or value). Returns whether anything was removed.
    pub fn remove(&mut self, kind: ReferenceKind, key: &str) -> Result<bool, CoreError> {
        self.ensure_open()?;
        let removed = self.references.contains(kind, key);
        self.references = self.references.remove(kind, key);
        debug!(%kind, removed, "reference detached from draft");
        Ok(removed)
    }

    pub fn add_file_reference(&mut self, file: FileReference) -> Result<Resolution, CoreError> {
        self.add(Reference::File(file))
    }

    pub fn add_task_response(&mut self, response: TaskResponse) -> Result<Resolution, CoreError> {
        self.add(Reference::TaskResponse(response))
    }

    pub fn add_url_reference(&mut self, url: UrlReference) -> Result<Resolution, CoreError> {
        self.add(Reference::UrlReference(url))
    }

    pub fn add_message_reference(&mut self, message: Message) -> Result<Resolution, CoreError> {
        self.add(Reference::Message(message))
    }

    pub fn add_string_output(&mut self, output: impl Into<String>) -> Result<Resolution, CoreError> {
        self.add(Reference::StringOutput(StringOutput(output.into())))
    }

    /// The unpersisted message this draft would submit.
    pub fn message(&self, content: impl Into<String>) -> Result<Message, CoreError> {
        self.ensure_open()?;
        let mut message = Message::user(content);
        message.references = self.references.clone();
        Ok(message)
    }

    /// Freezes the draft once the session has accepted `content` locally.
    pub fn freeze(&mut self, content: impl Into<String>) -> Result<Message, CoreError> {
        let message = self.message(content)?;
        self.state = DraftState::Submitted;
        info!(references = self.references.len(), "draft submitted");
        Ok(message)
    }

    /// Hands the message to `persist` and freezes only if it was accepted.
    /// A rejected submit leaves the draft as it was so the user can retry.
    pub async fn submit<F, Fut>(&mut self, content: impl Into<String>, persist: F) -> Result<Message, Error>
    where
        F: FnOnce(Message) -> Fut,
        Fut: Future<Output = Result<Message, StoreError>>,
    {
        let message = self.message(content)?;
        let stored = persist(message).await?;
        self.state = DraftState::Submitted;
        info!(message_id = %stored.id, references = self.references.len(), "draft submitted");
        Ok(stored)
    }
}
