use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::entities::{FileReference, Message, Reference, ReferenceKind, TaskResponse, UrlReference};
use crate::error::{CoreError, StoreError};
use crate::navigation::ViewTarget;
use crate::references::ReferenceSet;
use crate::storage::{EntityStore, Repository};

/// A raw attach request: whatever the sidebar, a drop target or a caller handed us.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachRequest {
    pub kind: String,
    pub entity: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub references: ReferenceSet,
    /// False when the entity was already attached.
    pub was_new: bool,
    pub kind: ReferenceKind,
    pub view_target: Option<ViewTarget>,
}

/// Validates the tag and decodes the entity into its typed shape.
pub fn normalize(request: AttachRequest) -> Result<Reference, CoreError> {
    Reference::from_tagged(&request.kind, request.entity)
}

/// Attaches a typed reference to `set`. `set` itself is left as it was.
pub fn resolve(set: &ReferenceSet, reference: Reference) -> Result<Resolution, CoreError> {
    let kind = reference.kind();
    if kind.has_identity() && reference.key().trim().is_empty() {
        return Err(CoreError::MissingIdentity { kind });
    }
    let view_target = reference.view_target();
    let (references, was_new) = set.attach(reference);
    debug!(%kind, was_new, "reference resolved");
    Ok(Resolution { references, was_new, kind, view_target })
}

pub fn resolve_request(set: &ReferenceSet, request: AttachRequest) -> Result<Resolution, CoreError> {
    resolve(set, normalize(request)?)
}

/// Fetches the full entity a view target points at.
pub async fn expand(store: &dyn EntityStore, target: &ViewTarget) -> Result<Reference, StoreError> {
    let id = target.id.as_str();
    let reference = match target.kind {
        ReferenceKind::Message => Reference::Message(Repository::<Message>::new(store).get(id).await?),
        ReferenceKind::File => Reference::File(Repository::<FileReference>::new(store).get(id).await?),
        ReferenceKind::TaskResponse => Reference::TaskResponse(Repository::<TaskResponse>::new(store).get(id).await?),
        ReferenceKind::UrlReference => Reference::UrlReference(Repository::<UrlReference>::new(store).get(id).await?),
        // String outputs are never navigable, so nothing is stored under this target.
        ReferenceKind::StringOutput => return Err(StoreError::not_found(target.kind.group(), id)),
    };
    Ok(reference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Principal;
    use crate::storage::SqliteEntityStore;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn unknown_kind_is_rejected() {
        let err = resolve_request(&ReferenceSet::default(), AttachRequest { kind: "Agent".into(), entity: json!({}) })
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownReferenceKind(_)));
    }

    #[test]
    fn unpersisted_entities_cannot_be_referenced() {
        let req = AttachRequest { kind: "File".into(), entity: json!({"filename": "draft.txt"}) };
        let err = resolve_request(&ReferenceSet::default(), req).unwrap_err();
        assert!(matches!(err, CoreError::MissingIdentity { kind: ReferenceKind::File }));
    }

    #[test]
    fn string_outputs_need_no_identity_and_have_no_target() {
        let req = AttachRequest { kind: "string_output".into(), entity: json!("") };
        let res = resolve_request(&ReferenceSet::default(), req).unwrap();
        assert!(res.was_new);
        assert_eq!(res.view_target, None);
    }

    #[test]
    fn reattach_reports_not_new_and_keeps_set() {
        let req = || AttachRequest { kind: "URLReference".into(), entity: json!({"id": "u1", "url": "https://a.io"}) };
        let first = resolve_request(&ReferenceSet::default(), req()).unwrap();
        assert!(first.was_new);
        assert_eq!(first.view_target, Some(ViewTarget { kind: ReferenceKind::UrlReference, id: "u1".into() }));
        let second = resolve_request(&first.references, req()).unwrap();
        assert!(!second.was_new);
        assert_eq!(second.references, first.references);
    }

    #[tokio::test]
    async fn expand_round_trips_an_attached_file() {
        let dir = tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("test.db").to_string_lossy());
        let store = SqliteEntityStore::initialize(Some(url)).await.unwrap();
        let alice = Principal("alice".into());
        let file = Repository::<FileReference>::new(&store)
            .create(&alice, &FileReference { id: String::new(), filename: "report.pdf".into(), storage_ref: "blob/1".into() })
            .await
            .unwrap();

        let res = resolve(&ReferenceSet::default(), Reference::File(file.clone())).unwrap();
        let target = res.view_target.unwrap();
        let expanded = expand(&store, &target).await.unwrap();
        assert_eq!(expanded, Reference::File(file));

        let missing = ViewTarget { kind: ReferenceKind::Message, id: "nope".into() };
        assert!(matches!(expand(&store, &missing).await, Err(StoreError::NotFound { .. })));
    }
}
