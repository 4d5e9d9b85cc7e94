use std::collections::HashSet;

use shared::{domain::TalkId, error::ApiError};
use storage::{Storage, StoredTag};
use tracing::debug;

/// Tag names are case-folded and nothing else: surrounding blanks and
/// punctuation are kept as submitted.
pub fn normalize(name: &str) -> String {
    name.to_uppercase()
}

/// Returns the tag for `name`, creating it on first use.
pub async fn resolve(storage: &Storage, name: &str) -> anyhow::Result<StoredTag> {
    let normalized = normalize(name);
    if let Some(existing) = storage.find_tag(&normalized).await? {
        return Ok(existing);
    }
    let created = storage.resolve_tag(&normalized).await?;
    debug!(tag_id = created.tag_id.0, name = %created.name, "tag resolved");
    Ok(created)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TagDelta {
    pub removed: Vec<StoredTag>,
    pub added: Vec<StoredTag>,
}

impl TagDelta {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

/// Brings the talk's tag set in line with a comma separated list.
///
/// Both sides of the comparison use the normalized form, so resubmitting
/// `go` for a talk tagged `GO` is a no-op rather than a remove and re-add.
pub async fn reconcile(
    storage: &Storage,
    talk_id: TalkId,
    submitted: &str,
) -> Result<TagDelta, ApiError> {
    if submitted.is_empty() {
        return Err(ApiError::invalid_field("tags", "required"));
    }

    let wanted: Vec<String> = submitted.split(',').map(normalize).collect();
    let wanted_set: HashSet<&str> = wanted.iter().map(String::as_str).collect();

    let current = storage.tags_for_talk(talk_id).await.map_err(crate::internal)?;
    let current_names: HashSet<&str> = current.iter().map(|tag| tag.name.as_str()).collect();

    let removed: Vec<StoredTag> = current
        .iter()
        .filter(|tag| !wanted_set.contains(tag.name.as_str()))
        .cloned()
        .collect();

    let mut seen = HashSet::new();
    let mut added = Vec::new();
    for name in &wanted {
        if current_names.contains(name.as_str()) || !seen.insert(name.as_str()) {
            continue;
        }
        added.push(resolve(storage, name).await.map_err(crate::internal)?);
    }

    let delta = TagDelta { removed, added };
    if delta.is_empty() {
        return Ok(delta);
    }

    let remove_ids: Vec<_> = delta.removed.iter().map(|tag| tag.tag_id).collect();
    let add_ids: Vec<_> = delta.added.iter().map(|tag| tag.tag_id).collect();
    storage
        .apply_tag_delta(talk_id, &remove_ids, &add_ids)
        .await
        .map_err(crate::internal)?;

    debug!(
        talk_id = talk_id.0,
        removed = ?delta.removed.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
        added = ?delta.added.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
        "talk tags reconciled"
    );
    Ok(delta)
}
