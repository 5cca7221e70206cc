//! 标签

use serde::{Deserialize, Serialize};

use crate::sync::entity::{SyncEntity, SyncMeta};
use crate::sync::patch::Field;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    #[serde(flatten)]
    pub meta: SyncMeta,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TagDraft {
    pub name: String,
    pub color: Option<String>,
}

impl TagDraft {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TagPatch {
    pub name: Field<String>,
    pub color: Field<Option<String>>,
    pub trashed: Field<bool>,
}

impl Tag {
    #[cfg(test)]
    pub(crate) fn with_meta(id: &str, updated_at: i64, name: &str) -> Self {
        Self {
            meta: SyncMeta::new(id.to_string(), updated_at),
            name: name.to_string(),
            color: None,
        }
    }
}

impl SyncEntity for Tag {
    type Draft = TagDraft;
    type Patch = TagPatch;

    const KIND: &'static str = "tag";

    fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.meta
    }

    fn from_draft(meta: SyncMeta, draft: TagDraft) -> Self {
        Self {
            meta,
            name: draft.name,
            color: draft.color,
        }
    }

    fn apply_patch(&mut self, patch: TagPatch) {
        patch.name.apply_to(&mut self.name);
        patch.color.apply_to(&mut self.color);
        patch.trashed.apply_to(&mut self.meta.trashed);
    }

    fn normalize(&mut self) {
        let trimmed = self.name.trim();
        if trimmed.len() != self.name.len() {
            self.name = trimmed.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_is_flat_camel_case() {
        let mut tag = Tag::with_meta("t1", 42, "work");
        tag.meta.is_synced = true;
        let json = serde_json::to_value(&tag).unwrap();
        assert_eq!(json["id"], "t1");
        assert_eq!(json["updatedAt"], 42);
        assert_eq!(json["isSynced"], true);
        assert_eq!(json["name"], "work");

        let back: Tag = serde_json::from_value(json).unwrap();
        assert_eq!(back, tag);
    }

    #[test]
    fn missing_flags_default_to_false() {
        let tag: Tag = serde_json::from_str(r#"{"id":"t2","updatedAt":1,"name":"x"}"#).unwrap();
        assert!(!tag.meta.is_synced);
        assert!(!tag.meta.trashed);
        assert_eq!(tag.color, None);
    }
}
