//! 笔记
//!
//! 标题和正文都为空的笔记是"空草稿"：新建时只保存在本地，不进入待推送队列，
//! 直到用户写入内容后的第一次更新。

use serde::{Deserialize, Serialize};

use crate::sync::entity::{SyncEntity, SyncMeta};
use crate::sync::patch::Field;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    #[serde(flatten)]
    pub meta: SyncMeta,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub tag_ids: Vec<String>,
    #[serde(default)]
    pub pinned: bool,
}

#[derive(Debug, Clone, Default)]
pub struct NoteDraft {
    pub title: String,
    pub body: String,
    pub tag_ids: Vec<String>,
    pub pinned: bool,
}

#[derive(Debug, Clone, Default)]
pub struct NotePatch {
    pub title: Field<String>,
    pub body: Field<String>,
    pub tag_ids: Field<Vec<String>>,
    pub pinned: Field<bool>,
    pub trashed: Field<bool>,
}

impl Note {
    pub fn is_empty_draft(&self) -> bool {
        self.title.trim().is_empty() && self.body.trim().is_empty()
    }
}

impl SyncEntity for Note {
    type Draft = NoteDraft;
    type Patch = NotePatch;

    const KIND: &'static str = "note";

    fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.meta
    }

    fn from_draft(meta: SyncMeta, draft: NoteDraft) -> Self {
        Self {
            meta,
            title: draft.title,
            body: draft.body,
            tag_ids: draft.tag_ids,
            pinned: draft.pinned,
        }
    }

    fn apply_patch(&mut self, patch: NotePatch) {
        patch.title.apply_to(&mut self.title);
        patch.body.apply_to(&mut self.body);
        patch.tag_ids.apply_to(&mut self.tag_ids);
        patch.pinned.apply_to(&mut self.pinned);
        patch.trashed.apply_to(&mut self.meta.trashed);
    }

    /// 标题去首尾空白；标签去重并保持首次出现的顺序
    fn normalize(&mut self) {
        self.title = self.title.trim().to_string();
        let mut seen = std::collections::HashSet::new();
        self.tag_ids.retain(|id| !id.is_empty() && seen.insert(id.clone()));
    }

    fn worth_syncing(&self) -> bool {
        !self.is_empty_draft()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(draft: NoteDraft) -> Note {
        let mut n = Note::from_draft(SyncMeta::new("n1".into(), 1), draft);
        n.normalize();
        n
    }

    #[test]
    fn blank_note_is_not_worth_syncing() {
        let n = note(NoteDraft {
            title: "   ".into(),
            body: "\n".into(),
            ..Default::default()
        });
        assert!(n.is_empty_draft());
        assert!(!n.worth_syncing());

        let n = note(NoteDraft {
            body: "milk".into(),
            ..Default::default()
        });
        assert!(n.worth_syncing());
    }

    #[test]
    fn normalize_dedups_tags_in_order() {
        let n = note(NoteDraft {
            title: " shopping ".into(),
            tag_ids: vec!["b".into(), "a".into(), "b".into(), "".into()],
            ..Default::default()
        });
        assert_eq!(n.title, "shopping");
        assert_eq!(n.tag_ids, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn patch_touches_only_set_fields() {
        let mut n = note(NoteDraft {
            title: "t".into(),
            body: "b".into(),
            ..Default::default()
        });
        n.apply_patch(NotePatch {
            pinned: Field::Set(true),
            ..Default::default()
        });
        assert_eq!(n.title, "t");
        assert_eq!(n.body, "b");
        assert!(n.pinned);
    }
}
