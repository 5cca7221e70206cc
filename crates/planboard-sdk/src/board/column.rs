//! 看板列

use serde::{Deserialize, Serialize};

use crate::sync::entity::{SyncEntity, SyncMeta};
use crate::sync::patch::Field;

/// 具有特殊语义的列
///
/// 列的身份通过 `role` 字段查找，标题只是可编辑的显示文本。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnRole {
    /// 新建任务的默认落点，也是每日重置的目标列
    Draft,
    Todo,
    Done,
}

impl ColumnRole {
    pub fn default_title(&self) -> &'static str {
        match self {
            ColumnRole::Draft => "Draft",
            ColumnRole::Todo => "To Do",
            ColumnRole::Done => "Done",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    #[serde(flatten)]
    pub meta: SyncMeta,
    pub title: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub role: Option<ColumnRole>,
}

#[derive(Debug, Clone, Default)]
pub struct ColumnDraft {
    pub title: String,
    pub color: Option<String>,
    pub role: Option<ColumnRole>,
    pub position: Option<i64>,
}

impl ColumnDraft {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn for_role(role: ColumnRole) -> Self {
        Self {
            title: role.default_title().to_string(),
            role: Some(role),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ColumnPatch {
    pub title: Field<String>,
    pub color: Field<Option<String>>,
    pub position: Field<i64>,
    pub role: Field<Option<ColumnRole>>,
    pub trashed: Field<bool>,
}

impl ColumnPatch {
    pub fn trashed(trashed: bool) -> Self {
        Self {
            trashed: Field::Set(trashed),
            ..Default::default()
        }
    }

    pub fn position(position: i64) -> Self {
        Self {
            position: Field::Set(position),
            ..Default::default()
        }
    }
}

impl SyncEntity for Column {
    type Draft = ColumnDraft;
    type Patch = ColumnPatch;

    const KIND: &'static str = "column";

    fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.meta
    }

    fn from_draft(meta: SyncMeta, draft: ColumnDraft) -> Self {
        Self {
            meta,
            title: draft.title,
            color: draft.color,
            position: draft.position.unwrap_or(0),
            role: draft.role,
        }
    }

    fn apply_patch(&mut self, patch: ColumnPatch) {
        patch.title.apply_to(&mut self.title);
        patch.color.apply_to(&mut self.color);
        patch.position.apply_to(&mut self.position);
        patch.role.apply_to(&mut self.role);
        patch.trashed.apply_to(&mut self.meta.trashed);
    }

    fn normalize(&mut self) {
        let trimmed = self.title.trim();
        if trimmed.is_empty() {
            if let Some(role) = self.role {
                self.title = role.default_title().to_string();
            }
        } else if trimmed.len() != self.title.len() {
            self.title = trimmed.to_string();
        }
    }
}
