//! 看板任务

use serde::{Deserialize, Serialize};

use crate::sync::entity::{SyncEntity, SyncMeta};
use crate::sync::patch::Field;

fn default_target() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(flatten)]
    pub meta: SyncMeta,
    pub title: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub column_id: String,
    #[serde(default)]
    pub quantity_done: u32,
    #[serde(default = "default_target")]
    pub quantity_target: u32,
    #[serde(default)]
    pub daily: bool,
    #[serde(default)]
    pub blocked: bool,
    /// 计划日期（UTC 毫秒）
    #[serde(default)]
    pub planned_date: Option<i64>,
    #[serde(default)]
    pub position: i64,
}

impl Task {
    pub fn is_done(&self) -> bool {
        self.quantity_done >= self.quantity_target
    }
}

/// 新建任务的输入
///
/// `column_id` 为空时由看板引擎挂到草稿列；`position` 为空时排在列尾。
#[derive(Debug, Clone)]
pub struct TaskDraft {
    pub title: String,
    pub notes: Option<String>,
    pub column_id: Option<String>,
    pub quantity_target: u32,
    pub daily: bool,
    pub blocked: bool,
    pub planned_date: Option<i64>,
    pub position: Option<i64>,
}

impl Default for TaskDraft {
    fn default() -> Self {
        Self {
            title: String::new(),
            notes: None,
            column_id: None,
            quantity_target: default_target(),
            daily: false,
            blocked: false,
            planned_date: None,
            position: None,
        }
    }
}

impl TaskDraft {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn in_column(mut self, column_id: impl Into<String>) -> Self {
        self.column_id = Some(column_id.into());
        self
    }

    pub fn with_target(mut self, target: u32) -> Self {
        self.quantity_target = target;
        self
    }

    pub fn daily(mut self) -> Self {
        self.daily = true;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Field<String>,
    pub notes: Field<Option<String>>,
    pub column_id: Field<String>,
    pub quantity_done: Field<u32>,
    pub quantity_target: Field<u32>,
    pub daily: Field<bool>,
    pub blocked: Field<bool>,
    pub planned_date: Field<Option<i64>>,
    pub position: Field<i64>,
    pub trashed: Field<bool>,
}

impl TaskPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Field::Set(title.into()),
            ..Default::default()
        }
    }

    pub fn with_column(mut self, column_id: impl Into<String>) -> Self {
        self.column_id = Field::Set(column_id.into());
        self
    }

    pub fn with_quantity_done(mut self, done: u32) -> Self {
        self.quantity_done = Field::Set(done);
        self
    }

    pub fn with_position(mut self, position: i64) -> Self {
        self.position = Field::Set(position);
        self
    }

    pub fn with_blocked(mut self, blocked: bool) -> Self {
        self.blocked = Field::Set(blocked);
        self
    }

    pub fn with_trashed(mut self, trashed: bool) -> Self {
        self.trashed = Field::Set(trashed);
        self
    }
}

impl SyncEntity for Task {
    type Draft = TaskDraft;
    type Patch = TaskPatch;

    const KIND: &'static str = "task";

    fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.meta
    }

    fn from_draft(meta: SyncMeta, draft: TaskDraft) -> Self {
        Self {
            meta,
            title: draft.title,
            notes: draft.notes,
            column_id: draft.column_id.unwrap_or_default(),
            quantity_done: 0,
            quantity_target: draft.quantity_target,
            daily: draft.daily,
            blocked: draft.blocked,
            planned_date: draft.planned_date,
            position: draft.position.unwrap_or(0),
        }
    }

    fn apply_patch(&mut self, patch: TaskPatch) {
        patch.title.apply_to(&mut self.title);
        patch.notes.apply_to(&mut self.notes);
        patch.column_id.apply_to(&mut self.column_id);
        patch.quantity_done.apply_to(&mut self.quantity_done);
        patch.quantity_target.apply_to(&mut self.quantity_target);
        patch.daily.apply_to(&mut self.daily);
        patch.blocked.apply_to(&mut self.blocked);
        patch.planned_date.apply_to(&mut self.planned_date);
        patch.position.apply_to(&mut self.position);
        patch.trashed.apply_to(&mut self.meta.trashed);
    }

    /// 目标数量至少为 1，完成数量不超过目标
    fn normalize(&mut self) {
        self.title = self.title.trim().to_string();
        self.quantity_target = self.quantity_target.max(1);
        self.quantity_done = self.quantity_done.min(self.quantity_target);
        if matches!(&self.notes, Some(n) if n.trim().is_empty()) {
            self.notes = None;
        }
    }
}
