//! 看板引擎
//!
//! 在两个通用 [`EntityStore`]（任务、列）之上维护看板规则：
//! - 列自动补齐：按 [`ColumnRole`] 查找，找不到时恢复已删除的同角色列，否则新建
//! - 完成状态切换：完成数量达到目标移入 Done 列，回到 0 移入 Todo 列
//! - 每日重置：每次拉取合并后，把过期的每日任务重置回草稿列
//! - 位置分配：新任务排在所在列末尾，新列排在看板末尾

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::column::{Column, ColumnDraft, ColumnPatch, ColumnRole};
use super::daily_reset::DailyResetPolicy;
use super::task::{Task, TaskDraft, TaskPatch};
use crate::error::Result;
use crate::storage::KvStore;
use crate::sync::patch::Field;
use crate::sync::remote::RemoteAdapter;
use crate::sync::store::{EntityStore, PushReport, StoreContext};

pub const TASKS_NAMESPACE: &str = "tasks";
pub const COLUMNS_NAMESPACE: &str = "columns";

#[derive(Debug, Clone)]
pub struct BoardEngine {
    tasks: EntityStore<Task>,
    columns: EntityStore<Column>,
    reset_policy: Arc<RwLock<DailyResetPolicy>>,
}

impl BoardEngine {
    pub fn new(
        tasks: EntityStore<Task>,
        columns: EntityStore<Column>,
        reset_policy: DailyResetPolicy,
    ) -> Self {
        Self {
            tasks,
            columns,
            reset_policy: Arc::new(RwLock::new(reset_policy)),
        }
    }

    /// 在同一个 KV 库中打开任务与列两个命名空间
    pub fn open(
        kv: &KvStore,
        task_remote: Arc<dyn RemoteAdapter<Task>>,
        column_remote: Arc<dyn RemoteAdapter<Column>>,
        ctx: StoreContext,
        reset_policy: DailyResetPolicy,
    ) -> Result<Self> {
        let columns = EntityStore::new(COLUMNS_NAMESPACE, column_remote, kv, ctx.clone())?;
        let tasks = EntityStore::new(TASKS_NAMESPACE, task_remote, kv, ctx)?;
        Ok(Self::new(tasks, columns, reset_policy))
    }

    pub fn tasks(&self) -> &EntityStore<Task> {
        &self.tasks
    }

    pub fn columns(&self) -> &EntityStore<Column> {
        &self.columns
    }

    pub fn reset_policy(&self) -> DailyResetPolicy {
        *self.reset_policy.read()
    }

    pub fn set_reset_policy(&self, policy: DailyResetPolicy) {
        *self.reset_policy.write() = policy;
    }

    // ========== 列 ==========

    /// 未删除的列，按位置排序
    pub fn live_columns(&self) -> Vec<Column> {
        let mut columns = self.columns.live();
        columns.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.meta.id.cmp(&b.meta.id)));
        columns
    }

    /// 按角色查找未删除的列（多个时取位置最靠前的）
    pub fn find_column_by_role(&self, role: ColumnRole) -> Option<Column> {
        self.live_columns()
            .into_iter()
            .find(|c| c.role == Some(role))
    }

    /// 确保存在指定角色的列：优先复用，其次恢复已删除的，最后新建
    pub fn ensure_column(&self, role: ColumnRole) -> String {
        if let Some(column) = self.find_column_by_role(role) {
            return column.meta.id;
        }

        let trashed = self
            .columns
            .all()
            .into_iter()
            .filter(|c| c.meta.trashed && c.role == Some(role))
            .max_by_key(|c| c.meta.updated_at);
        if let Some(column) = trashed {
            info!("🔄 恢复已删除的 {:?} 列: {}", role, column.meta.id);
            self.columns.apply(&column.meta.id, ColumnPatch::trashed(false));
            return column.meta.id;
        }

        info!("✅ 自动创建 {:?} 列", role);
        self.create_column(ColumnDraft::for_role(role))
    }

    pub fn create_column(&self, mut draft: ColumnDraft) -> String {
        if draft.position.is_none() {
            draft.position = Some(self.next_column_position());
        }
        self.columns.add(draft)
    }

    pub async fn rename_column(&self, column_id: &str, title: &str) {
        let patch = ColumnPatch {
            title: Field::Set(title.to_string()),
            ..Default::default()
        };
        self.columns.update(column_id, patch).await;
    }

    /// 软删除列；其中的任务保留原 column_id，恢复任务时会连带恢复该列
    pub async fn trash_column(&self, column_id: &str) {
        self.columns.update(column_id, ColumnPatch::trashed(true)).await;
    }

    pub async fn reorder_columns(&self, ordered_ids: &[String]) -> usize {
        let patches = ordered_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), ColumnPatch::position(i as i64)))
            .collect();
        self.columns.update_many(patches).await
    }

    fn next_column_position(&self) -> i64 {
        self.columns
            .live()
            .iter()
            .map(|c| c.position + 1)
            .max()
            .unwrap_or(0)
    }

    // ========== 任务 ==========

    /// 列内未删除的任务，按位置排序
    pub fn tasks_in_column(&self, column_id: &str) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .live()
            .into_iter()
            .filter(|t| t.column_id == column_id)
            .collect();
        tasks.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.meta.id.cmp(&b.meta.id)));
        tasks
    }

    /// 新建任务，同步返回 id
    ///
    /// 未指定列（或指定的列不存在）时挂到草稿列；指定的列已删除时先恢复。
    pub fn create_task(&self, mut draft: TaskDraft) -> String {
        let column_id = match draft.column_id.take() {
            Some(id) => match self.columns.get(&id) {
                Some(column) => {
                    if column.meta.trashed {
                        self.columns.apply(&id, ColumnPatch::trashed(false));
                    }
                    id
                }
                None => {
                    warn!("⚠️ 目标列不存在，改用草稿列: {}", id);
                    self.ensure_column(ColumnRole::Draft)
                }
            },
            None => self.ensure_column(ColumnRole::Draft),
        };

        if draft.position.is_none() {
            draft.position = Some(self.next_task_position(&column_id));
        }
        draft.column_id = Some(column_id);
        self.tasks.add(draft)
    }

    pub async fn update_task(&self, task_id: &str, patch: TaskPatch) {
        self.tasks.update(task_id, patch).await;
    }

    /// 切换完成：未完成时完成数量 +1，已完成时归零
    pub async fn toggle_completion(&self, task_id: &str) {
        let Some(task) = self.tasks.get(task_id) else {
            warn!("⚠️ 切换完成状态的任务不存在: {}", task_id);
            return;
        };
        let next = if task.is_done() { 0 } else { task.quantity_done + 1 };
        self.set_quantity_done(task_id, next).await;
    }

    /// 设置完成数量（限制在 0..=目标），并按需在 Done / Todo 列之间移动
    pub async fn set_quantity_done(&self, task_id: &str, quantity_done: u32) {
        let Some(task) = self.tasks.get(task_id) else {
            warn!("⚠️ 设置完成数量的任务不存在: {}", task_id);
            return;
        };
        if task.blocked {
            warn!("⚠️ 任务已阻塞，忽略完成状态变更: {}", task_id);
            return;
        }

        let target = task.quantity_target.max(1);
        let next = quantity_done.min(target);
        let mut patch = TaskPatch::default().with_quantity_done(next);

        let destination = if next >= target && !task.is_done() {
            Some(ColumnRole::Done)
        } else if next == 0 && task.quantity_done > 0 {
            Some(ColumnRole::Todo)
        } else {
            None
        };
        if let Some(role) = destination {
            let column_id = self.ensure_column(role);
            if column_id != task.column_id {
                debug!("任务 {} 移入 {:?} 列", task_id, role);
                patch = patch
                    .with_position(self.next_task_position(&column_id))
                    .with_column(column_id);
            }
        }

        self.tasks.update(task_id, patch).await;
    }

    /// 移动任务到指定列；未指定位置时排在末尾
    pub async fn move_task(&self, task_id: &str, column_id: &str, position: Option<i64>) {
        match self.columns.get(column_id) {
            Some(column) if column.meta.trashed => {
                self.columns.apply(column_id, ColumnPatch::trashed(false));
            }
            Some(_) => {}
            None => {
                warn!("⚠️ 目标列不存在，忽略移动: {}", column_id);
                return;
            }
        }
        let position = position.unwrap_or_else(|| self.next_task_position(column_id));
        let patch = TaskPatch::default()
            .with_column(column_id)
            .with_position(position);
        self.tasks.update(task_id, patch).await;
    }

    pub async fn trash_task(&self, task_id: &str) {
        self.tasks
            .update(task_id, TaskPatch::default().with_trashed(true))
            .await;
    }

    /// 恢复任务（不重置完成状态）；所在列已删除时一并恢复，列已不存在时移到草稿列
    pub async fn restore_task(&self, task_id: &str) {
        let Some(task) = self.tasks.get(task_id) else {
            warn!("⚠️ 恢复的任务不存在: {}", task_id);
            return;
        };
        let mut patch = TaskPatch::default().with_trashed(false);
        match self.columns.get(&task.column_id) {
            Some(column) if column.meta.trashed => {
                self.columns.update(&column.meta.id, ColumnPatch::trashed(false)).await;
            }
            Some(_) => {}
            None => {
                let draft = self.ensure_column(ColumnRole::Draft);
                patch = patch
                    .with_position(self.next_task_position(&draft))
                    .with_column(draft);
            }
        }
        self.tasks.update(task_id, patch).await;
    }

    /// 按给定顺序写回位置，并把这些任务归入同一列
    pub async fn reorder_tasks(&self, column_id: &str, ordered_ids: &[String]) -> usize {
        let patches = ordered_ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                (
                    id.clone(),
                    TaskPatch::default()
                        .with_column(column_id)
                        .with_position(i as i64),
                )
            })
            .collect();
        self.tasks.update_many(patches).await
    }

    fn next_task_position(&self, column_id: &str) -> i64 {
        self.tasks
            .live()
            .iter()
            .filter(|t| t.column_id == column_id)
            .map(|t| t.position + 1)
            .max()
            .unwrap_or(0)
    }

    // ========== 同步 ==========

    /// 先推送列再推送任务，保证任务引用的列先到达远端
    pub async fn sync_pending(&self) -> PushReport {
        let mut report = self.columns.sync_pending().await;
        report += self.tasks.sync_pending().await;
        report
    }

    /// 拉取列和任务，合并后执行每日重置
    pub async fn sync_from_server(&self) -> bool {
        let columns_ok = self.columns.sync_from_server().await;
        let tasks_ok = self.tasks.sync_from_server().await;
        if tasks_ok {
            self.apply_daily_reset().await;
        }
        columns_ok && tasks_ok
    }

    /// 重置所有到期的每日任务，返回重置数量
    pub async fn apply_daily_reset(&self) -> usize {
        let now = self.tasks.now_ms();
        let policy = self.reset_policy();
        let boundary = policy.boundary(now);

        let mut due: Vec<Task> = self
            .tasks
            .all()
            .into_iter()
            .filter(|t| policy.is_due(t, boundary))
            .collect();
        if due.is_empty() {
            return 0;
        }
        due.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.meta.id.cmp(&b.meta.id)));

        let draft_column = self.ensure_column(ColumnRole::Draft);
        let mut position = self.next_task_position(&draft_column);
        let patches: Vec<(String, TaskPatch)> = due
            .iter()
            .map(|task| {
                let patch = TaskPatch {
                    quantity_done: Field::Set(0),
                    blocked: Field::Set(false),
                    trashed: Field::Set(false),
                    planned_date: Field::Set(Some(now)),
                    column_id: Field::Set(draft_column.clone()),
                    position: Field::Set(if task.column_id == draft_column {
                        task.position
                    } else {
                        position += 1;
                        position - 1
                    }),
                    ..Default::default()
                };
                (task.meta.id.clone(), patch)
            })
            .collect();

        let count = self.tasks.update_many(patches).await;
        info!("🔄 每日重置 {} 个任务（边界 {}）", count, boundary);
        count
    }
}
