//! 可同步实体的公共形状
//!
//! 所有领域实体（任务、列、笔记、标签……）都内嵌一个 [`SyncMeta`]：
//! `{ id, updatedAt, isSynced, trashed }`，并实现 [`SyncEntity`]。

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt::Debug;

/// 同步元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMeta {
    /// 客户端生成，创建后不再改变
    pub id: String,
    /// 最近一次本地修改的 UTC 毫秒时间戳
    pub updated_at: i64,
    /// 远端已确认这次修改
    #[serde(default)]
    pub is_synced: bool,
    /// 软删除标记（普通字段，不是物理删除）
    #[serde(default)]
    pub trashed: bool,
}

impl SyncMeta {
    pub fn new(id: String, updated_at: i64) -> Self {
        Self {
            id,
            updated_at,
            is_synced: false,
            trashed: false,
        }
    }

    /// 记录一次本地修改
    pub fn touch(&mut self, updated_at: i64) {
        self.updated_at = updated_at;
        self.is_synced = false;
    }
}

/// 可同步实体
///
/// `Draft` 是创建时的输入，`Patch` 是部分更新（字段缺省 = 不变）。
pub trait SyncEntity:
    Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    type Draft: Send + 'static;
    type Patch: Send + 'static;

    /// 实体类型名（日志与默认命名空间）
    const KIND: &'static str;

    fn meta(&self) -> &SyncMeta;

    fn meta_mut(&mut self) -> &mut SyncMeta;

    fn from_draft(meta: SyncMeta, draft: Self::Draft) -> Self;

    /// 只应用 patch 中出现的字段
    fn apply_patch(&mut self, patch: Self::Patch);

    /// 输入规范化（去空白、去重等），add / update 后都会调用
    fn normalize(&mut self) {}

    /// 新建实体是否值得同步；完全空白的草稿返回 false，只保存在本地
    fn worth_syncing(&self) -> bool {
        true
    }

    fn id(&self) -> &str {
        &self.meta().id
    }

    fn updated_at(&self) -> i64 {
        self.meta().updated_at
    }

    fn is_synced(&self) -> bool {
        self.meta().is_synced
    }

    fn is_trashed(&self) -> bool {
        self.meta().trashed
    }
}
