//! 本地优先同步
//!
//! - [`entity`]：可同步实体的公共元数据与 trait
//! - [`patch`]：部分更新字段
//! - [`merge`]：LWW 合并算法
//! - [`remote`]：远端适配器接口与内存实现
//! - [`store`]：通用实体同步引擎
//! - [`scheduler`]：受连接状态约束的同步调度器

pub mod entity;
pub mod merge;
pub mod patch;
pub mod remote;
pub mod scheduler;
pub mod store;

use async_trait::async_trait;

pub use entity::{SyncEntity, SyncMeta};
pub use merge::merge;
pub use patch::Field;
pub use remote::{MemoryRemote, RemoteAdapter};
pub use scheduler::{SchedulerConfig, SyncReason, SyncScheduler};
pub use store::{EntityStore, PendingOp, PendingOpKind, PushReport, StoreContext};

/// 可被调度器驱动的同步单元
#[async_trait]
pub trait SyncTarget: Send + Sync {
    fn name(&self) -> &str;

    async fn sync_pending(&self) -> PushReport;

    async fn sync_from_server(&self) -> bool;
}

#[async_trait]
impl<E: SyncEntity> SyncTarget for EntityStore<E> {
    fn name(&self) -> &str {
        self.namespace()
    }

    async fn sync_pending(&self) -> PushReport {
        EntityStore::sync_pending(self).await
    }

    async fn sync_from_server(&self) -> bool {
        EntityStore::sync_from_server(self).await
    }
}

#[async_trait]
impl SyncTarget for crate::board::BoardEngine {
    fn name(&self) -> &str {
        "board"
    }

    async fn sync_pending(&self) -> PushReport {
        crate::board::BoardEngine::sync_pending(self).await
    }

    async fn sync_from_server(&self) -> bool {
        crate::board::BoardEngine::sync_from_server(self).await
    }
}
