//! Planboard SDK - 本地优先的任务 / 看板 / 笔记同步引擎
//!
//! 本 SDK 提供：
//! - 📝 乐观写入：所有修改立即在本地可见并持久化到 sled
//! - 📤 待推送队列：失败自动保留，下一轮重试
//! - 🔀 LWW 合并：按 `updated_at` 整条对齐本地与远端
//! - 🗂️ 看板规则：列自动补齐、完成状态切换、每日任务重置
//! - 📡 连接状态机与同步调度：在线才同步，成功后冷却
//! - ⚙️ 事件系统：集合变化、连接变化、同步轮次
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use planboard_sdk::{PlanboardConfig, PlanboardSDK, RemoteSet, TaskDraft};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     planboard_sdk::init_tracing(false);
//!
//!     let config = PlanboardConfig::builder()
//!         .data_dir("/path/to/data")
//!         .daily_reset_hour(4)
//!         .build();
//!     let sdk = PlanboardSDK::initialize(config, RemoteSet::in_memory()).await?;
//!
//!     // 同步返回 id，推送在后台完成
//!     let task_id = sdk.board().create_task(TaskDraft::titled("晨跑").daily());
//!     sdk.board().toggle_completion(&task_id).await;
//!
//!     sdk.connectivity().set_connected();
//!     sdk.request_sync();
//!
//!     sdk.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod board;
pub mod config;
pub mod connectivity;
pub mod domain;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod sdk;
pub mod storage;
pub mod sync;
pub mod utils;
pub mod version;

pub use board::{
    BoardEngine, Column, ColumnDraft, ColumnPatch, ColumnRole, DailyResetPolicy, Task, TaskDraft,
    TaskPatch,
};
pub use config::{PlanboardConfig, PlanboardConfigBuilder};
pub use connectivity::{
    AuthStatus, ConnectivityManager, ConnectivitySnapshot, RemoteSessionStatus, SyncPhase,
};
pub use domain::{Note, NoteDraft, NotePatch, Tag, TagDraft, TagPatch};
pub use error::{PlanboardSDKError, Result};
pub use events::{EventManager, SdkEvent};
pub use lifecycle::{AppState, LifecycleHook, LifecycleManager};
pub use sdk::{init_tracing, PlanboardSDK, RemoteSet};
pub use storage::{KvNamespace, KvStore};
pub use sync::{
    merge, EntityStore, Field, MemoryRemote, PushReport, RemoteAdapter, SchedulerConfig,
    StoreContext, SyncEntity, SyncMeta, SyncReason, SyncScheduler, SyncTarget,
};
pub use utils::{Clock, ManualClock, SystemClock, TimezoneConfig};
pub use version::SDK_VERSION;
