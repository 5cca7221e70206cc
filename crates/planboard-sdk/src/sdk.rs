//! 统一 SDK 接口 - PlanboardSDK 主入口
//!
//! 分层结构：
//! ```text
//! PlanboardSDK
//!   ├── KvStore            (本地持久化)
//!   ├── EventManager       (事件总线)
//!   ├── ConnectivityManager(连接状态机)
//!   ├── BoardEngine        (任务 + 列)
//!   ├── EntityStore<Note> / EntityStore<Tag>
//!   ├── SyncScheduler      (同步调度)
//!   └── LifecycleManager   (前后台切换)
//! ```
//!
//! 所有写操作都是乐观的：本地立即可见，推送在后台完成。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::board::{BoardEngine, Column, Task};
use crate::config::PlanboardConfig;
use crate::connectivity::ConnectivityManager;
use crate::domain::{Note, Tag};
use crate::error::{PlanboardSDKError, Result};
use crate::events::{EventManager, SdkEvent};
use crate::lifecycle::LifecycleManager;
use crate::storage::KvStore;
use crate::sync::{
    EntityStore, MemoryRemote, PushReport, RemoteAdapter, StoreContext, SyncReason, SyncScheduler,
    SyncTarget,
};
use crate::utils::{Clock, SystemClock};

pub const NOTES_NAMESPACE: &str = "notes";
pub const TAGS_NAMESPACE: &str = "tags";

/// 初始化全局 tracing 订阅者
///
/// `RUST_LOG` 优先；未设置时调试模式为 debug 级别，否则 info。
/// [`PlanboardSDK::initialize`] 会按 `debug_mode` 自动调用；重复调用无副作用。
pub fn init_tracing(debug_mode: bool) {
    let default_level = if debug_mode {
        "planboard_sdk=debug"
    } else {
        "planboard_sdk=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_err()
    {
        tracing::debug!("tracing 订阅者已存在，跳过初始化");
    }
}

/// 每种实体类型对应的远端适配器
#[derive(Clone)]
pub struct RemoteSet {
    pub tasks: Arc<dyn RemoteAdapter<Task>>,
    pub columns: Arc<dyn RemoteAdapter<Column>>,
    pub notes: Arc<dyn RemoteAdapter<Note>>,
    pub tags: Arc<dyn RemoteAdapter<Tag>>,
}

impl RemoteSet {
    /// 全部使用内存远端（离线模式 / 测试）
    pub fn in_memory() -> Self {
        Self {
            tasks: Arc::new(MemoryRemote::<Task>::new()),
            columns: Arc::new(MemoryRemote::<Column>::new()),
            notes: Arc::new(MemoryRemote::<Note>::new()),
            tags: Arc::new(MemoryRemote::<Tag>::new()),
        }
    }
}

pub struct PlanboardSDK {
    config: PlanboardConfig,
    kv: KvStore,
    events: EventManager,
    connectivity: ConnectivityManager,
    board: BoardEngine,
    notes: EntityStore<Note>,
    tags: EntityStore<Tag>,
    scheduler: SyncScheduler,
    lifecycle: LifecycleManager,
    shutting_down: AtomicBool,
}

impl std::fmt::Debug for PlanboardSDK {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanboardSDK")
            .field("data_dir", &self.config.data_dir)
            .field("connectivity", &self.connectivity.snapshot())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl PlanboardSDK {
    /// 异步初始化 SDK
    ///
    /// 初始化顺序：存储 → 事件 → 连接状态 → 实体 Store → 调度器 → 生命周期
    pub async fn initialize(config: PlanboardConfig, remotes: RemoteSet) -> Result<Arc<Self>> {
        Self::initialize_with_clock(config, remotes, Arc::new(SystemClock::new())).await
    }

    pub async fn initialize_with_clock(
        config: PlanboardConfig,
        remotes: RemoteSet,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>> {
        init_tracing(config.debug_mode);
        info!("正在初始化 PlanboardSDK...");
        config.validate()?;

        // === 第1层：存储 ===
        let kv = KvStore::open(&config.data_dir).await?;

        // === 第2层：事件与连接状态 ===
        let events = EventManager::default();
        let connectivity =
            ConnectivityManager::new(clock.clone(), config.sync_cooldown()).with_events(events.clone());

        // === 第3层：实体 Store ===
        let ctx = StoreContext {
            clock,
            events: events.clone(),
            connectivity: Some(connectivity.clone()),
        };
        let board = BoardEngine::open(
            &kv,
            remotes.tasks,
            remotes.columns,
            ctx.clone(),
            config.daily_reset_policy(),
        )?;
        let notes = EntityStore::new(NOTES_NAMESPACE, remotes.notes, &kv, ctx.clone())?;
        let tags = EntityStore::new(TAGS_NAMESPACE, remotes.tags, &kv, ctx)?;

        // === 第4层：调度器 ===
        let targets: Vec<Arc<dyn SyncTarget>> = vec![
            Arc::new(board.clone()) as Arc<dyn SyncTarget>,
            Arc::new(notes.clone()) as Arc<dyn SyncTarget>,
            Arc::new(tags.clone()) as Arc<dyn SyncTarget>,
        ];
        let scheduler = SyncScheduler::new(
            targets,
            connectivity.clone(),
            events.clone(),
            config.scheduler_config(),
        );
        scheduler.start()?;

        // === 第5层：生命周期 ===
        let lifecycle = LifecycleManager::new();
        lifecycle.register_hook(Arc::new(scheduler.clone()));

        info!("✅ PlanboardSDK 初始化完成: {}", config.data_dir.display());
        Ok(Arc::new(Self {
            config,
            kv,
            events,
            connectivity,
            board,
            notes,
            tags,
            scheduler,
            lifecycle,
            shutting_down: AtomicBool::new(false),
        }))
    }

    pub fn config(&self) -> &PlanboardConfig {
        &self.config
    }

    pub fn board(&self) -> &BoardEngine {
        &self.board
    }

    pub fn notes(&self) -> &EntityStore<Note> {
        &self.notes
    }

    pub fn tags(&self) -> &EntityStore<Tag> {
        &self.tags
    }

    pub fn connectivity(&self) -> &ConnectivityManager {
        &self.connectivity
    }

    pub fn events(&self) -> &EventManager {
        &self.events
    }

    pub fn scheduler(&self) -> &SyncScheduler {
        &self.scheduler
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SdkEvent> {
        self.events.subscribe()
    }

    /// 所有 Store 的待推送总数
    pub fn pending_total(&self) -> usize {
        self.board.tasks().pending_count()
            + self.board.columns().pending_count()
            + self.notes.pending_count()
            + self.tags.pending_count()
    }

    // ========== 同步 ==========

    /// 请求后台执行一轮同步
    pub fn request_sync(&self) {
        self.scheduler.request_sync();
    }

    /// 在当前任务中执行一轮同步；被跳过时返回 None
    pub async fn sync_now(&self) -> Option<bool> {
        self.scheduler.sync_now(SyncReason::Manual).await
    }

    pub async fn flush(&self) -> PushReport {
        self.scheduler.flush().await
    }

    // ========== 生命周期 ==========

    pub async fn on_app_background(&self) -> Result<()> {
        self.lifecycle.notify_background().await
    }

    pub async fn on_app_foreground(&self) -> Result<()> {
        self.lifecycle.notify_foreground().await
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// 关闭 SDK：停止调度、在线时推送一次，并刷盘
    pub async fn shutdown(&self) -> Result<()> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("🔄 正在关闭 PlanboardSDK...");
        if let Err(e) = self.scheduler.shutdown().await {
            warn!("⚠️ 关闭调度器失败: {}", e);
        }
        self.kv.flush().await?;
        info!("✅ PlanboardSDK 已关闭");
        Ok(())
    }

    /// 同步版本的关闭，用于没有异步上下文的退出路径
    pub fn shutdown_blocking(&self) -> Result<()> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(PlanboardSDKError::Runtime(
                "shutdown_blocking 不能在 tokio 运行时内调用，请使用 shutdown()".to_string(),
            ));
        }
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| PlanboardSDKError::Runtime(format!("创建运行时失败: {}", e)))?;
        rt.block_on(self.shutdown())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{ColumnRole, TaskDraft};
    use crate::domain::{NoteDraft, TagDraft};

    async fn sdk_in(dir: &std::path::Path) -> (Arc<PlanboardSDK>, RemoteSet) {
        let remotes = RemoteSet::in_memory();
        let config = PlanboardConfig::builder().data_dir(dir).build();
        let sdk = PlanboardSDK::initialize(config, remotes.clone()).await.unwrap();
        (sdk, remotes)
    }

    #[tokio::test]
    async fn offline_edits_are_delivered_once_connected() {
        let dir = tempfile::tempdir().unwrap();
        let (sdk, remotes) = sdk_in(dir.path()).await;

        let task = sdk.board().create_task(TaskDraft::titled("write report"));
        sdk.notes().add(NoteDraft {
            title: "ideas".into(),
            ..Default::default()
        });
        sdk.tags().add(TagDraft::named("work"));
        assert_eq!(sdk.pending_total(), 4);
        assert_eq!(sdk.sync_now().await, None);

        sdk.connectivity().set_connected();
        // 连上后调度器可能已经跑完一轮，手动轮次此时会因冷却被跳过
        let _ = sdk.sync_now().await;
        sdk.flush().await;
        assert_eq!(sdk.pending_total(), 0);

        let fetched = remotes.tasks.fetch_all().await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].meta.id, task);
        assert!(sdk.board().find_column_by_role(ColumnRole::Draft).is_some());

        sdk.shutdown().await.unwrap();
        assert!(sdk.is_shutting_down());
    }

    #[tokio::test]
    async fn lifecycle_toggles_scheduler_visibility() {
        let dir = tempfile::tempdir().unwrap();
        let (sdk, _) = sdk_in(dir.path()).await;

        sdk.on_app_background().await.unwrap();
        assert!(!sdk.scheduler().is_visible());
        sdk.on_app_foreground().await.unwrap();
        assert!(sdk.scheduler().is_visible());

        sdk.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let config = PlanboardConfig::builder().daily_reset_hour(30).build();
        let err = PlanboardSDK::initialize(config, RemoteSet::in_memory())
            .await
            .unwrap_err();
        assert!(matches!(err, PlanboardSDKError::Config(_)));
    }

    #[test]
    fn init_tracing_is_idempotent() {
        init_tracing(true);
        init_tracing(false);
    }
}
