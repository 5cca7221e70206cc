//! 同步调度器
//!
//! 以连接状态为闸门驱动各同步单元的 `sync_pending` + `sync_from_server`：
//! - 首次（以及每次断线后重新）连上时，让出一次运行时后执行一轮
//! - 连接期间按固定间隔执行：后台节奏较慢，前台可见时使用较快的节奏
//! - 回到前台（可见性恢复）立即触发一轮
//! - 关闭时若仍在线，尽力推送一次
//!
//! 任意时刻最多一轮同步在执行：轮次守卫 + 连接状态的 `Syncing` 阶段，
//! 重叠的触发直接跳过。

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::store::PushReport;
use super::SyncTarget;
use crate::connectivity::ConnectivityManager;
use crate::error::{PlanboardSDKError, Result};
use crate::events::{now_secs, EventManager, SdkEvent};
use crate::lifecycle::LifecycleHook;

/// 调度节奏
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub background_interval: Duration,
    pub foreground_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            background_interval: Duration::from_secs(300),
            foreground_interval: Duration::from_secs(30),
        }
    }
}

/// 触发同步的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncReason {
    Connected,
    Interval,
    Visibility,
    Manual,
}

impl fmt::Display for SyncReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncReason::Connected => write!(f, "connected"),
            SyncReason::Interval => write!(f, "interval"),
            SyncReason::Visibility => write!(f, "visibility"),
            SyncReason::Manual => write!(f, "manual"),
        }
    }
}

struct SchedulerInner {
    targets: Vec<Arc<dyn SyncTarget>>,
    connectivity: ConnectivityManager,
    events: EventManager,
    config: SchedulerConfig,
    visible: AtomicBool,
    trigger: Notify,
    /// 被唤醒时要执行的轮次；None 表示只需重新计算节奏
    trigger_reason: Mutex<Option<SyncReason>>,
    pass_guard: tokio::sync::Mutex<()>,
    shutdown_tx: watch::Sender<bool>,
    shutting_down: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<SchedulerInner>,
}

impl fmt::Debug for SyncScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncScheduler")
            .field("targets", &self.inner.targets.iter().map(|t| t.name().to_string()).collect::<Vec<_>>())
            .field("config", &self.inner.config)
            .field("visible", &self.inner.visible.load(Ordering::SeqCst))
            .field("running", &self.is_running())
            .finish()
    }
}

impl SyncScheduler {
    pub fn new(
        targets: Vec<Arc<dyn SyncTarget>>,
        connectivity: ConnectivityManager,
        events: EventManager,
        config: SchedulerConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(SchedulerInner {
                targets,
                connectivity,
                events,
                config,
                visible: AtomicBool::new(true),
                trigger: Notify::new(),
                trigger_reason: Mutex::new(None),
                pass_guard: tokio::sync::Mutex::new(()),
                shutdown_tx,
                shutting_down: AtomicBool::new(false),
                handle: Mutex::new(None),
            }),
        }
    }

    /// 启动后台循环；需要在 tokio 运行时内调用
    pub fn start(&self) -> Result<()> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(PlanboardSDKError::ShuttingDown("调度器已关闭".to_string()));
        }
        let mut handle = self.inner.handle.lock();
        if handle.is_some() {
            debug!("调度器已在运行");
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| PlanboardSDKError::Runtime(format!("调度器需要 tokio 运行时: {}", e)))?;
        let inner = self.inner.clone();
        *handle = Some(runtime.spawn(run_loop(inner)));
        info!(
            "✅ 同步调度器已启动: {} 个同步单元, 后台 {:?}, 前台 {:?}",
            self.inner.targets.len(),
            self.inner.config.background_interval,
            self.inner.config.foreground_interval
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.handle.lock().is_some()
    }

    pub fn is_visible(&self) -> bool {
        self.inner.visible.load(Ordering::SeqCst)
    }

    /// 当前生效的定时间隔
    pub fn current_interval(&self) -> Duration {
        self.inner.current_interval()
    }

    /// 可见性变化；重新可见时触发一轮同步
    pub fn notify_visibility(&self, visible: bool) {
        let was_visible = self.inner.visible.swap(visible, Ordering::SeqCst);
        if visible && !was_visible {
            debug!("可见性恢复，触发同步");
            self.wake(Some(SyncReason::Visibility));
        } else if visible != was_visible {
            self.wake(None);
        }
    }

    /// 手动触发一轮同步（由后台循环执行）
    pub fn request_sync(&self) {
        self.wake(Some(SyncReason::Manual));
    }

    /// 立即在当前任务中执行一轮；被跳过时返回 None
    pub async fn sync_now(&self, reason: SyncReason) -> Option<bool> {
        self.inner.run_pass(reason).await
    }

    /// 在线时推送所有同步单元的待推送队列（不拉取，不受冷却期限制）
    pub async fn flush(&self) -> PushReport {
        let mut report = PushReport::default();
        if !self.inner.connectivity.is_connected() {
            debug!("离线，跳过 flush");
            return report;
        }
        let _guard = self.inner.pass_guard.lock().await;
        for target in &self.inner.targets {
            report += target.sync_pending().await;
        }
        info!("✅ flush 完成: {:?}", report);
        report
    }

    /// 停止后台循环，并在在线时尽力推送一次
    pub async fn shutdown(&self) -> Result<()> {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("🔄 关闭同步调度器");
        self.inner.shutdown_tx.send_replace(true);
        let handle = self.inner.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("⚠️ 调度循环异常退出: {}", e);
            }
        }
        let report = self.flush().await;
        if !report.is_clean() {
            warn!("⚠️ 关闭前仍有 {} 条未送达", report.failed + report.ops_failed);
        }
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

    fn wake(&self, reason: Option<SyncReason>) {
        if let Some(reason) = reason {
            *self.inner.trigger_reason.lock() = Some(reason);
        }
        self.inner.trigger.notify_one();
    }
}

impl SchedulerInner {
    fn current_interval(&self) -> Duration {
        if self.visible.load(Ordering::SeqCst) {
            self.config.foreground_interval
        } else {
            self.config.background_interval
        }
    }

    /// 执行一轮同步；被跳过（已有轮次、离线、冷却中）时返回 None
    async fn run_pass(&self, reason: SyncReason) -> Option<bool> {
        let Ok(_guard) = self.pass_guard.try_lock() else {
            debug!("已有同步轮次在执行，跳过 ({})", reason);
            return None;
        };
        // 执行前重新确认，避免与断线竞争
        if !self.connectivity.is_connected() {
            debug!("离线，跳过同步 ({})", reason);
            return None;
        }
        if !self.connectivity.mark_sync_start() {
            debug!("冷却中或同步中，跳过 ({})", reason);
            return None;
        }

        info!("🔄 开始同步 ({})", reason);
        let mut report = PushReport::default();
        let mut pulled = true;
        for target in &self.targets {
            report += target.sync_pending().await;
            if !target.sync_from_server().await {
                warn!("⚠️ {} 拉取失败", target.name());
                pulled = false;
            }
        }
        let ok = pulled && report.is_clean();
        self.connectivity.mark_sync_end(ok);

        if ok {
            info!("✅ 同步完成 ({}): 推送 {}", reason, report.pushed);
        } else {
            warn!("⚠️ 同步未完全成功 ({}): {:?}", reason, report);
        }
        self.events.emit(SdkEvent::SyncPassFinished {
            reason: reason.to_string(),
            ok,
            pushed: report.pushed,
            failed: report.failed + report.ops_failed,
            timestamp: now_secs(),
        });
        Some(ok)
    }
}

async fn run_loop(inner: Arc<SchedulerInner>) {
    let mut shutdown_rx = inner.shutdown_tx.subscribe();
    let mut connectivity_rx = inner.connectivity.watch();
    let mut was_connected = connectivity_rx.borrow_and_update().is_connected;

    if was_connected {
        tokio::task::yield_now().await;
        inner.run_pass(SyncReason::Connected).await;
    }

    let mut period = inner.current_interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            changed = connectivity_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let connected = connectivity_rx.borrow_and_update().is_connected;
                if connected && !was_connected {
                    tokio::task::yield_now().await;
                    inner.run_pass(SyncReason::Connected).await;
                }
                was_connected = connected;
            }
            _ = inner.trigger.notified() => {
                let reason = inner.trigger_reason.lock().take();
                if let Some(reason) = reason {
                    inner.run_pass(reason).await;
                }
            }
            _ = ticker.tick() => {
                inner.run_pass(SyncReason::Interval).await;
            }
        }

        let next = inner.current_interval();
        if next != period {
            debug!("同步间隔调整为 {:?}", next);
            period = next;
            ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        }
    }
    debug!("调度循环已退出");
}

#[async_trait]
impl LifecycleHook for SyncScheduler {
    async fn on_background(&self) -> Result<()> {
        self.notify_visibility(false);
        self.flush().await;
        Ok(())
    }

    async fn on_foreground(&self) -> Result<()> {
        self.notify_visibility(true);
        Ok(())
    }
}
