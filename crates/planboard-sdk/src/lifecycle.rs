//! SDK 生命周期管理
//!
//! 管理 App 前后台切换，统一通知各模块（目前主要是同步调度器）：
//! - 切到后台：尽力推送一次待推送队列
//! - 回到前台：视为可见性恢复，触发一轮同步并切换到前台节奏

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::Result;

/// App 可见性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppState {
    Foreground,
    Background,
}

/// 生命周期回调 Hook
///
/// 各模块通过实现此 trait 来响应生命周期变化
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    /// App 切换到后台时调用
    async fn on_background(&self) -> Result<()>;

    /// App 切换到前台时调用
    async fn on_foreground(&self) -> Result<()>;
}

/// 生命周期管理器
pub struct LifecycleManager {
    hooks: RwLock<Vec<Arc<dyn LifecycleHook>>>,
    state: RwLock<AppState>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self {
            hooks: RwLock::new(Vec::new()),
            state: RwLock::new(AppState::Foreground),
        }
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.read().len()
    }

    pub fn app_state(&self) -> AppState {
        *self.state.read()
    }

    /// 注册生命周期回调 Hook
    pub fn register_hook(&self, hook: Arc<dyn LifecycleHook>) {
        let mut hooks = self.hooks.write();
        hooks.push(hook);
        info!("✅ 生命周期 Hook 已注册: 当前共 {} 个", hooks.len());
    }

    /// 通知所有 Hook：App 切换到后台
    ///
    /// 按注册顺序执行；某个 Hook 失败会记录并继续，最后返回第一个错误
    pub async fn notify_background(&self) -> Result<()> {
        if self.transition(AppState::Background) {
            info!("🔄 通知所有模块：App 切换到后台");
        }
        let mut first_error = None;
        for (index, hook) in self.snapshot_hooks().iter().enumerate() {
            if let Err(e) = hook.on_background().await {
                warn!("⚠️ Hook #{} 后台切换失败: {}", index, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// 通知所有 Hook：App 切换到前台
    pub async fn notify_foreground(&self) -> Result<()> {
        if self.transition(AppState::Foreground) {
            info!("🔄 通知所有模块：App 切换到前台");
        }
        let mut first_error = None;
        for (index, hook) in self.snapshot_hooks().iter().enumerate() {
            if let Err(e) = hook.on_foreground().await {
                warn!("⚠️ Hook #{} 前台切换失败: {}", index, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// 返回状态是否真的发生了变化
    fn transition(&self, next: AppState) -> bool {
        let mut state = self.state.write();
        let changed = *state != next;
        *state = next;
        changed
    }

    // 不在持锁期间 await
    fn snapshot_hooks(&self) -> Vec<Arc<dyn LifecycleHook>> {
        self.hooks.read().clone()
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlanboardSDKError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHook {
        background: AtomicUsize,
        foreground: AtomicUsize,
        fail: bool,
    }

    impl CountingHook {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                background: AtomicUsize::new(0),
                foreground: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl LifecycleHook for CountingHook {
        async fn on_background(&self) -> Result<()> {
            self.background.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(PlanboardSDKError::Runtime("boom".into()));
            }
            Ok(())
        }

        async fn on_foreground(&self) -> Result<()> {
            self.foreground.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn failing_hook_does_not_stop_others() {
        let manager = LifecycleManager::new();
        let failing = CountingHook::new(true);
        let ok = CountingHook::new(false);
        manager.register_hook(failing.clone());
        manager.register_hook(ok.clone());

        assert!(manager.notify_background().await.is_err());
        assert_eq!(failing.background.load(Ordering::SeqCst), 1);
        assert_eq!(ok.background.load(Ordering::SeqCst), 1);
        assert_eq!(manager.app_state(), AppState::Background);

        manager.notify_foreground().await.unwrap();
        assert_eq!(ok.foreground.load(Ordering::SeqCst), 1);
        assert_eq!(manager.app_state(), AppState::Foreground);
    }
}
