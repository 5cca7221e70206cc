//! 连接状态机
//!
//! 独立跟踪四类状态，并合成派生标志：
//! - 网络可达性（online）
//! - 认证状态
//! - 远端会话状态
//! - 同步阶段（空闲 / 同步中 / 冷却中）
//!
//! `is_connected = online && 已认证 && 会话已连接`，在每个 setter 返回前重新计算；
//! `can_sync` 额外要求不在同步中且冷却期已过。每次变化都会发布到 watch 通道和事件总线。

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use parking_lot::RwLock;

use crate::events::{EventManager, SdkEvent};
use crate::utils::time::format_standard;
use crate::utils::{Clock, SystemClock, TimezoneConfig};

/// 同步成功后的默认冷却期
pub const DEFAULT_SYNC_COOLDOWN: Duration = Duration::from_secs(15);

/// 认证状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthStatus {
    Loading,
    Authenticated,
    Unauthenticated,
}

impl std::fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthStatus::Loading => write!(f, "认证加载中"),
            AuthStatus::Authenticated => write!(f, "已认证"),
            AuthStatus::Unauthenticated => write!(f, "未认证"),
        }
    }
}

/// 远端会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteSessionStatus {
    Loading,
    Connected,
    Disconnected,
    /// 会话过期（需要重新登录）
    Expired,
    Error,
}

impl std::fmt::Display for RemoteSessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteSessionStatus::Loading => write!(f, "会话加载中"),
            RemoteSessionStatus::Connected => write!(f, "已连接"),
            RemoteSessionStatus::Disconnected => write!(f, "未连接"),
            RemoteSessionStatus::Expired => write!(f, "会话过期"),
            RemoteSessionStatus::Error => write!(f, "会话错误"),
        }
    }
}

/// 同步阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    Idle,
    Syncing,
    Cooldown,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncPhase::Idle => write!(f, "空闲"),
            SyncPhase::Syncing => write!(f, "同步中"),
            SyncPhase::Cooldown => write!(f, "冷却中"),
        }
    }
}

#[derive(Debug, Clone)]
struct ConnectivityState {
    online: bool,
    auth: AuthStatus,
    session: RemoteSessionStatus,
    syncing: bool,
    /// 冷却截止时间（UTC 毫秒）
    cooldown_until: Option<i64>,
    is_connected: bool,
    last_sync_at: Option<i64>,
    last_sync_ok: Option<bool>,
}

impl ConnectivityState {
    fn new() -> Self {
        Self {
            online: false,
            auth: AuthStatus::Loading,
            session: RemoteSessionStatus::Loading,
            syncing: false,
            cooldown_until: None,
            is_connected: false,
            last_sync_at: None,
            last_sync_ok: None,
        }
    }

    fn recompute(&mut self) {
        self.is_connected = self.online
            && self.auth == AuthStatus::Authenticated
            && self.session == RemoteSessionStatus::Connected;
    }

    fn phase(&self, now_ms: i64) -> SyncPhase {
        if self.syncing {
            SyncPhase::Syncing
        } else if self.cooldown_until.map_or(false, |until| now_ms < until) {
            SyncPhase::Cooldown
        } else {
            SyncPhase::Idle
        }
    }
}

/// 连接状态快照（发布给 UI 与调度器）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivitySnapshot {
    pub online: bool,
    pub auth: AuthStatus,
    pub session: RemoteSessionStatus,
    pub phase: SyncPhase,
    pub is_connected: bool,
    pub can_sync: bool,
    pub cooldown_until: Option<i64>,
    pub last_sync_at: Option<i64>,
    pub last_sync_ok: Option<bool>,
}

impl ConnectivitySnapshot {
    fn from_state(state: &ConnectivityState, now_ms: i64) -> Self {
        let phase = state.phase(now_ms);
        Self {
            online: state.online,
            auth: state.auth,
            session: state.session,
            phase,
            is_connected: state.is_connected,
            can_sync: state.is_connected && phase == SyncPhase::Idle,
            cooldown_until: state.cooldown_until,
            last_sync_at: state.last_sync_at,
            last_sync_ok: state.last_sync_ok,
        }
    }

    /// 认证或会话的终止性失败，是唯一需要展示给用户的错误
    pub fn is_terminal_failure(&self) -> bool {
        self.auth == AuthStatus::Unauthenticated
            || matches!(
                self.session,
                RemoteSessionStatus::Expired | RemoteSessionStatus::Error
            )
    }

    /// 映射为简短的状态键，由 UI 负责本地化
    pub fn status_text(&self) -> &'static str {
        if !self.online {
            return "offline";
        }
        match (self.auth, self.session) {
            (AuthStatus::Unauthenticated, _) => "signed_out",
            (_, RemoteSessionStatus::Expired) => "session_expired",
            (_, RemoteSessionStatus::Error) => "session_error",
            (AuthStatus::Loading, _) => "loading",
            (_, RemoteSessionStatus::Loading) | (_, RemoteSessionStatus::Disconnected) => {
                "connecting"
            }
            _ => match self.phase {
                SyncPhase::Syncing => "syncing",
                _ if self.last_sync_ok == Some(false) => "sync_retrying",
                _ => "connected",
            },
        }
    }

    /// 状态摘要（用于日志打印）
    pub fn summary(&self) -> String {
        let last_sync = match (self.last_sync_at, self.last_sync_ok) {
            (Some(at), Some(ok)) => format!(
                "{} ({})",
                format_standard(at, &TimezoneConfig::local()),
                if ok { "成功" } else { "失败" }
            ),
            (Some(at), None) => format_standard(at, &TimezoneConfig::local()),
            _ => "无".to_string(),
        };
        format!(
            "【连接状态】网络: {}, 认证: {}, 会话: {}, 同步: {}, 可同步: {}, 上次同步: {}",
            if self.online { "在线" } else { "离线" },
            self.auth,
            self.session,
            self.phase,
            self.can_sync,
            last_sync
        )
    }
}

/// 连接状态管理器（线程安全，克隆共享同一份状态）
#[derive(Debug, Clone)]
pub struct ConnectivityManager {
    state: Arc<RwLock<ConnectivityState>>,
    clock: Arc<dyn Clock>,
    cooldown_ms: i64,
    watch_tx: Arc<watch::Sender<ConnectivitySnapshot>>,
    events: Option<EventManager>,
}

impl Default for ConnectivityManager {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock::new()), DEFAULT_SYNC_COOLDOWN)
    }
}

impl ConnectivityManager {
    pub fn new(clock: Arc<dyn Clock>, cooldown: Duration) -> Self {
        let state = ConnectivityState::new();
        let initial = ConnectivitySnapshot::from_state(&state, clock.now_ms());
        let (watch_tx, _) = watch::channel(initial);
        Self {
            state: Arc::new(RwLock::new(state)),
            clock,
            cooldown_ms: i64::try_from(cooldown.as_millis()).unwrap_or(i64::MAX),
            watch_tx: Arc::new(watch_tx),
            events: None,
        }
    }

    /// 状态变化同时发布为 `SdkEvent::ConnectivityChanged`
    pub fn with_events(mut self, events: EventManager) -> Self {
        self.events = Some(events);
        self
    }

    // ========== setters ==========

    pub fn set_online(&self, online: bool) {
        self.mutate(|s| s.online = online);
    }

    pub fn set_auth_status(&self, auth: AuthStatus) {
        self.mutate(|s| s.auth = auth);
    }

    pub fn set_session_status(&self, session: RemoteSessionStatus) {
        if matches!(
            session,
            RemoteSessionStatus::Expired | RemoteSessionStatus::Error
        ) {
            warn!("⚠️ 远端会话不可用: {}", session);
        }
        self.mutate(|s| s.session = session);
    }

    /// 一次性设置为完全在线（测试与离线模式切换常用）
    pub fn set_connected(&self) {
        self.mutate(|s| {
            s.online = true;
            s.auth = AuthStatus::Authenticated;
            s.session = RemoteSessionStatus::Connected;
        });
    }

    /// 进入同步阶段；当前不允许同步时返回 false
    pub fn mark_sync_start(&self) -> bool {
        let now = self.clock.now_ms();
        let started = {
            let mut state = self.state.write();
            if !state.is_connected || state.phase(now) != SyncPhase::Idle {
                false
            } else {
                state.syncing = true;
                true
            }
        };
        if started {
            self.publish();
        }
        started
    }

    /// 结束同步；成功时进入冷却期
    pub fn mark_sync_end(&self, ok: bool) {
        let now = self.clock.now_ms();
        self.mutate(|s| {
            s.syncing = false;
            s.last_sync_at = Some(now);
            s.last_sync_ok = Some(ok);
            if ok {
                s.cooldown_until = Some(now.saturating_add(self.cooldown_ms));
            }
        });
    }

    fn mutate<F>(&self, f: F)
    where
        F: FnOnce(&mut ConnectivityState),
    {
        let changed_connected = {
            let mut state = self.state.write();
            let was_connected = state.is_connected;
            f(&mut state);
            state.recompute();
            (was_connected != state.is_connected).then_some(state.is_connected)
        };
        match changed_connected {
            Some(true) => info!("✅ 已连接，允许同步"),
            Some(false) => info!("🔌 连接断开，暂停同步"),
            None => {}
        }
        self.publish();
    }

    fn publish(&self) {
        let snapshot = self.snapshot();
        debug!("{}", snapshot.summary());
        self.watch_tx.send_replace(snapshot.clone());
        if let Some(events) = &self.events {
            events.emit(SdkEvent::ConnectivityChanged(snapshot));
        }
    }

    // ========== 查询 ==========

    pub fn is_connected(&self) -> bool {
        self.state.read().is_connected
    }

    pub fn can_sync(&self) -> bool {
        self.snapshot().can_sync
    }

    pub fn phase(&self) -> SyncPhase {
        let now = self.clock.now_ms();
        self.state.read().phase(now)
    }

    pub fn snapshot(&self) -> ConnectivitySnapshot {
        let now = self.clock.now_ms();
        ConnectivitySnapshot::from_state(&self.state.read(), now)
    }

    pub fn status_text(&self) -> &'static str {
        self.snapshot().status_text()
    }

    /// 订阅状态变化（冷却期结束不会主动推送，读取时以 `snapshot()` 为准）
    pub fn watch(&self) -> watch::Receiver<ConnectivitySnapshot> {
        self.watch_tx.subscribe()
    }
}
