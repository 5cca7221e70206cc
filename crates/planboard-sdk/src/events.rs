//! 事件系统模块
//!
//! UI 层通过订阅事件观察：
//! - 本地集合变化（总数、待推送数量）
//! - 连接状态变化
//! - 同步轮次结束
//!
//! 事件通过 `tokio::sync::broadcast` 广播；也可以按类型注册同步回调。

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tracing::debug;

use crate::connectivity::ConnectivitySnapshot;

/// SDK 事件类型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SdkEvent {
    /// 某个实体 Store 的本地集合发生变化
    CollectionChanged {
        namespace: String,
        total: usize,
        pending: usize,
        timestamp: u64,
    },
    /// 连接状态变化
    ConnectivityChanged(ConnectivitySnapshot),
    /// 一轮同步结束
    SyncPassFinished {
        reason: String,
        ok: bool,
        pushed: usize,
        failed: usize,
        timestamp: u64,
    },
}

impl SdkEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SdkEvent::CollectionChanged { .. } => "collection_changed",
            SdkEvent::ConnectivityChanged(_) => "connectivity_changed",
            SdkEvent::SyncPassFinished { .. } => "sync_pass_finished",
        }
    }

    pub fn collection_changed(namespace: &str, total: usize, pending: usize) -> Self {
        SdkEvent::CollectionChanged {
            namespace: namespace.to_string(),
            total,
            pending,
            timestamp: now_secs(),
        }
    }
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// 事件监听器
pub type EventListener = Arc<dyn Fn(&SdkEvent) + Send + Sync>;

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    pub total_events: u64,
    pub events_by_type: HashMap<String, u64>,
}

/// 事件管理器（可克隆，克隆共享同一条广播通道）
#[derive(Clone)]
pub struct EventManager {
    sender: broadcast::Sender<SdkEvent>,
    listeners: Arc<RwLock<HashMap<String, Vec<EventListener>>>>,
    stats: Arc<RwLock<EventStats>>,
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager")
            .field("receivers", &self.sender.receiver_count())
            .field("stats", &*self.stats.read())
            .finish()
    }
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventManager {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            listeners: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(EventStats::default())),
        }
    }

    /// 发布事件（同步，可在持有业务状态之外的任意位置调用）
    pub fn emit(&self, event: SdkEvent) {
        {
            let mut stats = self.stats.write();
            stats.total_events += 1;
            *stats
                .events_by_type
                .entry(event.event_type().to_string())
                .or_insert(0) += 1;
        }

        // 无订阅者时 send 失败属正常场景（无 UI 的后台进程、测试）
        if self.sender.send(event.clone()).is_err() {
            debug!("事件无订阅者: {}", event.event_type());
        }

        let listeners: Vec<EventListener> = {
            let map = self.listeners.read();
            map.get(event.event_type())
                .into_iter()
                .chain(map.get("*"))
                .flatten()
                .cloned()
                .collect()
        };
        for listener in listeners {
            listener(&event);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SdkEvent> {
        self.sender.subscribe()
    }

    /// 注册回调；`event_type` 为 `"*"` 时接收全部事件
    pub fn add_listener(&self, event_type: &str, listener: EventListener) {
        self.listeners
            .write()
            .entry(event_type.to_string())
            .or_default()
            .push(listener);
    }

    pub fn stats(&self) -> EventStats {
        self.stats.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn broadcast_reaches_subscribers() {
        let events = EventManager::new(16);
        let mut rx = events.subscribe();
        events.emit(SdkEvent::collection_changed("tasks", 3, 1));

        match rx.recv().await.unwrap() {
            SdkEvent::CollectionChanged { namespace, total, pending, .. } => {
                assert_eq!(namespace, "tasks");
                assert_eq!(total, 3);
                assert_eq!(pending, 1);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn typed_and_wildcard_listeners() {
        let events = EventManager::default();
        let typed = Arc::new(AtomicUsize::new(0));
        let all = Arc::new(AtomicUsize::new(0));

        let t = typed.clone();
        events.add_listener(
            "collection_changed",
            Arc::new(move |_| {
                t.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let a = all.clone();
        events.add_listener(
            "*",
            Arc::new(move |_| {
                a.fetch_add(1, Ordering::SeqCst);
            }),
        );

        events.emit(SdkEvent::collection_changed("notes", 1, 0));
        events.emit(SdkEvent::SyncPassFinished {
            reason: "manual".into(),
            ok: true,
            pushed: 0,
            failed: 0,
            timestamp: now_secs(),
        });

        assert_eq!(typed.load(Ordering::SeqCst), 1);
        assert_eq!(all.load(Ordering::SeqCst), 2);
        assert_eq!(events.stats().total_events, 2);
    }
}
