//! 远端适配器接口
//!
//! 每种实体类型一个适配器：`fetch_all` / `upsert`，以及可选的
//! `soft_delete` / `restore` / `hard_delete`。实现必须对重试幂等
//! （重复 upsert 同一条记录不产生新的变化）。

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use super::entity::SyncEntity;
use crate::error::{PlanboardSDKError, Result};

#[async_trait]
pub trait RemoteAdapter<E: SyncEntity>: Send + Sync {
    /// 拉取远端完整集合
    async fn fetch_all(&self) -> Result<Vec<E>>;

    /// 写入一条记录，返回服务端的规范副本
    async fn upsert(&self, entity: &E) -> Result<E>;

    async fn soft_delete(&self, id: &str) -> Result<()> {
        Err(PlanboardSDKError::Unsupported(format!("{} soft_delete: {}", E::KIND, id)))
    }

    async fn restore(&self, id: &str) -> Result<()> {
        Err(PlanboardSDKError::Unsupported(format!("{} restore: {}", E::KIND, id)))
    }

    async fn hard_delete(&self, id: &str) -> Result<()> {
        Err(PlanboardSDKError::Unsupported(format!("{} hard_delete: {}", E::KIND, id)))
    }
}

/// 内存远端
///
/// 离线模式下作为占位远端使用，也是测试里的可控服务端：
/// 支持故障注入（`set_failing`）和人为延迟（`set_latency` / `set_op_latency`），
/// 并记录 upsert 的最大并发数。
/// 软删除的记录移入回收站，`fetch_all` 不再返回。
#[derive(Debug)]
pub struct MemoryRemote<E: SyncEntity> {
    items: Mutex<HashMap<String, E>>,
    trash: Mutex<HashMap<String, E>>,
    failing: AtomicBool,
    latency: Mutex<Duration>,
    op_latency: Mutex<HashMap<String, Duration>>,
    upsert_calls: AtomicUsize,
    upserts_in_flight: AtomicUsize,
    max_upserts_in_flight: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl<E: SyncEntity> Default for MemoryRemote<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: SyncEntity> MemoryRemote<E> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            trash: Mutex::new(HashMap::new()),
            failing: AtomicBool::new(false),
            latency: Mutex::new(Duration::ZERO),
            op_latency: Mutex::new(HashMap::new()),
            upsert_calls: AtomicUsize::new(0),
            upserts_in_flight: AtomicUsize::new(0),
            max_upserts_in_flight: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
        }
    }

    /// 打开后所有调用都返回 `Remote` 错误（模拟断网 / 服务端故障）
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// 单独设置某个操作（如 "soft_delete"）的延迟，优先于 `set_latency`
    pub fn set_op_latency(&self, op: &str, latency: Duration) {
        self.op_latency.lock().insert(op.to_string(), latency);
    }

    /// 直接写入服务端数据（模拟其他客户端的修改）
    pub fn seed(&self, entity: E) {
        let mut stored = entity;
        stored.meta_mut().is_synced = true;
        self.items.lock().insert(stored.id().to_string(), stored);
    }

    pub fn get(&self, id: &str) -> Option<E> {
        self.items.lock().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.lock().contains_key(id)
    }

    pub fn is_in_trash(&self, id: &str) -> bool {
        self.trash.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    /// 同一时刻进行中的 upsert 最大数量
    pub fn max_concurrent_upserts(&self) -> usize {
        self.max_upserts_in_flight.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    async fn simulate_network(&self, op: &str) -> Result<()> {
        let latency = self
            .op_latency
            .lock()
            .get(op)
            .copied()
            .unwrap_or_else(|| *self.latency.lock());
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(PlanboardSDKError::Remote(format!("{} {}: network unreachable", E::KIND, op)));
        }
        Ok(())
    }
}

#[async_trait]
impl<E: SyncEntity> RemoteAdapter<E> for MemoryRemote<E> {
    async fn fetch_all(&self) -> Result<Vec<E>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_network("fetch_all").await?;
        Ok(self.items.lock().values().cloned().collect())
    }

    async fn upsert(&self, entity: &E) -> Result<E> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.upserts_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_upserts_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        let network = self.simulate_network("upsert").await;
        self.upserts_in_flight.fetch_sub(1, Ordering::SeqCst);
        network?;
        let mut canonical = entity.clone();
        canonical.meta_mut().is_synced = true;
        self.items
            .lock()
            .insert(canonical.id().to_string(), canonical.clone());
        Ok(canonical)
    }

    async fn soft_delete(&self, id: &str) -> Result<()> {
        self.simulate_network("soft_delete").await?;
        // 已在回收站或不存在都视为成功（幂等）
        if let Some(mut entity) = self.items.lock().remove(id) {
            entity.meta_mut().trashed = true;
            self.trash.lock().insert(id.to_string(), entity);
        }
        Ok(())
    }

    async fn restore(&self, id: &str) -> Result<()> {
        self.simulate_network("restore").await?;
        if let Some(mut entity) = self.trash.lock().remove(id) {
            entity.meta_mut().trashed = false;
            self.items.lock().insert(id.to_string(), entity);
        }
        Ok(())
    }

    async fn hard_delete(&self, id: &str) -> Result<()> {
        self.simulate_network("hard_delete").await?;
        self.items.lock().remove(id);
        self.trash.lock().remove(id);
        Ok(())
    }
}
