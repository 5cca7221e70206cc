//! 通用实体同步引擎
//!
//! 每种实体类型一个 [`EntityStore`]，由调用方显式构造（远端适配器 + KV 命名空间），
//! 不存在全局单例。
//!
//! 写路径（乐观更新）：
//! 1. 在读写锁内同步修改本地集合与待推送队列，并写入 sled
//! 2. 释放锁后发起推送：`add` 派生后台任务不等待，`update` 等待一次推送尝试
//!
//! 读路径：`sync_from_server` 拉取远端全集，经 [`merge`] 合并后整体替换本地集合。
//!
//! 删除类操作（软删除 / 恢复 / 硬删除）在调用远端之前就以递增序号排队并持久化，
//! 成功后仅当队列中仍是同一序号时才出队。拉取与推送轮次会记住本轮开始后发起的删除：
//! 拉取忽略这些 id 的远端副本，推送若与删除竞争（upsert 晚于删除到达服务端）则重放删除。
//!
//! 锁内绝不 await；网络调用只挂起当前任务。

use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::entity::{SyncEntity, SyncMeta};
use super::merge::merge;
use super::remote::RemoteAdapter;
use crate::connectivity::ConnectivityManager;
use crate::error::{PlanboardSDKError, Result};
use crate::events::{EventManager, SdkEvent};
use crate::storage::{KvNamespace, KvStore};
use crate::utils::{new_entity_id, Clock, SystemClock};

const ENTITY_PREFIX: &str = "entity:";
const PENDING_OP_PREFIX: &str = "pending_op:";

/// Store 运行所需的共享协作者
#[derive(Debug, Clone)]
pub struct StoreContext {
    pub clock: Arc<dyn Clock>,
    pub events: EventManager,
    /// 设置后，只有在线时才会在本地修改后立即推送；离线的修改留给调度器
    pub connectivity: Option<ConnectivityManager>,
}

impl Default for StoreContext {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock::new()),
            events: EventManager::default(),
            connectivity: None,
        }
    }
}

/// 排队等待重试的远端删除类操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingOpKind {
    SoftDelete,
    Restore,
    HardDelete,
}

impl PendingOpKind {
    pub fn is_delete(&self) -> bool {
        matches!(self, PendingOpKind::SoftDelete | PendingOpKind::HardDelete)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOp {
    pub id: String,
    pub kind: PendingOpKind,
    /// Store 内单调递增；同一 id 上序号更大的操作取代旧操作
    #[serde(default)]
    pub seq: u64,
    pub queued_at: i64,
    /// 已失败的次数
    pub attempts: u32,
}

enum OpOutcome {
    Completed,
    Dropped,
    Failed,
}

/// 一轮推送的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    /// 服务端已确认并移出队列
    pub pushed: usize,
    /// 推送失败，仍在队列中
    pub failed: usize,
    /// 推送成功，但期间出现了更新的本地修改，新修改继续排队
    pub superseded: usize,
    pub ops_completed: usize,
    pub ops_failed: usize,
}

impl PushReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.ops_failed == 0
    }
}

impl std::ops::AddAssign for PushReport {
    fn add_assign(&mut self, other: Self) {
        self.pushed += other.pushed;
        self.failed += other.failed;
        self.superseded += other.superseded;
        self.ops_completed += other.ops_completed;
        self.ops_failed += other.ops_failed;
    }
}

#[derive(Debug)]
struct StoreState<E> {
    collection: HashMap<String, E>,
    pending: HashMap<String, E>,
    pending_ops: HashMap<String, PendingOp>,
    next_op_seq: u64,
    /// 正在调用远端的操作序号，重试时跳过
    ops_in_flight: HashSet<u64>,
    /// 最近发起的删除（id → 序号、类型），保留到所有更早开始的轮次结束
    recent_deletes: HashMap<String, (u64, PendingOpKind)>,
    /// 进行中的拉取 / 推送轮次的起始序号
    open_rounds: Vec<u64>,
}

impl<E> StoreState<E> {
    fn deleted_since(&self, id: &str, round_start: u64) -> Option<PendingOpKind> {
        self.recent_deletes
            .get(id)
            .filter(|(seq, _)| *seq >= round_start)
            .map(|(_, kind)| *kind)
    }

    fn prune_recent_deletes(&mut self) {
        match self.open_rounds.iter().min().copied() {
            Some(oldest) => self.recent_deletes.retain(|_, (seq, _)| *seq >= oldest),
            None => self.recent_deletes.clear(),
        }
    }
}

/// 一轮拉取 / 推送的生命周期；结束（含提前返回）时注销
struct RoundGuard<'a, E: SyncEntity> {
    store: &'a EntityStore<E>,
    start: u64,
}

impl<E: SyncEntity> Drop for RoundGuard<'_, E> {
    fn drop(&mut self) {
        let mut state = self.store.inner.state.write();
        if let Some(pos) = state.open_rounds.iter().position(|s| *s == self.start) {
            state.open_rounds.swap_remove(pos);
        }
        state.prune_recent_deletes();
    }
}

struct StoreInner<E: SyncEntity> {
    namespace: String,
    state: RwLock<StoreState<E>>,
    remote: Arc<dyn RemoteAdapter<E>>,
    kv: KvNamespace,
    clock: Arc<dyn Clock>,
    events: EventManager,
    connectivity: Option<ConnectivityManager>,
}

/// 单一实体类型的本地集合、待推送队列及其同步逻辑
pub struct EntityStore<E: SyncEntity> {
    inner: Arc<StoreInner<E>>,
}

impl<E: SyncEntity> Clone for EntityStore<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: SyncEntity> std::fmt::Debug for EntityStore<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("EntityStore")
            .field("namespace", &self.inner.namespace)
            .field("len", &state.collection.len())
            .field("pending", &state.pending.len())
            .field("pending_ops", &state.pending_ops.len())
            .finish()
    }
}

impl<E: SyncEntity> EntityStore<E> {
    /// 打开（或创建）命名空间，并从 KV 中恢复本地集合与排队操作
    pub fn new(
        namespace: &str,
        remote: Arc<dyn RemoteAdapter<E>>,
        kv: &KvStore,
        ctx: StoreContext,
    ) -> Result<Self> {
        let kv = kv.namespace(namespace)?;

        let mut collection = HashMap::new();
        for (_, entity) in kv.scan_prefix_skip_invalid::<E>(ENTITY_PREFIX.as_bytes())? {
            collection.insert(entity.id().to_string(), entity);
        }
        let pending: HashMap<String, E> = collection
            .values()
            .filter(|e| !e.is_synced())
            .map(|e| (e.id().to_string(), e.clone()))
            .collect();
        let mut pending_ops = HashMap::new();
        for (_, op) in kv.scan_prefix_skip_invalid::<PendingOp>(PENDING_OP_PREFIX.as_bytes())? {
            pending_ops.insert(op.id.clone(), op);
        }
        let next_op_seq = pending_ops.values().map(|op| op.seq + 1).max().unwrap_or(1);

        info!(
            "✅ EntityStore[{}] 已加载: {} 条记录, {} 条待推送, {} 个待重试操作",
            namespace,
            collection.len(),
            pending.len(),
            pending_ops.len()
        );

        Ok(Self {
            inner: Arc::new(StoreInner {
                namespace: namespace.to_string(),
                state: RwLock::new(StoreState {
                    collection,
                    pending,
                    pending_ops,
                    next_op_seq,
                    ops_in_flight: HashSet::new(),
                    recent_deletes: HashMap::new(),
                    open_rounds: Vec::new(),
                }),
                remote,
                kv,
                clock: ctx.clock,
                events: ctx.events,
                connectivity: ctx.connectivity,
            }),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    // ========== 写操作 ==========

    /// 新建实体，同步返回 id
    ///
    /// 推送在后台进行，返回时不保证已送达。
    pub fn add(&self, draft: E::Draft) -> String {
        let entity = self.insert_local(draft);
        let id = entity.id().to_string();
        if !entity.is_synced() {
            self.spawn_push();
        }
        id
    }

    /// 新建实体并返回本地副本，不触发推送
    pub(crate) fn insert_local(&self, draft: E::Draft) -> E {
        let id = new_entity_id();
        let meta = SyncMeta::new(id.clone(), self.inner.clock.now_ms());
        let mut entity = E::from_draft(meta, draft);
        entity.normalize();
        // 空白草稿只保存在本地
        entity.meta_mut().is_synced = !entity.worth_syncing();

        {
            let mut state = self.inner.state.write();
            self.persist_entity(&entity);
            if !entity.is_synced() {
                state.pending.insert(id.clone(), entity.clone());
            }
            state.collection.insert(id.clone(), entity.clone());
        }
        debug!("EntityStore[{}] add {}", self.inner.namespace, id);
        self.emit_changed();
        entity
    }

    /// 只修改本地并入队，推送在后台进行；id 不存在时返回 false
    pub fn apply(&self, id: &str, patch: E::Patch) -> bool {
        let applied = self.apply_local(id, patch);
        if applied {
            self.spawn_push();
        }
        applied
    }

    /// 部分更新，等待一次推送尝试后返回
    ///
    /// id 不存在时只记录日志。推送失败不会回滚本地修改。
    pub async fn update(&self, id: &str, patch: E::Patch) {
        if self.apply_local(id, patch) {
            self.push_if_allowed().await;
        }
    }

    /// 批量部分更新，同步修改后在后台推送；返回实际生效的条数
    pub fn apply_many(&self, patches: Vec<(String, E::Patch)>) -> usize {
        let applied = self.apply_many_local(patches);
        if applied > 0 {
            self.spawn_push();
        }
        applied
    }

    /// 批量部分更新，最后统一等待一次推送尝试
    pub async fn update_many(&self, patches: Vec<(String, E::Patch)>) -> usize {
        let applied = self.apply_many_local(patches);
        if applied > 0 {
            self.push_if_allowed().await;
        }
        applied
    }

    fn apply_many_local(&self, patches: Vec<(String, E::Patch)>) -> usize {
        let applied = {
            let mut state = self.inner.state.write();
            let changed: Vec<E> = patches
                .into_iter()
                .filter_map(|(id, patch)| self.apply_locked(&mut state, &id, patch))
                .collect();
            self.persist_entities(&changed);
            changed.len()
        };
        if applied > 0 {
            self.emit_changed();
        }
        applied
    }

    fn apply_local(&self, id: &str, patch: E::Patch) -> bool {
        let applied = {
            let mut state = self.inner.state.write();
            match self.apply_locked(&mut state, id, patch) {
                Some(next) => {
                    self.persist_entity(&next);
                    true
                }
                None => false,
            }
        };
        if applied {
            self.emit_changed();
        }
        applied
    }

    /// 在锁内修改集合与队列，返回新副本（由调用方持久化）
    fn apply_locked(&self, state: &mut StoreState<E>, id: &str, patch: E::Patch) -> Option<E> {
        let Some(current) = state.collection.get(id) else {
            warn!("⚠️ EntityStore[{}] 更新不存在的记录: {}", self.inner.namespace, id);
            return None;
        };

        let mut next = current.clone();
        next.apply_patch(patch);
        next.normalize();
        let stamp = self.next_stamp(current.updated_at());
        next.meta_mut().touch(stamp);

        state.pending.insert(id.to_string(), next.clone());
        state.collection.insert(id.to_string(), next.clone());
        debug!("EntityStore[{}] update {} @{}", self.inner.namespace, id, stamp);
        Some(next)
    }

    /// 软删除：立即移出本地，再调用远端
    pub async fn soft_delete(&self, id: &str) {
        self.remote_op(id, PendingOpKind::SoftDelete).await;
    }

    pub async fn restore(&self, id: &str) {
        self.remote_op(id, PendingOpKind::Restore).await;
    }

    pub async fn hard_delete(&self, id: &str) {
        self.remote_op(id, PendingOpKind::HardDelete).await;
    }

    async fn remote_op(&self, id: &str, kind: PendingOpKind) {
        let (op, removed) = {
            let mut state = self.inner.state.write();
            state.pending.remove(id);
            let removed = state.collection.remove(id).is_some();
            if removed {
                self.delete_key(&format!("{}{}", ENTITY_PREFIX, id));
            }
            // 先排队再调用远端：同一 id 上尚未送达的旧操作被取代
            (self.begin_op(&mut state, id, kind), removed)
        };
        if removed {
            self.emit_changed();
        }

        match self.execute_op(op).await {
            OpOutcome::Completed => {
                debug!("EntityStore[{}] {:?} {} 已送达", self.inner.namespace, kind, id);
            }
            OpOutcome::Dropped => {}
            OpOutcome::Failed => {
                warn!("⚠️ EntityStore[{}] {:?} {} 未送达，留待重试", self.inner.namespace, kind, id);
            }
        }
    }

    /// 分配序号、排队并持久化，同时标记为进行中
    fn begin_op(&self, state: &mut StoreState<E>, id: &str, kind: PendingOpKind) -> PendingOp {
        let op = PendingOp {
            id: id.to_string(),
            kind,
            seq: state.next_op_seq,
            queued_at: self.inner.clock.now_ms(),
            attempts: 0,
        };
        state.next_op_seq += 1;
        self.persist_op(&op);
        state.pending_ops.insert(id.to_string(), op.clone());
        state.ops_in_flight.insert(op.seq);
        if kind.is_delete() {
            state.recent_deletes.insert(id.to_string(), (op.seq, kind));
        } else {
            state.recent_deletes.remove(id);
        }
        op
    }

    /// 调用远端并结算；队列中已是更新的操作时不改动队列
    async fn execute_op(&self, op: PendingOp) -> OpOutcome {
        let result = match op.kind {
            PendingOpKind::SoftDelete => self.inner.remote.soft_delete(&op.id).await,
            PendingOpKind::Restore => self.inner.remote.restore(&op.id).await,
            PendingOpKind::HardDelete => self.inner.remote.hard_delete(&op.id).await,
        };

        let mut state = self.inner.state.write();
        state.ops_in_flight.remove(&op.seq);
        let current = state.pending_ops.get(&op.id).map(|q| q.seq) == Some(op.seq);
        match result {
            Ok(()) => {
                if current {
                    state.pending_ops.remove(&op.id);
                    self.delete_key(&format!("{}{}", PENDING_OP_PREFIX, op.id));
                }
                OpOutcome::Completed
            }
            Err(PlanboardSDKError::Unsupported(msg)) => {
                warn!("⚠️ EntityStore[{}] 远端不支持该操作，已丢弃: {}", self.inner.namespace, msg);
                if current {
                    state.pending_ops.remove(&op.id);
                    self.delete_key(&format!("{}{}", PENDING_OP_PREFIX, op.id));
                }
                OpOutcome::Dropped
            }
            Err(e) => {
                if e.is_transient() {
                    debug!("EntityStore[{}] {:?} {} 失败: {}", self.inner.namespace, op.kind, op.id, e);
                } else {
                    warn!("⚠️ EntityStore[{}] {:?} {} 失败: {}", self.inner.namespace, op.kind, op.id, e);
                }
                if current {
                    if let Some(queued) = state.pending_ops.get_mut(&op.id) {
                        queued.attempts += 1;
                        let queued = queued.clone();
                        self.persist_op(&queued);
                    }
                }
                OpOutcome::Failed
            }
        }
    }

    fn open_round(&self) -> RoundGuard<'_, E> {
        let mut state = self.inner.state.write();
        let start = state.next_op_seq;
        state.open_rounds.push(start);
        RoundGuard { store: self, start }
    }

    // ========== 同步 ==========

    /// 并发推送全部待推送记录，并并发重试排队的删除类操作
    pub async fn sync_pending(&self) -> PushReport {
        let round = self.open_round();
        let (snapshot, mut ops): (Vec<E>, Vec<PendingOp>) = {
            let mut state = self.inner.state.write();
            let snapshot = state.pending.values().cloned().collect();
            let ops: Vec<PendingOp> = state
                .pending_ops
                .values()
                .filter(|op| !state.ops_in_flight.contains(&op.seq))
                .cloned()
                .collect();
            for op in &ops {
                state.ops_in_flight.insert(op.seq);
            }
            (snapshot, ops)
        };
        let mut report = PushReport::default();
        if snapshot.is_empty() && ops.is_empty() {
            return report;
        }

        debug!(
            "🔄 EntityStore[{}] 推送 {} 条记录, 重试 {} 个操作",
            self.inner.namespace,
            snapshot.len(),
            ops.len()
        );

        let remote = &self.inner.remote;
        let results = join_all(snapshot.iter().map(|entity| remote.upsert(entity))).await;

        {
            let mut state = self.inner.state.write();
            let mut confirmed = Vec::new();
            for (sent, result) in snapshot.iter().zip(results) {
                match result {
                    Ok(mut canonical) => {
                        let current_stamp = state.collection.get(sent.id()).map(|e| e.updated_at());
                        if current_stamp.is_none() {
                            // upsert 可能晚于本轮期间的删除到达服务端，把记录重新建了出来
                            if let Some(kind) = state.deleted_since(sent.id(), round.start) {
                                info!(
                                    "🔄 EntityStore[{}] {} 的推送与 {:?} 竞争，重放删除",
                                    self.inner.namespace,
                                    sent.id(),
                                    kind
                                );
                                ops.push(self.begin_op(&mut state, sent.id(), kind));
                            }
                        }
                        // 推送期间出现了更新的本地修改（或记录已被删除），以当前状态为准
                        if current_stamp != Some(sent.updated_at()) {
                            report.superseded += 1;
                            continue;
                        }
                        canonical.meta_mut().is_synced = true;
                        state.pending.remove(sent.id());
                        state.collection.insert(sent.id().to_string(), canonical.clone());
                        confirmed.push(canonical);
                        report.pushed += 1;
                    }
                    Err(e) => {
                        if e.is_transient() {
                            debug!("EntityStore[{}] 推送 {} 失败: {}", self.inner.namespace, sent.id(), e);
                        } else {
                            warn!("⚠️ EntityStore[{}] 推送 {} 失败: {}", self.inner.namespace, sent.id(), e);
                        }
                        report.failed += 1;
                    }
                }
            }
            self.persist_entities(&confirmed);
        }

        for outcome in join_all(ops.into_iter().map(|op| self.execute_op(op))).await {
            match outcome {
                OpOutcome::Completed => report.ops_completed += 1,
                OpOutcome::Dropped => {}
                OpOutcome::Failed => report.ops_failed += 1,
            }
        }

        if report.failed > 0 || report.ops_failed > 0 {
            warn!(
                "⚠️ EntityStore[{}] 推送未完成: 成功 {}, 失败 {}, 操作失败 {}",
                self.inner.namespace, report.pushed, report.failed, report.ops_failed
            );
        } else {
            debug!("EntityStore[{}] 推送完成: {:?}", self.inner.namespace, report);
        }
        drop(round);
        self.emit_changed();
        report
    }

    /// 拉取远端全集并合并；失败时本地状态不变，返回 false
    pub async fn sync_from_server(&self) -> bool {
        let round = self.open_round();
        let fetched = match self.inner.remote.fetch_all().await {
            Ok(items) => items,
            Err(e) => {
                warn!("⚠️ EntityStore[{}] 拉取失败: {}", self.inner.namespace, e);
                return false;
            }
        };
        let fetched_count = fetched.len();

        {
            let mut state = self.inner.state.write();
            // 删除类操作尚未送达，或在本轮拉取期间才送达的 id，忽略远端副本
            let remote: Vec<E> = fetched
                .into_iter()
                .filter(|e| {
                    !state.pending_ops.contains_key(e.id())
                        && state.deleted_since(e.id(), round.start).is_none()
                })
                .collect();
            let local: Vec<E> = state.collection.values().cloned().collect();

            let mut collection = HashMap::with_capacity(local.len().max(remote.len()));
            let mut changed = Vec::new();
            for entity in merge(&local, &remote) {
                if state.collection.get(entity.id()) != Some(&entity) {
                    changed.push(entity.clone());
                }
                collection.insert(entity.id().to_string(), entity);
            }
            self.persist_entities(&changed);
            state.pending = collection
                .values()
                .filter(|e| !e.is_synced())
                .map(|e| (e.id().to_string(), e.clone()))
                .collect();
            state.collection = collection;
        }
        drop(round);

        debug!(
            "EntityStore[{}] 拉取完成: 远端 {} 条, 本地 {} 条",
            self.inner.namespace,
            fetched_count,
            self.len()
        );
        self.emit_changed();
        true
    }

    // ========== 查询 ==========

    pub fn get(&self, id: &str) -> Option<E> {
        self.inner.state.read().collection.get(id).cloned()
    }

    pub fn all(&self) -> Vec<E> {
        self.inner.state.read().collection.values().cloned().collect()
    }

    /// 未软删除的记录
    pub fn live(&self) -> Vec<E> {
        self.inner
            .state
            .read()
            .collection
            .values()
            .filter(|e| !e.is_trashed())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.state.read().collection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_count(&self) -> usize {
        self.inner.state.read().pending.len()
    }

    pub fn pending_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.state.read().pending.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn pending_ops(&self) -> Vec<PendingOp> {
        self.inner.state.read().pending_ops.values().cloned().collect()
    }

    /// 订阅集合变化（以及同一事件总线上的其他事件）
    pub fn subscribe(&self) -> broadcast::Receiver<SdkEvent> {
        self.inner.events.subscribe()
    }

    // ========== 内部 ==========

    /// 同一实体的时间戳严格递增，即使时钟回拨或停滞
    fn next_stamp(&self, previous: i64) -> i64 {
        self.inner.clock.now_ms().max(previous + 1)
    }

    pub(crate) fn now_ms(&self) -> i64 {
        self.inner.clock.now_ms()
    }

    fn push_allowed(&self) -> bool {
        self.inner
            .connectivity
            .as_ref()
            .map_or(true, |c| c.is_connected())
    }

    async fn push_if_allowed(&self) {
        if self.push_allowed() {
            self.sync_pending().await;
        } else {
            debug!("EntityStore[{}] 离线，修改留在队列中", self.inner.namespace);
        }
    }

    fn spawn_push(&self) {
        if !self.push_allowed() {
            debug!("EntityStore[{}] 离线，修改留在队列中", self.inner.namespace);
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = self.clone();
                handle.spawn(async move {
                    store.sync_pending().await;
                });
            }
            Err(_) => {
                debug!(
                    "EntityStore[{}] 无 tokio 运行时，推送留给下一轮同步",
                    self.inner.namespace
                );
            }
        }
    }

    fn persist_entity(&self, entity: &E) {
        let key = format!("{}{}", ENTITY_PREFIX, entity.id());
        if let Err(e) = self.inner.kv.set(&key, entity) {
            warn!("⚠️ EntityStore[{}] 持久化 {} 失败: {}", self.inner.namespace, entity.id(), e);
        }
    }

    fn persist_entities(&self, entities: &[E]) {
        if entities.is_empty() {
            return;
        }
        let pairs: Vec<(String, &E)> = entities
            .iter()
            .map(|e| (format!("{}{}", ENTITY_PREFIX, e.id()), e))
            .collect();
        if let Err(e) = self.inner.kv.set_batch(&pairs) {
            warn!(
                "⚠️ EntityStore[{}] 批量持久化 {} 条失败: {}",
                self.inner.namespace,
                entities.len(),
                e
            );
        }
    }

    fn persist_op(&self, op: &PendingOp) {
        let key = format!("{}{}", PENDING_OP_PREFIX, op.id);
        if let Err(e) = self.inner.kv.set(&key, op) {
            warn!("⚠️ EntityStore[{}] 持久化操作 {} 失败: {}", self.inner.namespace, op.id, e);
        }
    }

    fn delete_key(&self, key: &str) {
        if let Err(e) = self.inner.kv.delete(key) {
            warn!("⚠️ EntityStore[{}] 删除 {} 失败: {}", self.inner.namespace, key, e);
        }
    }

    fn emit_changed(&self) {
        let (total, pending) = {
            let state = self.inner.state.read();
            (state.collection.len(), state.pending.len())
        };
        self.inner
            .events
            .emit(SdkEvent::collection_changed(&self.inner.namespace, total, pending));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::note::{Note, NoteDraft, NotePatch};
    use crate::domain::tag::{Tag, TagDraft, TagPatch};
    use crate::sync::patch::Field;
    use crate::sync::remote::MemoryRemote;
    use crate::utils::ManualClock;
    use std::time::Duration;

    struct Fixture {
        store: EntityStore<Tag>,
        remote: Arc<MemoryRemote<Tag>>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let kv = KvStore::temporary().unwrap();
        let remote = Arc::new(MemoryRemote::<Tag>::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let ctx = StoreContext {
            clock: clock.clone(),
            events: EventManager::default(),
            connectivity: None,
        };
        let store = EntityStore::new("tags", remote.clone(), &kv, ctx).unwrap();
        Fixture {
            store,
            remote,
            clock,
        }
    }

    fn rename(name: &str) -> TagPatch {
        TagPatch {
            name: Field::Set(name.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn add_is_visible_immediately_even_when_offline() {
        let f = fixture();
        f.remote.set_failing(true);

        let id = f.store.add(TagDraft::named("work"));
        let tag = f.store.get(&id).unwrap();
        assert_eq!(tag.name, "work");
        assert!(!tag.meta.is_synced);
        assert_eq!(f.store.pending_ids(), vec![id]);
    }

    #[tokio::test]
    async fn update_stamps_and_pushes() {
        let f = fixture();
        let id = f.store.insert_local(TagDraft::named("home")).meta.id;
        f.clock.advance(50);

        f.store.update(&id, rename("house")).await;

        let tag = f.store.get(&id).unwrap();
        assert_eq!(tag.name, "house");
        assert_eq!(tag.meta.updated_at, 1_050);
        assert!(tag.meta.is_synced);
        assert_eq!(f.store.pending_count(), 0);
        assert_eq!(f.remote.get(&id).unwrap().name, "house");
    }

    #[tokio::test]
    async fn update_with_frozen_clock_still_increases_stamp() {
        let f = fixture();
        let id = f.store.insert_local(TagDraft::named("a")).meta.id;
        f.remote.set_failing(true);
        f.store.update(&id, rename("b")).await;
        f.store.update(&id, rename("c")).await;
        assert_eq!(f.store.get(&id).unwrap().meta.updated_at, 1_002);
    }

    #[tokio::test]
    async fn update_unknown_id_is_noop() {
        let f = fixture();
        f.store.update("missing", rename("x")).await;
        assert!(f.store.is_empty());
        assert_eq!(f.remote.upsert_calls(), 0);
    }

    #[tokio::test]
    async fn failed_push_stays_pending_until_retry() {
        let f = fixture();
        let id = f.store.insert_local(TagDraft::named("x")).meta.id;
        f.remote.set_failing(true);

        let report = f.store.sync_pending().await;
        assert_eq!(report.failed, 1);
        assert_eq!(f.store.pending_ids(), vec![id.clone()]);
        assert!(!f.store.get(&id).unwrap().meta.is_synced);

        f.remote.set_failing(false);
        let report = f.store.sync_pending().await;
        assert_eq!(report.pushed, 1);
        assert!(report.is_clean());
        assert_eq!(f.store.pending_count(), 0);
        assert!(f.store.get(&id).unwrap().meta.is_synced);
    }

    #[tokio::test]
    async fn late_edit_during_push_stays_pending() {
        let f = fixture();
        let id = f.store.insert_local(TagDraft::named("first")).meta.id;
        f.remote.set_latency(Duration::from_millis(50));

        let pushing = {
            let store = f.store.clone();
            tokio::spawn(async move { store.sync_pending().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(f.store.apply_local(&id, rename("second")));

        let report = pushing.await.unwrap();
        assert_eq!(report.superseded, 1);

        let tag = f.store.get(&id).unwrap();
        assert_eq!(tag.name, "second");
        assert!(!tag.meta.is_synced);
        assert_eq!(f.store.pending_ids(), vec![id.clone()]);

        f.remote.set_latency(Duration::ZERO);
        f.store.sync_pending().await;
        assert_eq!(f.remote.get(&id).unwrap().name, "second");
        assert_eq!(f.store.pending_count(), 0);
    }

    #[tokio::test]
    async fn pull_adopts_newer_remote_copy() {
        let f = fixture();
        let local = f.store.insert_local(TagDraft::named("A"));
        let id = local.meta.id.clone();
        assert_eq!(local.meta.updated_at, 1_000);

        f.remote.seed(Tag::with_meta(&id, 2_000, "B"));
        assert!(f.store.sync_from_server().await);

        let tag = f.store.get(&id).unwrap();
        assert_eq!(tag.name, "B");
        assert_eq!(tag.meta.updated_at, 2_000);
        assert!(tag.meta.is_synced);
        assert_eq!(f.store.pending_count(), 0);
    }

    #[tokio::test]
    async fn pull_is_idempotent() {
        let f = fixture();
        f.remote.seed(Tag::with_meta("r1", 10, "remote"));
        f.store.insert_local(TagDraft::named("local"));

        assert!(f.store.sync_from_server().await);
        let mut first = f.store.all();
        first.sort_by(|a, b| a.meta.id.cmp(&b.meta.id));
        let first_pending = f.store.pending_ids();

        assert!(f.store.sync_from_server().await);
        let mut second = f.store.all();
        second.sort_by(|a, b| a.meta.id.cmp(&b.meta.id));
        assert_eq!(first, second);
        assert_eq!(first_pending, f.store.pending_ids());
    }

    #[tokio::test]
    async fn failed_pull_leaves_state_unchanged() {
        let f = fixture();
        let id = f.store.insert_local(TagDraft::named("keep")).meta.id;
        f.remote.set_failing(true);

        assert!(!f.store.sync_from_server().await);
        assert_eq!(f.store.len(), 1);
        assert_eq!(f.store.pending_ids(), vec![id]);
    }

    #[tokio::test]
    async fn failed_soft_delete_is_queued_and_retried() {
        let f = fixture();
        f.remote.seed(Tag::with_meta("t1", 10, "old"));
        f.store.sync_from_server().await;
        assert_eq!(f.store.len(), 1);

        f.remote.set_failing(true);
        f.store.soft_delete("t1").await;
        assert!(f.store.get("t1").is_none());
        assert_eq!(f.store.pending_ops().len(), 1);

        // 远端仍有该记录，但操作排队期间不会被拉回
        f.remote.set_failing(false);
        let report = f.store.sync_pending().await;
        assert_eq!(report.ops_completed, 1);
        assert!(f.store.pending_ops().is_empty());
        assert!(f.remote.is_in_trash("t1"));

        f.store.sync_from_server().await;
        assert!(f.store.get("t1").is_none());
    }

    #[tokio::test]
    async fn queued_delete_hides_remote_copy_on_pull() {
        let f = fixture();
        f.remote.seed(Tag::with_meta("t1", 10, "old"));
        f.store.sync_from_server().await;

        f.remote.set_failing(true);
        f.store.hard_delete("t1").await;
        f.remote.set_failing(false);
        // 只拉取不推送：远端副本仍在，但被忽略
        assert!(f.store.sync_from_server().await);
        assert!(f.store.get("t1").is_none());
        assert!(f.remote.contains("t1"));
    }

    #[tokio::test]
    async fn pull_during_in_flight_delete_does_not_resurrect() {
        let f = fixture();
        f.remote.seed(Tag::with_meta("t1", 10, "old"));
        f.store.sync_from_server().await;
        f.remote.set_op_latency("soft_delete", Duration::from_millis(50));

        let deleting = {
            let store = f.store.clone();
            tokio::spawn(async move { store.soft_delete("t1").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        // 远端尚未处理删除，拉取到的仍是旧副本
        assert!(f.remote.contains("t1"));
        assert!(f.store.sync_from_server().await);
        assert!(f.store.get("t1").is_none());

        deleting.await.unwrap();
        assert!(f.store.pending_ops().is_empty());
        assert!(f.store.sync_from_server().await);
        assert!(f.store.get("t1").is_none());
        assert!(f.remote.is_in_trash("t1"));
    }

    #[tokio::test]
    async fn push_racing_delete_replays_delete() {
        let f = fixture();
        let id = f.store.insert_local(TagDraft::named("doomed")).meta.id;
        f.remote.set_latency(Duration::from_millis(50));
        f.remote.set_op_latency("hard_delete", Duration::ZERO);

        let pushing = {
            let store = f.store.clone();
            tokio::spawn(async move { store.sync_pending().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        f.store.hard_delete(&id).await;

        let report = pushing.await.unwrap();
        assert_eq!(report.superseded, 1);
        assert_eq!(report.ops_completed, 1);
        assert!(!f.remote.contains(&id));
        assert!(f.store.pending_ops().is_empty());

        f.remote.set_latency(Duration::ZERO);
        assert!(f.store.sync_from_server().await);
        assert!(f.store.get(&id).is_none());
    }

    #[tokio::test]
    async fn slow_failed_delete_does_not_override_newer_restore() {
        let f = fixture();
        f.remote.set_failing(true);
        f.remote.set_op_latency("soft_delete", Duration::from_millis(50));

        let deleting = {
            let store = f.store.clone();
            tokio::spawn(async move { store.soft_delete("t1").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        f.store.restore("t1").await;
        deleting.await.unwrap();

        let ops = f.store.pending_ops();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind, PendingOpKind::Restore);
        assert_eq!(ops[0].attempts, 1);

        f.remote.set_failing(false);
        let report = f.store.sync_pending().await;
        assert_eq!(report.ops_completed, 1);
        assert!(f.store.pending_ops().is_empty());
    }

    #[tokio::test]
    async fn pending_entities_are_upserted_concurrently() {
        let f = fixture();
        for name in ["a", "b", "c", "d"] {
            f.store.insert_local(TagDraft::named(name));
        }
        f.remote.set_latency(Duration::from_millis(30));

        let report = f.store.sync_pending().await;
        assert_eq!(report.pushed, 4);
        assert_eq!(f.remote.max_concurrent_upserts(), 4);
        assert_eq!(f.store.pending_count(), 0);
    }

    #[tokio::test]
    async fn queued_ops_are_retried_concurrently() {
        let f = fixture();
        f.remote.set_failing(true);
        f.store.hard_delete("x").await;
        f.store.hard_delete("y").await;
        assert_eq!(f.store.pending_ops().len(), 2);

        f.remote.set_failing(false);
        f.remote.set_op_latency("hard_delete", Duration::from_millis(100));
        let started = std::time::Instant::now();
        let report = f.store.sync_pending().await;
        assert_eq!(report.ops_completed, 2);
        assert!(started.elapsed() < Duration::from_millis(190));
        assert!(f.store.pending_ops().is_empty());
    }

    #[tokio::test]
    async fn batch_update_is_persisted() {
        let kv = KvStore::temporary().unwrap();
        let remote = Arc::new(MemoryRemote::<Tag>::new());
        remote.set_failing(true);
        let store = EntityStore::new("tags", remote.clone(), &kv, StoreContext::default()).unwrap();
        let a = store.insert_local(TagDraft::named("a")).meta.id;
        let b = store.insert_local(TagDraft::named("b")).meta.id;

        let applied = store
            .update_many(vec![
                (a.clone(), rename("a2")),
                (b.clone(), rename("b2")),
                ("missing".to_string(), rename("x")),
            ])
            .await;
        assert_eq!(applied, 2);

        let reopened = EntityStore::new("tags", remote, &kv, StoreContext::default()).unwrap();
        assert_eq!(reopened.get(&a).unwrap().name, "a2");
        assert_eq!(reopened.get(&b).unwrap().name, "b2");
        assert_eq!(reopened.pending_count(), 2);
    }

    #[test]
    fn corrupt_records_are_skipped_on_open() {
        let kv = KvStore::temporary().unwrap();
        let ns = kv.namespace("tags").unwrap();
        ns.set("entity:good", &Tag::with_meta("good", 1, "ok")).unwrap();
        ns.set("entity:bad", &"garbage").unwrap();
        ns.set("pending_op:bad", &42u32).unwrap();

        let remote = Arc::new(MemoryRemote::<Tag>::new());
        let store = EntityStore::new("tags", remote, &kv, StoreContext::default()).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get("good").is_some());
        assert!(store.pending_ops().is_empty());
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(MemoryRemote::<Tag>::new());
        remote.set_failing(true);
        let id;
        {
            let kv = KvStore::open(dir.path()).await.unwrap();
            let store = EntityStore::new("tags", remote.clone(), &kv, StoreContext::default()).unwrap();
            id = store.insert_local(TagDraft::named("persisted")).meta.id;
            store.soft_delete("ghost").await;
            kv.flush().await.unwrap();
        }

        let kv = KvStore::open(dir.path()).await.unwrap();
        let store = EntityStore::new("tags", remote.clone(), &kv, StoreContext::default()).unwrap();
        assert_eq!(store.get(&id).unwrap().name, "persisted");
        assert_eq!(store.pending_ids(), vec![id]);
        assert_eq!(store.pending_ops()[0].kind, PendingOpKind::SoftDelete);
    }

    #[tokio::test]
    async fn empty_note_draft_is_not_queued() {
        let kv = KvStore::temporary().unwrap();
        let remote = Arc::new(MemoryRemote::<Note>::new());
        let store = EntityStore::new("notes", remote.clone(), &kv, StoreContext::default()).unwrap();

        let empty = store.insert_local(NoteDraft::default());
        assert!(empty.meta.is_synced);
        assert_eq!(store.pending_count(), 0);

        let patch = NotePatch {
            title: Field::Set("  groceries ".to_string()),
            ..Default::default()
        };
        store.update(&empty.meta.id, patch).await;
        let note = store.get(&empty.meta.id).unwrap();
        assert_eq!(note.title, "groceries");
        assert!(remote.contains(&empty.meta.id));
    }

    #[tokio::test]
    async fn offline_gate_skips_immediate_push() {
        let kv = KvStore::temporary().unwrap();
        let remote = Arc::new(MemoryRemote::<Tag>::new());
        let connectivity = ConnectivityManager::default();
        let ctx = StoreContext {
            connectivity: Some(connectivity),
            ..Default::default()
        };
        let store = EntityStore::new("tags", remote.clone(), &kv, ctx).unwrap();

        let id = store.insert_local(TagDraft::named("offline")).meta.id;
        store.update(&id, rename("still offline")).await;
        assert_eq!(remote.upsert_calls(), 0);
        assert_eq!(store.pending_count(), 1);
    }

    #[tokio::test]
    async fn collection_changes_are_broadcast() {
        let f = fixture();
        let mut rx = f.store.subscribe();
        f.store.insert_local(TagDraft::named("evt"));
        match rx.recv().await.unwrap() {
            SdkEvent::CollectionChanged { namespace, total, pending, .. } => {
                assert_eq!(namespace, "tags");
                assert_eq!(total, 1);
                assert_eq!(pending, 1);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
