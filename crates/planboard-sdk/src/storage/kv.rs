//! KV 存储模块 - 基于 sled 的本地持久化
//!
//! 本模块提供：
//! - 每个实体 Store 独立的命名空间（sled Tree）
//! - JSON 序列化的值
//! - 批量写入和前缀扫描
//!
//! 进程重启后数据仍然存在；测试使用 [`KvStore::temporary`]。

use serde::{de::DeserializeOwned, Serialize};
use sled::{Db, Tree};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{PlanboardSDKError, Result};

/// KV 存储组件
#[derive(Debug, Clone)]
pub struct KvStore {
    base_path: Option<PathBuf>,
    db: Arc<Db>,
}

impl KvStore {
    /// 打开（或创建）位于 `base_path/kv` 的数据库
    pub async fn open(base_path: &Path) -> Result<Self> {
        let kv_path = base_path.join("kv");
        tokio::fs::create_dir_all(&kv_path)
            .await
            .map_err(|e| PlanboardSDKError::IO(format!("创建 KV 存储目录失败: {}", e)))?;

        // 上一个进程可能刚释放文件锁，带退避重试几次
        const MAX_OPEN_RETRIES: u32 = 5;
        const RETRY_DELAY_MS: u64 = 100;
        let mut last_err: Option<sled::Error> = None;
        for attempt in 0..MAX_OPEN_RETRIES {
            match sled::open(&kv_path) {
                Ok(db) => {
                    info!("KV 存储已打开: {}", kv_path.display());
                    return Ok(Self {
                        base_path: Some(base_path.to_path_buf()),
                        db: Arc::new(db),
                    });
                }
                Err(e) => {
                    let msg = e.to_string();
                    last_err = Some(e);
                    let is_lock = msg.contains("could not acquire lock")
                        || msg.contains("Resource temporarily unavailable")
                        || msg.contains("WouldBlock");
                    if !is_lock || attempt + 1 == MAX_OPEN_RETRIES {
                        break;
                    }
                    let delay_ms = RETRY_DELAY_MS * (1 << attempt);
                    debug!("KV 存储被占用，{}ms 后重试", delay_ms);
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                }
            }
        }

        Err(PlanboardSDKError::KvStore(
            last_err
                .map(|e| format!("打开 sled 数据库失败: {}", e))
                .unwrap_or_else(|| "打开 sled 数据库失败".to_string()),
        ))
    }

    /// 临时数据库（关闭后删除），用于测试和无持久化场景
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self {
            base_path: None,
            db: Arc::new(db),
        })
    }

    pub fn base_path(&self) -> Option<&Path> {
        self.base_path.as_deref()
    }

    /// 打开一个命名空间（每个实体 Store 一个）
    pub fn namespace(&self, name: &str) -> Result<KvNamespace> {
        let tree = self
            .db
            .open_tree(name)
            .map_err(|e| PlanboardSDKError::KvStore(format!("打开命名空间 {} 失败: {}", name, e)))?;
        Ok(KvNamespace {
            name: name.to_string(),
            tree,
        })
    }

    /// 删除整个命名空间
    pub fn drop_namespace(&self, name: &str) -> Result<()> {
        self.db
            .drop_tree(name)
            .map_err(|e| PlanboardSDKError::KvStore(format!("删除命名空间 {} 失败: {}", name, e)))?;
        Ok(())
    }

    /// 刷盘
    pub async fn flush(&self) -> Result<()> {
        self.db
            .flush_async()
            .await
            .map_err(|e| PlanboardSDKError::KvStore(format!("刷盘失败: {}", e)))?;
        Ok(())
    }
}

/// 单个命名空间的键值访问
#[derive(Debug, Clone)]
pub struct KvNamespace {
    name: String,
    tree: Tree,
}

impl KvNamespace {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 设置键值对
    pub fn set<K, V>(&self, key: K, value: &V) -> Result<()>
    where
        K: AsRef<[u8]>,
        V: Serialize + ?Sized,
    {
        let value_bytes = serde_json::to_vec(value)
            .map_err(|e| PlanboardSDKError::Serialization(format!("序列化值失败: {}", e)))?;
        self.tree
            .insert(key, value_bytes)
            .map_err(|e| PlanboardSDKError::KvStore(format!("设置键值对失败: {}", e)))?;
        Ok(())
    }

    /// 获取键值对
    pub fn get<K, V>(&self, key: K) -> Result<Option<V>>
    where
        K: AsRef<[u8]>,
        V: DeserializeOwned,
    {
        let result = self
            .tree
            .get(key)
            .map_err(|e| PlanboardSDKError::KvStore(format!("获取键值对失败: {}", e)))?;
        match result {
            Some(value_bytes) => {
                let value = serde_json::from_slice(&value_bytes)
                    .map_err(|e| PlanboardSDKError::Serialization(format!("反序列化值失败: {}", e)))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// 删除键值对，返回是否存在
    pub fn delete<K>(&self, key: K) -> Result<bool>
    where
        K: AsRef<[u8]>,
    {
        let removed = self
            .tree
            .remove(key)
            .map_err(|e| PlanboardSDKError::KvStore(format!("删除键值对失败: {}", e)))?;
        Ok(removed.is_some())
    }

    pub fn exists<K>(&self, key: K) -> Result<bool>
    where
        K: AsRef<[u8]>,
    {
        self.tree
            .contains_key(key)
            .map_err(|e| PlanboardSDKError::KvStore(format!("检查键存在失败: {}", e)))
    }

    /// 批量设置键值对（原子）
    pub fn set_batch<K, V>(&self, pairs: &[(K, V)]) -> Result<()>
    where
        K: AsRef<[u8]>,
        V: Serialize,
    {
        let mut batch = sled::Batch::default();
        for (key, value) in pairs {
            let value_bytes = serde_json::to_vec(value)
                .map_err(|e| PlanboardSDKError::Serialization(format!("序列化值失败: {}", e)))?;
            batch.insert(key.as_ref(), value_bytes);
        }
        self.tree
            .apply_batch(batch)
            .map_err(|e| PlanboardSDKError::KvStore(format!("批量设置失败: {}", e)))?;
        Ok(())
    }

    /// 获取指定前缀的所有键值对
    pub fn scan_prefix<V>(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, V)>>
    where
        V: DeserializeOwned,
    {
        let mut results = Vec::new();
        for item in self.tree.scan_prefix(prefix) {
            let (key, value_bytes) =
                item.map_err(|e| PlanboardSDKError::KvStore(format!("扫描前缀失败: {}", e)))?;
            let value = serde_json::from_slice(&value_bytes)
                .map_err(|e| PlanboardSDKError::Serialization(format!("反序列化值失败: {}", e)))?;
            results.push((key.to_vec(), value));
        }
        Ok(results)
    }

    /// 同 [`scan_prefix`](Self::scan_prefix)，但跳过无法反序列化的记录（记录警告）
    pub fn scan_prefix_skip_invalid<V>(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, V)>>
    where
        V: DeserializeOwned,
    {
        let mut results = Vec::new();
        for item in self.tree.scan_prefix(prefix) {
            let (key, value_bytes) =
                item.map_err(|e| PlanboardSDKError::KvStore(format!("扫描前缀失败: {}", e)))?;
            match serde_json::from_slice(&value_bytes) {
                Ok(value) => results.push((key.to_vec(), value)),
                Err(e) => warn!(
                    "⚠️ KV[{}] 跳过损坏的记录 {}: {}",
                    self.name,
                    String::from_utf8_lossy(&key),
                    e
                ),
            }
        }
        Ok(results)
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn clear(&self) -> Result<()> {
        self.tree
            .clear()
            .map_err(|e| PlanboardSDKError::KvStore(format!("清空命名空间失败: {}", e)))
    }
}
