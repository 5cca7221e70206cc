//! 本地持久化存储
//!
//! 每个实体 Store 在 KV 数据库中拥有独立命名空间：
//! - `entity:{id}`：序列化后的实体（待推送队列由 `is_synced = false` 推导）
//! - `pending_op:{id}`：尚未送达的删除类操作

pub mod kv;

pub use kv::{KvNamespace, KvStore};
