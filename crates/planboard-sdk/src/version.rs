//! SDK 版本与持久化格式版本

/// SDK semver，来自 Cargo.toml
///
/// 禁止手写版本号，必须用 `env!("CARGO_PKG_VERSION")` 与 Cargo.toml 保持同步。
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// 本地 KV 中实体 JSON 的格式版本；字段不兼容变更时递增
pub const STORAGE_FORMAT_VERSION: u32 = 1;

pub fn version_string() -> String {
    format!("planboard-sdk {} (storage v{})", SDK_VERSION, STORAGE_FORMAT_VERSION)
}
