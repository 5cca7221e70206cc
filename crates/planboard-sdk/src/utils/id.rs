//! 实体 ID 生成
//!
//! ID 由客户端在创建时生成（UUID v4 字符串），之后永不改变。

use uuid::Uuid;

/// 生成新的实体 ID
pub fn new_entity_id() -> String {
    Uuid::new_v4().to_string()
}
