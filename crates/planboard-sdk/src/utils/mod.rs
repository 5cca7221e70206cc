//! 通用工具：时钟与 ID 生成

pub mod id;
pub mod time;

pub use id::new_entity_id;
pub use time::{Clock, ManualClock, SystemClock, TimezoneConfig};
