//! 看板：任务与列

pub mod column;
pub mod daily_reset;
pub mod engine;
pub mod task;

pub use column::{Column, ColumnDraft, ColumnPatch, ColumnRole};
pub use daily_reset::DailyResetPolicy;
pub use engine::BoardEngine;
pub use task::{Task, TaskDraft, TaskPatch};
