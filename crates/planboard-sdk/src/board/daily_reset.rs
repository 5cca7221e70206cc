//! 每日任务重置策略
//!
//! 重置边界是"最近一次本地重置时刻"：例如重置时刻为 4 点、时区 +08:00，
//! 当地时间 03:00 时边界是前一天 04:00，05:00 时边界是当天 04:00。

use chrono::TimeZone;

use super::task::Task;
use crate::sync::entity::SyncEntity;
use crate::utils::time::to_timezone;
use crate::utils::TimezoneConfig;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyResetPolicy {
    /// 本地时间的重置小时（0..=23）
    pub reset_hour: u32,
    pub timezone: TimezoneConfig,
    /// 显式指定边界（UTC 毫秒），设置后忽略 reset_hour
    pub boundary_override: Option<i64>,
}

impl Default for DailyResetPolicy {
    fn default() -> Self {
        Self {
            reset_hour: 0,
            timezone: TimezoneConfig::local(),
            boundary_override: None,
        }
    }
}

impl DailyResetPolicy {
    pub fn new(reset_hour: u32, timezone: TimezoneConfig) -> Self {
        Self {
            reset_hour: reset_hour.min(23),
            timezone,
            boundary_override: None,
        }
    }

    pub fn with_boundary(boundary_ms: i64) -> Self {
        Self {
            boundary_override: Some(boundary_ms),
            ..Default::default()
        }
    }

    /// `now_ms` 之前（含）最近一次重置时刻
    pub fn boundary(&self, now_ms: i64) -> i64 {
        if let Some(boundary) = self.boundary_override {
            return boundary;
        }

        let offset = self.timezone.to_fixed_offset();
        let local_now = to_timezone(now_ms, &self.timezone);
        let today_reset = local_now
            .date_naive()
            .and_hms_opt(self.reset_hour.min(23), 0, 0)
            .and_then(|naive| offset.from_local_datetime(&naive).single())
            .map(|dt| dt.timestamp_millis());

        match today_reset {
            Some(ms) if ms > now_ms => ms - DAY_MS,
            Some(ms) => ms,
            None => now_ms - DAY_MS,
        }
    }

    /// 是否需要重置：每日任务、未阻塞、未删除、最后修改早于边界
    pub fn is_due(&self, task: &Task, boundary: i64) -> bool {
        task.daily && !task.blocked && !task.is_trashed() && task.updated_at() < boundary
    }
}
