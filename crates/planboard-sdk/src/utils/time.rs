//! 时间处理工具模块
//!
//! # 设计原则
//!
//! - **存储层**: 所有时间字段使用 UTC 毫秒时间戳（i64）
//! - **业务层**: 通过 [`Clock`] 取时间，不直接调用 `Utc::now()`，便于测试注入
//! - **单调性**: [`SystemClock`] 保证同一进程内连续两次取值严格递增，
//!   因此同一实体的两次本地修改不会得到相同或倒退的 `updated_at`

use chrono::{DateTime, FixedOffset, Local, Offset, TimeZone, Utc};
use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};

/// 时间源
pub trait Clock: Send + Sync + Debug {
    /// 当前 UTC 毫秒时间戳
    fn now_ms(&self) -> i64;
}

/// 系统时钟（严格递增）
#[derive(Debug, Default)]
pub struct SystemClock {
    last: AtomicI64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        let wall = Utc::now().timestamp_millis();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = wall.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }
}

/// 手动时钟，测试中用于精确控制时间（冷却窗口、每日重置边界等）
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn set(&self, ms: i64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// 时区配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimezoneConfig {
    /// 时区偏移（秒），例如：+08:00 = 28800, -05:00 = -18000
    pub offset_seconds: i32,
}

impl TimezoneConfig {
    pub fn from_hours(hours: i32) -> Self {
        Self {
            offset_seconds: hours * 3600,
        }
    }

    /// 使用系统本地时区
    pub fn local() -> Self {
        Self {
            offset_seconds: Local::now().offset().local_minus_utc(),
        }
    }

    /// 偏移越界（超过 ±24h）时回退到 UTC
    pub fn to_fixed_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.offset_seconds).unwrap_or_else(|| Utc.fix())
    }
}

/// 将 UTC 毫秒时间戳转换到指定时区，转换失败返回当前时间
pub fn to_timezone(utc_timestamp_ms: i64, tz: &TimezoneConfig) -> DateTime<FixedOffset> {
    let datetime_utc = Utc
        .timestamp_millis_opt(utc_timestamp_ms)
        .single()
        .unwrap_or_else(Utc::now);
    datetime_utc.with_timezone(&tz.to_fixed_offset())
}

/// 格式化为 "YYYY-MM-DD HH:MM:SS"（日志使用）
pub fn format_standard(utc_timestamp_ms: i64, tz: &TimezoneConfig) -> String {
    to_timezone(utc_timestamp_ms, tz)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}
