//! SDK 配置
//!
//! 支持 builder 构建或从 JSON 文件加载；缺省字段取默认值。

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::board::DailyResetPolicy;
use crate::error::{PlanboardSDKError, Result};
use crate::sync::SchedulerConfig;
use crate::utils::TimezoneConfig;

/// Planboard SDK 配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanboardConfig {
    /// 数据存储目录（sled 库位于 `{data_dir}/kv`）
    pub data_dir: PathBuf,
    /// 同步成功后的冷却期（秒）
    pub sync_cooldown_secs: u64,
    /// 后台同步间隔（秒）
    pub background_interval_secs: u64,
    /// 前台可见时的同步间隔（秒）
    pub foreground_interval_secs: u64,
    /// 每日任务重置的本地小时（0-23）
    pub daily_reset_hour: u32,
    /// 时区偏移秒数（例如：+8小时 = 28800），None 表示使用系统本地时区
    pub timezone_offset_seconds: Option<i32>,
    /// 调试模式
    pub debug_mode: bool,
}

impl Default for PlanboardConfig {
    fn default() -> Self {
        Self {
            data_dir: get_default_data_dir(),
            sync_cooldown_secs: 15,
            background_interval_secs: 300,
            foreground_interval_secs: 30,
            daily_reset_hour: 0,
            timezone_offset_seconds: None,
            debug_mode: false,
        }
    }
}

/// 获取默认数据目录 ~/.planboard/
fn get_default_data_dir() -> PathBuf {
    if let Some(home_dir) = std::env::var("HOME").ok().map(PathBuf::from) {
        home_dir.join(".planboard")
    } else if let Some(home_dir) = std::env::var("USERPROFILE").ok().map(PathBuf::from) {
        home_dir.join(".planboard")
    } else {
        PathBuf::from("./planboard_data")
    }
}

impl PlanboardConfig {
    pub fn builder() -> PlanboardConfigBuilder {
        PlanboardConfigBuilder::new()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PlanboardSDKError::Config(format!("解析配置失败: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            PlanboardSDKError::Config(format!("读取配置文件失败 {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(PlanboardSDKError::Config("data_dir 不能为空".to_string()));
        }
        if self.daily_reset_hour > 23 {
            return Err(PlanboardSDKError::Config(format!(
                "daily_reset_hour 超出范围: {}",
                self.daily_reset_hour
            )));
        }
        if self.background_interval_secs == 0 || self.foreground_interval_secs == 0 {
            return Err(PlanboardSDKError::Config("同步间隔必须大于 0".to_string()));
        }
        if let Some(offset) = self.timezone_offset_seconds {
            if offset.abs() >= 24 * 3600 {
                return Err(PlanboardSDKError::Config(format!("时区偏移超出范围: {}", offset)));
            }
        }
        Ok(())
    }

    pub fn timezone(&self) -> TimezoneConfig {
        match self.timezone_offset_seconds {
            Some(offset_seconds) => TimezoneConfig { offset_seconds },
            None => TimezoneConfig::local(),
        }
    }

    pub fn sync_cooldown(&self) -> Duration {
        Duration::from_secs(self.sync_cooldown_secs)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            background_interval: Duration::from_secs(self.background_interval_secs),
            foreground_interval: Duration::from_secs(self.foreground_interval_secs),
        }
    }

    pub fn daily_reset_policy(&self) -> DailyResetPolicy {
        DailyResetPolicy::new(self.daily_reset_hour, self.timezone())
    }
}

/// Planboard SDK 配置构建器
pub struct PlanboardConfigBuilder {
    config: PlanboardConfig,
}

impl Default for PlanboardConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanboardConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: PlanboardConfig::default(),
        }
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.data_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn sync_cooldown_secs(mut self, secs: u64) -> Self {
        self.config.sync_cooldown_secs = secs;
        self
    }

    pub fn background_interval_secs(mut self, secs: u64) -> Self {
        self.config.background_interval_secs = secs;
        self
    }

    pub fn foreground_interval_secs(mut self, secs: u64) -> Self {
        self.config.foreground_interval_secs = secs;
        self
    }

    pub fn daily_reset_hour(mut self, hour: u32) -> Self {
        self.config.daily_reset_hour = hour;
        self
    }

    pub fn timezone_offset_seconds(mut self, offset: Option<i32>) -> Self {
        self.config.timezone_offset_seconds = offset;
        self
    }

    pub fn debug_mode(mut self, debug: bool) -> Self {
        self.config.debug_mode = debug;
        self
    }

    pub fn build(self) -> PlanboardConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let config = PlanboardConfig::default();
        assert_eq!(config.sync_cooldown(), Duration::from_secs(15));
        assert_eq!(
            config.scheduler_config(),
            SchedulerConfig {
                background_interval: Duration::from_secs(300),
                foreground_interval: Duration::from_secs(30),
            }
        );
        assert_eq!(config.daily_reset_hour, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_overrides() {
        let config = PlanboardConfig::builder()
            .data_dir("/tmp/planboard")
            .daily_reset_hour(4)
            .timezone_offset_seconds(Some(8 * 3600))
            .debug_mode(true)
            .build();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/planboard"));
        assert_eq!(config.timezone().offset_seconds, 28_800);
        assert_eq!(config.daily_reset_policy().reset_hour, 4);
        assert!(config.debug_mode);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"data_dir": "/data/pb", "daily_reset_hour": 5}}"#).unwrap();

        let config = PlanboardConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/data/pb"));
        assert_eq!(config.daily_reset_hour, 5);
        assert_eq!(config.sync_cooldown_secs, 15);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(PlanboardConfig::builder().daily_reset_hour(24).build().validate().is_err());
        assert!(PlanboardConfig::builder()
            .foreground_interval_secs(0)
            .build()
            .validate()
            .is_err());
        assert!(PlanboardConfig::from_json_str("not json").is_err());
    }
}
