use std::sync::Mutex;

use chrono::{Duration, Local, Utc};
use domain::Timestamp;

/// 时间标签格式 `HH:mm:ss`
pub const TIME_LABEL_FORMAT: &str = "%H:%M:%S";

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;

    /// 消息上展示的时间标签，默认按 UTC 格式化。
    fn time_label(&self, at: Timestamp) -> String {
        at.format(TIME_LABEL_FORMAT).to_string()
    }
}

/// 系统时钟，标签使用本地时区。
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }

    fn time_label(&self, at: Timestamp) -> String {
        at.with_timezone(&Local).format(TIME_LABEL_FORMAT).to_string()
    }
}

/// 手动推进的时钟（用于测试）
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, at: Timestamp) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
