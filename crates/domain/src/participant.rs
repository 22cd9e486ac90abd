//! 参与者实体
//!
//! 记录一个在线会话：名称和最后一次活跃时间。

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::value_objects::{ParticipantName, Timestamp};

/// 参与者会话记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub name: ParticipantName,
    /// 最后活跃时间，线上格式为毫秒时间戳 `lastStatus`
    #[serde(rename = "lastStatus", with = "chrono::serde::ts_milliseconds")]
    pub last_seen: Timestamp,
}

impl Participant {
    pub fn new(name: ParticipantName, now: Timestamp) -> Self {
        Self {
            name,
            last_seen: now,
        }
    }

    pub fn touch(&mut self, now: Timestamp) {
        self.last_seen = now;
    }

    /// 超过阈值（严格大于）才算过期。
    pub fn is_expired(&self, now: Timestamp, threshold: Duration) -> bool {
        now.signed_duration_since(self.last_seen) > threshold
    }
}
