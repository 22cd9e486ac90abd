use serde::{Deserialize, Serialize};

use crate::value_objects::{MessageKind, ParticipantName, BROADCAST_RECIPIENT};

pub const JOINED_TEXT: &str = "joined";
pub const LEFT_TEXT: &str = "left";

/// 日志中的一条消息，追加后不可变。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub from: String,
    pub to: String,
    pub text: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// `HH:mm:ss` 格式的时间标签
    pub time: String,
}

impl Message {
    pub fn new(
        from: &ParticipantName,
        to: impl Into<String>,
        text: impl Into<String>,
        kind: MessageKind,
        time: impl Into<String>,
    ) -> Self {
        Self {
            from: from.as_str().to_owned(),
            to: to.into(),
            text: text.into(),
            kind,
            time: time.into(),
        }
    }

    pub fn joined(name: &ParticipantName, time: impl Into<String>) -> Self {
        Self::new(name, BROADCAST_RECIPIENT, JOINED_TEXT, MessageKind::Status, time)
    }

    pub fn left(name: &ParticipantName, time: impl Into<String>) -> Self {
        Self::new(name, BROADCAST_RECIPIENT, LEFT_TEXT, MessageKind::Status, time)
    }

    pub fn is_broadcast(&self) -> bool {
        self.to == BROADCAST_RECIPIENT
    }

    /// 广播消息对所有人可见；其余消息只对发送者和收件人可见。
    /// 没有身份的查询者只能看到广播。
    pub fn is_visible_to(&self, viewer: Option<&ParticipantName>) -> bool {
        if self.is_broadcast() {
            return true;
        }
        match viewer {
            Some(name) => self.to == name.as_str() || self.from == name.as_str(),
            None => false,
        }
    }
}
