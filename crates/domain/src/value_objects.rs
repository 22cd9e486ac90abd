use std::{fmt, num::NonZeroUsize, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// 统一的时间戳类型。
pub type Timestamp = DateTime<Utc>;

/// 广播消息的收件人标记，对所有参与者可见。
pub const BROADCAST_RECIPIENT: &str = "Todos";

/// 经过验证的参与者名称。
///
/// 所有进入核心的身份（加入请求、心跳、发送者、查询者）都经过同一个
/// 规范化：去掉首尾空白，且不能为空。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ParticipantName(String);

impl ParticipantName {
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_argument("name", "cannot be empty"));
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ParticipantName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ParticipantName> for String {
    fn from(value: ParticipantName) -> Self {
        value.0
    }
}

impl AsRef<str> for ParticipantName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// 消息类型。
///
/// 线上格式沿用 `message` / `private_message` / `status`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "message")]
    Normal,
    #[serde(rename = "private_message")]
    Private,
    #[serde(rename = "status")]
    Status,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Normal => "message",
            MessageKind::Private => "private_message",
            MessageKind::Status => "status",
        }
    }

    /// 客户端只能发送普通和私聊消息，状态消息由核心生成。
    pub fn is_user_postable(&self) -> bool {
        matches!(self, MessageKind::Normal | MessageKind::Private)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message" => Ok(MessageKind::Normal),
            "private_message" => Ok(MessageKind::Private),
            "status" => Ok(MessageKind::Status),
            other => Err(DomainError::invalid_argument(
                "type",
                format!("unknown message type '{other}'"),
            )),
        }
    }
}

/// 查询消息时的尾部条数限制，必须为正整数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailLimit(NonZeroUsize);

impl TailLimit {
    pub fn new(value: i64) -> Result<Self, DomainError> {
        usize::try_from(value)
            .ok()
            .and_then(NonZeroUsize::new)
            .map(Self)
            .ok_or_else(|| DomainError::invalid_argument("limit", "must be a positive integer"))
    }

    /// 从查询字符串解析，拒绝非整数。
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let value = raw
            .trim()
            .parse::<i64>()
            .map_err(|_| DomainError::invalid_argument("limit", "must be a positive integer"))?;
        Self::new(value)
    }

    pub fn get(&self) -> usize {
        self.0.get()
    }
}
