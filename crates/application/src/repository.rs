use async_trait::async_trait;
use domain::{Message, Participant, ParticipantName, RepositoryError, TailLimit, Timestamp};

/// 参与者注册表：名称唯一，是"谁在线"的唯一事实来源。
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ParticipantRegistry: Send + Sync {
    /// 同名记录已存在时返回 `RepositoryError::Conflict`
    async fn register(
        &self,
        name: ParticipantName,
        now: Timestamp,
    ) -> Result<Participant, RepositoryError>;

    /// 刷新最后活跃时间，不存在时返回 `RepositoryError::NotFound`
    async fn touch(&self, name: &ParticipantName, now: Timestamp) -> Result<(), RepositoryError>;

    async fn get(&self, name: &ParticipantName) -> Result<Option<Participant>, RepositoryError>;

    async fn exists(&self, name: &ParticipantName) -> Result<bool, RepositoryError>;

    /// 当前快照，无序
    async fn list(&self) -> Result<Vec<Participant>, RepositoryError>;

    async fn remove(&self, name: &ParticipantName) -> Result<Participant, RepositoryError>;
}

/// 只追加的消息日志，按到达顺序保存。
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MessageLog: Send + Sync {
    async fn append(&self, message: Message) -> Result<(), RepositoryError>;

    async fn query(&self, filter: MessageFilter) -> Result<Vec<Message>, RepositoryError>;
}

/// 消息可见性过滤条件
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageFilter {
    pub viewer: Option<ParticipantName>,
    pub tail: Option<TailLimit>,
}

impl MessageFilter {
    pub fn for_viewer(viewer: Option<ParticipantName>, tail: Option<TailLimit>) -> Self {
        Self { viewer, tail }
    }

    /// 先按可见性过滤，再从末尾截取 `tail` 条，保持到达顺序。
    pub fn apply<'a, I>(&self, messages: I) -> Vec<Message>
    where
        I: IntoIterator<Item = &'a Message>,
    {
        let visible: Vec<Message> = messages
            .into_iter()
            .filter(|message| message.is_visible_to(self.viewer.as_ref()))
            .cloned()
            .collect();

        match self.tail {
            Some(limit) if visible.len() > limit.get() => {
                visible[visible.len() - limit.get()..].to_vec()
            }
            _ => visible,
        }
    }
}
