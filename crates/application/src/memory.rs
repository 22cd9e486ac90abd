//! 内存实现的注册表和消息日志
//!
//! 单进程部署和测试使用；进程退出后数据丢失。

use std::collections::HashMap;

use async_trait::async_trait;
use domain::{Message, Participant, ParticipantName, RepositoryError, Timestamp};
use tokio::sync::RwLock;

use crate::repository::{MessageFilter, MessageLog, ParticipantRegistry};

#[derive(Debug, Default)]
pub struct InMemoryParticipantRegistry {
    participants: RwLock<HashMap<ParticipantName, Participant>>,
}

impl InMemoryParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ParticipantRegistry for InMemoryParticipantRegistry {
    async fn register(
        &self,
        name: ParticipantName,
        now: Timestamp,
    ) -> Result<Participant, RepositoryError> {
        let mut participants = self.participants.write().await;
        if participants.contains_key(&name) {
            return Err(RepositoryError::Conflict);
        }

        let participant = Participant::new(name.clone(), now);
        participants.insert(name, participant.clone());
        Ok(participant)
    }

    async fn touch(&self, name: &ParticipantName, now: Timestamp) -> Result<(), RepositoryError> {
        let mut participants = self.participants.write().await;
        let participant = participants.get_mut(name).ok_or(RepositoryError::NotFound)?;
        participant.touch(now);
        Ok(())
    }

    async fn get(&self, name: &ParticipantName) -> Result<Option<Participant>, RepositoryError> {
        Ok(self.participants.read().await.get(name).cloned())
    }

    async fn exists(&self, name: &ParticipantName) -> Result<bool, RepositoryError> {
        Ok(self.participants.read().await.contains_key(name))
    }

    async fn list(&self) -> Result<Vec<Participant>, RepositoryError> {
        Ok(self.participants.read().await.values().cloned().collect())
    }

    async fn remove(&self, name: &ParticipantName) -> Result<Participant, RepositoryError> {
        self.participants
            .write()
            .await
            .remove(name)
            .ok_or(RepositoryError::NotFound)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMessageLog {
    messages: RwLock<Vec<Message>>,
}

impl InMemoryMessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}

#[async_trait]
impl MessageLog for InMemoryMessageLog {
    async fn append(&self, message: Message) -> Result<(), RepositoryError> {
        self.messages.write().await.push(message);
        Ok(())
    }

    async fn query(&self, filter: MessageFilter) -> Result<Vec<Message>, RepositoryError> {
        let messages = self.messages.read().await;
        Ok(filter.apply(messages.iter()))
    }
}
