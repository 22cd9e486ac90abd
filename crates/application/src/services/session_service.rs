use std::sync::Arc;

use chrono::Duration;
use domain::{
    DomainError, Message, MessageKind, Participant, ParticipantName, RepositoryError, TailLimit,
};

use tokio::sync::RwLock;

use crate::{
    clock::Clock,
    error::ApplicationError,
    name_lock::NameLocks,
    repository::{MessageFilter, MessageLog, ParticipantRegistry},
};

#[derive(Debug, Clone)]
pub struct PostMessageRequest {
    /// 来自请求头的发送者身份
    pub from: Option<String>,
    pub to: String,
    pub text: String,
    pub kind: MessageKind,
}

/// 一次驱逐尝试的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvictionOutcome {
    Evicted(Participant),
    /// 快照之后有心跳刷新了活跃时间
    StillActive,
    /// 记录已不存在
    AlreadyGone,
}

pub struct SessionServiceDependencies {
    pub registry: Arc<dyn ParticipantRegistry>,
    pub message_log: Arc<dyn MessageLog>,
    pub clock: Arc<dyn Clock>,
}

/// 会话核心：加入、心跳、发消息、查询，以及供清扫器调用的驱逐。
///
/// 每个改变注册表的操作和它配套的状态消息都在该名称的锁内按
/// "先注册表、后日志" 的顺序执行。日志写入失败时不回滚注册表。
///
/// 注册表加日志的两步操作持有 `pairs` 的读锁，列表查询持有写锁，
/// 查询方看不到只完成了一半的操作。加锁顺序固定为名称锁在前。
pub struct SessionService {
    deps: SessionServiceDependencies,
    locks: NameLocks,
    pairs: RwLock<()>,
}

impl SessionService {
    pub fn new(deps: SessionServiceDependencies) -> Self {
        Self {
            deps,
            locks: NameLocks::new(),
            pairs: RwLock::new(()),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.deps.clock
    }

    pub async fn join(&self, name: &str) -> Result<Participant, ApplicationError> {
        let name = ParticipantName::parse(name)?;
        let _guard = self.locks.lock(&name).await;
        let _pair = self.pairs.read().await;

        let now = self.deps.clock.now();
        let participant = self
            .deps
            .registry
            .register(name.clone(), now)
            .await
            .map_err(|err| match err {
                RepositoryError::Conflict => DomainError::ParticipantAlreadyExists.into(),
                other => ApplicationError::from(other),
            })?;

        let joined = Message::joined(&name, self.deps.clock.time_label(now));
        if let Err(err) = self.deps.message_log.append(joined).await {
            tracing::error!(
                participant = %name,
                error = %err,
                "participant registered but join message was not recorded"
            );
            return Err(err.into());
        }

        tracing::info!(participant = %name, "participant joined");
        Ok(participant)
    }

    pub async fn heartbeat(&self, name: Option<&str>) -> Result<(), ApplicationError> {
        let name = name
            .and_then(|raw| ParticipantName::parse(raw).ok())
            .ok_or(DomainError::MissingIdentity)?;
        let _guard = self.locks.lock(&name).await;

        let now = self.deps.clock.now();
        self.deps
            .registry
            .touch(&name, now)
            .await
            .map_err(|err| match err {
                RepositoryError::NotFound => DomainError::ParticipantNotFound.into(),
                other => ApplicationError::from(other),
            })?;

        tracing::debug!(participant = %name, "heartbeat");
        Ok(())
    }

    pub async fn post_message(
        &self,
        request: PostMessageRequest,
    ) -> Result<Message, ApplicationError> {
        let to = request.to.trim();
        if to.is_empty() {
            return Err(DomainError::invalid_argument("to", "cannot be empty").into());
        }
        if request.text.trim().is_empty() {
            return Err(DomainError::invalid_argument("text", "cannot be empty").into());
        }
        if !request.kind.is_user_postable() {
            return Err(DomainError::invalid_argument(
                "type",
                "must be message or private_message",
            )
            .into());
        }

        let from = request
            .from
            .as_deref()
            .and_then(|raw| ParticipantName::parse(raw).ok())
            .ok_or(DomainError::UnknownSender)?;

        // 持有发送者的锁，消息不会出现在该发送者的离开消息之后
        let _guard = self.locks.lock(&from).await;
        if !self.deps.registry.exists(&from).await? {
            return Err(DomainError::UnknownSender.into());
        }

        let now = self.deps.clock.now();
        let message = Message::new(
            &from,
            to,
            request.text,
            request.kind,
            self.deps.clock.time_label(now),
        );
        self.deps.message_log.append(message.clone()).await?;

        tracing::debug!(from = %from, to = %message.to, kind = %message.kind, "message posted");
        Ok(message)
    }

    /// 查询者不必在注册表中：未加入的身份只能看到广播以及与该名称相关的消息。
    pub async fn list_messages(
        &self,
        viewer: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<Message>, ApplicationError> {
        let tail = limit.map(TailLimit::new).transpose()?;
        let viewer = viewer.and_then(|raw| ParticipantName::parse(raw).ok());

        let _view = self.pairs.write().await;
        let messages = self
            .deps
            .message_log
            .query(MessageFilter::for_viewer(viewer, tail))
            .await?;
        Ok(messages)
    }

    pub async fn list_participants(&self) -> Result<Vec<Participant>, ApplicationError> {
        let _view = self.pairs.write().await;
        Ok(self.deps.registry.list().await?)
    }

    /// 在锁内重新读取记录后再决定是否驱逐，与并发的心跳或删除保持一致。
    pub async fn evict_if_expired(
        &self,
        name: &ParticipantName,
        threshold: Duration,
    ) -> Result<EvictionOutcome, ApplicationError> {
        let _guard = self.locks.lock(name).await;

        let Some(participant) = self.deps.registry.get(name).await? else {
            return Ok(EvictionOutcome::AlreadyGone);
        };

        let now = self.deps.clock.now();
        if !participant.is_expired(now, threshold) {
            return Ok(EvictionOutcome::StillActive);
        }

        let _pair = self.pairs.read().await;
        let removed = match self.deps.registry.remove(name).await {
            Ok(removed) => removed,
            Err(RepositoryError::NotFound) => return Ok(EvictionOutcome::AlreadyGone),
            Err(err) => return Err(err.into()),
        };

        let left = Message::left(name, self.deps.clock.time_label(now));
        if let Err(err) = self.deps.message_log.append(left).await {
            tracing::error!(
                participant = %name,
                error = %err,
                "participant evicted but departure message was not recorded"
            );
            return Err(err.into());
        }

        tracing::info!(participant = %name, "participant evicted after inactivity");
        Ok(EvictionOutcome::Evicted(removed))
    }
}
