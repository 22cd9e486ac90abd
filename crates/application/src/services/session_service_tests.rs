//! 会话服务单元测试
//!
//! 覆盖加入、心跳、发送消息、消息查询以及存储失败时的行为。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use domain::{
    DomainError, Message, MessageKind, ParticipantName, RepositoryError, JOINED_TEXT, LEFT_TEXT,
};
use tokio::sync::Notify;

use crate::{
    clock::ManualClock,
    error::ApplicationError,
    memory::{InMemoryMessageLog, InMemoryParticipantRegistry},
    repository::{MessageFilter, MessageLog, MockMessageLog, ParticipantRegistry},
    services::{EvictionOutcome, PostMessageRequest, SessionService, SessionServiceDependencies},
};

struct TestContext {
    clock: Arc<ManualClock>,
    registry: Arc<InMemoryParticipantRegistry>,
    log: Arc<InMemoryMessageLog>,
    service: Arc<SessionService>,
}

fn create_test_context() -> TestContext {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
    ));
    let registry = Arc::new(InMemoryParticipantRegistry::new());
    let log = Arc::new(InMemoryMessageLog::new());
    let service = Arc::new(SessionService::new(SessionServiceDependencies {
        registry: registry.clone(),
        message_log: log.clone(),
        clock: clock.clone(),
    }));
    TestContext {
        clock,
        registry,
        log,
        service,
    }
}

fn post(from: &str, to: &str, text: &str, kind: MessageKind) -> PostMessageRequest {
    PostMessageRequest {
        from: Some(from.to_string()),
        to: to.to_string(),
        text: text.to_string(),
        kind,
    }
}

async fn all_messages(log: &InMemoryMessageLog) -> Vec<Message> {
    log.query(MessageFilter::default()).await.unwrap()
}

fn texts(messages: &[Message]) -> Vec<&str> {
    messages.iter().map(|m| m.text.as_str()).collect()
}

#[tokio::test]
async fn join_appends_exactly_one_joined_status() {
    let ctx = create_test_context();

    let participant = ctx.service.join("alice").await.unwrap();
    assert_eq!(participant.name.as_str(), "alice");

    let log = all_messages(&ctx.log).await;
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].from, "alice");
    assert_eq!(log[0].to, "Todos");
    assert_eq!(log[0].text, JOINED_TEXT);
    assert_eq!(log[0].kind, MessageKind::Status);
    assert_eq!(log[0].time, "10:00:00");
}

#[tokio::test]
async fn duplicate_join_conflicts_without_second_message() {
    let ctx = create_test_context();

    ctx.service.join("alice").await.unwrap();
    let second = ctx.service.join("alice").await;

    assert!(matches!(
        second,
        Err(ApplicationError::Domain(DomainError::ParticipantAlreadyExists))
    ));
    assert_eq!(all_messages(&ctx.log).await.len(), 1);
}

#[tokio::test]
async fn join_normalizes_whitespace_in_names() {
    let ctx = create_test_context();

    ctx.service.join(" alice ").await.unwrap();
    assert!(matches!(
        ctx.service.join("alice").await,
        Err(ApplicationError::Domain(DomainError::ParticipantAlreadyExists))
    ));
}

#[tokio::test]
async fn blank_name_is_rejected_before_any_write() {
    let ctx = create_test_context();

    let result = ctx.service.join("   ").await;

    assert!(matches!(
        result,
        Err(ApplicationError::Domain(DomainError::InvalidArgument { .. }))
    ));
    assert!(ctx.registry.list().await.unwrap().is_empty());
    assert!(ctx.log.is_empty().await);
}

#[tokio::test]
async fn heartbeat_refreshes_without_side_effects() {
    let ctx = create_test_context();
    ctx.service.join("alice").await.unwrap();

    for _ in 0..3 {
        ctx.clock.advance(Duration::seconds(4));
        ctx.service.heartbeat(Some("alice")).await.unwrap();
    }

    let participants = ctx.service.list_participants().await.unwrap();
    assert_eq!(participants.len(), 1);
    assert_eq!(
        participants[0].last_seen,
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 12).unwrap()
    );
    assert_eq!(all_messages(&ctx.log).await.len(), 1);
}

#[tokio::test]
async fn heartbeat_errors() {
    let ctx = create_test_context();

    assert!(matches!(
        ctx.service.heartbeat(None).await,
        Err(ApplicationError::Domain(DomainError::MissingIdentity))
    ));
    assert!(matches!(
        ctx.service.heartbeat(Some("  ")).await,
        Err(ApplicationError::Domain(DomainError::MissingIdentity))
    ));
    assert!(matches!(
        ctx.service.heartbeat(Some("ghost")).await,
        Err(ApplicationError::Domain(DomainError::ParticipantNotFound))
    ));
}

#[tokio::test]
async fn post_requires_active_sender() {
    let ctx = create_test_context();

    let result = ctx
        .service
        .post_message(post("mallory", "Todos", "hello", MessageKind::Normal))
        .await;
    assert!(matches!(
        result,
        Err(ApplicationError::Domain(DomainError::UnknownSender))
    ));

    let anonymous = PostMessageRequest {
        from: None,
        ..post("x", "Todos", "hello", MessageKind::Normal)
    };
    assert!(matches!(
        ctx.service.post_message(anonymous).await,
        Err(ApplicationError::Domain(DomainError::UnknownSender))
    ));
    assert!(ctx.log.is_empty().await);
}

#[tokio::test]
async fn expired_sender_is_treated_as_unknown() {
    let ctx = create_test_context();
    ctx.service.join("dave").await.unwrap();
    ctx.clock.advance(Duration::seconds(11));

    let name = ParticipantName::parse("dave").unwrap();
    let outcome = ctx
        .service
        .evict_if_expired(&name, Duration::seconds(10))
        .await
        .unwrap();
    assert!(matches!(outcome, EvictionOutcome::Evicted(_)));

    let result = ctx
        .service
        .post_message(post("dave", "Todos", "still here?", MessageKind::Normal))
        .await;
    assert!(matches!(
        result,
        Err(ApplicationError::Domain(DomainError::UnknownSender))
    ));
}

#[tokio::test]
async fn post_validates_body_before_sender() {
    let ctx = create_test_context();

    for request in [
        post("ghost", "", "hello", MessageKind::Normal),
        post("ghost", "Todos", "  ", MessageKind::Normal),
        post("ghost", "Todos", "hello", MessageKind::Status),
    ] {
        let result = ctx.service.post_message(request).await;
        assert!(matches!(
            result,
            Err(ApplicationError::Domain(DomainError::InvalidArgument { .. }))
        ));
    }
}

#[tokio::test]
async fn private_message_visibility_scenario() {
    let ctx = create_test_context();
    ctx.service.join("alice").await.unwrap();
    ctx.service.join("bob").await.unwrap();

    ctx.service
        .post_message(post("bob", "alice", "hi", MessageKind::Private))
        .await
        .unwrap();

    let alice_view = ctx.service.list_messages(Some("alice"), None).await.unwrap();
    assert_eq!(texts(&alice_view), vec!["joined", "joined", "hi"]);
    assert_eq!(alice_view[2].kind, MessageKind::Private);

    // 未加入的查询者只看到广播
    let carol_view = ctx.service.list_messages(Some("carol"), None).await.unwrap();
    assert_eq!(texts(&carol_view), vec!["joined", "joined"]);

    let anonymous = ctx.service.list_messages(None, None).await.unwrap();
    assert_eq!(anonymous.len(), 2);
}

#[tokio::test]
async fn list_messages_tail_limit() {
    let ctx = create_test_context();
    ctx.service.join("alice").await.unwrap();
    ctx.service.join("bob").await.unwrap();

    for text in ["one", "two", "three"] {
        ctx.service
            .post_message(post("alice", "Todos", text, MessageKind::Normal))
            .await
            .unwrap();
    }
    ctx.service
        .post_message(post("alice", "bob", "private", MessageKind::Private))
        .await
        .unwrap();

    let limited = ctx.service.list_messages(Some("carol"), Some(2)).await.unwrap();
    assert_eq!(texts(&limited), vec!["two", "three"]);

    let bob = ctx.service.list_messages(Some("bob"), Some(2)).await.unwrap();
    assert_eq!(texts(&bob), vec!["three", "private"]);

    let generous = ctx.service.list_messages(Some("bob"), Some(100)).await.unwrap();
    assert_eq!(generous.len(), 6);
}

#[tokio::test]
async fn non_positive_limit_is_invalid() {
    let ctx = create_test_context();

    for limit in [0, -5] {
        let result = ctx.service.list_messages(Some("alice"), Some(limit)).await;
        assert!(matches!(
            result,
            Err(ApplicationError::Domain(DomainError::InvalidArgument { ref field, .. }))
                if field == "limit"
        ));
    }
}

#[tokio::test]
async fn storage_failure_after_register_leaves_participant_without_join_message() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let registry = Arc::new(InMemoryParticipantRegistry::new());
    let mut log = MockMessageLog::new();
    log.expect_append()
        .times(1)
        .returning(|_| Err(RepositoryError::storage("write failed")));

    let service = SessionService::new(SessionServiceDependencies {
        registry: registry.clone(),
        message_log: Arc::new(log),
        clock,
    });

    let result = service.join("alice").await;

    assert!(matches!(result, Err(ref err) if err.is_storage_failure()));
    assert!(registry
        .exists(&ParticipantName::parse("alice").unwrap())
        .await
        .unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn heartbeat_racing_eviction_stays_consistent() {
    for round in 0..50 {
        let ctx = create_test_context();
        let name = format!("racer-{round}");
        ctx.service.join(&name).await.unwrap();
        ctx.clock.advance(Duration::seconds(11));

        let evictor = {
            let service = ctx.service.clone();
            let name = ParticipantName::parse(name.clone()).unwrap();
            tokio::spawn(async move { service.evict_if_expired(&name, Duration::seconds(10)).await })
        };
        let beater = {
            let service = ctx.service.clone();
            let name = name.clone();
            tokio::spawn(async move { service.heartbeat(Some(&name)).await })
        };

        let eviction = evictor.await.unwrap().unwrap();
        let heartbeat = beater.await.unwrap();

        let present = ctx
            .registry
            .exists(&ParticipantName::parse(name.clone()).unwrap())
            .await
            .unwrap();
        let departures = all_messages(&ctx.log)
            .await
            .iter()
            .filter(|m| m.text == "left")
            .count();

        match eviction {
            EvictionOutcome::Evicted(_) => {
                assert!(!present);
                assert_eq!(departures, 1);
                assert!(matches!(
                    heartbeat,
                    Err(ApplicationError::Domain(DomainError::ParticipantNotFound))
                ));
            }
            EvictionOutcome::StillActive => {
                assert!(present);
                assert_eq!(departures, 0);
                assert!(heartbeat.is_ok());
            }
            EvictionOutcome::AlreadyGone => panic!("nothing else removes {name}"),
        }
    }
}

/// 在追加前停住，直到测试放行
struct GatedLog {
    inner: InMemoryMessageLog,
    entered: Notify,
    release: Notify,
}

impl GatedLog {
    fn new() -> Self {
        Self {
            inner: InMemoryMessageLog::new(),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl MessageLog for GatedLog {
    async fn append(&self, message: Message) -> Result<(), RepositoryError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.append(message).await
    }

    async fn query(&self, filter: MessageFilter) -> Result<Vec<Message>, RepositoryError> {
        self.inner.query(filter).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn readers_never_observe_a_half_finished_join() {
    let log = Arc::new(GatedLog::new());
    let service = Arc::new(SessionService::new(SessionServiceDependencies {
        registry: Arc::new(InMemoryParticipantRegistry::new()),
        message_log: log.clone(),
        clock: Arc::new(ManualClock::new(Utc::now())),
    }));

    let joining = {
        let service = service.clone();
        tokio::spawn(async move { service.join("alice").await })
    };
    log.entered.notified().await;

    let participants = {
        let service = service.clone();
        tokio::spawn(async move { service.list_participants().await })
    };
    let messages = {
        let service = service.clone();
        tokio::spawn(async move { service.list_messages(Some("alice"), None).await })
    };

    // 注册已完成但加入消息尚未写入，查询必须等待
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(!participants.is_finished());
    assert!(!messages.is_finished());

    log.release.notify_one();
    joining.await.unwrap().unwrap();

    let participants = participants.await.unwrap().unwrap();
    let messages = messages.await.unwrap().unwrap();
    assert_eq!(participants.len(), 1);
    assert_eq!(texts(&messages), vec![JOINED_TEXT]);
}

#[tokio::test]
async fn departure_append_failure_leaves_participant_removed() {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
    ));
    let registry = Arc::new(InMemoryParticipantRegistry::new());
    let mut log = MockMessageLog::new();
    log.expect_append()
        .withf(|message| message.text == JOINED_TEXT)
        .times(1)
        .returning(|_| Ok(()));
    log.expect_append()
        .withf(|message| message.text == LEFT_TEXT)
        .times(1)
        .returning(|_| Err(RepositoryError::storage("write failed")));

    let service = SessionService::new(SessionServiceDependencies {
        registry: registry.clone(),
        message_log: Arc::new(log),
        clock: clock.clone(),
    });
    service.join("dave").await.unwrap();
    clock.advance(Duration::seconds(11));

    let name = ParticipantName::parse("dave").unwrap();
    let result = service.evict_if_expired(&name, Duration::seconds(10)).await;

    assert!(matches!(result, Err(ref err) if err.is_storage_failure()));
    assert!(!registry.exists(&name).await.unwrap());
}
