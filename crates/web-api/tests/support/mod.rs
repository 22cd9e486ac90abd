use std::{sync::Arc, time::Duration};

use application::{
    InMemoryMessageLog, InMemoryParticipantRegistry, ManualClock, SessionService,
    SessionServiceDependencies,
};
use chrono::{TimeZone, Utc};
use reqwest::Client;
use tokio::{net::TcpListener, sync::oneshot, time::sleep};
use web_api::{router, AppState};

/// 运行在临时端口上的服务实例，使用内存存储和手动时钟
pub struct TestApp {
    pub base_url: String,
    pub client: Client,
    pub clock: Arc<ManualClock>,
    pub service: Arc<SessionService>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        ));
        let service = Arc::new(SessionService::new(SessionServiceDependencies {
            registry: Arc::new(InMemoryParticipantRegistry::new()),
            message_log: Arc::new(InMemoryMessageLog::new()),
            clock: clock.clone(),
        }));

        let app = router(AppState::new(service.clone()), &[]);
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        // 等待服务器启动
        sleep(Duration::from_millis(50)).await;

        Self {
            base_url: format!("http://{}", addr),
            client: Client::new(),
            clock,
            service,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn join(&self, name: &str) -> reqwest::Response {
        self.client
            .post(self.url("/participants"))
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await
            .expect("join request")
    }

    pub async fn post_message(
        &self,
        user: Option<&str>,
        body: serde_json::Value,
    ) -> reqwest::Response {
        let mut request = self.client.post(self.url("/messages")).json(&body);
        if let Some(user) = user {
            request = request.header("User", user);
        }
        request.send().await.expect("post message request")
    }

    pub async fn messages(&self, user: Option<&str>, query: &str) -> reqwest::Response {
        let mut request = self.client.get(self.url(&format!("/messages{}", query)));
        if let Some(user) = user {
            request = request.header("User", user);
        }
        request.send().await.expect("list messages request")
    }

    pub async fn heartbeat(&self, user: Option<&str>) -> reqwest::Response {
        let mut request = self.client.post(self.url("/status"));
        if let Some(user) = user {
            request = request.header("User", user);
        }
        request.send().await.expect("heartbeat request")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn texts(response: reqwest::Response) -> Vec<String> {
    let body: Vec<serde_json::Value> = response.json().await.expect("messages json");
    body.iter()
        .map(|m| m["text"].as_str().unwrap_or_default().to_string())
        .collect()
}
