//! 在线状态清扫器
//!
//! 定期扫描注册表，驱逐超过阈值未活跃的参与者，并写入离开消息。
//! 每个驱逐独立运行、独立超时，单个失败不会中断本轮清扫。

use std::{sync::Arc, time::Duration};

use domain::ParticipantName;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    error::ApplicationError,
    services::{EvictionOutcome, SessionService},
};

/// 清扫器配置
#[derive(Debug, Clone)]
pub struct SweeperSettings {
    /// 清扫周期
    pub interval: Duration,
    /// 超过该时长未活跃即视为过期
    pub expiry_threshold: Duration,
    /// 等待单个驱逐完成的最长时间
    pub eviction_timeout: Duration,
}

impl Default for SweeperSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            expiry_threshold: Duration::from_secs(10),
            eviction_timeout: Duration::from_secs(5),
        }
    }
}

/// 单轮清扫的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    /// 快照中未过期、没有进入驱逐的参与者
    pub fresh: usize,
    pub evicted: Vec<ParticipantName>,
    /// 快照中已过期，但在拿到名称锁前被心跳刷新
    pub refreshed_before_eviction: usize,
    pub already_gone: usize,
    pub failed: usize,
    pub timed_out: usize,
}

pub struct PresenceSweeper {
    service: Arc<SessionService>,
    settings: SweeperSettings,
}

impl PresenceSweeper {
    pub fn new(service: Arc<SessionService>, settings: SweeperSettings) -> Self {
        Self { service, settings }
    }

    fn threshold(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.settings.expiry_threshold)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// 执行一轮清扫。只有拿不到快照时才返回错误，快照读取同样受驱逐超时限制。
    pub async fn sweep_once(&self) -> Result<SweepReport, ApplicationError> {
        let timeout = self.settings.eviction_timeout;
        let participants = tokio::time::timeout(timeout, self.service.list_participants())
            .await
            .map_err(|_| {
                ApplicationError::infrastructure(format!(
                    "registry snapshot timed out after {} ms",
                    timeout.as_millis()
                ))
            })??;
        let threshold = self.threshold();
        let now = self.service.clock().now();

        let mut report = SweepReport {
            scanned: participants.len(),
            ..SweepReport::default()
        };

        let expired: Vec<ParticipantName> = participants
            .into_iter()
            .filter(|participant| participant.is_expired(now, threshold))
            .map(|participant| participant.name)
            .collect();
        report.fresh = report.scanned - expired.len();

        // 每个驱逐放进独立任务：超时只放弃等待，不会在注册表和日志两步之间截断
        let attempts = expired.into_iter().map(|name| {
            let service = Arc::clone(&self.service);
            let task_name = name.clone();
            let task =
                tokio::spawn(async move { service.evict_if_expired(&task_name, threshold).await });
            async move { (name, tokio::time::timeout(timeout, task).await) }
        });

        for (name, result) in futures::future::join_all(attempts).await {
            match result {
                Ok(Ok(Ok(EvictionOutcome::Evicted(_)))) => report.evicted.push(name),
                Ok(Ok(Ok(EvictionOutcome::StillActive))) => report.refreshed_before_eviction += 1,
                Ok(Ok(Ok(EvictionOutcome::AlreadyGone))) => report.already_gone += 1,
                Ok(Ok(Err(err))) => {
                    report.failed += 1;
                    tracing::warn!(participant = %name, error = %err, "eviction failed");
                }
                Ok(Err(join_err)) => {
                    report.failed += 1;
                    tracing::error!(participant = %name, error = %join_err, "eviction task aborted");
                }
                Err(_) => {
                    report.timed_out += 1;
                    tracing::warn!(
                        participant = %name,
                        timeout_ms = timeout.as_millis() as u64,
                        "eviction still running after timeout, continuing sweep"
                    );
                }
            }
        }

        if report.evicted.is_empty() && report.failed == 0 && report.timed_out == 0 {
            tracing::debug!(scanned = report.scanned, fresh = report.fresh, "presence sweep finished");
        } else {
            tracing::info!(
                scanned = report.scanned,
                evicted = report.evicted.len(),
                failed = report.failed,
                timed_out = report.timed_out,
                "presence sweep finished"
            );
        }

        Ok(report)
    }

    /// 在后台按固定周期运行，返回可取消的句柄。首轮在一个周期之后执行。
    pub fn spawn(self) -> SweeperHandle {
        let token = CancellationToken::new();
        let task = tokio::spawn(self.run(token.clone()));
        SweeperHandle { token, task }
    }

    async fn run(self, token: CancellationToken) {
        let period = self.settings.interval;
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_ms = period.as_millis() as u64,
            expiry_ms = self.settings.expiry_threshold.as_millis() as u64,
            "presence sweeper started"
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    // 进行中的一轮总会跑完，取消在两轮之间生效
                    if let Err(err) = self.sweep_once().await {
                        tracing::error!(error = %err, "presence sweep could not read registry");
                    }
                }
            }
        }

        tracing::info!("presence sweeper stopped");
    }
}

pub struct SweeperHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// 取消并等待后台任务退出
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(err) = self.task.await {
            tracing::error!(error = %err, "presence sweeper task failed");
        }
    }
}
