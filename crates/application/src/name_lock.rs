//! 按参与者名称串行化的锁表
//!
//! 同一名称上的注册、心跳、驱逐以及配套的状态消息追加在同一把锁内完成；
//! 不同名称之间互不阻塞。

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use domain::ParticipantName;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
struct Slot {
    lock: Arc<AsyncMutex<()>>,
    /// 持有者加等待者
    users: usize,
}

#[derive(Debug, Default)]
pub struct NameLocks {
    entries: Mutex<HashMap<ParticipantName, Slot>>,
}

impl NameLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<ParticipantName, Slot>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn lock(&self, name: &ParticipantName) -> NameGuard<'_> {
        let lock = {
            let mut entries = self.entries();
            let slot = entries.entry(name.clone()).or_default();
            slot.users += 1;
            Arc::clone(&slot.lock)
        };

        // 从这里开始由 NameGuard 归还计数，等待中被取消也一样
        let mut guard = NameGuard {
            locks: self,
            name: name.clone(),
            held: None,
        };
        guard.held = Some(lock.lock_owned().await);
        guard
    }

    /// 当前表中的条目数
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

/// 持有期间独占该名称；释放时若无其他持有者或等待者则移除条目。
pub struct NameGuard<'a> {
    locks: &'a NameLocks,
    name: ParticipantName,
    held: Option<OwnedMutexGuard<()>>,
}

impl Drop for NameGuard<'_> {
    fn drop(&mut self) {
        let mut entries = self.locks.entries();
        drop(self.held.take());
        if let Some(slot) = entries.get_mut(&self.name) {
            slot.users = slot.users.saturating_sub(1);
            if slot.users == 0 {
                entries.remove(&self.name);
            }
        }
    }
}
