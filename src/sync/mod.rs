//! Background sync jobs / 后台同步任务
//!
//! Three periodic jobs keep the claims index converging on chainquery:
//! the claim sync (incremental rows), the counter sync (view and
//! subscriber counts from the internal APIs) and the blocklist sweep.
//! Each job is single-flight; an overlapping trigger is skipped, never
//! queued.

pub mod blocked;
pub mod claims;
pub mod counters;
pub mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config;

/// Result of one sync run / 单次同步运行的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Another run was already in flight / 已有运行中的任务
    Skipped,
    /// The cursor reached the head of the source / 游标已到源头
    CaughtUp,
    /// The per-run ceiling stopped the run early / 达到单次上限提前停止
    MoreWork,
    /// The run aborted, cursor untouched / 运行失败，游标未动
    Failed,
}

/// Releases the single-flight flag when a run ends, even on early
/// return. / 运行结束时释放单飞标志
pub(crate) struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Claim the single-flight flag, or report the run as overlapping
pub(crate) fn try_acquire(flag: &AtomicBool) -> Option<RunGuard<'_>> {
    flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .ok()
        .map(|_| RunGuard(flag))
}

/// Spawn the periodic sync loops. A claim sync run that hits its
/// ceiling is re-run immediately until it catches up, then the loop
/// returns to its regular period. / 启动周期同步循环
pub fn spawn_jobs(
    claim_sync: Arc<claims::ClaimSync>,
    counter_sync: Arc<counters::CounterSync>,
    blocklist_sync: Arc<blocked::BlocklistSync>,
) {
    let sync_cfg = config::config().sync;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(sync_cfg.claim_sync_interval_secs));
        loop {
            ticker.tick().await;
            while claim_sync.run().await == SyncOutcome::MoreWork {}
        }
    });

    let counter_period = config::config().sync.counter_sync_interval_secs;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(counter_period));
        loop {
            ticker.tick().await;
            counter_sync.run().await;
        }
    });

    let blocklist_period = config::config().sync.blocklist_interval_secs;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(blocklist_period));
        loop {
            ticker.tick().await;
            blocklist_sync.run().await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_flight_guard() {
        let flag = AtomicBool::new(false);
        let guard = try_acquire(&flag);
        assert!(guard.is_some());
        assert!(try_acquire(&flag).is_none());
        drop(guard);
        assert!(try_acquire(&flag).is_some());
    }
}
