//! 三循环共享上下文
//!
//! 显式传给感知 / 决策 / 风险监控三个循环的共享对象：
//! - enabled：唯一的跨循环协调点，写入走 swap / compare-and-set；
//! - cursor：路线游标下标，只由决策循环发布，其他人只读；
//! - snapshot：感知快照，经 watch 通道整体替换发布；
//! - 告警确认：风险监控阻塞等待外部确认（与启停同一个控制）；
//! - 谜题标记：风险监控上报，决策循环消费。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{watch, Notify};

use crate::core::state::{SharedSnapshot, Snapshot};
use crate::perception::Point;
use crate::routine::LiveSettings;

/// 外部启停控制触发后的效果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEffect {
    Enabled,
    Disabled,
    /// 告警进行中，本次按键作为确认
    Acknowledged,
}

pub struct SharedContext {
    enabled: AtomicBool,
    cursor_index: AtomicUsize,
    alerting: AtomicBool,
    acknowledged: AtomicBool,
    ack: Notify,
    stage_fright: AtomicBool,
    puzzle_active: AtomicBool,
    puzzle_marker: Mutex<Option<Point>>,
    snapshot_tx: watch::Sender<SharedSnapshot>,
    settings: RwLock<LiveSettings>,
}

impl SharedContext {
    pub fn new(settings: LiveSettings) -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(Snapshot::empty()));
        Self {
            enabled: AtomicBool::new(false),
            cursor_index: AtomicUsize::new(0),
            alerting: AtomicBool::new(false),
            acknowledged: AtomicBool::new(false),
            ack: Notify::new(),
            stage_fright: AtomicBool::new(false),
            puzzle_active: AtomicBool::new(false),
            puzzle_marker: Mutex::new(None),
            snapshot_tx,
            settings: RwLock::new(settings),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// 写入 enabled，返回旧值
    pub fn set_enabled(&self, value: bool) -> bool {
        self.enabled.swap(value, Ordering::SeqCst)
    }

    /// 仅当当前值等于 current 时写入 new；返回是否写入成功
    pub fn compare_set_enabled(&self, current: bool, new: bool) -> bool {
        self.enabled
            .compare_exchange(current, new, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// 请求决策循环暂停；已暂停时返回 false
    pub fn request_pause(&self) -> bool {
        self.compare_set_enabled(true, false)
    }

    /// 外部启停控制（热键）。告警期间按下视为确认，不翻转 enabled。
    pub fn toggle(&self) -> ControlEffect {
        if self.alerting.load(Ordering::SeqCst) {
            self.acknowledged.store(true, Ordering::SeqCst);
            self.ack.notify_waiters();
            return ControlEffect::Acknowledged;
        }
        if self.enabled.fetch_xor(true, Ordering::SeqCst) {
            ControlEffect::Disabled
        } else {
            ControlEffect::Enabled
        }
    }

    pub fn begin_alert(&self) {
        self.acknowledged.store(false, Ordering::SeqCst);
        self.alerting.store(true, Ordering::SeqCst);
    }

    pub fn end_alert(&self) {
        self.alerting.store(false, Ordering::SeqCst);
    }

    pub fn is_alerting(&self) -> bool {
        self.alerting.load(Ordering::SeqCst)
    }

    /// 阻塞等待外部确认（只阻塞调用方所在循环）
    pub async fn wait_for_ack(&self) {
        loop {
            let notified = self.ack.notified();
            if self.acknowledged.swap(false, Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }

    pub fn cursor_index(&self) -> usize {
        self.cursor_index.load(Ordering::Acquire)
    }

    /// 仅供决策循环发布游标
    pub(crate) fn publish_cursor(&self, index: usize) {
        self.cursor_index.store(index, Ordering::Release);
    }

    /// 最新完整快照
    pub fn snapshot(&self) -> SharedSnapshot {
        Arc::clone(&self.snapshot_tx.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<SharedSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// 以新对象整体替换快照
    pub fn publish_snapshot(&self, snapshot: Snapshot) {
        self.snapshot_tx.send_replace(Arc::new(snapshot));
    }

    pub fn stage_fright(&self) -> bool {
        self.stage_fright.load(Ordering::Relaxed)
    }

    pub fn set_stage_fright(&self, value: bool) {
        self.stage_fright.store(value, Ordering::Relaxed);
    }

    /// 上报谜题标记；已有活跃谜题时忽略并返回 false
    pub fn report_puzzle(&self, marker: Point) -> bool {
        let mut slot = self.puzzle_marker.lock();
        if self
            .puzzle_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        *slot = Some(marker);
        true
    }

    pub fn puzzle_active(&self) -> bool {
        self.puzzle_active.load(Ordering::SeqCst)
    }

    pub fn puzzle_marker(&self) -> Option<Point> {
        *self.puzzle_marker.lock()
    }

    pub fn clear_puzzle(&self) {
        let mut slot = self.puzzle_marker.lock();
        *slot = None;
        self.puzzle_active.store(false, Ordering::SeqCst);
    }

    pub fn settings(&self) -> RwLockReadGuard<'_, LiveSettings> {
        self.settings.read()
    }

    pub fn settings_mut(&self) -> RwLockWriteGuard<'_, LiveSettings> {
        self.settings.write()
    }
}

impl Default for SharedContext {
    fn default() -> Self {
        Self::new(LiveSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_toggle_flips_enabled() {
        let ctx = SharedContext::default();
        assert!(!ctx.is_enabled());
        assert_eq!(ctx.toggle(), ControlEffect::Enabled);
        assert!(ctx.is_enabled());
        assert_eq!(ctx.toggle(), ControlEffect::Disabled);
        assert!(!ctx.is_enabled());
    }

    #[test]
    fn test_request_pause_is_compare_and_set() {
        let ctx = SharedContext::default();
        assert!(!ctx.request_pause());
        ctx.set_enabled(true);
        assert!(ctx.request_pause());
        assert!(!ctx.is_enabled());
    }

    #[test]
    fn test_toggle_during_alert_acknowledges() {
        let ctx = SharedContext::default();
        ctx.set_enabled(false);
        ctx.begin_alert();
        assert_eq!(ctx.toggle(), ControlEffect::Acknowledged);
        assert!(!ctx.is_enabled());
    }

    #[tokio::test]
    async fn test_wait_for_ack_unblocks_on_toggle() {
        let ctx = Arc::new(SharedContext::default());
        ctx.begin_alert();
        let waiter = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { ctx.wait_for_ack().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        ctx.toggle();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("ack should release the waiter")
            .unwrap();
    }

    #[test]
    fn test_snapshot_replaced_as_a_whole() {
        let ctx = SharedContext::default();
        let before = ctx.snapshot();
        let mut next = Snapshot::empty();
        next.seq = 7;
        next.position = Some(Point::new(0.5, 0.5));
        ctx.publish_snapshot(next);
        let after = ctx.snapshot();
        assert_eq!(before.seq, 0);
        assert!(before.position.is_none());
        assert_eq!(after.seq, 7);
        assert_eq!(after.position, Some(Point::new(0.5, 0.5)));
    }

    #[test]
    fn test_report_puzzle_only_once_until_cleared() {
        let ctx = SharedContext::default();
        assert!(ctx.report_puzzle(Point::new(0.2, 0.3)));
        assert!(!ctx.report_puzzle(Point::new(0.9, 0.9)));
        assert_eq!(ctx.puzzle_marker(), Some(Point::new(0.2, 0.3)));
        ctx.clear_puzzle();
        assert!(!ctx.puzzle_active());
        assert!(ctx.puzzle_marker().is_none());
        assert!(ctx.report_puzzle(Point::new(0.9, 0.9)));
    }
}
