//! 风险监控循环
//!
//! 约 20Hz 读取最新快照，只在 enabled 时处理：
//! - 黑屏持续超过宽限期：阻塞告警，关闭 enabled 并等待外部确认，确认后恢复；
//! - 打断弹窗：按 esc 关闭；
//! - 骷髅诅咒：左右交替连打解除；
//! - 精英首领警告：只记录；
//! - 其他玩家：维护 stage_fright，人数增加时提示音；
//! - 谜题标记：上报共享上下文并提示。
//!
//! 告警只阻塞本循环，决策循环经 enabled 自行暂停。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::actuation::{press, sleep_secs, InputInjector};
use crate::core::{AgentError, DetectionKind, RecoveryAction, RecoveryEngine, SharedContext};

/// 声音 / 视觉提示（外部实现）
pub trait Alerter: Send + Sync {
    /// 开始循环播放告警，直到 stop_alert
    fn start_alert(&self, name: &str);

    fn stop_alert(&self);

    /// 一次性提示音
    fn ping(&self, name: &str);
}

/// 只写日志的提示实现
#[derive(Debug, Default)]
pub struct LogAlerter;

impl Alerter for LogAlerter {
    fn start_alert(&self, name: &str) {
        warn!(alert = name, "ALERT: press the start/stop control to acknowledge");
    }

    fn stop_alert(&self) {
        info!("Alert acknowledged");
    }

    fn ping(&self, name: &str) {
        info!(ping = name, "Notification");
    }
}

#[derive(Debug, Clone)]
pub struct HazardSettings {
    pub interval: Duration,
    /// 黑屏持续多久才告警
    pub black_screen_grace: Duration,
    /// 骷髅诅咒的左右连打轮数
    pub skull_presses: u32,
    /// 确认后到恢复 enabled 的间隔
    pub resume_delay: Duration,
}

impl Default for HazardSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(50),
            black_screen_grace: Duration::from_secs(40),
            skull_presses: 20,
            resume_delay: Duration::from_secs(2),
        }
    }
}

pub struct HazardMonitor {
    ctx: Arc<SharedContext>,
    input: Arc<dyn InputInjector>,
    alerter: Arc<dyn Alerter>,
    settings: HazardSettings,
    prev_others: usize,
    black_since: Option<Instant>,
}

impl HazardMonitor {
    pub fn new(
        ctx: Arc<SharedContext>,
        input: Arc<dyn InputInjector>,
        alerter: Arc<dyn Alerter>,
        settings: HazardSettings,
    ) -> Self {
        Self {
            ctx,
            input,
            alerter,
            settings,
            prev_others: 0,
            black_since: None,
        }
    }

    /// 处理一次最新快照
    pub async fn tick(&mut self, token: &CancellationToken) -> Result<(), AgentError> {
        if !self.ctx.is_enabled() {
            // 暂停期间的黑屏不计入宽限期
            self.black_since = None;
            return Ok(());
        }
        let snapshot = self.ctx.snapshot();
        let input = self.input.as_ref();

        if snapshot.has(&DetectionKind::BlackScreen) {
            let now = Instant::now();
            let since = *self.black_since.get_or_insert(now);
            if now.duration_since(since) >= self.settings.black_screen_grace {
                self.black_since = None;
                self.alert("siren", token).await;
                return Ok(());
            }
        } else {
            self.black_since = None;
        }

        for detection in &snapshot.detections {
            if let DetectionKind::InterruptMessage(name) = &detection.kind {
                info!(message = %name, "Interrupting message detected");
                press(input, "esc", 1, 0.1, 0.05).await?;
            }
        }

        if snapshot.has(&DetectionKind::SkullCurse) {
            info!("Skull curse detected");
            for _ in 0..self.settings.skull_presses {
                press(input, "left", 1, 0.1, 0.05).await?;
                press(input, "right", 1, 0.1, 0.05).await?;
            }
            info!("Skull curse cleared");
        }

        if snapshot.has(&DetectionKind::EliteWarning) {
            info!("Elite boss detected");
        }

        let others = snapshot.count(&DetectionKind::OtherPlayer);
        self.ctx.set_stage_fright(others > 0);
        if others > self.prev_others {
            info!(others, "Other players entered the map");
            self.alerter.ping("ding");
        }
        self.prev_others = others;

        if !self.ctx.puzzle_active() {
            let marker = snapshot
                .find(&DetectionKind::PuzzleMarker)
                .find_map(|d| d.position);
            if let Some(marker) = marker {
                if self.ctx.report_puzzle(marker) {
                    info!(%marker, "Puzzle marker appeared");
                    self.alerter.ping("rune_appeared");
                }
            }
        }
        Ok(())
    }

    /// 阻塞告警：暂停决策循环，等待确认后恢复
    async fn alert(&self, name: &str, token: &CancellationToken) {
        // 先进入告警再关闭 enabled：此后的启停操作只算确认
        self.ctx.begin_alert();
        self.ctx.set_enabled(false);
        self.alerter.start_alert(name);
        warn!(alert = name, "Hazard alert raised, routine paused");

        let acknowledged = tokio::select! {
            _ = self.ctx.wait_for_ack() => true,
            _ = token.cancelled() => false,
        };
        self.alerter.stop_alert();
        self.ctx.end_alert();
        if acknowledged {
            sleep_secs(self.settings.resume_delay.as_secs_f64()).await;
            self.ctx.set_enabled(true);
            info!(alert = name, "Hazard acknowledged, routine resumed");
        }
    }

    pub async fn run(mut self, token: CancellationToken) {
        info!("Hazard monitor started");
        let recovery = RecoveryEngine::new();
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.settings.interval) => {}
            }
            if let Err(e) = self.tick(&token).await {
                match recovery.handle(&e) {
                    RecoveryAction::Abort => {
                        warn!("Hazard monitor stopping: {}", e);
                        break;
                    }
                    _ => warn!("Hazard handling failed: {}", e),
                }
            }
        }
        info!("Hazard monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::actuation::RecordingInput;
    use crate::core::{ControlEffect, Detection, Snapshot};
    use crate::perception::Point;

    #[derive(Default)]
    struct RecordingAlerter {
        log: Mutex<Vec<String>>,
    }

    impl Alerter for RecordingAlerter {
        fn start_alert(&self, name: &str) {
            self.log.lock().push(format!("start:{name}"));
        }

        fn stop_alert(&self) {
            self.log.lock().push("stop".to_string());
        }

        fn ping(&self, name: &str) {
            self.log.lock().push(format!("ping:{name}"));
        }
    }

    struct Fixture {
        ctx: Arc<SharedContext>,
        input: Arc<RecordingInput>,
        alerter: Arc<RecordingAlerter>,
        monitor: HazardMonitor,
    }

    fn fixture() -> Fixture {
        let ctx = Arc::new(SharedContext::default());
        ctx.set_enabled(true);
        let input = Arc::new(RecordingInput::new());
        let alerter = Arc::new(RecordingAlerter::default());
        let monitor = HazardMonitor::new(
            Arc::clone(&ctx),
            input.clone(),
            alerter.clone(),
            HazardSettings::default(),
        );
        Fixture {
            ctx,
            input,
            alerter,
            monitor,
        }
    }

    fn publish(ctx: &SharedContext, detections: Vec<Detection>) {
        ctx.publish_snapshot(Snapshot {
            detections,
            ..Snapshot::empty()
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_message_pressed_away() {
        let mut f = fixture();
        publish(
            &f.ctx,
            vec![Detection::new(DetectionKind::InterruptMessage("pollo".into()))],
        );
        f.monitor.tick(&CancellationToken::new()).await.unwrap();
        assert_eq!(f.input.pressed_keys(), vec!["esc"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skull_curse_alternates_arrows() {
        let mut f = fixture();
        publish(&f.ctx, vec![Detection::new(DetectionKind::SkullCurse)]);
        f.monitor.tick(&CancellationToken::new()).await.unwrap();
        assert_eq!(f.input.presses("left"), 20);
        assert_eq!(f.input.presses("right"), 20);
        assert_eq!(&f.input.pressed_keys()[..2], &["left", "right"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_players_ping_only_when_count_rises() {
        let mut f = fixture();
        let token = CancellationToken::new();
        let player = |x| Detection::at(DetectionKind::OtherPlayer, Point::new(x, 0.5));

        publish(&f.ctx, vec![player(0.1), player(0.2)]);
        f.monitor.tick(&token).await.unwrap();
        assert!(f.ctx.stage_fright());

        publish(&f.ctx, vec![player(0.1)]);
        f.monitor.tick(&token).await.unwrap();
        publish(&f.ctx, vec![player(0.1), player(0.2), player(0.3)]);
        f.monitor.tick(&token).await.unwrap();
        publish(&f.ctx, vec![]);
        f.monitor.tick(&token).await.unwrap();

        assert!(!f.ctx.stage_fright());
        assert_eq!(*f.alerter.log.lock(), vec!["ping:ding", "ping:ding"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_puzzle_marker_reported_once() {
        let mut f = fixture();
        let token = CancellationToken::new();
        publish(
            &f.ctx,
            vec![Detection::at(DetectionKind::PuzzleMarker, Point::new(0.4, 0.6))],
        );
        f.monitor.tick(&token).await.unwrap();
        f.monitor.tick(&token).await.unwrap();
        assert!(f.ctx.puzzle_active());
        assert_eq!(f.ctx.puzzle_marker(), Some(Point::new(0.4, 0.6)));
        assert_eq!(*f.alerter.log.lock(), vec!["ping:rune_appeared"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_monitor_ignores_snapshot() {
        let mut f = fixture();
        f.ctx.set_enabled(false);
        publish(&f.ctx, vec![Detection::new(DetectionKind::SkullCurse)]);
        f.monitor.tick(&CancellationToken::new()).await.unwrap();
        assert!(f.input.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_black_screen_alert_blocks_until_acknowledged() {
        let Fixture {
            ctx,
            alerter,
            mut monitor,
            ..
        } = fixture();
        let token = CancellationToken::new();
        publish(&ctx, vec![Detection::new(DetectionKind::BlackScreen)]);

        // 宽限期内不告警
        monitor.tick(&token).await.unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;
        monitor.tick(&token).await.unwrap();
        assert!(!ctx.is_alerting());

        tokio::time::advance(Duration::from_secs(21)).await;
        let task = {
            let token = token.clone();
            tokio::spawn(async move {
                monitor.tick(&token).await.unwrap();
            })
        };
        while !ctx.is_alerting() {
            tokio::task::yield_now().await;
        }
        assert!(!ctx.is_enabled());
        assert!(!task.is_finished());

        ctx.toggle();
        task.await.unwrap();
        assert!(ctx.is_enabled());
        assert!(!ctx.is_alerting());
        assert_eq!(*alerter.log.lock(), vec!["start:siren", "stop"]);
    }

    /// 告警期间按下启停只算确认，恢复前不会提前打开 enabled
    #[tokio::test(start_paused = true)]
    async fn test_toggle_during_alert_only_acknowledges() {
        let Fixture {
            ctx, mut monitor, ..
        } = fixture();
        let token = CancellationToken::new();
        publish(&ctx, vec![Detection::new(DetectionKind::BlackScreen)]);
        monitor.tick(&token).await.unwrap();
        tokio::time::advance(Duration::from_secs(41)).await;

        let task = {
            let token = token.clone();
            tokio::spawn(async move {
                monitor.tick(&token).await.unwrap();
            })
        };
        while !ctx.is_alerting() {
            tokio::task::yield_now().await;
        }
        assert_eq!(ctx.toggle(), ControlEffect::Acknowledged);
        assert!(!ctx.is_enabled());
        task.await.unwrap();
        assert!(ctx.is_enabled());
    }

    /// 暂停期间持续黑屏，重新启用后宽限期从头计算
    #[tokio::test(start_paused = true)]
    async fn test_black_screen_grace_restarts_after_pause() {
        let mut f = fixture();
        let token = CancellationToken::new();
        publish(&f.ctx, vec![Detection::new(DetectionKind::BlackScreen)]);
        f.monitor.tick(&token).await.unwrap();

        f.ctx.set_enabled(false);
        tokio::time::advance(Duration::from_secs(60)).await;
        f.monitor.tick(&token).await.unwrap();

        f.ctx.set_enabled(true);
        f.monitor.tick(&token).await.unwrap();
        assert!(!f.ctx.is_alerting());
        assert!(f.ctx.is_enabled());
        assert!(f.alerter.log.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let f = fixture();
        let token = CancellationToken::new();
        let handle = tokio::spawn(f.monitor.run(token.clone()));
        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();
        handle.await.unwrap();
    }
}
