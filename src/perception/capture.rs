//! 感知循环
//!
//! 独立 OS 线程（截屏与匹配都是阻塞的 CPU 工作），按配置频率截屏、定位、发布快照。
//! 当前帧未匹配到角色时保留上一次已知位置；截屏失败记录后延迟重试。

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::{AgentError, SharedContext, Snapshot};
use crate::perception::{FrameSource, Locator, Point};

pub struct PerceptionLoop {
    source: Box<dyn FrameSource>,
    locator: Box<dyn Locator>,
    ctx: Arc<SharedContext>,
    interval: Duration,
    retry_delay: Duration,
    seq: u64,
    last_position: Option<Point>,
}

impl PerceptionLoop {
    pub fn new(
        source: Box<dyn FrameSource>,
        locator: Box<dyn Locator>,
        ctx: Arc<SharedContext>,
    ) -> Self {
        Self {
            source,
            locator,
            ctx,
            interval: Duration::from_millis(16),
            retry_delay: Duration::from_millis(500),
            seq: 0,
            last_position: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// 截一帧并发布新快照
    pub fn tick(&mut self) -> Result<u64, AgentError> {
        let frame = self.source.capture()?;
        let observation = self.locator.locate(&frame);
        if observation.position.is_some() {
            self.last_position = observation.position;
        }
        self.seq += 1;
        self.ctx.publish_snapshot(Snapshot {
            seq: self.seq,
            captured_at: Instant::now(),
            frame: Some(frame),
            position: self.last_position,
            detections: observation.detections,
        });
        Ok(self.seq)
    }

    /// 在独立线程中运行，直到 token 取消
    pub fn spawn(mut self, token: CancellationToken) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("perception".to_string())
            .spawn(move || {
                info!("Perception loop started");
                while !token.is_cancelled() {
                    match self.tick() {
                        Ok(_) => std::thread::sleep(self.interval),
                        Err(e) => {
                            warn!("Capture failed: {}", e);
                            std::thread::sleep(self.retry_delay);
                        }
                    }
                }
                info!(frames = self.seq, "Perception loop stopped");
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Detection, DetectionKind};
    use crate::perception::{Frame, Observation};

    /// 按预设序列返回帧；None 表示截屏失败
    struct ScriptedSource {
        frames: Vec<Option<Frame>>,
    }

    impl FrameSource for ScriptedSource {
        fn capture(&mut self) -> Result<Frame, AgentError> {
            if self.frames.is_empty() {
                return Ok(Frame::blank(4, 4));
            }
            self.frames
                .remove(0)
                .ok_or_else(|| AgentError::Capture("window not found".to_string()))
        }
    }

    struct ScriptedLocator {
        observations: Vec<Observation>,
    }

    impl Locator for ScriptedLocator {
        fn locate(&mut self, _frame: &Frame) -> Observation {
            if self.observations.is_empty() {
                Observation::default()
            } else {
                self.observations.remove(0)
            }
        }
    }

    #[test]
    fn test_tick_publishes_and_keeps_last_position() {
        let ctx = Arc::new(SharedContext::default());
        let mut perception = PerceptionLoop::new(
            Box::new(ScriptedSource {
                frames: vec![Some(Frame::blank(4, 4)), None, Some(Frame::blank(4, 4))],
            }),
            Box::new(ScriptedLocator {
                observations: vec![
                    Observation {
                        position: Some(Point::new(0.3, 0.4)),
                        detections: vec![Detection::new(DetectionKind::EliteWarning)],
                    },
                    Observation::default(),
                ],
            }),
            Arc::clone(&ctx),
        );

        assert_eq!(perception.tick().unwrap(), 1);
        let first = ctx.snapshot();
        assert_eq!(first.position, Some(Point::new(0.3, 0.4)));
        assert!(first.has(&DetectionKind::EliteWarning));

        assert!(matches!(perception.tick(), Err(AgentError::Capture(_))));
        assert_eq!(ctx.snapshot().seq, 1);

        assert_eq!(perception.tick().unwrap(), 2);
        let second = ctx.snapshot();
        assert_eq!(second.position, Some(Point::new(0.3, 0.4)));
        assert!(second.detections.is_empty());
        // 旧快照对象不受新发布影响
        assert!(first.has(&DetectionKind::EliteWarning));
    }

    #[test]
    fn test_spawned_loop_stops_on_cancel() {
        let ctx = Arc::new(SharedContext::default());
        let token = CancellationToken::new();
        let handle = PerceptionLoop::new(
            Box::new(ScriptedSource { frames: vec![] }),
            Box::new(ScriptedLocator {
                observations: vec![],
            }),
            Arc::clone(&ctx),
        )
        .with_interval(Duration::from_millis(1))
        .spawn(token.clone())
        .unwrap();

        let mut rx = ctx.subscribe();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while rx.borrow_and_update().seq < 3 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        token.cancel();
        handle.join().unwrap();
        assert!(ctx.snapshot().seq >= 3);
    }
}
