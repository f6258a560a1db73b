//! 谜题（符文）处理状态机
//!
//! ```text
//! Idle → Detected → Navigating → Attempting → Solved
//!                       ↑             ├─→ Retry ────┘ (标记仍有效，下次经过触发路点再试)
//!                       │             ├─→ Escalate ─→ Idle (菜单恢复序列，随后重新定位触发路点)
//!                       └─────────────┴─→ Abort (累计失败超过硬上限，熔断)
//! ```
//!
//! - 风险监控上报标记后，离标记最近的路点作为触发点；决策循环执行到该路点时开始交互；
//! - 每次交互最多 3 轮求解，拿到 4 个箭头就输入并短暂轮询成功图标；
//! - 累计失败计数跨谜题保留，只有成功才清零：每 3 次执行一次恢复序列，达到 9 次强制放弃本次谜题，
//!   超过 20 次熔断；
//! - 每次失败都把证据帧写入失败帧目录。

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::actuation::{press, sleep_secs, MouseButton, Navigator};
use crate::agent::artifacts::FailedFrameStore;
use crate::agent::solver::PuzzleSolver;
use crate::core::{AgentError, DetectionKind, SharedContext};
use crate::perception::{crop_region, Frame, FrameEncoder, Point, CROP_SIZE};
use crate::routine::{ProgramElement, RoutineProgram};
use crate::skills::KeyBindings;

const SOLUTION_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PuzzlePhase {
    Idle,
    Detected,
    Navigating,
    Attempting,
    Solved,
    Retry,
    Escalate,
    Abort,
}

/// 状态机阈值
#[derive(Debug, Clone, PartialEq)]
pub struct PuzzleLimits {
    /// 单次交互的求解轮数
    pub rounds: u32,
    /// 每累计多少次失败执行一次恢复序列
    pub escalate_every: u32,
    /// 累计失败达到该值时强制放弃本次谜题
    pub give_up_at: u32,
    /// 累计失败超过该值时熔断
    pub abort_above: u32,
    /// 输入答案后轮询成功图标的次数与间隔
    pub poll_attempts: u32,
    pub poll_interval: f64,
}

impl Default for PuzzleLimits {
    fn default() -> Self {
        Self {
            rounds: 3,
            escalate_every: 3,
            give_up_at: 9,
            abort_above: 20,
            poll_attempts: 3,
            poll_interval: 0.3,
        }
    }
}

/// 交互一次所需的协作方
pub struct PuzzleTools<'a> {
    pub solver: &'a dyn PuzzleSolver,
    pub keys: &'a KeyBindings,
}

pub struct PuzzleResolver {
    phase: PuzzlePhase,
    attempts: u32,
    marker: Option<Point>,
    /// 触发交互的路点位置
    trigger: Option<Point>,
    limits: PuzzleLimits,
    artifacts: FailedFrameStore,
    encoder: Option<Arc<dyn FrameEncoder>>,
    vertical_offset: u32,
}

impl PuzzleResolver {
    pub fn new(
        limits: PuzzleLimits,
        artifacts: FailedFrameStore,
        encoder: Option<Arc<dyn FrameEncoder>>,
    ) -> Self {
        Self {
            phase: PuzzlePhase::Idle,
            attempts: 0,
            marker: None,
            trigger: None,
            limits,
            artifacts,
            encoder,
            vertical_offset: 50,
        }
    }

    pub fn phase(&self) -> PuzzlePhase {
        self.phase
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn trigger(&self) -> Option<Point> {
        self.trigger
    }

    /// 路线被替换后丢弃旧触发路点，下次 observe 重新定位
    pub fn forget_trigger(&mut self) {
        self.trigger = None;
        if self.phase != PuzzlePhase::Abort {
            self.phase = PuzzlePhase::Idle;
        }
    }

    /// 同步共享上下文中的谜题标记，必要时重新确定触发路点
    pub fn observe(&mut self, ctx: &SharedContext, program: &RoutineProgram) -> PuzzlePhase {
        if !ctx.puzzle_active() {
            if self.trigger.is_some() || !matches!(self.phase, PuzzlePhase::Idle | PuzzlePhase::Solved) {
                self.phase = PuzzlePhase::Idle;
            }
            self.marker = None;
            self.trigger = None;
            return self.phase;
        }

        match self.phase {
            PuzzlePhase::Attempting | PuzzlePhase::Retry => self.phase = PuzzlePhase::Navigating,
            PuzzlePhase::Abort => return self.phase,
            _ => {}
        }
        if self.trigger.is_some() {
            return self.phase;
        }

        let Some(marker) = ctx.puzzle_marker() else {
            return self.phase;
        };
        self.phase = PuzzlePhase::Detected;
        match program.nearest_waypoint(&marker) {
            Some((index, waypoint)) => {
                info!(%marker, trigger = %waypoint.location, index, "Puzzle detected");
                self.marker = Some(marker);
                self.trigger = Some(waypoint.location);
                self.phase = PuzzlePhase::Navigating;
            }
            None => {
                warn!(%marker, "Puzzle detected but routine has no waypoints, ignoring");
                ctx.clear_puzzle();
                self.phase = PuzzlePhase::Idle;
            }
        }
        self.phase
    }

    /// 当前元素是否为触发路点
    pub fn should_attempt(&self, element: &ProgramElement) -> bool {
        if self.phase != PuzzlePhase::Navigating {
            return false;
        }
        match (element, self.trigger) {
            (ProgramElement::Waypoint(waypoint), Some(trigger)) => waypoint.location == trigger,
            _ => false,
        }
    }

    /// 走到标记处交互并求解；累计失败超过硬上限时返回 FailSafe
    pub async fn attempt(
        &mut self,
        nav: &mut Navigator<'_>,
        tools: &PuzzleTools<'_>,
    ) -> Result<PuzzlePhase, AgentError> {
        let ctx = nav.skills.ctx;
        let (Some(marker), true) = (self.marker, ctx.is_enabled()) else {
            return Ok(self.phase);
        };
        self.phase = PuzzlePhase::Attempting;
        info!(attempts = self.attempts, %marker, "Attempting puzzle");

        nav.move_to(marker, 15).await?;
        nav.adjust(marker, 5).await?;
        sleep_secs(0.4).await;
        nav.adjust(marker, 5).await?;
        sleep_secs(0.4).await;
        let input = nav.skills.input;
        press(input, &tools.keys.interact, 1, 0.2, 0.05).await?;

        let mut evidence: Option<Frame> = None;
        let mut solved = false;
        for round in 0..self.limits.rounds {
            let Some(frame) = ctx.snapshot().frame.clone() else {
                warn!(round, "No frame available for puzzle solver");
                continue;
            };
            let solution = tools.solver.solve(&frame).await;
            evidence = Some(frame);
            info!(round, ?solution, "Puzzle solution");
            if solution.len() != SOLUTION_LEN {
                continue;
            }
            for arrow in &solution {
                press(input, arrow, 1, 0.1, 0.05).await?;
            }
            sleep_secs(1.0).await;
            if self.confirm_solved(nav).await? {
                solved = true;
                break;
            }
        }

        if solved {
            info!(attempts = self.attempts, "Puzzle solved");
            ctx.clear_puzzle();
            self.attempts = 0;
            self.marker = None;
            self.trigger = None;
            self.phase = PuzzlePhase::Solved;
            return Ok(self.phase);
        }

        if let Some(frame) = evidence {
            self.save_evidence(&frame);
        }
        self.attempts += 1;
        warn!(attempts = self.attempts, "Puzzle attempt failed");

        if self.attempts > self.limits.abort_above {
            error!(attempts = self.attempts, "Puzzle failure ceiling reached");
            self.phase = PuzzlePhase::Abort;
            return Err(AgentError::FailSafe(self.attempts));
        }

        self.phase = PuzzlePhase::Retry;
        if self.limits.escalate_every > 0 && self.attempts % self.limits.escalate_every == 0 {
            self.phase = PuzzlePhase::Escalate;
            escalate(nav, tools.keys).await?;
            self.trigger = None;
        }
        if self.attempts >= self.limits.give_up_at {
            warn!(attempts = self.attempts, "Giving up on this puzzle");
            ctx.clear_puzzle();
            self.marker = None;
            self.trigger = None;
        }
        Ok(self.phase)
    }

    /// 轮询成功图标；出现则右键点掉
    async fn confirm_solved(&self, nav: &mut Navigator<'_>) -> Result<bool, AgentError> {
        for _ in 0..self.limits.poll_attempts {
            sleep_secs(self.limits.poll_interval).await;
            let snapshot = nav.skills.ctx.snapshot();
            let icon = snapshot
                .find(&DetectionKind::PuzzleSolvedBuff)
                .filter_map(|d| d.position)
                .min_by(|a, b| a.x.total_cmp(&b.x));
            if let Some(icon) = icon {
                nav.skills.input.click(icon, MouseButton::Right).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn save_evidence(&mut self, frame: &Frame) {
        let Some(encoder) = &self.encoder else {
            warn!("No frame encoder configured, puzzle evidence frame dropped");
            return;
        };
        let region = crop_region(frame.width, frame.height, CROP_SIZE, self.vertical_offset);
        let result = encoder
            .png(frame, region)
            .and_then(|png| self.artifacts.save(&png));
        if let Err(e) = result {
            warn!("Failed to save puzzle frame: {}", e);
        }
    }
}

/// 恢复序列：进出商城刷新地图
async fn escalate(nav: &mut Navigator<'_>, keys: &KeyBindings) -> Result<(), AgentError> {
    info!("Escalating: re-entering map through the cash shop");
    let input = nav.skills.input;
    for _ in 0..10 {
        press(input, &keys.cash_shop, 1, 0.1, 0.05).await?;
        press(input, "enter", 1, 0.1, 0.05).await?;
        sleep_secs(1.0).await;
    }
    sleep_secs(5.0).await;
    press(input, "esc", 1, 0.1, 0.05).await?;
    sleep_secs(1.0).await;
    press(input, "esc", 1, 0.1, 0.05).await?;
    sleep_secs(1.0).await;
    press(input, "enter", 1, 0.1, 0.05).await?;
    sleep_secs(5.0).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::actuation::{DirectPlanner, InputEvent, RecordingInput};
    use crate::core::{Detection, Snapshot};
    use crate::perception::{ImageEncoder, Rect};
    use crate::routine::{Label, Waypoint};
    use crate::skills::{CooldownScheduler, SkillRegistry, SkillRotationController};

    const MARKER: Point = Point { x: 0.52, y: 0.4 };

    /// 返回固定答案；solves_to_buff 为真时同时发布成功图标
    struct ScriptedSolver {
        ctx: Arc<SharedContext>,
        answer: Vec<String>,
        solves_to_buff: bool,
    }

    #[async_trait]
    impl PuzzleSolver for ScriptedSolver {
        async fn solve(&self, _frame: &Frame) -> Vec<String> {
            if self.solves_to_buff {
                self.ctx.publish_snapshot(Snapshot {
                    frame: Some(Frame::blank(800, 600)),
                    position: Some(MARKER),
                    detections: vec![
                        Detection::at(DetectionKind::PuzzleSolvedBuff, Point::new(700.0, 30.0)),
                        Detection::at(DetectionKind::PuzzleSolvedBuff, Point::new(640.0, 30.0)),
                    ],
                    ..Snapshot::empty()
                });
            }
            self.answer.clone()
        }
    }

    struct PngEncoder;

    impl FrameEncoder for PngEncoder {
        fn jpeg(&self, _frame: &Frame, _region: Rect) -> Result<Vec<u8>, AgentError> {
            Ok(Vec::new())
        }

        fn png(&self, _frame: &Frame, region: Rect) -> Result<Vec<u8>, AgentError> {
            Ok(format!("{}x{}", region.width, region.height).into_bytes())
        }
    }

    fn ctx_with_frame() -> Arc<SharedContext> {
        let ctx = Arc::new(SharedContext::default());
        ctx.set_enabled(true);
        ctx.publish_snapshot(Snapshot {
            frame: Some(Frame::blank(800, 600)),
            position: Some(MARKER),
            ..Snapshot::empty()
        });
        ctx
    }

    fn program() -> RoutineProgram {
        let mut program = RoutineProgram::new();
        program.push(ProgramElement::Label(Label::new("a").unwrap())).unwrap();
        program.push(ProgramElement::Waypoint(Waypoint::new(0.1, 0.4))).unwrap();
        program.push(ProgramElement::Waypoint(Waypoint::new(0.5, 0.45))).unwrap();
        program.push(ProgramElement::Waypoint(Waypoint::new(0.9, 0.4))).unwrap();
        program
    }

    fn resolver(dir: &std::path::Path) -> PuzzleResolver {
        PuzzleResolver::new(
            PuzzleLimits::default(),
            FailedFrameStore::new(dir),
            Some(Arc::new(PngEncoder)),
        )
    }

    /// 在一个临时 Navigator 上跑一次交互
    async fn run_attempt(
        resolver: &mut PuzzleResolver,
        ctx: &SharedContext,
        input: &RecordingInput,
        solver: &dyn PuzzleSolver,
    ) -> Result<PuzzlePhase, AgentError> {
        let registry = SkillRegistry::default();
        let mut scheduler = CooldownScheduler::default();
        let mut rng = StdRng::seed_from_u64(3);
        let planner = DirectPlanner::new();
        let keys = KeyBindings::default();
        let mut nav = Navigator {
            skills: SkillRotationController {
                input,
                ctx,
                registry: &registry,
                scheduler: &mut scheduler,
                rng: &mut rng,
                jump_key: "space",
            },
            planner: &planner,
        };
        resolver
            .attempt(&mut nav, &PuzzleTools { solver, keys: &keys })
            .await
    }

    #[test]
    fn test_observe_picks_nearest_waypoint() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_with_frame();
        let program = program();
        let mut resolver = resolver(dir.path());

        assert_eq!(resolver.observe(&ctx, &program), PuzzlePhase::Idle);
        ctx.report_puzzle(MARKER);
        assert_eq!(resolver.observe(&ctx, &program), PuzzlePhase::Navigating);
        assert_eq!(resolver.trigger(), Some(Point::new(0.5, 0.45)));

        assert!(!resolver.should_attempt(program.get(0).unwrap()));
        assert!(!resolver.should_attempt(program.get(1).unwrap()));
        assert!(resolver.should_attempt(program.get(2).unwrap()));

        ctx.clear_puzzle();
        assert_eq!(resolver.observe(&ctx, &program), PuzzlePhase::Idle);
        assert!(!resolver.should_attempt(program.get(2).unwrap()));
    }

    #[test]
    fn test_observe_without_waypoints_clears_puzzle() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_with_frame();
        let mut resolver = resolver(dir.path());
        ctx.report_puzzle(MARKER);
        assert_eq!(resolver.observe(&ctx, &RoutineProgram::new()), PuzzlePhase::Idle);
        assert!(!ctx.puzzle_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_attempt_resets_counter() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_with_frame();
        let input = RecordingInput::new();
        let mut resolver = resolver(dir.path());
        resolver.attempts = 5;
        ctx.report_puzzle(MARKER);
        resolver.observe(&ctx, &program());

        let solver = ScriptedSolver {
            ctx: Arc::clone(&ctx),
            answer: vec!["up".into(), "left".into(), "down".into(), "right".into()],
            solves_to_buff: true,
        };
        let phase = run_attempt(&mut resolver, &ctx, &input, &solver).await.unwrap();

        assert_eq!(phase, PuzzlePhase::Solved);
        assert_eq!(resolver.attempts(), 0);
        assert!(!ctx.puzzle_active());
        let keys = input.pressed_keys();
        assert_eq!(keys, vec!["y", "up", "left", "down", "right"]);
        // 点掉最左侧的图标
        assert!(input
            .events()
            .contains(&InputEvent::Click(Point::new(640.0, 30.0), MouseButton::Right)));
        assert_eq!(std::fs::read_dir(dir.path()).map(|d| d.count()).unwrap_or(0), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_attempt_saves_evidence_and_retries() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_with_frame();
        let input = RecordingInput::new();
        let mut resolver = resolver(dir.path());
        ctx.report_puzzle(MARKER);
        resolver.observe(&ctx, &program());

        let solver = ScriptedSolver {
            ctx: Arc::clone(&ctx),
            answer: vec!["up".into()],
            solves_to_buff: false,
        };
        let phase = run_attempt(&mut resolver, &ctx, &input, &solver).await.unwrap();

        assert_eq!(phase, PuzzlePhase::Retry);
        assert_eq!(resolver.attempts(), 1);
        assert!(ctx.puzzle_active());
        // 不足 4 个箭头时不输入
        assert_eq!(input.pressed_keys(), vec!["y"]);
        let saved = std::fs::read(dir.path().join("image_1.png")).unwrap();
        assert_eq!(saved, b"640x600");
        assert_eq!(resolver.observe(&ctx, &program()), PuzzlePhase::Navigating);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evidence_is_real_png_with_image_encoder() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_with_frame();
        let input = RecordingInput::new();
        let mut resolver = PuzzleResolver::new(
            PuzzleLimits::default(),
            FailedFrameStore::new(dir.path()),
            Some(Arc::new(ImageEncoder::new())),
        );
        ctx.report_puzzle(MARKER);
        resolver.observe(&ctx, &program());

        let solver = ScriptedSolver {
            ctx: Arc::clone(&ctx),
            answer: Vec::new(),
            solves_to_buff: false,
        };
        run_attempt(&mut resolver, &ctx, &input, &solver).await.unwrap();

        let saved = std::fs::read(dir.path().join("image_1.png")).unwrap();
        let decoded = image::load_from_memory(&saved).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (640, 600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_third_failure_escalates() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_with_frame();
        let input = RecordingInput::new();
        let mut resolver = resolver(dir.path());
        resolver.attempts = 2;
        ctx.report_puzzle(MARKER);
        resolver.observe(&ctx, &program());

        let solver = ScriptedSolver {
            ctx: Arc::clone(&ctx),
            answer: vec![],
            solves_to_buff: false,
        };
        let phase = run_attempt(&mut resolver, &ctx, &input, &solver).await.unwrap();

        assert_eq!(phase, PuzzlePhase::Escalate);
        assert_eq!(input.presses("f5"), 10);
        assert_eq!(input.presses("enter"), 11);
        assert_eq!(input.presses("esc"), 2);
        // 标记仍有效，重新定位触发路点
        assert!(ctx.puzzle_active());
        assert!(resolver.trigger().is_none());
        assert_eq!(resolver.observe(&ctx, &program()), PuzzlePhase::Navigating);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ninth_failure_force_clears_puzzle() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_with_frame();
        let input = RecordingInput::new();
        let mut resolver = resolver(dir.path());
        resolver.attempts = 8;
        ctx.report_puzzle(MARKER);
        resolver.observe(&ctx, &program());

        let solver = ScriptedSolver {
            ctx: Arc::clone(&ctx),
            answer: vec![],
            solves_to_buff: false,
        };
        run_attempt(&mut resolver, &ctx, &input, &solver).await.unwrap();

        assert_eq!(resolver.attempts(), 9);
        assert!(!ctx.puzzle_active());
        assert_eq!(resolver.observe(&ctx, &program()), PuzzlePhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_twenty_first_failure_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_with_frame();
        let input = RecordingInput::new();
        let mut resolver = resolver(dir.path());
        resolver.attempts = 20;
        ctx.report_puzzle(MARKER);
        resolver.observe(&ctx, &program());

        let solver = ScriptedSolver {
            ctx: Arc::clone(&ctx),
            answer: vec![],
            solves_to_buff: false,
        };
        let err = run_attempt(&mut resolver, &ctx, &input, &solver).await.unwrap_err();

        assert!(matches!(err, AgentError::FailSafe(21)));
        assert_eq!(resolver.phase(), PuzzlePhase::Abort);
        // 熔断前不再执行恢复序列
        assert_eq!(input.presses("f5"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_while_disabled_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_with_frame();
        let input = RecordingInput::new();
        let mut resolver = resolver(dir.path());
        ctx.report_puzzle(MARKER);
        resolver.observe(&ctx, &program());
        ctx.set_enabled(false);

        let solver = ScriptedSolver {
            ctx: Arc::clone(&ctx),
            answer: vec![],
            solves_to_buff: false,
        };
        let phase = run_attempt(&mut resolver, &ctx, &input, &solver).await.unwrap();
        assert_eq!(phase, PuzzlePhase::Navigating);
        assert_eq!(resolver.attempts(), 0);
        assert!(input.events().is_empty());
    }
}
