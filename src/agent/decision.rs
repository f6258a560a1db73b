//! 决策循环
//!
//! 唯一持有并移动执行游标的循环。每一步：
//! 1. 处理编辑器 / 控制命令（载入路线、载入指令书、编辑元素、退出）；
//! 2. 释放到期的定时增益；
//! 3. 推进谜题状态机，游标到达触发路点时先交互；
//! 4. 执行当前路线元素；
//! 5. 发布游标与 RoutineStatus 投影。
//!
//! 失败经 RecoveryEngine 降级：Retry 延迟后重试，Skip 跳过当前元素，Pause 关闭 enabled，
//! Abort（谜题熔断）结束循环并把错误交给 runtime。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::actuation::{
    press, sleep_secs, DirectPlanner, InputInjector, MoveOutcome, Navigator, PathPlanner,
    RecordingInput,
};
use crate::agent::artifacts::FailedFrameStore;
use crate::agent::buffs::BuffRunner;
use crate::agent::puzzle::{PuzzleLimits, PuzzleResolver, PuzzleTools};
use crate::agent::solver::{NoSolver, PuzzleSolver};
use crate::core::{AgentError, RecoveryAction, RecoveryEngine, RoutineError, RoutineStatus, SharedContext};
use crate::perception::{load_waypoints, EnvironmentIdentifier, FrameEncoder};
use crate::routine::{
    self, Behavior, BehaviorKind, ExecutionCursor, Primitive, ProgramElement, RawArgs,
    RoutineHost, RoutineProgram, StepOutcome, Waypoint,
};
use crate::session::{Session, SessionStore};
use crate::skills::{BuffSpec, CommandBook, CommandBookLoader, CooldownScheduler, SkillRotationController};

/// 路点导航的步数预算
const MOVE_STEPS: u32 = 15;
const ADJUST_STEPS: u32 = 5;

/// 从编辑器 / 控制端发往决策循环的命令
#[derive(Debug, Clone)]
pub enum Command {
    /// 从脚本文件载入路线
    LoadRoutine(PathBuf),
    /// 直接替换路线
    SetRoutine(RoutineProgram),
    SaveRoutine(PathBuf),
    /// 按名称或路径载入指令书
    LoadCommandBook(String),
    /// 载入小地图素材旁的路点文件，生成自动路线
    LoadMap(PathBuf),
    /// 识别当前地图并载入
    DetectMap,
    Edit(Edit),
    Quit,
}

/// 路线编辑
#[derive(Debug, Clone)]
pub enum Edit {
    Insert {
        index: usize,
        symbol: String,
        args: RawArgs,
    },
    Remove {
        index: usize,
    },
    Update {
        index: usize,
        args: RawArgs,
    },
    RenameLabel {
        index: usize,
        name: String,
    },
    AddBehavior {
        index: usize,
        name: String,
        args: RawArgs,
    },
    MoveCursor {
        index: usize,
    },
}

/// 决策循环使用的外部协作方
#[derive(Clone)]
pub struct Collaborators {
    pub input: Arc<dyn InputInjector>,
    pub planner: Arc<dyn PathPlanner>,
    pub solver: Arc<dyn PuzzleSolver>,
    pub encoder: Option<Arc<dyn FrameEncoder>>,
    pub identifier: Option<Arc<dyn EnvironmentIdentifier>>,
}

impl Collaborators {
    /// 只记录按键、直线规划、不求解
    pub fn dry_run() -> Self {
        Self {
            input: Arc::new(RecordingInput::new()),
            planner: Arc::new(DirectPlanner::new()),
            solver: Arc::new(NoSolver),
            encoder: None,
            identifier: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecisionOptions {
    /// 空闲（空路线 / 暂停）时的轮询间隔
    pub idle_interval: Duration,
    /// RecoveryAction::Retry 的等待时间
    pub retry_delay: Duration,
    pub item_buffs: Vec<BuffSpec>,
    /// 自动喂食时的宠物数量
    pub pets: Option<u32>,
    pub puzzle: PuzzleLimits,
    pub artifacts_dir: PathBuf,
    /// 指令书目录；None 时在默认位置查找
    pub command_books: Option<PathBuf>,
    pub seed: Option<u64>,
}

impl Default for DecisionOptions {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_millis(10),
            retry_delay: Duration::from_millis(500),
            item_buffs: Vec::new(),
            pets: None,
            puzzle: PuzzleLimits::default(),
            artifacts_dir: PathBuf::from("failed_detections"),
            command_books: None,
            seed: None,
        }
    }
}

pub struct DecisionLoop {
    ctx: Arc<SharedContext>,
    collaborators: Collaborators,
    program: RoutineProgram,
    cursor: ExecutionCursor,
    book: Option<CommandBook>,
    scheduler: CooldownScheduler,
    buffs: Option<BuffRunner>,
    puzzle: PuzzleResolver,
    rng: StdRng,
    loader: CommandBookLoader,
    session: Option<SessionStore>,
    options: DecisionOptions,
    status_tx: watch::Sender<RoutineStatus>,
    last_error: Option<String>,
}

impl DecisionLoop {
    pub fn new(
        ctx: Arc<SharedContext>,
        collaborators: Collaborators,
        options: DecisionOptions,
    ) -> Self {
        let puzzle = PuzzleResolver::new(
            options.puzzle.clone(),
            FailedFrameStore::new(&options.artifacts_dir),
            collaborators.encoder.clone(),
        );
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let loader = match &options.command_books {
            Some(dir) => CommandBookLoader::new(dir),
            None => CommandBookLoader::from_default(),
        };
        let (status_tx, _) = watch::channel(RoutineStatus::default());
        Self {
            ctx,
            collaborators,
            program: RoutineProgram::new(),
            cursor: ExecutionCursor::default(),
            book: None,
            scheduler: CooldownScheduler::default(),
            buffs: None,
            puzzle,
            rng,
            loader,
            session: None,
            options,
            status_tx,
            last_error: None,
        }
    }

    /// 成功载入的指令书 / 路线 / 地图写入会话记忆
    pub fn with_session(mut self, store: SessionStore) -> Self {
        self.session = Some(store);
        self
    }

    /// 订阅状态投影
    pub fn status(&self) -> watch::Receiver<RoutineStatus> {
        self.status_tx.subscribe()
    }

    pub fn program(&self) -> &RoutineProgram {
        &self.program
    }

    pub fn cursor(&self) -> ExecutionCursor {
        self.cursor
    }

    pub fn command_book(&self) -> Option<&CommandBook> {
        self.book.as_ref()
    }

    pub fn set_command_book(&mut self, book: CommandBook) {
        info!(book = %book.name, skills = book.skills.len(), "Command book active");
        let buffs = BuffRunner::new(&book, &self.options.item_buffs, self.options.pets);
        self.buffs = (!buffs.is_empty()).then_some(buffs);
        self.book = Some(book);
    }

    /// 替换路线：游标回到开头，旧触发路点作废
    pub fn set_program(&mut self, program: RoutineProgram) {
        self.program = program;
        self.cursor = ExecutionCursor::default();
        self.ctx.publish_cursor(0);
        self.puzzle.forget_trigger();
    }

    /// 按会话记忆恢复上次的指令书与路线；没有路线时退回上次的小地图
    pub fn restore_session(&mut self) {
        let Some(store) = &self.session else {
            return;
        };
        let session = store.load();
        if let Some(name) = session.command_book {
            self.execute(Command::LoadCommandBook(name));
        }
        match (session.routine, session.minimap) {
            (Some(path), _) => {
                self.execute(Command::LoadRoutine(PathBuf::from(path)));
            }
            (None, Some(map)) => {
                self.execute(Command::LoadMap(PathBuf::from(map)));
            }
            (None, None) => {}
        }
    }

    /// 处理一条命令；返回 false 表示收到 Quit
    pub fn handle_command(&mut self, command: Command) -> bool {
        let keep_running = self.execute(command);
        self.publish_status();
        keep_running
    }

    fn execute(&mut self, command: Command) -> bool {
        let result = match command {
            Command::Quit => return false,
            Command::LoadRoutine(path) => self.load_routine(&path),
            Command::SetRoutine(program) => {
                info!(elements = program.len(), "Routine replaced");
                self.set_program(program);
                Ok(())
            }
            Command::SaveRoutine(path) => routine::save(&self.program, &path)
                .map(|()| info!(path = %path.display(), "Routine saved"))
                .map_err(Into::into),
            Command::LoadCommandBook(name) => self.load_command_book(&name),
            Command::LoadMap(path) => self.load_map(&path),
            Command::DetectMap => self.detect_map(),
            Command::Edit(edit) => self.apply_edit(edit).map_err(Into::into),
        };
        if let Err(e) = result {
            warn!("Command failed: {:#}", e);
            self.last_error = Some(format!("{e:#}"));
        }
        true
    }

    fn load_routine(&mut self, path: &Path) -> anyhow::Result<()> {
        let program = routine::load(path)?;
        info!(path = %path.display(), elements = program.len(), "Routine loaded");
        self.set_program(program);
        self.remember(Session {
            routine: Some(path.display().to_string()),
            ..Session::default()
        });
        Ok(())
    }

    fn load_command_book(&mut self, name: &str) -> anyhow::Result<()> {
        let book = self.loader.load(name)?;
        self.set_command_book(book);
        self.remember(Session {
            command_book: Some(name.to_string()),
            ..Session::default()
        });
        Ok(())
    }

    fn load_map(&mut self, path: &Path) -> anyhow::Result<()> {
        match load_waypoints(path)? {
            Some(points) if !points.is_empty() => {
                let program = RoutineProgram::from_waypoints(&points)
                    .context("failed to build routine from waypoints")?;
                info!(map = %path.display(), waypoints = points.len(), "Routine generated from map waypoints");
                self.set_program(program);
            }
            _ => warn!(map = %path.display(), "Map has no waypoints file, keeping current routine"),
        }
        self.remember(Session {
            minimap: Some(path.display().to_string()),
            ..Session::default()
        });
        Ok(())
    }

    fn detect_map(&mut self) -> anyhow::Result<()> {
        let identifier = self
            .collaborators
            .identifier
            .clone()
            .ok_or_else(|| anyhow!("no environment identifier configured"))?;
        let snapshot = self.ctx.snapshot();
        let frame = snapshot
            .frame
            .as_ref()
            .ok_or_else(|| anyhow!("no frame captured yet"))?;
        let found = identifier
            .identify(frame)
            .ok_or_else(|| anyhow!("current map not recognised"))?;
        info!(map = %found.name, score = found.score, "Map identified");
        self.load_map(&found.path)
    }

    fn apply_edit(&mut self, edit: Edit) -> Result<(), RoutineError> {
        match edit {
            Edit::Insert {
                index,
                symbol,
                args,
            } => {
                let element = ProgramElement::build(&symbol, &args)?;
                let was_empty = self.program.is_empty();
                self.program.insert(index, element)?;
                // 游标继续指向原来的元素
                if !was_empty && index < self.cursor.index {
                    self.cursor.index += 1;
                }
            }
            Edit::Remove { index } => {
                self.program.remove(index)?;
                if index < self.cursor.index {
                    self.cursor.index -= 1;
                }
                self.cursor.index = self.cursor.index.min(self.program.len().saturating_sub(1));
                self.puzzle.forget_trigger();
            }
            Edit::Update { index, args } => {
                self.program.update(index, &args)?;
                self.puzzle.forget_trigger();
            }
            Edit::RenameLabel { index, name } => self.program.rename_label(index, &name)?,
            Edit::AddBehavior { index, name, args } => {
                let behavior = Behavior::build(&name, &args)?;
                self.program.add_behavior(index, behavior)?;
            }
            Edit::MoveCursor { index } => {
                if index >= self.program.len() {
                    return Err(RoutineError::IndexOutOfRange {
                        index,
                        len: self.program.len(),
                    });
                }
                self.cursor.index = index;
            }
        }
        self.ctx.publish_cursor(self.cursor.index);
        Ok(())
    }

    fn remember(&self, update: Session) {
        if let Some(store) = &self.session {
            if let Err(e) = store.update(&update) {
                warn!("Failed to update session: {:#}", e);
            }
        }
    }

    /// 执行一步
    pub async fn tick(&mut self) -> Result<StepOutcome, AgentError> {
        if self.program.is_empty() {
            return Ok(StepOutcome::Idle);
        }
        if !self.ctx.is_enabled() {
            return Ok(StepOutcome::Paused);
        }
        let Some(book) = self.book.as_ref() else {
            return Err(AgentError::NoCommandBook);
        };
        if !self.scheduler.is_bound_to(&book.skills) {
            debug!(book = %book.name, "Rebuilding cooldown scheduler");
            self.scheduler = CooldownScheduler::for_registry(&book.skills);
        }

        let input = self.collaborators.input.as_ref();
        if let Some(buffs) = self.buffs.as_mut() {
            buffs.run(input, &self.ctx).await?;
        }

        self.puzzle.observe(&self.ctx, &self.program);
        let mut nav = Navigator {
            skills: SkillRotationController {
                input,
                ctx: self.ctx.as_ref(),
                registry: book.skills.as_ref(),
                scheduler: &mut self.scheduler,
                rng: &mut self.rng,
                jump_key: &book.keys.jump,
            },
            planner: self.collaborators.planner.as_ref(),
        };

        let index = self.cursor.index.min(self.program.len() - 1);
        let at_trigger = self
            .program
            .get(index)
            .is_some_and(|element| self.puzzle.should_attempt(element));
        if at_trigger {
            let tools = PuzzleTools {
                solver: self.collaborators.solver.as_ref(),
                keys: &book.keys,
            };
            self.puzzle.attempt(&mut nav, &tools).await?;
        }

        let mut host = DecisionHost { nav, book };
        let outcome = self.program.step(&mut self.cursor, &mut host).await;
        self.ctx.publish_cursor(self.cursor.index);
        outcome
    }

    pub fn publish_status(&self) {
        let index = self.cursor.index;
        self.status_tx.send_replace(RoutineStatus {
            enabled: self.ctx.is_enabled(),
            index,
            program_len: self.program.len(),
            current: self.program.get(index).map(ToString::to_string),
            command_book: self.book.as_ref().map(|b| b.name.clone()),
            puzzle_phase: self.puzzle.phase(),
            puzzle_attempts: self.puzzle.attempts(),
            last_error: self.last_error.clone(),
        });
    }

    /// 运行到 Quit、取消或熔断
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        token: CancellationToken,
    ) -> Result<(), AgentError> {
        info!("Decision loop started");
        let recovery = RecoveryEngine::new();
        self.publish_status();

        while !token.is_cancelled() {
            while let Ok(command) = commands.try_recv() {
                if !self.handle_command(command) {
                    info!("Quit requested");
                    return Ok(());
                }
            }

            let idle = match self.tick().await {
                Ok(StepOutcome::Stepped { .. }) => {
                    self.last_error = None;
                    false
                }
                Ok(StepOutcome::Idle | StepOutcome::Paused) => true,
                Err(e) => {
                    let action = recovery.handle(&e);
                    warn!(?action, index = self.cursor.index, "Decision step failed: {}", e);
                    self.last_error = Some(e.to_string());
                    match action {
                        RecoveryAction::Retry => {
                            tokio::select! {
                                _ = token.cancelled() => break,
                                _ = tokio::time::sleep(self.options.retry_delay) => {}
                            }
                            false
                        }
                        RecoveryAction::Skip => {
                            self.program.skip(&mut self.cursor);
                            self.ctx.publish_cursor(self.cursor.index);
                            false
                        }
                        RecoveryAction::Pause => {
                            self.ctx.request_pause();
                            true
                        }
                        RecoveryAction::Abort => {
                            self.publish_status();
                            return Err(e);
                        }
                    }
                }
            };
            self.publish_status();

            if idle {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(self.options.idle_interval) => {}
                }
            } else {
                tokio::task::yield_now().await;
            }
        }
        info!("Decision loop stopped");
        Ok(())
    }
}

/// 路线元素执行宿主：借用决策循环的导航与指令书
struct DecisionHost<'a> {
    nav: Navigator<'a>,
    book: &'a CommandBook,
}

impl DecisionHost<'_> {
    async fn run_behavior(&mut self, behavior: &Behavior) -> Result<(), AgentError> {
        debug!(behavior = %behavior, "Running behavior");
        let input = self.nav.skills.input;
        match behavior.kind() {
            BehaviorKind::Move { target, max_steps } => {
                self.nav.move_to(*target, *max_steps).await?;
            }
            BehaviorKind::Adjust { target, max_steps } => {
                self.nav.adjust(*target, *max_steps).await?;
            }
            BehaviorKind::Wait { seconds } => sleep_secs(*seconds).await,
            BehaviorKind::Walk { direction, seconds } => {
                self.nav.walk(direction, *seconds).await?;
            }
            BehaviorKind::Fall { distance } => self.nav.fall(*distance).await?,
            BehaviorKind::SkillRotation { seconds } => {
                self.nav.skills.run(*seconds).await?;
            }
            BehaviorKind::UseSkill { skill } => {
                let key = self.book.skills.key_for(skill);
                let presses = self.book.skills.presses_for(skill);
                press(input, key, presses, 0.05, 0.05).await?;
                self.nav.skills.scheduler.record_used(skill);
            }
            BehaviorKind::Press {
                key,
                count,
                down_time,
            } => press(input, key, *count, *down_time, 0.05).await?,
        }
        Ok(())
    }
}

#[async_trait]
impl<'a> RoutineHost for DecisionHost<'a> {
    fn is_enabled(&self) -> bool {
        self.nav.skills.ctx.is_enabled()
    }

    async fn visit_waypoint(&mut self, waypoint: &Waypoint) -> Result<(), AgentError> {
        let outcome = self.nav.move_to(waypoint.location, MOVE_STEPS).await?;
        if outcome == MoveOutcome::Interrupted {
            return Ok(());
        }
        if waypoint.fine_adjust {
            self.nav.adjust(waypoint.location, ADJUST_STEPS).await?;
        }

        let (rotation_mode, rotation_secs) = {
            let settings = self.nav.skills.ctx.settings();
            (settings.skill_rotation_mode, settings.skill_rotation_duration)
        };
        if rotation_mode {
            self.nav.skills.run(rotation_secs).await?;
            return Ok(());
        }
        for behavior in &waypoint.behaviors {
            if !self.is_enabled() {
                break;
            }
            self.run_behavior(behavior).await?;
        }
        Ok(())
    }

    fn apply_setting(&mut self, key: &str, value: &Primitive) {
        if self.nav.skills.ctx.settings_mut().apply(key, value) {
            debug!(setting = key, %value, "Setting changed");
        } else {
            warn!(setting = key, %value, "Setting rejected");
        }
    }
}
