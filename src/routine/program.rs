//! 路线程序：有序元素序列 + 标签表 + 绑定 + 单步执行
//!
//! - 元素以稳定 id 标识；跳转的 link 指向标签 id 而不是下标，插入 / 删除只需重新推导下标；
//! - 结构修改之后执行一次绑定：每个跳转按名称解析标签，解析失败保持 None，执行时记录诊断并空转；
//! - 删除元素前显式解绑（标签断开所有跳转，跳转从标签的反向集合中移除）。
//!
//! 执行游标只由决策循环持有和移动；`step` 在每个有副作用的动作前后检查 enabled，
//! 暂停时既不执行也不推进计数和下标，恢复后从完全相同的状态继续。

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::core::{AgentError, RoutineError};
use crate::perception::Point;
use crate::routine::components::{Branch, ElementId, Label, ProgramElement, Waypoint};
use crate::routine::value::{Primitive, RawArgs};
use crate::routine::Behavior;

/// 执行游标：指向下一个要执行的元素
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionCursor {
    pub index: usize,
}

/// 执行路线元素所需的外部能力（由决策循环实现）
#[async_trait]
pub trait RoutineHost: Send {
    /// 全局 enabled 标志
    fn is_enabled(&self) -> bool;

    /// 计数到期的路点：导航、可选微调、附加行为
    async fn visit_waypoint(&mut self, waypoint: &Waypoint) -> Result<(), AgentError>;

    /// 写入一项运行时设置
    fn apply_setting(&mut self, key: &str, value: &Primitive);
}

/// 单步结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// 空程序
    Idle,
    /// enabled 为 false，状态未变
    Paused,
    Stepped {
        index: usize,
        next: usize,
        /// 是否执行了动作（路点到期、跳转生效、设置写入）
        acted: bool,
    },
}

#[derive(Debug, Clone)]
struct Slot {
    id: ElementId,
    element: ProgramElement,
}

#[derive(Debug, Clone, Default)]
pub struct RoutineProgram {
    slots: Vec<Slot>,
    labels: HashMap<String, ElementId>,
    positions: HashMap<ElementId, usize>,
    next_id: ElementId,
}

impl RoutineProgram {
    pub fn new() -> Self {
        Self::default()
    }

    /// 自动路线：开头一个标签，依次经过所有点，最后跳回开头
    pub fn from_waypoints(points: &[Point]) -> Result<Self, RoutineError> {
        let mut program = Self::new();
        program.push(ProgramElement::Label(Label::new("start")?))?;
        for point in points {
            program.push(ProgramElement::Waypoint(Waypoint::new(point.x, point.y)))?;
        }
        program.push(ProgramElement::Branch(Branch::new("start")?))?;
        Ok(program)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ProgramElement> {
        self.slots.get(index).map(|s| &s.element)
    }

    pub fn id_at(&self, index: usize) -> Option<ElementId> {
        self.slots.get(index).map(|s| s.id)
    }

    pub fn position_of(&self, id: ElementId) -> Option<usize> {
        self.positions.get(&id).copied()
    }

    pub fn elements(&self) -> impl Iterator<Item = &ProgramElement> {
        self.slots.iter().map(|s| &s.element)
    }

    /// 标签名 → 当前下标
    pub fn label_index(&self, name: &str) -> Option<usize> {
        self.labels.get(name).and_then(|id| self.position_of(*id))
    }

    pub fn waypoints(&self) -> impl Iterator<Item = (usize, &Waypoint)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| match &s.element {
                ProgramElement::Waypoint(w) => Some((i, w)),
                _ => None,
            })
    }

    /// 平面距离最近的路点
    pub fn nearest_waypoint(&self, point: &Point) -> Option<(usize, &Waypoint)> {
        self.waypoints()
            .min_by(|(_, a), (_, b)| {
                a.location
                    .distance(point)
                    .total_cmp(&b.location.distance(point))
            })
    }

    pub fn push(&mut self, element: ProgramElement) -> Result<ElementId, RoutineError> {
        self.insert(self.slots.len(), element)
    }

    pub fn insert(
        &mut self,
        index: usize,
        mut element: ProgramElement,
    ) -> Result<ElementId, RoutineError> {
        if index > self.slots.len() {
            return Err(RoutineError::IndexOutOfRange {
                index,
                len: self.slots.len(),
            });
        }
        match &mut element {
            ProgramElement::Label(label) => {
                if self.labels.contains_key(&label.name) {
                    return Err(RoutineError::DuplicateLabel(label.name.clone()));
                }
                label.links.clear();
            }
            ProgramElement::Branch(branch) => branch.link = None,
            _ => {}
        }

        let id = self.next_id;
        self.next_id += 1;
        if let ProgramElement::Label(label) = &element {
            self.labels.insert(label.name.clone(), id);
        }
        self.slots.insert(index, Slot { id, element });
        self.reindex();
        self.bind();
        Ok(id)
    }

    /// 删除元素（先解绑）
    pub fn remove(&mut self, index: usize) -> Result<ProgramElement, RoutineError> {
        self.check_index(index)?;
        self.unbind(index);
        let slot = self.slots.remove(index);
        self.positions.remove(&slot.id);
        self.reindex();
        self.bind();
        Ok(slot.element)
    }

    /// 用新参数重建元素：符号不变，标识不变，路点保留附加行为。
    /// 构造失败时程序保持原样。
    pub fn update(&mut self, index: usize, args: &RawArgs) -> Result<(), RoutineError> {
        self.check_index(index)?;
        let symbol = self.slots[index].element.symbol();
        let mut element = ProgramElement::build(symbol, args)?;

        match (&self.slots[index].element, &mut element) {
            (ProgramElement::Waypoint(old), ProgramElement::Waypoint(new)) => {
                new.behaviors = old.behaviors.clone();
            }
            (ProgramElement::Label(old), ProgramElement::Label(new)) => {
                if old.name != new.name && self.labels.contains_key(&new.name) {
                    return Err(RoutineError::DuplicateLabel(new.name.clone()));
                }
            }
            _ => {}
        }

        self.unbind(index);
        if let ProgramElement::Label(label) = &element {
            self.labels.insert(label.name.clone(), self.slots[index].id);
        }
        self.slots[index].element = element;
        self.reindex();
        self.bind();
        Ok(())
    }

    /// 重命名标签：解绑、改名、重新绑定
    pub fn rename_label(&mut self, index: usize, name: &str) -> Result<(), RoutineError> {
        match self.get(index) {
            Some(ProgramElement::Label(_)) => self.update(index, &RawArgs::new().arg(name)),
            Some(_) => Err(RoutineError::WrongElement {
                index,
                expected: "label",
            }),
            None => Err(RoutineError::IndexOutOfRange {
                index,
                len: self.slots.len(),
            }),
        }
    }

    /// 给路点追加附加行为
    pub fn add_behavior(&mut self, index: usize, behavior: Behavior) -> Result<(), RoutineError> {
        self.check_index(index)?;
        match &mut self.slots[index].element {
            ProgramElement::Waypoint(waypoint) => {
                waypoint.behaviors.push(behavior);
                Ok(())
            }
            _ => Err(RoutineError::WrongElement {
                index,
                expected: "waypoint",
            }),
        }
    }

    /// 绑定所有跳转，返回仍未解析的跳转数。已绑定且标签表未变时结果不变。
    pub fn bind(&mut self) -> usize {
        let updates: Vec<(usize, ElementId, Option<ElementId>, Option<ElementId>)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| match &s.element {
                ProgramElement::Branch(b) => {
                    Some((i, s.id, b.link, self.labels.get(&b.target_label).copied()))
                }
                _ => None,
            })
            .collect();

        let mut unresolved = 0;
        for (index, branch_id, old, new) in updates {
            if old != new {
                if let Some(old) = old {
                    self.with_label(old, |label| {
                        label.links.remove(&branch_id);
                    });
                }
                if let ProgramElement::Branch(branch) = &mut self.slots[index].element {
                    branch.link = new;
                }
            }
            match new {
                Some(label_id) => self.with_label(label_id, |label| {
                    label.links.insert(branch_id);
                }),
                None => unresolved += 1,
            }
        }
        unresolved
    }

    /// 执行当前元素并推进游标
    pub async fn step<H>(
        &mut self,
        cursor: &mut ExecutionCursor,
        host: &mut H,
    ) -> Result<StepOutcome, AgentError>
    where
        H: RoutineHost + ?Sized,
    {
        let len = self.slots.len();
        if len == 0 {
            return Ok(StepOutcome::Idle);
        }
        let index = cursor.index.min(len - 1);
        cursor.index = index;
        if !host.is_enabled() {
            return Ok(StepOutcome::Paused);
        }

        let mut next = (index + 1) % len;
        let mut acted = false;
        match &self.slots[index].element {
            ProgramElement::Waypoint(waypoint) => {
                if waypoint.repeat.is_due() {
                    debug!(index, location = %waypoint.location, "Visiting waypoint");
                    host.visit_waypoint(waypoint).await?;
                    acted = true;
                }
            }
            ProgramElement::Label(_) => {}
            ProgramElement::Branch(branch) => {
                match branch.link.and_then(|id| self.position_of(id)) {
                    None => warn!(
                        index,
                        label = %branch.target_label,
                        "Branch target label does not exist"
                    ),
                    Some(target) if branch.repeat.is_due() => {
                        debug!(index, label = %branch.target_label, target, "Taking branch");
                        next = (target + 1) % len;
                        acted = true;
                    }
                    Some(_) => {}
                }
            }
            ProgramElement::SettingChange(change) => {
                host.apply_setting(&change.key, &change.value);
                acted = true;
            }
        }

        // 动作期间被暂停：计数与下标都不动
        if !host.is_enabled() {
            return Ok(StepOutcome::Paused);
        }
        self.advance_counter(index);
        cursor.index = next;
        Ok(StepOutcome::Stepped { index, next, acted })
    }

    /// 放弃当前元素：推进计数与下标，不执行动作（用于恢复策略 Skip）
    pub fn skip(&mut self, cursor: &mut ExecutionCursor) {
        let len = self.slots.len();
        if len == 0 {
            return;
        }
        let index = cursor.index.min(len - 1);
        self.advance_counter(index);
        cursor.index = (index + 1) % len;
    }

    fn advance_counter(&mut self, index: usize) {
        match &mut self.slots[index].element {
            ProgramElement::Waypoint(w) => w.repeat.advance(),
            ProgramElement::Branch(b) => b.repeat.advance(),
            _ => {}
        }
    }

    fn unbind(&mut self, index: usize) {
        let id = self.slots[index].id;
        let (label_links, branch_link) = match &mut self.slots[index].element {
            ProgramElement::Label(label) => {
                self.labels.remove(&label.name);
                (std::mem::take(&mut label.links), None)
            }
            ProgramElement::Branch(branch) => (Default::default(), branch.link.take()),
            _ => return,
        };
        for branch_id in label_links {
            if let Some(pos) = self.position_of(branch_id) {
                if let ProgramElement::Branch(branch) = &mut self.slots[pos].element {
                    branch.link = None;
                }
            }
        }
        if let Some(label_id) = branch_link {
            self.with_label(label_id, |label| {
                label.links.remove(&id);
            });
        }
    }

    fn reindex(&mut self) {
        self.positions.clear();
        for (i, slot) in self.slots.iter_mut().enumerate() {
            self.positions.insert(slot.id, i);
            if let ProgramElement::Label(label) = &mut slot.element {
                label.index = i;
            }
        }
    }

    fn with_label(&mut self, id: ElementId, f: impl FnOnce(&mut Label)) {
        if let Some(pos) = self.position_of(id) {
            if let ProgramElement::Label(label) = &mut self.slots[pos].element {
                f(label);
            }
        }
    }

    fn check_index(&self, index: usize) -> Result<(), RoutineError> {
        if index >= self.slots.len() {
            return Err(RoutineError::IndexOutOfRange {
                index,
                len: self.slots.len(),
            });
        }
        Ok(())
    }
}
