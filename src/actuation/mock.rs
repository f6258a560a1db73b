//! 记录型输入注入（测试与演练模式，不发送真实按键）

use std::collections::BTreeSet;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::actuation::input::{InputInjector, MouseButton};
use crate::core::AgentError;
use crate::perception::Point;

#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    Down(String),
    Up(String),
    Click(Point, MouseButton),
}

/// 按顺序记录所有输入事件
#[derive(Debug, Default)]
pub struct RecordingInput {
    events: Mutex<Vec<(Instant, InputEvent)>>,
    /// 对这些按键的操作返回错误
    failing: Mutex<BTreeSet<String>>,
}

impl RecordingInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, key: &str) {
        self.failing.lock().insert(key.to_string());
    }

    pub fn events(&self) -> Vec<InputEvent> {
        self.events.lock().iter().map(|(_, e)| e.clone()).collect()
    }

    pub fn timed_events(&self) -> Vec<(Instant, InputEvent)> {
        self.events.lock().clone()
    }

    /// 按下次数
    pub fn presses(&self, key: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|(_, e)| matches!(e, InputEvent::Down(k) if k == key))
            .count()
    }

    /// 按下的按键序列
    pub fn pressed_keys(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|(_, e)| match e {
                InputEvent::Down(k) => Some(k.clone()),
                _ => None,
            })
            .collect()
    }

    /// 当前仍处于按下状态的按键
    pub fn held(&self) -> BTreeSet<String> {
        let mut held = BTreeSet::new();
        for (_, event) in self.events.lock().iter() {
            match event {
                InputEvent::Down(k) => {
                    held.insert(k.clone());
                }
                InputEvent::Up(k) => {
                    held.remove(k);
                }
                InputEvent::Click(..) => {}
            }
        }
        held
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    fn record(&self, event: InputEvent, key: Option<&str>) -> Result<(), AgentError> {
        if let Some(key) = key {
            if self.failing.lock().contains(key) {
                return Err(AgentError::Input(format!("injection rejected for '{key}'")));
            }
        }
        self.events.lock().push((Instant::now(), event));
        Ok(())
    }
}

#[async_trait]
impl InputInjector for RecordingInput {
    async fn key_down(&self, key: &str) -> Result<(), AgentError> {
        self.record(InputEvent::Down(key.to_string()), Some(key))
    }

    async fn key_up(&self, key: &str) -> Result<(), AgentError> {
        self.record(InputEvent::Up(key.to_string()), Some(key))
    }

    async fn click(&self, point: Point, button: MouseButton) -> Result<(), AgentError> {
        self.record(InputEvent::Click(point, button), None)
    }
}
