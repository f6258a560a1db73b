//! 冷却调度器
//!
//! 记录每个限频动作的上次使用时间，回答「现在哪些动作可用」。
//! 只由决策循环修改，不需要加锁。时间取自 tokio 时钟，测试中可以暂停 / 快进。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::actuation::secs;

use crate::skills::registry::SkillRegistry;

#[derive(Debug, Clone, Default)]
pub struct CooldownScheduler {
    /// 声明顺序的 (key, 冷却)
    cooldowns: Vec<(String, Duration)>,
    last_used: HashMap<String, Instant>,
    /// 创建时绑定的技能表；表的身份变化时需要重建
    source: Option<Arc<SkillRegistry>>,
}

impl CooldownScheduler {
    pub fn new<K: Into<String>>(cooldowns: impl IntoIterator<Item = (K, f64)>) -> Self {
        Self {
            cooldowns: cooldowns
                .into_iter()
                .map(|(key, seconds)| (key.into(), secs(seconds)))
                .collect(),
            last_used: HashMap::new(),
            source: None,
        }
    }

    pub fn for_registry(registry: &Arc<SkillRegistry>) -> Self {
        let mut scheduler = Self::new(registry.cooldowns());
        scheduler.source = Some(Arc::clone(registry));
        scheduler
    }

    /// 是否仍绑定在同一张技能表上
    pub fn is_bound_to(&self, registry: &Arc<SkillRegistry>) -> bool {
        self.source
            .as_ref()
            .is_some_and(|source| Arc::ptr_eq(source, registry))
    }

    /// 当前可用的 key（声明顺序）
    pub fn available(&self) -> Vec<&str> {
        self.available_at(Instant::now())
    }

    pub fn available_at(&self, now: Instant) -> Vec<&str> {
        self.cooldowns
            .iter()
            .filter(|(key, cooldown)| self.ready(key, *cooldown, now))
            .map(|(key, _)| key.as_str())
            .collect()
    }

    pub fn is_available(&self, key: &str) -> bool {
        let now = Instant::now();
        self.cooldowns
            .iter()
            .any(|(k, cooldown)| k == key && self.ready(k, *cooldown, now))
    }

    /// 修改已登记 key 的冷却，保留上次使用时间
    pub fn set_cooldown(&mut self, key: &str, seconds: f64) {
        if let Some((_, cooldown)) = self.cooldowns.iter_mut().find(|(k, _)| k == key) {
            *cooldown = secs(seconds);
        }
    }

    /// 记录使用时间（未登记的 key 忽略）
    pub fn record_used(&mut self, key: &str) {
        if self.cooldowns.iter().any(|(k, _)| k == key) {
            self.last_used.insert(key.to_string(), Instant::now());
        }
    }

    fn ready(&self, key: &str, cooldown: Duration, now: Instant) -> bool {
        if cooldown.is_zero() {
            return true;
        }
        match self.last_used.get(key) {
            None => true,
            Some(used) => now.saturating_duration_since(*used) >= cooldown,
        }
    }
}
