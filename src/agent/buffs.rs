//! 定时维护动作：职业增益、道具增益、宠物喂食
//!
//! 三类动作共用一个冷却调度器，在决策循环每步开始前检查：
//! - 指令书中的增益按各自间隔释放，且间隔不低于实时设置 `buff_cooldown`；
//! - 道具增益按配置间隔使用，间隔 0 表示从不使用；
//! - 开启喂食时每 `1200 / 宠物数` 秒喂一次，启动后先等满一个间隔。

use tracing::debug;

use crate::actuation::{press, sleep_secs, InputInjector};
use crate::core::{AgentError, SharedContext};
use crate::skills::{BuffSpec, CommandBook, CooldownScheduler};

const PET_FEED_PERIOD: f64 = 1200.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuffSource {
    CommandBook,
    Item,
    Pet,
}

#[derive(Debug, Clone)]
struct BuffEntry {
    id: String,
    key: String,
    interval: f64,
    source: BuffSource,
}

pub struct BuffRunner {
    entries: Vec<BuffEntry>,
    scheduler: CooldownScheduler,
    /// 上次套用的 buff_cooldown
    floor: Option<i64>,
}

impl BuffRunner {
    /// pets：开启自动喂食时的宠物数量
    pub fn new(book: &CommandBook, items: &[BuffSpec], pets: Option<u32>) -> Self {
        let mut entries = Vec::new();
        for (i, spec) in book.buffs.iter().filter(|s| s.interval > 0.0).enumerate() {
            entries.push(BuffEntry {
                id: format!("book:{i}:{}", spec.key),
                key: spec.key.clone(),
                interval: spec.interval,
                source: BuffSource::CommandBook,
            });
        }
        for (i, spec) in items.iter().filter(|s| s.interval > 0.0).enumerate() {
            entries.push(BuffEntry {
                id: format!("item:{i}:{}", spec.key),
                key: spec.key.clone(),
                interval: spec.interval,
                source: BuffSource::Item,
            });
        }
        if let Some(pets) = pets.filter(|n| *n > 0) {
            entries.push(BuffEntry {
                id: "pet".to_string(),
                key: book.keys.feed_pet.clone(),
                interval: PET_FEED_PERIOD / f64::from(pets),
                source: BuffSource::Pet,
            });
        }

        let mut scheduler =
            CooldownScheduler::new(entries.iter().map(|e| (e.id.clone(), e.interval)));
        if entries.iter().any(|e| e.source == BuffSource::Pet) {
            scheduler.record_used("pet");
        }
        Self {
            entries,
            scheduler,
            floor: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 释放所有到期的维护动作，返回按下的按键
    pub async fn run(
        &mut self,
        input: &dyn InputInjector,
        ctx: &SharedContext,
    ) -> Result<Vec<String>, AgentError> {
        self.apply_floor(ctx.settings().buff_cooldown);

        let due: Vec<BuffEntry> = {
            let available = self.scheduler.available();
            self.entries
                .iter()
                .filter(|e| available.contains(&e.id.as_str()))
                .cloned()
                .collect()
        };

        let mut used = Vec::new();
        for entry in due {
            if !ctx.is_enabled() {
                break;
            }
            debug!(key = %entry.key, source = ?entry.source, "Timed buff");
            press(input, &entry.key, 1, 0.05, 0.05).await?;
            self.scheduler.record_used(&entry.id);
            used.push(entry.key);
            sleep_secs(0.1).await;
        }
        Ok(used)
    }

    fn apply_floor(&mut self, floor: i64) {
        if self.floor == Some(floor) {
            return;
        }
        self.floor = Some(floor);
        for entry in &self.entries {
            if entry.source == BuffSource::CommandBook {
                self.scheduler
                    .set_cooldown(&entry.id, entry.interval.max(floor as f64));
            }
        }
    }
}
