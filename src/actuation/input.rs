//! 输入注入抽象
//!
//! 物理按键 / 鼠标模拟由外部实现 InputInjector；本模块只提供按住时长、连按次数等组合。

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::core::AgentError;
use crate::perception::Point;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
}

/// 输入注入 trait：按下 / 抬起按键、点击屏幕坐标
#[async_trait]
pub trait InputInjector: Send + Sync {
    async fn key_down(&self, key: &str) -> Result<(), AgentError>;

    async fn key_up(&self, key: &str) -> Result<(), AgentError>;

    async fn click(&self, point: Point, button: MouseButton) -> Result<(), AgentError>;
}

/// 连按 count 次，每次按住 down_time 秒、间隔 up_time 秒
pub async fn press(
    input: &dyn InputInjector,
    key: &str,
    count: u32,
    down_time: f64,
    up_time: f64,
) -> Result<(), AgentError> {
    for _ in 0..count {
        input.key_down(key).await?;
        sleep_secs(down_time).await;
        input.key_up(key).await?;
        sleep_secs(up_time).await;
    }
    Ok(())
}

/// 按住一段时间后抬起
pub async fn hold(input: &dyn InputInjector, key: &str, seconds: f64) -> Result<(), AgentError> {
    input.key_down(key).await?;
    sleep_secs(seconds).await;
    input.key_up(key).await
}

/// 秒数转 Duration：非正数与 NaN 为 0，超出范围饱和到 Duration::MAX
pub fn secs(seconds: f64) -> Duration {
    if seconds > 0.0 {
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}

/// 从现在起 seconds 秒后的时刻；溢出时取约 30 年后
pub fn deadline_after(seconds: f64) -> Instant {
    let now = Instant::now();
    now.checked_add(secs(seconds))
        .unwrap_or_else(|| now + Duration::from_secs(FAR_FUTURE_SECS))
}

const FAR_FUTURE_SECS: u64 = 86_400 * 365 * 30;

pub async fn sleep_secs(seconds: f64) {
    let duration = secs(seconds);
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secs_saturates_instead_of_panicking() {
        assert_eq!(secs(1.5), Duration::from_millis(1500));
        assert_eq!(secs(-1.0), Duration::ZERO);
        assert_eq!(secs(f64::NAN), Duration::ZERO);
        assert_eq!(secs(1e20), Duration::MAX);
        assert_eq!(secs(f64::INFINITY), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_sleep_and_deadline_do_not_panic() {
        let start = Instant::now();
        assert!(deadline_after(1e20) > start + Duration::from_secs(86_400 * 365));
        sleep_secs(1e20).await;
        assert!(start.elapsed() > Duration::from_secs(86_400));
    }
}
