//! 고정 윈도우 rate limiter.
//!
//! 외부 데이터 API(예: Alpha Vantage 무료 플랜 분당 5회)의 호출 한도를 지키기 위해
//! 윈도우마다 허용 횟수를 세고, 윈도우가 지나면 카운터를 초기화합니다.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// 획득 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// 호출 허용됨
    Allowed,
    /// 한도 초과
    Limited {
        /// 현재 윈도우가 끝날 때까지 남은 시간
        retry_after: Duration,
    },
}

impl Acquire {
    /// 허용 여부.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Acquire::Allowed)
    }
}

#[derive(Debug)]
struct Window {
    started_at: Instant,
    count: u32,
}

/// 고정 윈도우 limiter.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    max_per_window: u32,
    window: Duration,
    state: Mutex<Window>,
}

impl FixedWindowLimiter {
    /// 새 limiter 생성.
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            state: Mutex::new(Window {
                started_at: Instant::now(),
                count: 0,
            }),
        }
    }

    /// 분당 한도로 생성.
    pub fn per_minute(max_per_minute: u32) -> Self {
        Self::new(max_per_minute, Duration::from_secs(60))
    }

    /// 호출 1회를 획득 시도합니다.
    pub async fn try_acquire(&self) -> Acquire {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(state.started_at);

        if elapsed >= self.window {
            state.started_at = now;
            state.count = 0;
        }

        if state.count < self.max_per_window {
            state.count += 1;
            Acquire::Allowed
        } else {
            Acquire::Limited {
                retry_after: self.window.saturating_sub(elapsed),
            }
        }
    }
}
