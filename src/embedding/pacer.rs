//! 배치 페이싱 추상화
//!
//! 배치 연산이 그룹 사이에 삽입하는 딜레이를 주입 가능한 트레이트로
//! 분리합니다. 외부 rate limit에 대한 역압(backpressure) 수단이며
//! 동시성 제어 장치가 아닙니다. 테스트에서는 `NoopPacer`로 실제
//! 시간 지연 없이 검증합니다.

use std::time::Duration;

use async_trait::async_trait;

/// 그룹 간 기본 딜레이 (ms)
const DEFAULT_GROUP_DELAY_MS: u64 = 1000;

/// 페이싱 트레이트
#[async_trait]
pub trait Pacer: Send + Sync {
    /// 다음 그룹 처리 전 대기
    async fn pause(&self);
}

/// tokio sleep 기반 페이서
#[derive(Debug, Clone)]
pub struct DelayPacer {
    delay: Duration,
}

impl DelayPacer {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for DelayPacer {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_GROUP_DELAY_MS))
    }
}

#[async_trait]
impl Pacer for DelayPacer {
    async fn pause(&self) {
        tracing::debug!("Pacing: waiting {:?} before next group", self.delay);
        tokio::time::sleep(self.delay).await;
    }
}

/// 대기하지 않는 페이서 (테스트용)
#[derive(Debug, Clone, Default)]
pub struct NoopPacer;

#[async_trait]
impl Pacer for NoopPacer {
    async fn pause(&self) {}
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_pacer_returns_immediately() {
        let pacer = NoopPacer;
        let start = std::time::Instant::now();
        pacer.pause().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_delay_pacer_waits() {
        let pacer = DelayPacer::new(Duration::from_millis(20));
        let start = std::time::Instant::now();
        pacer.pause().await;
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
