//! 측정 보고
//!
//! - 고정 간격 게이트: 타이머 없이 단조 시계만 비교, 핫 루프를 막지 않음
//! - 리포터: 유한 채널에 `try_send`, 가득 차면 버림

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::Measurement;

/// 주기 측정 게이트
///
/// 경과 시간은 항상 서브테스트 시작 기준 (직전 보고 기준 아님).
#[derive(Debug, Clone)]
pub struct Measurer {
    begin: Instant,
    last: Instant,
    interval: Duration,
}

impl Measurer {
    pub fn new(begin: Instant, interval: Duration) -> Self {
        Self {
            begin,
            last: begin,
            interval,
        }
    }

    /// 간격이 지났으면 시작 기준 경과 시간 반환
    pub fn maybe_measure(&mut self, now: Instant) -> Option<Duration> {
        if now.saturating_duration_since(self.last) < self.interval {
            return None;
        }
        self.last = now;
        Some(now.saturating_duration_since(self.begin))
    }

    /// 시작 기준 경과 시간
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.begin)
    }

    pub fn begin(&self) -> Instant {
        self.begin
    }
}

/// 진행 보고 송신기
///
/// 복제해서 세션마다 나눠 가짐. 수신측은 보통 바이너리의 출력 태스크.
#[derive(Debug, Clone, Default)]
pub struct Reporter {
    tx: Option<mpsc::Sender<Measurement>>,
}

impl Reporter {
    pub fn new(tx: mpsc::Sender<Measurement>) -> Self {
        Self { tx: Some(tx) }
    }

    /// 리포터와 수신 채널 생성
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Measurement>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// 보고를 버리는 리포터
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// 보고 전송 (논블로킹)
    pub fn report(&self, measurement: Measurement) {
        trace!(
            subtest = %measurement.sub_test,
            elapsed = measurement.elapsed_seconds,
            bytes = measurement.num_bytes,
            "measurement"
        );
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(measurement) {
            Ok(()) => {}
            Err(TrySendError::Full(m)) => {
                debug!("보고 큐 가득 참, 버림: {} {:.3}s", m.sub_test, m.elapsed_seconds);
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}
