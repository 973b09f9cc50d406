//! 부하 메시지 크기 조정 + ETA 백프레셔
//!
//! 호출 위치: download 송신 루프, 피드백 샘플을 비운 직후 매 반복마다

use crate::{Config, Sample};

/// 송신 여부 판단
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Throttle {
    /// 계속 송신
    Send,
    /// 큐가 너무 많이 쌓임, 잠시 쉬고 다음 반복에서 재평가
    Pause {
        /// 큐를 비우는 데 걸릴 예상 시간 (초)
        eta: f64,
    },
}

/// 한 번의 판단 결과
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adjustment {
    /// 메시지 크기가 바뀌었으면 준비된 메시지를 다시 만들어야 함
    pub resized: bool,
    pub throttle: Throttle,
}

impl Adjustment {
    const UNCHANGED: Adjustment = Adjustment {
        resized: false,
        throttle: Throttle::Send,
    };
}

#[derive(Debug, Clone)]
pub struct RateController {
    message_size: usize,
    min_message_size: usize,
    max_message_size: usize,

    // parameters
    desired_window: f64, // seconds
    eta_threshold: f64,  // seconds
}

impl RateController {
    pub fn new(config: &Config) -> Self {
        Self::with_bounds(
            config.initial_message_size,
            config.max_message_size,
            config.desired_receive_window.as_secs_f64(),
            config.eta_threshold.as_secs_f64(),
        )
    }

    pub fn with_bounds(
        min_message_size: usize,
        max_message_size: usize,
        desired_window: f64,
        eta_threshold: f64,
    ) -> Self {
        let max_message_size = max_message_size.max(min_message_size);
        Self {
            message_size: min_message_size,
            min_message_size,
            max_message_size,
            desired_window,
            eta_threshold,
        }
    }

    /// 현재 메시지 크기
    pub fn message_size(&self) -> usize {
        self.message_size
    }

    /// 샘플 하나로 크기와 스로틀 판단
    ///
    /// 샘플이 없거나 무효하면 조정도 스로틀도 하지 않음.
    pub fn on_sample(&mut self, sample: Option<&Sample>, queued_bytes: i64) -> Adjustment {
        let Some(sample) = sample.filter(|s| s.is_valid()) else {
            return Adjustment::UNCHANGED;
        };
        let speed = sample.speed();

        // 크기는 늘리기만 함. 줄이면 OS 송신 버퍼 배수 주기와 같이 진동함
        let desired = self.desired_size(speed);
        let resized = desired > self.message_size;
        if resized {
            self.message_size = desired;
        }

        let throttle = match self.eta(sample, queued_bytes) {
            Some(eta) if eta > self.eta_threshold => Throttle::Pause { eta },
            _ => Throttle::Send,
        };

        Adjustment { resized, throttle }
    }

    /// 처리율 기준 목표 크기: 수신 윈도우만큼의 데이터, 2의 거듭제곱으로 올림
    pub fn desired_size(&self, speed: f64) -> usize {
        let desired = speed * self.desired_window;
        // NaN도 여기서 걸러짐
        if !(desired > self.min_message_size as f64) {
            return self.min_message_size;
        }
        if desired >= self.max_message_size as f64 {
            return self.max_message_size;
        }
        (desired.ceil() as usize)
            .next_power_of_two()
            .clamp(self.min_message_size, self.max_message_size)
    }

    /// 아직 전송되지 않은 큐의 예상 배수 시간 (초)
    pub fn eta(&self, sample: &Sample, queued_bytes: i64) -> Option<f64> {
        let unsent = queued_bytes.saturating_sub(sample.num_bytes);
        if unsent <= 0 || !sample.is_valid() {
            return None;
        }
        Some(unsent as f64 / sample.speed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> RateController {
        RateController::with_bounds(1 << 13, 1 << 24, 0.1, 10.0)
    }

    #[test]
    fn test_throttle_engages_on_large_queue() {
        let mut rc = controller();
        let sample = Sample::new(1.0, 1_000_000);

        let adj = rc.on_sample(Some(&sample), 100_000_000);
        match adj.throttle {
            Throttle::Pause { eta } => assert!((eta - 99.0).abs() < 1e-9),
            Throttle::Send => panic!("throttle should engage"),
        }
    }

    #[test]
    fn test_no_throttle_when_drained() {
        let mut rc = controller();
        let sample = Sample::new(1.0, 1_000_000);
        assert_eq!(rc.on_sample(Some(&sample), 900_000).throttle, Throttle::Send);
        // 9초 분량이면 임계값 이하
        assert_eq!(rc.on_sample(Some(&sample), 10_000_000).throttle, Throttle::Send);
    }

    #[test]
    fn test_scaling_to_power_of_two() {
        let mut rc = controller();
        // 1MB/s * 0.1s = 100000 -> 131072
        let adj = rc.on_sample(Some(&Sample::new(1.0, 1_000_000)), 0);
        assert!(adj.resized);
        assert_eq!(rc.message_size(), 131072);

        // 같은 속도면 변화 없음
        let adj = rc.on_sample(Some(&Sample::new(2.0, 2_000_000)), 0);
        assert!(!adj.resized);
    }

    #[test]
    fn test_never_shrinks() {
        let mut rc = controller();
        rc.on_sample(Some(&Sample::new(1.0, 100_000_000)), 0);
        let grown = rc.message_size();
        assert_eq!(grown, 1 << 24);

        let adj = rc.on_sample(Some(&Sample::new(10.0, 1_000)), 0);
        assert!(!adj.resized);
        assert_eq!(rc.message_size(), grown);
    }

    #[test]
    fn test_missing_or_invalid_sample_is_noop() {
        let mut rc = controller();
        assert_eq!(rc.on_sample(None, i64::MAX), Adjustment::UNCHANGED);
        let invalid = Sample::new(0.0, 1_000_000);
        assert_eq!(rc.on_sample(Some(&invalid), i64::MAX), Adjustment::UNCHANGED);
        assert_eq!(rc.message_size(), 1 << 13);
    }

    #[test]
    fn test_adversarial_speed_clamped() {
        let mut rc = controller();
        rc.on_sample(Some(&Sample::new(f64::MIN_POSITIVE, i64::MAX)), 0);
        assert_eq!(rc.message_size(), 1 << 24);
    }
}
