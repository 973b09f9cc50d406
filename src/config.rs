//! 서버 설정

use std::time::Duration;

use crate::{
    Error, Result, SubtestKind, INITIAL_MESSAGE_SIZE, MAX_MESSAGE_SIZE, MAX_TEXT_MESSAGE_SIZE,
};

/// ndt7 서버 설정
///
/// 서버당 하나, 모든 세션이 참조로 읽기만 함. 메시지 크기처럼 세션 중에
/// 바뀌는 값은 각 세션이 자기 복사본을 가짐.
#[derive(Debug, Clone)]
pub struct Config {
    /// 초기 부하 메시지 크기 (바이트)
    pub initial_message_size: usize,

    /// 최대 부하 메시지 크기 (바이트)
    /// upload에서는 수신 허용 최대 크기로도 사용
    pub max_message_size: usize,

    /// 최대 텍스트 메시지 크기 (바이트)
    pub max_text_message_size: usize,

    /// 측정 보고 주기
    pub measurement_interval: Duration,

    /// download 시간 예산
    pub download_timeout: Duration,

    /// upload 시간 예산
    pub upload_timeout: Duration,

    /// roundtrip 시간 예산
    pub roundtrip_timeout: Duration,

    /// roundtrip 프로브 간격
    pub roundtrip_interval: Duration,

    /// 개별 읽기/쓰기 타임아웃
    pub io_timeout: Duration,

    /// 메시지 하나에 담을 목표 데이터량 (초 단위 수신 윈도우)
    pub desired_receive_window: Duration,

    /// 큐 배수 예상 시간이 이 값을 넘으면 송신 일시정지
    pub eta_threshold: Duration,

    /// 송신 일시정지 시간
    pub throttle_pause: Duration,

    /// download 피드백 채널 용량
    pub feedback_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            initial_message_size: INITIAL_MESSAGE_SIZE,  // 8KiB
            max_message_size: MAX_MESSAGE_SIZE,          // 16MiB
            max_text_message_size: MAX_TEXT_MESSAGE_SIZE, // 1KiB
            measurement_interval: Duration::from_millis(250),
            download_timeout: Duration::from_secs(10),
            upload_timeout: Duration::from_secs(10),
            roundtrip_timeout: Duration::from_secs(3),
            roundtrip_interval: Duration::from_millis(100),
            io_timeout: Duration::from_secs(7),
            desired_receive_window: Duration::from_millis(100),
            eta_threshold: Duration::from_secs(10),
            throttle_pause: Duration::from_millis(250),
            feedback_queue_capacity: 40,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 설정값 검증
    pub fn validate(&self) -> Result<()> {
        if self.initial_message_size == 0 {
            return Err(Error::InvalidConfig("initial_message_size는 0보다 커야 함".into()));
        }
        if self.initial_message_size > self.max_message_size {
            return Err(Error::InvalidConfig(format!(
                "initial_message_size({}) > max_message_size({})",
                self.initial_message_size, self.max_message_size
            )));
        }
        if self.max_message_size > MAX_MESSAGE_SIZE {
            return Err(Error::InvalidConfig(format!(
                "max_message_size({}) > {}",
                self.max_message_size, MAX_MESSAGE_SIZE
            )));
        }
        if self.max_text_message_size == 0 {
            return Err(Error::InvalidConfig("max_text_message_size는 0보다 커야 함".into()));
        }
        if self.measurement_interval.is_zero() || self.roundtrip_interval.is_zero() {
            return Err(Error::InvalidConfig("측정/프로브 간격은 0보다 커야 함".into()));
        }
        if self.desired_receive_window.is_zero() {
            return Err(Error::InvalidConfig("desired_receive_window는 0보다 커야 함".into()));
        }
        // 일시정지가 길면 취소 반응이 늦어짐
        if self.throttle_pause > Duration::from_secs(1) {
            return Err(Error::InvalidConfig(format!(
                "throttle_pause({:?})가 너무 김",
                self.throttle_pause
            )));
        }
        if self.feedback_queue_capacity == 0 {
            return Err(Error::InvalidConfig("feedback_queue_capacity는 0보다 커야 함".into()));
        }
        Ok(())
    }

    /// 서브테스트별 시간 예산
    pub fn budget(&self, subtest: SubtestKind) -> Duration {
        match subtest {
            SubtestKind::Download => self.download_timeout,
            SubtestKind::Upload => self.upload_timeout,
            SubtestKind::RoundTrip => self.roundtrip_timeout,
        }
    }

    /// 서브테스트별 수신 메시지 최대 크기
    ///
    /// upload만 바이너리 부하를 받고, 나머지는 텍스트 피드백만 받음.
    pub fn read_limit(&self, subtest: SubtestKind) -> usize {
        match subtest {
            SubtestKind::Upload => self.max_message_size,
            _ => self.max_text_message_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.initial_message_size, 8192);
        assert_eq!(config.max_message_size, 1 << 24);
    }

    #[test]
    fn test_invalid_sizes() {
        let config = Config {
            initial_message_size: 1 << 25,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = Config {
            initial_message_size: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            max_message_size: usize::MAX,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_budget_and_read_limit() {
        let config = Config::default();
        assert_eq!(config.budget(SubtestKind::RoundTrip), Duration::from_secs(3));
        assert_eq!(config.read_limit(SubtestKind::Upload), 1 << 24);
        assert_eq!(config.read_limit(SubtestKind::Download), 1 << 10);
    }
}
