//! 에러 타입 정의

use std::time::Duration;

use thiserror::Error;

/// ndt7 서버 에러 타입
///
/// 모든 에러는 한 세션 안에서만 의미가 있음. 세션은 종료되고 연결은 닫히며
/// 리스너나 다른 세션으로 전파되지 않음.
#[derive(Error, Debug)]
pub enum Error {
    #[error("직렬화 에러: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("WebSocket 에러: {0}")]
    WebSocket(#[from] axum::Error),

    #[error("메시지 타입 불일치: expected {expected}, got {got}")]
    MessageTypeMismatch { expected: String, got: String },

    #[error("메시지 크기 초과: {size} bytes (최대 {limit})")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("유효하지 않은 측정값: elapsed={elapsed_seconds}, bytes={num_bytes}")]
    InvalidSample { elapsed_seconds: f64, num_bytes: i64 },

    #[error("I/O 타임아웃: {0:?} 동안 진행 없음")]
    Timeout(Duration),

    #[error("메시지 준비 실패: {size} bytes")]
    PrepareMessage { size: usize },

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),

    #[error("연결 종료")]
    ConnectionClosed,

    #[error("취소됨")]
    Cancelled,
}

/// 에러 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 잘못된 메시지 타입, 깨진 JSON, 범위 밖 값
    ProtocolViolation,
    /// 읽기/쓰기 실패, 타임아웃
    Transport,
    /// 부하 메시지 준비 실패
    Resource,
    /// 외부 취소 (서버 종료 등)
    Cancelled,
    /// 설정 오류
    Config,
}

impl Error {
    /// 에러 분류 반환
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Serialization(_)
            | Error::MessageTypeMismatch { .. }
            | Error::MessageTooLarge { .. }
            | Error::InvalidSample { .. } => ErrorKind::ProtocolViolation,
            Error::WebSocket(_) | Error::Timeout(_) | Error::ConnectionClosed => {
                ErrorKind::Transport
            }
            Error::PrepareMessage { .. } => ErrorKind::Resource,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::InvalidConfig(_) => ErrorKind::Config,
        }
    }

    /// 프로토콜 위반 여부
    pub fn is_protocol_violation(&self) -> bool {
        self.kind() == ErrorKind::ProtocolViolation
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind() {
        let err = Error::InvalidSample {
            elapsed_seconds: 0.0,
            num_bytes: 10,
        };
        assert!(err.is_protocol_violation());

        let err = Error::Timeout(Duration::from_secs(7));
        assert_eq!(err.kind(), ErrorKind::Transport);

        let err = Error::PrepareMessage { size: 1 << 24 };
        assert_eq!(err.kind(), ErrorKind::Resource);
    }

    #[test]
    fn test_json_error_is_protocol_violation() {
        let err: Error = serde_json::from_str::<u64>("not json").unwrap_err().into();
        assert!(err.is_protocol_violation());
    }
}
