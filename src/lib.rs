//! # ndt7 측정 서버
//!
//! WebSocket 위에서 동작하는 ndt7 속도 측정 프로토콜 서버
//!
//! ## 핵심 특징
//! - **download**: 서버가 부하 메시지를 보내고 클라이언트 피드백으로 메시지 크기 조정
//! - **upload**: 클라이언트 부하를 받아 버리고 수신 바이트만 집계
//! - **roundtrip**: 100ms 간격 타임스탬프 프로브로 RTT/지터 추정 (RFC 6298)
//! - **백프레셔**: ETA 기반 송신 일시정지로 무한 버퍼링 방지
//! - **세션 격리**: 연결마다 독립된 상태, 예외 없이 연결 종료 보장

pub mod config;
pub mod error;
pub mod measurer;
pub mod message;
pub mod rate;
pub mod receiver;
pub mod roundtrip;
pub mod sender;
pub mod server;
pub mod session;
pub mod stats;

#[cfg(test)]
pub(crate) mod test_util;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use measurer::{Measurer, Reporter};
pub use message::{Measurement, Origin, RoundTripReply, RoundTripRequest, Sample, SubtestKind};
pub use rate::{RateController, Throttle};
pub use server::{router, ServerState};
pub use session::{Session, SubtestSummary};
pub use stats::{Estimator, EstimatorSnapshot};

/// WebSocket 서브프로토콜 이름
pub const WEBSOCKET_PROTOCOL: &str = "net.measurementlab.ndt.v7";

/// download 경로
pub const DOWNLOAD_URL_PATH: &str = "/ndt/v7/download";

/// upload 경로
pub const UPLOAD_URL_PATH: &str = "/ndt/v7/upload";

/// roundtrip 경로
pub const ROUNDTRIP_URL_PATH: &str = "/ndt/v7/roundtrip";

/// 초기 바이너리 메시지 크기 지수 (2^13 = 8KiB)
pub const INITIAL_MESSAGE_SIZE_EXPONENT: u32 = 13;

/// 초기 바이너리 메시지 크기
pub const INITIAL_MESSAGE_SIZE: usize = 1 << INITIAL_MESSAGE_SIZE_EXPONENT;

/// 최대 바이너리 메시지 크기 지수 (2^24 = 16MiB)
pub const MAX_MESSAGE_SIZE_EXPONENT: u32 = 24;

/// 최대 바이너리 메시지 크기
pub const MAX_MESSAGE_SIZE: usize = 1 << MAX_MESSAGE_SIZE_EXPONENT;

/// 최대 텍스트 메시지 크기
pub const MAX_TEXT_MESSAGE_SIZE: usize = 1 << 10;
