//! 프로토콜 메시지 정의
//!
//! 텍스트 메시지 하나에 JSON 객체 하나. 바이너리 메시지는 부하용으로 길이만 의미 있음.

use std::fmt;
use std::time::Duration;

use axum::extract::ws::Message;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{Error, Result, DOWNLOAD_URL_PATH, ROUNDTRIP_URL_PATH, UPLOAD_URL_PATH};

/// 서브테스트 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubtestKind {
    #[serde(rename = "download")]
    Download,
    #[serde(rename = "upload")]
    Upload,
    #[serde(rename = "roundtrip")]
    RoundTrip,
}

impl SubtestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubtestKind::Download => "download",
            SubtestKind::Upload => "upload",
            SubtestKind::RoundTrip => "roundtrip",
        }
    }

    /// 서브테스트 URL 경로
    pub fn url_path(&self) -> &'static str {
        match self {
            SubtestKind::Download => DOWNLOAD_URL_PATH,
            SubtestKind::Upload => UPLOAD_URL_PATH,
            SubtestKind::RoundTrip => ROUNDTRIP_URL_PATH,
        }
    }
}

impl fmt::Display for SubtestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 측정 주체
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Server,
    Client,
}

/// 측정 샘플 (수신측 → 송신측 피드백)
///
/// `{"ElapsedSeconds": <float>, "NumBytes": <int>}`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Sample {
    /// 서브테스트 시작 후 경과 시간 (초)
    pub elapsed_seconds: f64,

    /// 누적 수신 바이트
    pub num_bytes: i64,
}

impl Sample {
    pub fn new(elapsed_seconds: f64, num_bytes: i64) -> Self {
        Self {
            elapsed_seconds,
            num_bytes,
        }
    }

    /// 0으로 나눌 수 있는 샘플은 무효
    pub fn is_valid(&self) -> bool {
        self.elapsed_seconds.is_finite() && self.elapsed_seconds > 0.0 && self.num_bytes > 0
    }

    /// 범위 검증
    pub fn validate(self) -> Result<Self> {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(Error::InvalidSample {
                elapsed_seconds: self.elapsed_seconds,
                num_bytes: self.num_bytes,
            })
        }
    }

    /// 처리율 (bytes/sec). 유효한 샘플에서만 호출
    pub fn speed(&self) -> f64 {
        self.num_bytes as f64 / self.elapsed_seconds
    }
}

/// roundtrip 요청 (서버 → 클라이언트)
///
/// `{"SRTT": <float>, "RTTVar": <float>, "ST": <int, µs>}`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoundTripRequest {
    /// 현재 smoothed RTT (µs)
    #[serde(rename = "SRTT")]
    pub smoothed_rtt: f64,

    /// 현재 RTT 분산 (µs)
    #[serde(rename = "RTTVar")]
    pub rtt_var: f64,

    /// 송신 시각, 서브테스트 시작 기준 (µs)
    #[serde(rename = "ST")]
    pub sender_timestamp: i64,
}

/// roundtrip 응답 (클라이언트 → 서버)
///
/// `{"STE": <int, µs>, "STD": <int, µs>, "RT": <int, µs>}`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoundTripReply {
    /// 요청의 ST 그대로
    #[serde(rename = "STE")]
    pub sender_timestamp_echo: i64,

    /// 클라이언트 수신 시각 - ST
    #[serde(rename = "STD")]
    pub sender_time_delta: i64,

    /// 클라이언트 응답 시각 (µs)
    #[serde(rename = "RT")]
    pub receiver_timestamp: i64,
}

/// roundtrip 추정값
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RoundTripInfo {
    #[serde(rename = "SRTT")]
    pub smoothed_rtt: f64,

    #[serde(rename = "RTTVar")]
    pub rtt_var: f64,

    /// smoothed 송신 지연 (µs)
    pub send_delay: f64,

    /// smoothed 수신 지연 (µs)
    pub receive_delay: f64,
}

/// 진행 보고 이벤트 (리포터로만 나감, 수신하지 않음)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Measurement {
    pub elapsed_seconds: f64,
    pub origin: Origin,
    pub sub_test: SubtestKind,
    pub num_bytes: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_trip: Option<RoundTripInfo>,
}

impl Measurement {
    pub fn new(sub_test: SubtestKind, origin: Origin, elapsed: Duration, num_bytes: i64) -> Self {
        Self {
            elapsed_seconds: elapsed.as_secs_f64(),
            origin,
            sub_test,
            num_bytes,
            round_trip: None,
        }
    }

    /// 클라이언트가 보낸 샘플을 보고 이벤트로 변환
    pub fn from_client(sub_test: SubtestKind, sample: Sample) -> Self {
        Self {
            elapsed_seconds: sample.elapsed_seconds,
            origin: Origin::Client,
            sub_test,
            num_bytes: sample.num_bytes,
            round_trip: None,
        }
    }

    pub fn with_round_trip(mut self, info: RoundTripInfo) -> Self {
        self.round_trip = Some(info);
        self
    }
}

/// JSON 텍스트 메시지로 직렬화
pub fn encode<T: Serialize>(value: &T) -> Result<Message> {
    let text = serde_json::to_string(value)?;
    Ok(Message::Text(text.into()))
}

/// 텍스트 메시지를 JSON으로 역직렬화
///
/// 텍스트가 아니거나 `limit`보다 크면 프로토콜 위반.
pub fn decode<T: DeserializeOwned>(message: &Message, limit: usize) -> Result<T> {
    match message {
        Message::Text(text) => {
            let size = text.as_str().len();
            if size > limit {
                return Err(Error::MessageTooLarge { size, limit });
            }
            Ok(serde_json::from_str(text.as_str())?)
        }
        other => Err(Error::MessageTypeMismatch {
            expected: "text".into(),
            got: message_type(other).into(),
        }),
    }
}

/// 메시지 타입 이름 (로그/에러용)
pub fn message_type(message: &Message) -> &'static str {
    match message {
        Message::Text(_) => "text",
        Message::Binary(_) => "binary",
        Message::Ping(_) => "ping",
        Message::Pong(_) => "pong",
        Message::Close(_) => "close",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_sample_validation() {
        assert!(Sample::new(1.0, 1000).validate().is_ok());
        assert!(Sample::new(0.0, 1000).validate().is_err());
        assert!(Sample::new(1.0, 0).validate().is_err());
        assert!(Sample::new(-1.0, 10).validate().is_err());
        assert!(Sample::new(f64::NAN, 10).validate().is_err());
        assert!(Sample::new(f64::INFINITY, 10).validate().is_err());
    }

    #[test]
    fn test_sample_wire_format() {
        let msg = Message::Text(r#"{"ElapsedSeconds":0.5,"NumBytes":4096}"#.into());
        let sample: Sample = decode(&msg, 1024).unwrap();
        assert_eq!(sample, Sample::new(0.5, 4096));
        assert_eq!(sample.speed(), 8192.0);
    }

    #[test]
    fn test_roundtrip_field_names() {
        let request = RoundTripRequest {
            smoothed_rtt: 1000.0,
            rtt_var: 500.0,
            sender_timestamp: 42,
        };
        let value = serde_json::to_value(request).unwrap();
        assert_eq!(value["SRTT"], 1000.0);
        assert_eq!(value["RTTVar"], 500.0);
        assert_eq!(value["ST"], 42);

        let msg = Message::Text(r#"{"STE":42,"STD":10,"RT":1042}"#.into());
        let reply: RoundTripReply = decode(&msg, 1024).unwrap();
        assert_eq!(reply.sender_timestamp_echo, 42);
        assert_eq!(reply.sender_time_delta, 10);
        assert_eq!(reply.receiver_timestamp, 1042);
    }

    #[test]
    fn test_measurement_field_names() {
        let m = Measurement::new(
            SubtestKind::Download,
            Origin::Server,
            Duration::from_millis(250),
            12345,
        );
        let value = serde_json::to_value(&m).unwrap();
        assert_eq!(value["ElapsedSeconds"], 0.25);
        assert_eq!(value["SubTest"], "download");
        assert_eq!(value["Origin"], "server");
        assert_eq!(value["NumBytes"], 12345);
        assert!(value.get("RoundTrip").is_none());
    }

    #[test]
    fn test_decode_rejects_binary() {
        let msg = Message::Binary(Bytes::from_static(b"{}"));
        let err = decode::<Sample>(&msg, 1024).unwrap_err();
        assert!(matches!(err, Error::MessageTypeMismatch { .. }));
    }

    #[test]
    fn test_decode_rejects_oversized_and_malformed() {
        let msg = Message::Text(r#"{"ElapsedSeconds":1.0,"NumBytes":1}"#.into());
        assert!(matches!(
            decode::<Sample>(&msg, 8),
            Err(Error::MessageTooLarge { .. })
        ));

        let msg = Message::Text("{not json".into());
        assert!(decode::<Sample>(&msg, 1024).unwrap_err().is_protocol_violation());
    }
}
