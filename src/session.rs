//! 연결 세션
//!
//! 업그레이드된 연결 하나에 서브테스트 하나. 시간 예산을 강제하고, 어떤 경로로
//! 끝나든 연결을 정확히 한 번 닫음.
//!
//! 읽기 반쪽과 쓰기 반쪽은 각각 한 펌프만 소유. 펌프들은 같은 태스크 안에서
//! `tokio::join!`으로 돌기 때문에 세션이 반환되면 남는 펌프가 없음.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::message::Origin;
use crate::{receiver, roundtrip, sender};
use crate::{Config, Error, ErrorKind, Measurement, Reporter, Result, SubtestKind};

/// 연결 쓰기 반쪽
pub trait MessageSink: Sink<Message, Error = axum::Error> + Unpin + Send {}

impl<T> MessageSink for T where T: Sink<Message, Error = axum::Error> + Unpin + Send {}

/// 연결 읽기 반쪽
pub trait MessageStream:
    Stream<Item = std::result::Result<Message, axum::Error>> + Unpin + Send
{
}

impl<T> MessageStream for T where
    T: Stream<Item = std::result::Result<Message, axum::Error>> + Unpin + Send
{
}

/// 서브테스트 결과 요약
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubtestSummary {
    pub subtest: SubtestKind,
    pub elapsed: Duration,
    /// download: 송신 바이트, upload: 수신 바이트, roundtrip: 프로브 바이트
    pub num_bytes: i64,
}

/// 서브테스트 실행 컨텍스트
///
/// 모든 await 지점은 `io`/`pause`를 거쳐 데드라인과 취소를 함께 관찰함.
pub struct SubtestContext<'a> {
    pub config: &'a Config,
    pub subtest: SubtestKind,
    pub reporter: &'a Reporter,
    pub start: Instant,
    pub deadline: Instant,
    cancel: CancellationToken,
}

impl<'a> SubtestContext<'a> {
    pub fn new(
        config: &'a Config,
        subtest: SubtestKind,
        reporter: &'a Reporter,
        cancel: CancellationToken,
    ) -> Self {
        let start = Instant::now();
        Self {
            config,
            subtest,
            reporter,
            start,
            deadline: start + config.budget(subtest),
            cancel,
        }
    }

    /// 시작 기준 경과 시간
    pub fn elapsed(&self) -> Duration {
        Instant::now().saturating_duration_since(self.start)
    }

    /// 예산 소진 또는 취소
    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || Instant::now() >= self.deadline
    }

    /// 이 세션의 모든 펌프 중단
    pub fn finish(&self) {
        self.cancel.cancel();
    }

    /// 데드라인/취소/개별 I/O 타임아웃 아래에서 future 실행
    ///
    /// `Ok(None)`: 예산 소진 또는 취소, 정상 종료 신호.
    pub async fn io<F: Future>(&self, fut: F) -> Result<Option<F::Output>> {
        let limit = self
            .deadline
            .min(Instant::now() + self.config.io_timeout);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Ok(None),
            res = tokio::time::timeout_at(limit, fut) => match res {
                Ok(out) => Ok(Some(out)),
                Err(_) if limit < self.deadline => Err(Error::Timeout(self.config.io_timeout)),
                Err(_) => Ok(None),
            },
        }
    }

    /// 메시지 하나 읽기. ping/pong은 건너뜀
    ///
    /// `Ok(None)`: 예산 소진, 취소, 또는 상대가 연결을 닫음.
    pub async fn read<R: MessageStream>(&self, reader: &mut R) -> Result<Option<Message>> {
        loop {
            match self.io(reader.next()).await? {
                None => return Ok(None),
                Some(None) | Some(Some(Ok(Message::Close(_)))) => {
                    debug!("상대가 연결 종료");
                    return Ok(None);
                }
                Some(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
                Some(Some(Ok(message))) => return Ok(Some(message)),
                Some(Some(Err(e))) => return Err(e.into()),
            }
        }
    }

    /// 메시지 하나 쓰기. `Ok(false)`: 예산 소진 또는 취소
    pub async fn write<W: MessageSink>(&self, writer: &mut W, message: Message) -> Result<bool> {
        match self.io(writer.send(message)).await? {
            None => Ok(false),
            Some(res) => {
                res?;
                Ok(true)
            }
        }
    }

    /// 짧은 대기. 대기 후에도 계속할 수 있으면 true
    pub async fn pause(&self, duration: Duration) -> bool {
        let until = (Instant::now() + duration).min(self.deadline);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep_until(until) => Instant::now() < self.deadline,
        }
    }

    /// 취소 대기
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// 진행 보고
    pub fn report(&self, origin: Origin, elapsed: Duration, num_bytes: i64) {
        self.reporter
            .report(Measurement::new(self.subtest, origin, elapsed, num_bytes));
    }

    pub fn summary(&self, num_bytes: i64) -> SubtestSummary {
        SubtestSummary {
            subtest: self.subtest,
            elapsed: self.elapsed(),
            num_bytes,
        }
    }
}

/// 연결 세션
pub struct Session {
    config: Arc<Config>,
    subtest: SubtestKind,
    reporter: Reporter,
    shutdown: CancellationToken,
    peer: Option<SocketAddr>,
}

impl Session {
    /// `shutdown`이 취소되면 세션의 모든 펌프가 멈추고 연결이 닫힘
    pub fn new(
        config: Arc<Config>,
        subtest: SubtestKind,
        reporter: Reporter,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            subtest,
            reporter,
            shutdown,
            peer: None,
        }
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    /// 서브테스트 실행 후 연결 종료
    pub async fn run<W, R>(self, writer: W, reader: R) -> Result<SubtestSummary>
    where
        W: MessageSink,
        R: MessageStream,
    {
        let peer = self
            .peer
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "-".into());
        let span = info_span!("session", subtest = %self.subtest, peer = %peer);
        self.run_inner(writer, reader).instrument(span).await
    }

    async fn run_inner<W, R>(self, mut writer: W, mut reader: R) -> Result<SubtestSummary>
    where
        W: MessageSink,
        R: MessageStream,
    {
        let ctx = SubtestContext::new(
            &self.config,
            self.subtest,
            &self.reporter,
            self.shutdown.child_token(),
        );
        info!("세션 시작: 예산 {:?}", self.config.budget(self.subtest));

        // 루프가 데드라인을 놓쳐도 여기서 끊음
        let hard_limit = ctx.deadline + self.config.io_timeout;
        let result = match tokio::time::timeout_at(
            hard_limit,
            dispatch(&ctx, &mut writer, &mut reader),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(
                self.config.budget(self.subtest) + self.config.io_timeout,
            )),
        };
        // 예산이 끝나기 전에 종료 신호로 멈춘 경우만 취소
        let interrupted = self.shutdown.is_cancelled() && Instant::now() < ctx.deadline;
        ctx.finish();

        let result = match result {
            Ok(_) if interrupted => Err(Error::Cancelled),
            other => other,
        };

        // 정확히 한 번 닫음
        match tokio::time::timeout(self.config.io_timeout, writer.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("연결 종료 에러: {}", e),
            Err(_) => debug!("연결 종료 타임아웃"),
        }
        drop(reader);

        match &result {
            Ok(summary) => info!(
                "세션 완료: {} bytes, {:.2}s",
                summary.num_bytes,
                summary.elapsed.as_secs_f64()
            ),
            Err(e) => match e.kind() {
                ErrorKind::ProtocolViolation => warn!("프로토콜 위반: {}", e),
                ErrorKind::Cancelled => debug!("세션 취소"),
                _ => warn!("세션 실패: {}", e),
            },
        }
        result
    }
}

async fn dispatch<W, R>(
    ctx: &SubtestContext<'_>,
    writer: &mut W,
    reader: &mut R,
) -> Result<SubtestSummary>
where
    W: MessageSink,
    R: MessageStream,
{
    match ctx.subtest {
        SubtestKind::Download => sender::run(ctx, writer, reader).await,
        SubtestKind::Upload => receiver::run(ctx, writer, reader).await,
        SubtestKind::RoundTrip => roundtrip::run(ctx, writer, reader).await,
    }
}
