//! roundtrip 서브테스트
//!
//! 고정 간격으로 타임스탬프 프로브를 보내고 응답 하나를 기다림. 응답이 아무리
//! 빨라도 다음 틱까지 대기하므로 RTT가 낮은 상대를 프로브로 덮지 않음.
//!
//! 응답의 STE가 실제로 보낸 ST와 같은지는 확인하지 않음.

use std::time::Duration;

use axum::extract::ws::Message;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::message::{self, Origin, RoundTripInfo};
use crate::session::{MessageSink, MessageStream, SubtestContext, SubtestSummary};
use crate::{Error, Estimator, Measurement, Result, RoundTripReply, RoundTripRequest};

/// 송신 지연, 수신 지연, RTT 추정기 묶음 (µs 단위)
#[derive(Debug, Clone, Default)]
pub struct DelayEstimators {
    pub rtt: Estimator,
    pub send_delay: Estimator,
    pub receive_delay: Estimator,
}

impl DelayEstimators {
    pub fn new() -> Self {
        Self::default()
    }

    /// 요청에 실을 현재 추정값
    pub fn request(&self, sender_timestamp: i64) -> RoundTripRequest {
        RoundTripRequest {
            smoothed_rtt: self.rtt.smoothed(),
            rtt_var: self.rtt.variance(),
            sender_timestamp,
        }
    }

    /// 응답 하나 반영. `now`: 응답 수신 시각 (µs)
    ///
    /// 음수 표본은 시계가 어긋난 것이므로 해당 추정기만 건너뜀.
    pub fn update(&mut self, reply: &RoundTripReply, now: i64) {
        let samples = [
            (&mut self.send_delay, reply.sender_time_delta),
            (&mut self.receive_delay, now.saturating_sub(reply.receiver_timestamp)),
            (&mut self.rtt, now.saturating_sub(reply.sender_timestamp_echo)),
        ];
        for (estimator, sample) in samples {
            if sample >= 0 {
                estimator.update(sample as f64);
            }
        }
    }

    pub fn info(&self) -> RoundTripInfo {
        RoundTripInfo {
            smoothed_rtt: self.rtt.smoothed(),
            rtt_var: self.rtt.variance(),
            send_delay: self.send_delay.smoothed(),
            receive_delay: self.receive_delay.smoothed(),
        }
    }
}

fn micros(d: Duration) -> i64 {
    i64::try_from(d.as_micros()).unwrap_or(i64::MAX)
}

fn text_len(message: &Message) -> i64 {
    match message {
        Message::Text(text) => text.as_str().len() as i64,
        _ => 0,
    }
}

/// roundtrip 실행
pub async fn run<W, R>(
    ctx: &SubtestContext<'_>,
    writer: &mut W,
    reader: &mut R,
) -> Result<SubtestSummary>
where
    W: MessageSink,
    R: MessageStream,
{
    let mut estimators = DelayEstimators::new();
    let mut ticker = tokio::time::interval(ctx.config.roundtrip_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut total: i64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => break,
            _ = tokio::time::sleep_until(ctx.deadline) => break,
            _ = ticker.tick() => {}
        }

        let request = message::encode(&estimators.request(micros(ctx.elapsed())))?;
        total += text_len(&request);
        if !ctx.write(writer, request).await? {
            break;
        }

        let Some(reply) = ctx.read(reader).await? else {
            if ctx.is_done() {
                break;
            }
            // 프로브 응답 전에 상대가 끊음
            return Err(Error::ConnectionClosed);
        };
        let decoded: RoundTripReply = message::decode(&reply, ctx.config.max_text_message_size)?;
        total += text_len(&reply);

        let elapsed = ctx.elapsed();
        estimators.update(&decoded, micros(elapsed));
        debug!(
            "RTT {:.0}µs (var {:.0}µs)",
            estimators.rtt.smoothed(),
            estimators.rtt.variance()
        );
        ctx.reporter.report(
            Measurement::new(ctx.subtest, Origin::Server, elapsed, total)
                .with_round_trip(estimators.info()),
        );
    }

    ctx.reporter.report(
        Measurement::new(ctx.subtest, Origin::Server, ctx.elapsed(), total)
            .with_round_trip(estimators.info()),
    );
    Ok(ctx.summary(total))
}
