//! 송신자 (download 서브테스트)
//!
//! - 공격적 부하 전송, 메시지 크기는 피드백 처리율 기준으로만 증가
//! - ETA 기반 일시정지로 송신 큐 무한 증가 방지
//! - 피드백 리스너는 유한 채널로 최신 샘플만 전달

use axum::extract::ws::Message;
use bytes::Bytes;
use rand::RngCore;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::Instant;
use tracing::debug;

use crate::measurer::Measurer;
use crate::message::{self, Origin};
use crate::rate::{RateController, Throttle};
use crate::session::{MessageSink, MessageStream, SubtestContext, SubtestSummary};
use crate::{Error, Measurement, Result, Sample};

/// download 실행
///
/// 리스너 에러가 송신측 결과보다 우선함.
pub async fn run<W, R>(
    ctx: &SubtestContext<'_>,
    writer: &mut W,
    reader: &mut R,
) -> Result<SubtestSummary>
where
    W: MessageSink,
    R: MessageStream,
{
    let (tx, rx) = mpsc::channel(ctx.config.feedback_queue_capacity.max(1));

    let (listened, sent) = tokio::join!(
        async {
            let res = listen(ctx, reader, tx).await;
            ctx.finish();
            res
        },
        async {
            let res = send_loop(ctx, writer, rx).await;
            ctx.finish();
            res
        },
    );
    listened?;
    let total = sent?;

    ctx.report(Origin::Server, ctx.elapsed(), total);
    Ok(ctx.summary(total))
}

/// 피드백 리스너
///
/// 텍스트 샘플 외의 메시지나 무효한 샘플은 프로토콜 위반.
/// 상대가 연결을 닫으면 송신 루프도 끝남.
async fn listen<R: MessageStream>(
    ctx: &SubtestContext<'_>,
    reader: &mut R,
    tx: mpsc::Sender<Sample>,
) -> Result<()> {
    while let Some(msg) = ctx.read(reader).await? {
        let sample = message::decode::<Sample>(&msg, ctx.config.max_text_message_size)?.validate()?;
        ctx.reporter
            .report(Measurement::from_client(ctx.subtest, sample));

        match ctx.io(tx.send(sample)).await? {
            Some(Ok(())) => {}
            // 송신 루프 종료
            Some(Err(_)) | None => return Ok(()),
        }
    }
    Ok(())
}

async fn send_loop<W: MessageSink>(
    ctx: &SubtestContext<'_>,
    writer: &mut W,
    mut feedback: mpsc::Receiver<Sample>,
) -> Result<i64> {
    let mut controller = RateController::new(ctx.config);
    let mut measurer = Measurer::new(ctx.start, ctx.config.measurement_interval);
    let mut payload = prepare_message(controller.message_size())?;
    let mut queued: i64 = 0;

    while !ctx.is_done() {
        // 일시정지 중에도 주기 보고는 계속
        if let Some(elapsed) = measurer.maybe_measure(Instant::now()) {
            ctx.report(Origin::Server, elapsed, queued);
        }

        let mut latest = None;
        loop {
            match feedback.try_recv() {
                Ok(sample) => latest = Some(sample),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("피드백 채널 닫힘, 송신 종료");
                    return Ok(queued);
                }
            }
        }

        let adjustment = controller.on_sample(latest.as_ref(), queued);
        if adjustment.resized {
            debug!("메시지 크기 조정: {} bytes", controller.message_size());
            payload = prepare_message(controller.message_size())?;
        }
        if let Throttle::Pause { eta } = adjustment.throttle {
            debug!("송신 일시정지: ETA {:.1}s", eta);
            if !ctx.pause(ctx.config.throttle_pause).await {
                break;
            }
            continue;
        }

        if !ctx.write(writer, Message::Binary(payload.clone())).await? {
            break;
        }
        queued += payload.len() as i64;
    }
    Ok(queued)
}

/// 난수로 채운 부하 메시지
///
/// 링크 압축으로 측정이 부풀려지지 않도록 난수 사용.
fn prepare_message(size: usize) -> Result<Bytes> {
    let mut data = Vec::new();
    data.try_reserve_exact(size)
        .map_err(|_| Error::PrepareMessage { size })?;
    data.resize(size, 0);
    rand::thread_rng().fill_bytes(&mut data);
    Ok(Bytes::from(data))
}
