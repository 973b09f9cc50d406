//! 수신자 (upload 서브테스트)
//!
//! - 부하 수신 및 바이트 계수 (바이너리만 집계)
//! - 서버측 카운터를 주기적으로 상대에게 텍스트로 되돌려 줌
//! - 상대가 보낸 텍스트 샘플은 client 측정으로 전달
//!
//! 읽기 펌프는 카운터 스냅샷을 `watch` 채널로 발행하고, 피드백 펌프는 최신 값만 복사해 감.

use axum::extract::ws::Message;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::measurer::Measurer;
use crate::message::{self, Origin};
use crate::session::{MessageSink, MessageStream, SubtestContext, SubtestSummary};
use crate::{Error, Measurement, Result, Sample};

/// upload 실행
///
/// 상대가 연결을 닫거나 예산이 끝나면 정상 종료. 최종 누적 바이트를 한 번 더 보고함.
pub async fn run<W, R>(
    ctx: &SubtestContext<'_>,
    writer: &mut W,
    reader: &mut R,
) -> Result<SubtestSummary>
where
    W: MessageSink,
    R: MessageStream,
{
    let (counter, snapshot) = watch::channel(Sample::new(0.0, 0));

    let (received, echoed) = tokio::join!(
        async {
            let res = read_loop(ctx, reader, &counter).await;
            ctx.finish();
            res
        },
        async {
            let res = feedback_loop(ctx, writer, &snapshot).await;
            ctx.finish();
            res
        },
    );
    let total = received?;
    echoed?;

    ctx.report(Origin::Server, ctx.elapsed(), total);
    Ok(ctx.summary(total))
}

async fn read_loop<R: MessageStream>(
    ctx: &SubtestContext<'_>,
    reader: &mut R,
    counter: &watch::Sender<Sample>,
) -> Result<i64> {
    let mut measurer = Measurer::new(ctx.start, ctx.config.measurement_interval);
    let limit = ctx.config.max_message_size;
    let mut total: i64 = 0;

    while let Some(msg) = ctx.read(reader).await? {
        let size = match &msg {
            Message::Binary(data) => data.len(),
            Message::Text(text) => text.as_str().len(),
            _ => continue,
        };
        if size > limit {
            return Err(Error::MessageTooLarge { size, limit });
        }
        match &msg {
            Message::Binary(_) => total += size as i64,
            // 대역외 진단 메시지, 집계하지 않음
            _ => forward_client_sample(ctx, &msg),
        }

        let now = Instant::now();
        counter.send_replace(Sample::new(measurer.elapsed(now).as_secs_f64(), total));
        if let Some(elapsed) = measurer.maybe_measure(now) {
            ctx.report(Origin::Server, elapsed, total);
        }
    }
    Ok(total)
}

/// 클라이언트 측정은 선택 사항, 해석 못 하면 버림
fn forward_client_sample(ctx: &SubtestContext<'_>, msg: &Message) {
    match message::decode::<Sample>(msg, ctx.config.max_text_message_size)
        .and_then(Sample::validate)
    {
        Ok(sample) => ctx
            .reporter
            .report(Measurement::from_client(ctx.subtest, sample)),
        Err(e) => debug!("클라이언트 샘플 무시: {}", e),
    }
}

async fn feedback_loop<W: MessageSink>(
    ctx: &SubtestContext<'_>,
    writer: &mut W,
    snapshot: &watch::Receiver<Sample>,
) -> Result<()> {
    let interval = ctx.config.measurement_interval;
    let mut ticker = tokio::time::interval_at(ctx.start + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }
        if ctx.is_done() {
            return Ok(());
        }

        let sample = *snapshot.borrow();
        if sample.num_bytes <= 0 {
            continue;
        }
        if !ctx.write(writer, message::encode(&sample)?).await? {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::test_util::{scripted, test_config};
    use crate::{Config, Reporter, Session, SubtestKind};

    #[tokio::test(start_paused = true)]
    async fn test_upload_counts_and_echoes() {
        let (sink, stream, mut peer) = scripted(64);
        let (reporter, mut rx) = Reporter::channel(256);
        let session = Session::new(
            Arc::new(test_config()),
            SubtestKind::Upload,
            reporter,
            CancellationToken::new(),
        );
        let handle = tokio::spawn(session.run(sink, stream));

        for _ in 0..10 {
            peer.send(Message::Binary(Bytes::from(vec![0u8; 65536])));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.num_bytes, 10 * 65536);

        let mut events = Vec::new();
        while let Ok(m) = rx.try_recv() {
            events.push(m);
        }
        assert!(events.len() > 1);
        assert!(events
            .iter()
            .all(|m| m.origin == Origin::Server && m.sub_test == SubtestKind::Upload));
        assert!(events
            .windows(2)
            .all(|w| w[0].elapsed_seconds <= w[1].elapsed_seconds));
        assert_eq!(events.last().unwrap().num_bytes, 10 * 65536);

        let mut echoed = Vec::new();
        while let Some(msg) = peer.recv().await {
            echoed.push(message::decode::<Sample>(&msg, 1024).unwrap());
        }
        assert!(!echoed.is_empty());
        assert!(echoed.windows(2).all(|w| w[0].num_bytes <= w[1].num_bytes));
        assert_eq!(peer.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_samples_forwarded() {
        let (sink, stream, peer) = scripted(64);
        let (reporter, mut rx) = Reporter::channel(256);
        let session = Session::new(
            Arc::new(test_config()),
            SubtestKind::Upload,
            reporter,
            CancellationToken::new(),
        );

        peer.send(Message::Binary(Bytes::from(vec![0u8; 4096])));
        peer.send_text(r#"{"ElapsedSeconds":0.5,"NumBytes":4096}"#);
        peer.send_text("{garbage");
        peer.hang_up();

        let summary = session.run(sink, stream).await.unwrap();
        assert_eq!(summary.num_bytes, 4096);

        let mut client = Vec::new();
        while let Ok(m) = rx.try_recv() {
            if m.origin == Origin::Client {
                client.push(m);
            }
        }
        assert_eq!(client.len(), 1);
        assert_eq!(client[0].num_bytes, 4096);
        assert_eq!(client[0].elapsed_seconds, 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_message_rejected() {
        let config = Config {
            initial_message_size: 1024,
            max_message_size: 1024,
            ..test_config()
        };
        let (sink, stream, peer) = scripted(64);
        let session = Session::new(
            Arc::new(config),
            SubtestKind::Upload,
            Reporter::disabled(),
            CancellationToken::new(),
        );

        peer.send(Message::Binary(Bytes::from(vec![0u8; 2048])));
        let err = session.run(sink, stream).await.unwrap_err();
        assert!(matches!(err, Error::MessageTooLarge { size: 2048, limit: 1024 }));
        assert_eq!(peer.close_count(), 1);
    }
}
