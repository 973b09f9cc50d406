//! 단위 테스트용 스크립트 상대
//!
//! 실제 소켓 없이 세션을 구동. 서버 출력은 유한 채널(가득 차면 송신측이 양보),
//! 서버 입력은 무한 채널.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::ws::Message;
use futures::channel::mpsc;
use futures::{Sink, StreamExt};

use crate::Config;

/// 서버가 쓰는 쪽
pub(crate) struct ScriptedSink {
    tx: mpsc::Sender<Message>,
    closes: Arc<AtomicUsize>,
}

impl Sink<Message> for ScriptedSink {
    type Error = axum::Error;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.tx.poll_ready(cx).map_err(axum::Error::new)
    }

    fn start_send(mut self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
        self.tx.start_send(item).map_err(axum::Error::new)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.tx.close_channel();
        Poll::Ready(Ok(()))
    }
}

pub(crate) type ScriptedStream = mpsc::UnboundedReceiver<Result<Message, axum::Error>>;

/// 테스트가 조작하는 상대
pub(crate) struct Peer {
    tx: mpsc::UnboundedSender<Result<Message, axum::Error>>,
    rx: mpsc::Receiver<Message>,
    closes: Arc<AtomicUsize>,
}

impl Peer {
    pub(crate) fn send(&self, message: Message) {
        let _ = self.tx.unbounded_send(Ok(message));
    }

    pub(crate) fn send_text(&self, text: impl Into<String>) {
        let text: String = text.into();
        self.send(Message::Text(text.into()));
    }

    /// 읽기 에러 주입
    pub(crate) fn fail(&self, reason: &str) {
        let _ = self
            .tx
            .unbounded_send(Err(axum::Error::new(io::Error::other(reason.to_string()))));
    }

    /// 상대측 종료 (스트림 끝)
    pub(crate) fn hang_up(&self) {
        self.tx.close_channel();
    }

    pub(crate) async fn recv(&mut self) -> Option<Message> {
        self.rx.next().await
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// `capacity`: 서버 출력 버퍼 크기
pub(crate) fn scripted(capacity: usize) -> (ScriptedSink, ScriptedStream, Peer) {
    let (out_tx, out_rx) = mpsc::channel(capacity);
    let (in_tx, in_rx) = mpsc::unbounded();
    let closes = Arc::new(AtomicUsize::new(0));
    let sink = ScriptedSink {
        tx: out_tx,
        closes: closes.clone(),
    };
    let peer = Peer {
        tx: in_tx,
        rx: out_rx,
        closes,
    };
    (sink, in_rx, peer)
}

/// 짧은 예산의 테스트 설정
pub(crate) fn test_config() -> Config {
    Config {
        download_timeout: Duration::from_secs(2),
        upload_timeout: Duration::from_secs(2),
        roundtrip_timeout: Duration::from_secs(1),
        ..Config::default()
    }
}
