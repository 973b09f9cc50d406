//! ndt7 서버
//!
//! WebSocket 기반 download/upload/roundtrip 측정 서버
//! - 진행 보고는 stdout에 JSON 한 줄씩
//! - 로그는 stderr (`RUST_LOG`, 기본 info)
//!
//! 사용법:
//!   cargo run --release --bin ndt7-server -- [OPTIONS]
//!
//! 예시:
//!   # 기본 설정
//!   cargo run --release --bin ndt7-server -- --endpoint 0.0.0.0:8080
//!
//!   # 짧은 테스트 + 정적 클라이언트 파일 제공
//!   cargo run --release --bin ndt7-server -- --download-seconds 5 --static-dir ./html

use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ndt7::{router, Config, Measurement, Reporter, ServerState};

/// 보고 채널 용량
const REPORT_QUEUE_CAPACITY: usize = 1024;

#[derive(Parser, Debug)]
#[command(name = "ndt7-server", about = "ndt7 네트워크 성능 측정 서버")]
struct Args {
    /// 바인드 주소
    #[arg(long, default_value = "127.0.0.1:8080")]
    endpoint: SocketAddr,

    /// 초기 부하 메시지 크기 (바이트)
    #[arg(long, default_value_t = ndt7::INITIAL_MESSAGE_SIZE)]
    bulk_message_size: usize,

    /// 최대 부하 메시지 크기 (바이트)
    #[arg(long, default_value_t = ndt7::MAX_MESSAGE_SIZE)]
    max_message_size: usize,

    /// download 시간 예산 (초)
    #[arg(long, default_value_t = 10)]
    download_seconds: u64,

    /// upload 시간 예산 (초)
    #[arg(long, default_value_t = 10)]
    upload_seconds: u64,

    /// roundtrip 시간 예산 (초)
    #[arg(long, default_value_t = 3)]
    roundtrip_seconds: u64,

    /// 측정 보고 주기 (밀리초)
    #[arg(long, default_value_t = 250)]
    measurement_interval_ms: u64,

    /// 정적 파일 디렉토리 (브라우저 클라이언트용)
    #[arg(long)]
    static_dir: Option<PathBuf>,
}

impl Args {
    fn config(&self) -> Config {
        Config {
            initial_message_size: self.bulk_message_size,
            max_message_size: self.max_message_size,
            download_timeout: Duration::from_secs(self.download_seconds),
            upload_timeout: Duration::from_secs(self.upload_seconds),
            roundtrip_timeout: Duration::from_secs(self.roundtrip_seconds),
            measurement_interval: Duration::from_millis(self.measurement_interval_ms),
            ..Config::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = args.config();
    config.validate().context("잘못된 설정")?;

    info!("=== ndt7 서버 ===");
    info!("주소: {}", args.endpoint);
    info!(
        "메시지 크기: {} ~ {} bytes",
        config.initial_message_size, config.max_message_size
    );
    info!(
        "예산: download {:?}, upload {:?}, roundtrip {:?}",
        config.download_timeout, config.upload_timeout, config.roundtrip_timeout
    );

    let (reporter, reports) = Reporter::channel(REPORT_QUEUE_CAPACITY);
    let printer = tokio::spawn(print_reports(reports));

    let shutdown = CancellationToken::new();
    let state = ServerState::new(config, reporter, shutdown.clone());

    let mut app = router(state);
    if let Some(dir) = &args.static_dir {
        info!("정적 파일: {}", dir.display());
        app = app.fallback_service(ServeDir::new(dir));
    }
    let app = app.layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(args.endpoint)
        .await
        .with_context(|| format!("{} 바인드 실패", args.endpoint))?;
    info!("대기 중: {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown))
    .await?;

    // 모든 세션이 끝나면 리포터 송신측이 모두 drop되고 출력 태스크도 끝남
    printer.await?;
    info!("서버 종료");
    Ok(())
}

/// Ctrl-C 대기 후 모든 세션 취소
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("시그널 핸들러 설치 실패: {}", e);
        std::future::pending::<()>().await;
    }
    info!("종료 신호 수신");
    shutdown.cancel();
}

/// 진행 보고를 JSON 한 줄씩 stdout으로
async fn print_reports(mut reports: mpsc::Receiver<Measurement>) {
    let stdout = std::io::stdout();
    while let Some(measurement) = reports.recv().await {
        let line = match serde_json::to_string(&measurement) {
            Ok(line) => line,
            Err(e) => {
                warn!("보고 직렬화 실패: {}", e);
                continue;
            }
        };
        let mut out = stdout.lock();
        if writeln!(out, "{}", line).and_then(|_| out.flush()).is_err() {
            break;
        }
    }
}
