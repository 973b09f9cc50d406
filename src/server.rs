//! HTTP/WebSocket 진입점
//!
//! 서브테스트 경로 3개. `Sec-WebSocket-Protocol`에 ndt7 토큰이 없으면 업그레이드
//! 전에 400으로 거부.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{header, Extensions, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    Config, Reporter, Session, SubtestKind, DOWNLOAD_URL_PATH, ROUNDTRIP_URL_PATH,
    UPLOAD_URL_PATH, WEBSOCKET_PROTOCOL,
};

/// 핸들러 공유 상태
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<Config>,
    pub reporter: Reporter,
    /// 루트 종료 토큰, 세션마다 자식 토큰을 만듦
    pub shutdown: CancellationToken,
}

impl ServerState {
    pub fn new(config: Config, reporter: Reporter, shutdown: CancellationToken) -> Self {
        Self {
            config: Arc::new(config),
            reporter,
            shutdown,
        }
    }
}

/// ndt7 라우터
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route(DOWNLOAD_URL_PATH, get(download))
        .route(UPLOAD_URL_PATH, get(upload))
        .route(ROUNDTRIP_URL_PATH, get(roundtrip))
        .with_state(state)
}

type Upgrade = Result<WebSocketUpgrade, WebSocketUpgradeRejection>;

async fn download(
    State(state): State<ServerState>,
    headers: HeaderMap,
    extensions: Extensions,
    ws: Upgrade,
) -> Response {
    upgrade(state, SubtestKind::Download, &headers, &extensions, ws)
}

async fn upload(
    State(state): State<ServerState>,
    headers: HeaderMap,
    extensions: Extensions,
    ws: Upgrade,
) -> Response {
    upgrade(state, SubtestKind::Upload, &headers, &extensions, ws)
}

async fn roundtrip(
    State(state): State<ServerState>,
    headers: HeaderMap,
    extensions: Extensions,
    ws: Upgrade,
) -> Response {
    upgrade(state, SubtestKind::RoundTrip, &headers, &extensions, ws)
}

/// 요청이 ndt7 서브프로토콜을 제시했는지 (쉼표 구분 목록 허용)
pub fn offers_protocol(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|token| token.trim() == WEBSOCKET_PROTOCOL)
}

fn upgrade(
    state: ServerState,
    subtest: SubtestKind,
    headers: &HeaderMap,
    extensions: &Extensions,
    ws: Upgrade,
) -> Response {
    if !offers_protocol(headers) {
        debug!(%subtest, "서브프로토콜 없음, 업그레이드 거부");
        return (
            StatusCode::BAD_REQUEST,
            format!("missing {} subprotocol", WEBSOCKET_PROTOCOL),
        )
            .into_response();
    }
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let peer = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let read_limit = state.config.read_limit(subtest);

    ws.protocols([WEBSOCKET_PROTOCOL])
        .max_message_size(read_limit)
        .on_upgrade(move |socket| serve(state, subtest, peer, socket))
        .into_response()
}

async fn serve(state: ServerState, subtest: SubtestKind, peer: Option<SocketAddr>, socket: WebSocket) {
    let (writer, reader) = socket.split();
    let mut session = Session::new(state.config, subtest, state.reporter, state.shutdown);
    if let Some(peer) = peer {
        session = session.with_peer(peer);
    }
    // 결과는 세션이 직접 로그로 남김
    let _ = session.run(writer, reader).await;
}
