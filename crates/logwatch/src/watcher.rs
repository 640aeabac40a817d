//! 연결별 수집 루프 — 라인 채널에서 이벤트 발행까지
//!
//! 연결마다 하나의 워처 태스크가 이 루프를 실행합니다. 라인 채널이
//! 닫히면 전송 상실로 보고 레코드를 끊김 상태로 전환한 뒤 종료하며,
//! 재시도는 매니저(또는 외부 호출자)의 `connect`가 주도합니다.
//!
//! 라인 처리 순서는 소스 방출 순서와 같고, 한 서버의 이벤트는 버스에
//! 전순서로 발행됩니다. 레코드 락은 버스 발행을 가로질러 잡지
//! 않습니다.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use garrison_core::event::EventBus;
use garrison_core::metrics::{
    LOGWATCH_EVENTS_DEDUPLICATED_TOTAL, LOGWATCH_EVENTS_PUBLISHED_TOTAL, LOGWATCH_LINES_TOTAL,
    LOGWATCH_MATCHED_LINES_TOTAL, LOGWATCH_MATCH_DURATION_SECONDS,
};
use garrison_core::tracker::TrackerRegistry;
use garrison_core::types::{LogLine, ServerId};

use crate::manager::ServerConnection;
use crate::metrics::ConnectionMetrics;
use crate::parser::ParserRegistry;
use crate::store::EventStore;

/// 워처 태스크 하나가 소유하는 컨텍스트
pub(crate) struct WatcherContext {
    pub(crate) server_id: ServerId,
    /// 이 워처가 속한 연결 세대
    pub(crate) epoch: u64,
    pub(crate) connection: Arc<ServerConnection>,
    pub(crate) lines: mpsc::Receiver<LogLine>,
    pub(crate) cancel: CancellationToken,
    pub(crate) registry: Arc<ParserRegistry>,
    pub(crate) bus: EventBus,
    pub(crate) trackers: Arc<TrackerRegistry>,
    pub(crate) metrics: Arc<ConnectionMetrics>,
    pub(crate) store: Arc<EventStore>,
}

/// 라인 채널이 닫히거나 컨텍스트가 취소될 때까지 라인을 처리합니다.
pub(crate) async fn watch_lines(mut ctx: WatcherContext) {
    debug!(server_id = %ctx.server_id, "log watcher started");

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => {
                // disconnect/shutdown 경로가 레코드 정리를 담당한다
                break;
            }
            line = ctx.lines.recv() => match line {
                Some(line) => process_line(&ctx, line).await,
                None => {
                    warn!(server_id = %ctx.server_id, "log channel closed, transport lost");
                    ctx.connection.mark_transport_lost(ctx.epoch).await;
                    break;
                }
            }
        }
    }

    debug!(server_id = %ctx.server_id, "log watcher stopped");
}

/// 라인 하나를 처리합니다: 매칭, 메트릭, 승인, 발행, 트래커 통지.
async fn process_line(ctx: &WatcherContext, line: LogLine) {
    ctx.connection.touch().await;
    counter!(LOGWATCH_LINES_TOTAL).increment(1);

    // 빈 라인은 처리량에는 포함하되 레지스트리는 거치지 않는다
    if line.is_blank() {
        ctx.metrics.record(false, Duration::ZERO);
        return;
    }

    let started = Instant::now();
    let matched = ctx.registry.match_line(ctx.server_id, &line);
    let elapsed = started.elapsed();

    ctx.metrics.record(matched.is_some(), elapsed);
    histogram!(LOGWATCH_MATCH_DURATION_SECONDS).record(elapsed.as_secs_f64());

    let Some(event) = matched else {
        return;
    };
    counter!(LOGWATCH_MATCHED_LINES_TOTAL).increment(1);

    if !ctx.store.admit(&event).await {
        counter!(LOGWATCH_EVENTS_DEDUPLICATED_TOTAL).increment(1);
        return;
    }

    ctx.bus.publish(event.clone());
    counter!(LOGWATCH_EVENTS_PUBLISHED_TOTAL).increment(1);

    if let Some(tracker) = ctx.trackers.get(ctx.server_id).await {
        tracker.on_event(&event);
    }
}
