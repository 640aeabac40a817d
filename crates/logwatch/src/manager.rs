//! 멀티 테넌트 로그 연결 매니저
//!
//! [`LogwatchManager`]는 서버 식별자로 인덱싱되는 연결 레지스트리입니다.
//! 서버마다 최대 하나의 연결 레코드를 유지하며, 레코드는 워처 태스크
//! 하나와 로그 소스 하나를 소유합니다.
//!
//! # 동시성 규칙
//! - 레지스트리 맵은 RwLock, 레코드 내부는 각자의 Mutex가 보호합니다.
//! - 락 순서는 항상 레지스트리 -> 레코드입니다.
//! - 레지스트리 락은 I/O를 가로질러 잡지 않습니다.
//! - 레코드 락은 이벤트 버스 발행을 가로질러 잡지 않습니다.
//!
//! # 재연결 정책
//! 끊어진 레코드에 대한 `connect`는 지수 백오프 게이트를 먼저
//! 통과해야 합니다 (5s, 10s, 20s, 40s, 60s 상한). 게이트에 걸린
//! 호출은 남은 시간을 담아 실패하고 백오프 시계를 건드리지 않습니다.
//! 매니저는 내부적으로 자동 재시도를 하지 않습니다 — 재시도는 UI든
//! 자동화든 `connect` 호출자가 주도하며, 그래야 백오프 시계가 모든
//! 경로에서 정직하게 유지됩니다.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use garrison_core::cache::DynKeyValueCache;
use garrison_core::event::EventBus;
use garrison_core::metrics::{LOGWATCH_ACTIVE_CONNECTIONS, LOGWATCH_RECONNECTS_TOTAL};
use garrison_core::tracker::TrackerRegistry;
use garrison_core::types::ServerId;

use crate::config::{LogSourceConfig, LogwatchSettings, ServerCatalog};
use crate::error::LogwatchError;
use crate::metrics::{AggregateMetrics, ConnectionMetrics, MetricsSnapshot};
use crate::parser::ParserRegistry;
use crate::source::{build_source, DynLogSource};
use crate::store::EventStore;
use crate::watcher::{watch_lines, WatcherContext};

/// 백오프 시프트 상한 (2^10 = 1024배에서 멈춤, 오버플로 방지)
const MAX_BACKOFF_SHIFT: u32 = 10;

/// 서버 하나의 연결 레코드
///
/// 매니저와 워처 태스크가 공유합니다. 가변 필드는 전부 내부 Mutex가
/// 보호합니다.
pub(crate) struct ServerConnection {
    pub(crate) server_id: ServerId,
    pub(crate) state: Mutex<ConnectionState>,
}

/// 연결 레코드의 가변 상태
pub(crate) struct ConnectionState {
    pub(crate) config: LogSourceConfig,
    pub(crate) source: Option<Box<dyn DynLogSource>>,
    pub(crate) connected: bool,
    /// 연결 세대 — 성공한 connect마다 증가. 이전 세대의 워처가
    /// 재연결된 레코드를 건드리지 못하게 한다.
    pub(crate) epoch: u64,
    pub(crate) last_used: SystemTime,
    pub(crate) reconnect_attempts: u32,
    pub(crate) last_reconnect_at: Option<Instant>,
    pub(crate) cancel: Option<CancellationToken>,
    pub(crate) watcher: Option<JoinHandle<()>>,
    pub(crate) metrics: Arc<ConnectionMetrics>,
    pub(crate) store: Arc<EventStore>,
}

impl ServerConnection {
    /// 아직 연결되지 않은 새 레코드를 생성합니다.
    ///
    /// 메트릭과 이벤트 저장소는 레코드와 함께 생성되고 함께 소멸합니다.
    pub(crate) fn new(
        server_id: ServerId,
        config: LogSourceConfig,
        cache: Arc<dyn DynKeyValueCache>,
        dedupe_ttl: Duration,
    ) -> Self {
        Self {
            server_id,
            state: Mutex::new(ConnectionState {
                config,
                source: None,
                connected: false,
                epoch: 0,
                last_used: SystemTime::now(),
                reconnect_attempts: 0,
                last_reconnect_at: None,
                cancel: None,
                watcher: None,
                metrics: Arc::new(ConnectionMetrics::new()),
                store: Arc::new(EventStore::new(server_id, cache, dedupe_ttl)),
            }),
        }
    }

    /// `last_used`를 현재 시각으로 갱신합니다.
    pub(crate) async fn touch(&self) {
        self.state.lock().await.last_used = SystemTime::now();
    }

    /// 전송 상실을 반영합니다 (워처의 채널 닫힘 경로).
    ///
    /// `epoch`가 현재 세대와 다르면 이미 교체된 연결에 대한 늦은
    /// 보고이므로 무시합니다.
    pub(crate) async fn mark_transport_lost(&self, epoch: u64) {
        let source = {
            let mut state = self.state.lock().await;
            if state.epoch != epoch || !state.connected {
                return;
            }
            state.connected = false;
            if let Some(cancel) = state.cancel.take() {
                cancel.cancel();
            }
            state.watcher.take();
            state.source.take()
        };

        if let Some(mut source) = source {
            source.close().await;
        }
        gauge!(LOGWATCH_ACTIVE_CONNECTIONS).decrement(1.0);
    }
}

/// 단일 연결의 상태 스냅샷
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    /// 현재 연결 여부
    pub connected: bool,
    /// 현재 설정
    pub config: LogSourceConfig,
    /// 마지막 사용 시각 (연결 성공 또는 라인 수신)
    pub last_used: SystemTime,
}

/// 매니저 전체 통계
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    /// 전체 레코드 수
    pub total: usize,
    /// 연결된 레코드 수
    pub connected: usize,
    /// 끊어진 레코드 수
    pub disconnected: usize,
    /// 소스 유형별 레코드 수
    pub by_source_type: BTreeMap<String, usize>,
    /// 연결된 서버별 메트릭
    pub per_server: BTreeMap<ServerId, MetricsSnapshot>,
    /// 집계 메트릭
    pub aggregate: AggregateMetrics,
}

/// 멀티 테넌트 로그 연결 매니저
pub struct LogwatchManager {
    connections: RwLock<HashMap<ServerId, Arc<ServerConnection>>>,
    registry: Arc<ParserRegistry>,
    bus: EventBus,
    cache: Arc<dyn DynKeyValueCache>,
    trackers: Arc<TrackerRegistry>,
    settings: LogwatchSettings,
    root: CancellationToken,
}

impl LogwatchManager {
    /// 빌더를 반환합니다.
    pub fn builder() -> LogwatchManagerBuilder {
        LogwatchManagerBuilder::new()
    }

    /// 이벤트 버스를 반환합니다. 소비자는 여기서 구독합니다.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// 트래커 레지스트리를 반환합니다.
    pub fn trackers(&self) -> &Arc<TrackerRegistry> {
        &self.trackers
    }

    /// 서버 로그 소스에 연결합니다.
    ///
    /// 이미 연결된 레코드에는 멱등합니다: `last_used`만 갱신되고 전달된
    /// 설정은 적용되지 않습니다. 운영자 주도의 설정 변경은 명시적인
    /// `disconnect` + `connect` 순서로 수행해야 합니다.
    ///
    /// 끊어진 레코드에는 백오프 게이트가 먼저 적용되며, 게이트에 걸리면
    /// [`LogwatchError::ReconnectDelayed`]로 실패합니다. 게이트를 통과한
    /// 호출은 시도 횟수를 소비하고 전송을 새로 수립합니다 — 원격 유형은
    /// 다이얼/인증 실패가 여기서 동기적으로 반환됩니다. 최초 연결이
    /// 실패해도 레코드는 (끊김 상태로) 유지되어 백오프 시계가 재시도
    /// 전체에 걸쳐 유지됩니다.
    pub async fn connect(
        &self,
        server_id: ServerId,
        config: LogSourceConfig,
    ) -> Result<(), LogwatchError> {
        if self.root.is_cancelled() {
            return Err(LogwatchError::Cancelled);
        }
        config.validate()?;

        let connection = {
            let mut connections = self.connections.write().await;
            Arc::clone(connections.entry(server_id).or_insert_with(|| {
                Arc::new(ServerConnection::new(
                    server_id,
                    config.clone(),
                    Arc::clone(&self.cache),
                    self.settings.dedupe_ttl,
                ))
            }))
        };

        let mut state = connection.state.lock().await;

        if state.connected {
            state.last_used = SystemTime::now();
            debug!(server_id = %server_id, "log connection already active, refreshed last_used");
            return Ok(());
        }

        // 백오프 게이트: 걸린 호출은 백오프 시계를 건드리지 않는다
        let delay = reconnect_delay(state.reconnect_attempts, &self.settings);
        if let Some(last) = state.last_reconnect_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                let remaining = delay - elapsed;
                debug!(
                    server_id = %server_id,
                    attempts = state.reconnect_attempts,
                    remaining = ?remaining,
                    "log reconnection attempt too soon"
                );
                return Err(LogwatchError::ReconnectDelayed { remaining });
            }
        }

        state.reconnect_attempts += 1;
        state.last_reconnect_at = Some(Instant::now());
        counter!(LOGWATCH_RECONNECTS_TOTAL).increment(1);

        let mut source = build_source(&config, &self.settings)?;
        let cancel = self.root.child_token();
        let lines = match source.watch(cancel.clone()).await {
            Ok(lines) => lines,
            Err(e) => {
                cancel.cancel();
                state.config = config;
                warn!(
                    server_id = %server_id,
                    attempts = state.reconnect_attempts,
                    error = %e,
                    "failed to connect to log source"
                );
                return Err(e);
            }
        };

        // 이전 생명주기를 정리하고 새 소스로 교체
        if let Some(old_cancel) = state.cancel.take() {
            old_cancel.cancel();
        }
        if let Some(mut old_source) = state.source.take() {
            old_source.close().await;
        }
        state.watcher.take();

        let source_type = config.source_type;
        state.config = config;
        state.connected = true;
        state.last_used = SystemTime::now();
        state.reconnect_attempts = 0;
        state.cancel = Some(cancel.clone());
        state.source = Some(source);
        state.epoch += 1;

        let ctx = WatcherContext {
            server_id,
            epoch: state.epoch,
            connection: Arc::clone(&connection),
            lines,
            cancel,
            registry: Arc::clone(&self.registry),
            bus: self.bus.clone(),
            trackers: Arc::clone(&self.trackers),
            metrics: Arc::clone(&state.metrics),
            store: Arc::clone(&state.store),
        };
        state.watcher = Some(tokio::spawn(watch_lines(ctx)));
        drop(state);

        gauge!(LOGWATCH_ACTIVE_CONNECTIONS).increment(1.0);
        info!(server_id = %server_id, source_type = %source_type, "connected to log source");
        Ok(())
    }

    /// 서버 로그 소스 연결을 끊습니다.
    ///
    /// 레코드는 레지스트리에 남아 `status`/`stats`로 계속 보고됩니다 —
    /// 레지스트리를 비우는 것은 `shutdown`뿐입니다.
    pub async fn disconnect(&self, server_id: ServerId) -> Result<(), LogwatchError> {
        let connection = self
            .get(server_id)
            .await
            .ok_or(LogwatchError::NotFound(server_id))?;

        let mut state = connection.state.lock().await;
        if !state.connected {
            return Err(LogwatchError::AlreadyDisconnected(server_id));
        }

        if let Some(cancel) = state.cancel.take() {
            cancel.cancel();
        }
        let source = state.source.take();
        let watcher = state.watcher.take();
        state.connected = false;
        drop(state);

        if let Some(mut source) = source {
            source.close().await;
        }
        if let Some(watcher) = watcher {
            if timeout(self.settings.shutdown_drain, watcher).await.is_err() {
                warn!(server_id = %server_id, "log watcher did not stop within the drain window");
            }
        }

        gauge!(LOGWATCH_ACTIVE_CONNECTIONS).decrement(1.0);
        info!(server_id = %server_id, "disconnected from log source");
        Ok(())
    }

    /// 카탈로그의 로그 설정이 있는 모든 서버에 연결합니다.
    ///
    /// 행 단위 실패는 로그만 남기고 계속 진행합니다. 연결에 성공한
    /// 서버 수를 반환합니다.
    pub async fn connect_all(&self, catalog: &dyn ServerCatalog) -> usize {
        let entries = match catalog.log_configured_servers().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "failed to query server catalog for log connections");
                return 0;
            }
        };

        let mut connected = 0;
        for entry in entries {
            let server_id = entry.server_id;
            let config = match entry.into_config() {
                None => continue,
                Some(Ok(config)) => config,
                Some(Err(e)) => {
                    warn!(server_id = %server_id, error = %e, "invalid log configuration in catalog");
                    continue;
                }
            };

            let source_type = config.source_type;
            match self.connect(server_id, config).await {
                Ok(()) => {
                    connected += 1;
                    info!(server_id = %server_id, source_type = %source_type, "connected to server log source");
                }
                Err(e) => {
                    warn!(
                        server_id = %server_id,
                        source_type = %source_type,
                        error = %e,
                        "failed to connect to server log source"
                    );
                }
            }
        }
        connected
    }

    /// 단일 연결의 상태 스냅샷을 반환합니다.
    pub async fn status(&self, server_id: ServerId) -> Result<ConnectionStatus, LogwatchError> {
        let connection = self
            .get(server_id)
            .await
            .ok_or(LogwatchError::NotFound(server_id))?;

        let state = connection.state.lock().await;
        Ok(ConnectionStatus {
            connected: state.connected,
            config: state.config.clone(),
            last_used: state.last_used,
        })
    }

    /// 연결된 서버의 파싱 메트릭을 반환합니다.
    pub async fn server_metrics(
        &self,
        server_id: ServerId,
    ) -> Result<MetricsSnapshot, LogwatchError> {
        let connection = self
            .get(server_id)
            .await
            .ok_or(LogwatchError::NotFound(server_id))?;

        let state = connection.state.lock().await;
        if !state.connected {
            return Err(LogwatchError::AlreadyDisconnected(server_id));
        }
        Ok(state.metrics.snapshot())
    }

    /// 전체 연결 통계를 반환합니다.
    ///
    /// 레지스트리 락은 공유 모드로, 레코드 락은 각각 짧게 잡습니다.
    pub async fn stats(&self) -> ManagerStats {
        let connections = self.connections.read().await;

        let mut stats = ManagerStats {
            total: connections.len(),
            connected: 0,
            disconnected: 0,
            by_source_type: BTreeMap::new(),
            per_server: BTreeMap::new(),
            aggregate: AggregateMetrics::default(),
        };

        for (server_id, connection) in connections.iter() {
            let state = connection.state.lock().await;
            *stats
                .by_source_type
                .entry(state.config.source_type.as_str().to_owned())
                .or_insert(0) += 1;

            if state.connected {
                stats.connected += 1;
                stats.per_server.insert(*server_id, state.metrics.snapshot());
            } else {
                stats.disconnected += 1;
            }
        }

        stats.aggregate = AggregateMetrics::from_snapshots(stats.per_server.values());
        stats
    }

    /// 매니저를 종료합니다.
    ///
    /// 루트 컨텍스트를 취소하고 모든 소스를 닫은 뒤 워처를 드레인
    /// 한도 안에서 합류시키고 레지스트리를 비웁니다. 멱등하며, 정리
    /// 중의 내부 에러는 로그만 남습니다.
    pub async fn shutdown(&self) {
        info!("shutting down logwatch manager");
        self.root.cancel();

        let drained: Vec<(ServerId, Arc<ServerConnection>)> = {
            let mut connections = self.connections.write().await;
            connections.drain().collect()
        };

        for (server_id, connection) in drained {
            let mut state = connection.state.lock().await;
            let was_connected = state.connected;
            if let Some(cancel) = state.cancel.take() {
                cancel.cancel();
            }
            let source = state.source.take();
            let watcher = state.watcher.take();
            state.connected = false;
            drop(state);

            if let Some(mut source) = source {
                source.close().await;
            }
            if let Some(watcher) = watcher {
                if timeout(self.settings.shutdown_drain, watcher).await.is_err() {
                    warn!(server_id = %server_id, "log watcher did not stop within the drain window");
                }
            }
            if was_connected {
                gauge!(LOGWATCH_ACTIVE_CONNECTIONS).decrement(1.0);
            }
            debug!(server_id = %server_id, "closed log connection during shutdown");
        }

        info!("logwatch manager shutdown complete");
    }

    async fn get(&self, server_id: ServerId) -> Option<Arc<ServerConnection>> {
        self.connections.read().await.get(&server_id).cloned()
    }
}

/// 시도 횟수에 따른 재연결 지연을 계산합니다.
///
/// 첫 시도(0회 실패)는 지연이 없고, 이후 5s, 10s, 20s, 40s를 거쳐
/// 60s에서 상한에 닿습니다. 시프트 폭을 제한하여 큰 시도 횟수에서도
/// 오버플로하지 않습니다.
fn reconnect_delay(attempts: u32, settings: &LogwatchSettings) -> Duration {
    if attempts == 0 {
        return Duration::ZERO;
    }
    let shift = (attempts - 1).min(MAX_BACKOFF_SHIFT);
    settings
        .backoff_base
        .saturating_mul(1u32 << shift)
        .min(settings.backoff_cap)
}

/// 로그 매니저 빌더
///
/// 파서 레지스트리, 캐시, 트래커, 버스를 주입하거나 기본값으로
/// 생성합니다.
pub struct LogwatchManagerBuilder {
    settings: LogwatchSettings,
    registry: Option<Arc<ParserRegistry>>,
    cache: Option<Arc<dyn DynKeyValueCache>>,
    trackers: Option<Arc<TrackerRegistry>>,
    bus: Option<EventBus>,
}

impl LogwatchManagerBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            settings: LogwatchSettings::default(),
            registry: None,
            cache: None,
            trackers: None,
            bus: None,
        }
    }

    /// 매니저 튜닝 설정을 지정합니다.
    pub fn settings(mut self, settings: LogwatchSettings) -> Self {
        self.settings = settings;
        self
    }

    /// 파서 레지스트리를 지정합니다. 기본값은 기본 게임 파서 세트입니다.
    pub fn parser_registry(mut self, registry: Arc<ParserRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// 중복 제거 캐시를 지정합니다. 기본값은 인프로세스 캐시입니다.
    pub fn cache(mut self, cache: Arc<dyn DynKeyValueCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// 트래커 레지스트리를 지정합니다.
    pub fn trackers(mut self, trackers: Arc<TrackerRegistry>) -> Self {
        self.trackers = Some(trackers);
        self
    }

    /// 이벤트 버스를 지정합니다. 기본값은 새 버스입니다.
    pub fn bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// 매니저를 생성합니다.
    pub fn build(self) -> Result<LogwatchManager, LogwatchError> {
        self.settings.validate()?;

        let registry = match self.registry {
            Some(registry) => registry,
            None => Arc::new(ParserRegistry::with_defaults()?),
        };

        Ok(LogwatchManager {
            connections: RwLock::new(HashMap::new()),
            registry,
            bus: self.bus.unwrap_or_default(),
            cache: self
                .cache
                .unwrap_or_else(|| Arc::new(garrison_core::cache::MemoryCache::new())),
            trackers: self.trackers.unwrap_or_default(),
            settings: self.settings,
            root: CancellationToken::new(),
        })
    }
}

impl Default for LogwatchManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
