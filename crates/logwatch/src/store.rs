//! 이벤트 중복 제거 — 공유 캐시 위의 원자적 check-and-insert
//!
//! [`EventStore`]는 서버별로 최근 이벤트의 핑거프린트를 공유 key-value
//! 캐시에 TTL과 함께 기록합니다. 전송 재연결이나 파일 재읽기로 같은
//! 라인이 다시 흘러들어도 (at-least-once) 다운스트림에는 한 번만
//! 도달합니다.
//!
//! 캐시 장애 시에는 fail-open입니다: 이벤트를 새 것으로 취급하고
//! 메트릭으로만 드러냅니다. 중복 제거가 불가하다고 파이프라인을
//! 멈추지 않습니다.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::{debug, warn};

use garrison_core::cache::DynKeyValueCache;
use garrison_core::event::GameEvent;
use garrison_core::metrics::LOGWATCH_DEDUPE_CACHE_ERRORS_TOTAL;
use garrison_core::types::ServerId;

/// 캐시 키 접두어
const KEY_PREFIX: &str = "logwatch:dedupe";

/// 서버 하나의 이벤트 중복 제거 저장소
///
/// 연결 레코드와 함께 생성되고 함께 소멸합니다. 상태는 전부 공유
/// 캐시에 있으므로 저장소 자체는 가볍습니다.
pub struct EventStore {
    server_id: ServerId,
    cache: Arc<dyn DynKeyValueCache>,
    ttl: Duration,
}

impl EventStore {
    /// 새 이벤트 저장소를 생성합니다.
    pub fn new(server_id: ServerId, cache: Arc<dyn DynKeyValueCache>, ttl: Duration) -> Self {
        Self {
            server_id,
            cache,
            ttl,
        }
    }

    /// 중복 제거 윈도우(TTL)를 반환합니다.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// 이벤트 승인 여부를 판정합니다.
    ///
    /// 핑거프린트가 윈도우 안에 없었으면 기록하고 `true`(새 이벤트),
    /// 이미 있었으면 `false`(중복)를 반환합니다. 동일 핑거프린트에
    /// 대한 동시 호출은 캐시의 원자성에 의해 정확히 하나만 `true`를
    /// 받습니다.
    pub async fn admit(&self, event: &GameEvent) -> bool {
        let fingerprint = event.fingerprint();
        let key = format!("{KEY_PREFIX}:{}:{}", self.server_id, fingerprint);

        match self.cache.set_if_absent(&key, "1", self.ttl).await {
            Ok(fresh) => {
                if !fresh {
                    debug!(
                        server_id = %self.server_id,
                        kind = %event.kind,
                        %fingerprint,
                        "duplicate event suppressed"
                    );
                }
                fresh
            }
            Err(e) => {
                // fail-open: 중복 제거 불가 시 이벤트를 새 것으로 취급
                counter!(LOGWATCH_DEDUPE_CACHE_ERRORS_TOTAL).increment(1);
                warn!(
                    server_id = %self.server_id,
                    error = %e,
                    "dedupe cache unavailable, admitting event"
                );
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use garrison_core::cache::MemoryCache;
    use garrison_core::error::CacheError;
    use garrison_core::event::EventKind;
    use std::collections::BTreeMap;
    use std::time::SystemTime;

    const TTL: Duration = Duration::from_secs(300);

    fn sample_event(server_id: ServerId, tick: &str) -> GameEvent {
        let mut payload = BTreeMap::new();
        payload.insert("tick_rate".to_owned(), tick.to_owned());
        GameEvent {
            server_id,
            kind: EventKind::TickRate,
            timestamp: SystemTime::now(),
            payload,
            raw_line: format!("tick {tick}"),
            parser_id: "tick_rate".to_owned(),
        }
    }

    #[tokio::test]
    async fn first_admit_wins_second_is_duplicate() {
        let server_id = ServerId::new();
        let store = EventStore::new(server_id, Arc::new(MemoryCache::new()), TTL);

        let event = sample_event(server_id, "35.50");
        assert!(store.admit(&event).await);
        assert!(!store.admit(&event).await);
    }

    #[tokio::test]
    async fn different_payloads_are_independent() {
        let server_id = ServerId::new();
        let store = EventStore::new(server_id, Arc::new(MemoryCache::new()), TTL);

        assert!(store.admit(&sample_event(server_id, "35.50")).await);
        assert!(store.admit(&sample_event(server_id, "40.00")).await);
    }

    #[tokio::test]
    async fn servers_are_partitioned_on_a_shared_cache() {
        let cache = Arc::new(MemoryCache::new());
        let server_a = ServerId::new();
        let server_b = ServerId::new();
        let store_a = EventStore::new(server_a, cache.clone(), TTL);
        let store_b = EventStore::new(server_b, cache, TTL);

        assert!(store_a.admit(&sample_event(server_a, "35.50")).await);
        // 다른 서버의 동일 페이로드는 중복이 아니다
        assert!(store_b.admit(&sample_event(server_b, "35.50")).await);
    }

    #[tokio::test]
    async fn expired_window_readmits() {
        let server_id = ServerId::new();
        let store = EventStore::new(
            server_id,
            Arc::new(MemoryCache::new()),
            Duration::from_millis(20),
        );

        let event = sample_event(server_id, "35.50");
        assert!(store.admit(&event).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.admit(&event).await);
    }

    #[tokio::test]
    async fn concurrent_admits_have_single_winner() {
        let server_id = ServerId::new();
        let store = Arc::new(EventStore::new(server_id, Arc::new(MemoryCache::new()), TTL));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            let event = sample_event(server_id, "35.50");
            handles.push(tokio::spawn(async move { store.admit(&event).await }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }

    struct BrokenCache;

    impl garrison_core::cache::KeyValueCache for BrokenCache {
        async fn set_if_absent(
            &self,
            _key: &str,
            _value: &str,
            _ttl: Duration,
        ) -> Result<bool, CacheError> {
            Err(CacheError::Backend("connection refused".to_owned()))
        }

        async fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".to_owned()))
        }
    }

    #[tokio::test]
    async fn cache_failure_fails_open() {
        let server_id = ServerId::new();
        let store = EventStore::new(server_id, Arc::new(BrokenCache), TTL);

        let event = sample_event(server_id, "35.50");
        // 캐시가 죽어도 파이프라인은 멈추지 않는다: 둘 다 승인
        assert!(store.admit(&event).await);
        assert!(store.admit(&event).await);
    }
}
