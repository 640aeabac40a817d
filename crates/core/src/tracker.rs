//! 플레이어 트래커 인터페이스 — 서버별 플레이어 상태 갱신 지점
//!
//! 수집 코어는 승인된 이벤트를 해당 서버의 트래커에 전달합니다.
//! 트래커 자체(접속 목록, 팀 배치 등)는 플랫폼 레이어의 책임이며,
//! 등록되지 않은 서버의 이벤트는 그냥 버스로만 흘러갑니다.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::event::GameEvent;
use crate::types::ServerId;

/// 서버별 플레이어 상태를 갱신하는 trait
///
/// 구현체는 이벤트 페이로드에서 플레이어 식별 정보를 읽어
/// 인메모리 상태를 갱신합니다. 호출은 워처 태스크에서 이루어지므로
/// 블로킹 작업을 해서는 안 됩니다.
pub trait PlayerTracker: Send + Sync {
    /// 승인된 이벤트를 반영합니다.
    fn on_event(&self, event: &GameEvent);
}

/// 트래커 레지스트리
///
/// 서버 식별자로 트래커를 조회하는 공유 레지스트리입니다.
/// 수집 코어에는 주입된 핸들로 전달되며, 코어는 트래커가 없는 서버를
/// 정상 상황으로 취급합니다.
pub struct TrackerRegistry {
    trackers: RwLock<HashMap<ServerId, Arc<dyn PlayerTracker>>>,
}

impl TrackerRegistry {
    /// 새 레지스트리를 생성합니다.
    pub fn new() -> Self {
        Self {
            trackers: RwLock::new(HashMap::new()),
        }
    }

    /// 서버의 트래커를 등록합니다. 기존 트래커는 교체됩니다.
    pub async fn register(&self, server_id: ServerId, tracker: Arc<dyn PlayerTracker>) {
        self.trackers.write().await.insert(server_id, tracker);
    }

    /// 서버의 트래커를 조회합니다.
    pub async fn get(&self, server_id: ServerId) -> Option<Arc<dyn PlayerTracker>> {
        self.trackers.read().await.get(&server_id).cloned()
    }

    /// 서버의 트래커를 제거합니다.
    pub async fn remove(&self, server_id: ServerId) -> Option<Arc<dyn PlayerTracker>> {
        self.trackers.write().await.remove(&server_id)
    }

    /// 등록된 트래커 수를 반환합니다.
    pub async fn len(&self) -> usize {
        self.trackers.read().await.len()
    }

    /// 레지스트리가 비어 있는지 확인합니다.
    pub async fn is_empty(&self) -> bool {
        self.trackers.read().await.is_empty()
    }
}

impl Default for TrackerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::SystemTime;

    struct CountingTracker {
        seen: AtomicUsize,
    }

    impl PlayerTracker for CountingTracker {
        fn on_event(&self, _event: &GameEvent) {
            self.seen.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn sample_event(server_id: ServerId) -> GameEvent {
        GameEvent {
            server_id,
            kind: EventKind::JoinSucceeded,
            timestamp: SystemTime::now(),
            payload: Default::default(),
            raw_line: "raw".to_owned(),
            parser_id: "test".to_owned(),
        }
    }

    #[tokio::test]
    async fn registered_tracker_receives_events() {
        let registry = TrackerRegistry::new();
        let server_id = ServerId::new();
        let tracker = Arc::new(CountingTracker {
            seen: AtomicUsize::new(0),
        });
        registry.register(server_id, tracker.clone()).await;

        let found = registry.get(server_id).await.unwrap();
        found.on_event(&sample_event(server_id));
        assert_eq!(tracker.seen.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn missing_tracker_returns_none() {
        let registry = TrackerRegistry::new();
        assert!(registry.get(ServerId::new()).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn remove_unregisters_the_tracker() {
        let registry = TrackerRegistry::new();
        let server_id = ServerId::new();
        registry
            .register(
                server_id,
                Arc::new(CountingTracker {
                    seen: AtomicUsize::new(0),
                }),
            )
            .await;
        assert_eq!(registry.len().await, 1);

        assert!(registry.remove(server_id).await.is_some());
        assert!(registry.get(server_id).await.is_none());
    }
}
