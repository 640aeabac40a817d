//! Key-value 캐시 인터페이스 — 이벤트 중복 제거의 원자성 기반
//!
//! 수집 코어는 프로세스 간 공유되는 key-value 저장소(TTL 지원)를 통해
//! 이벤트 핑거프린트를 중복 제거합니다. [`KeyValueCache`]는 그 최소
//! 계약이며, 실제 네트워크 백엔드는 플랫폼 레이어가 제공합니다.
//! [`MemoryCache`]는 테스트와 단일 노드 배포에서 사용하는 인프로세스
//! 구현입니다.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::error::CacheError;

/// dyn-compatible Future 타입 별칭
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 만료 엔트리 정리 주기 (작업 횟수 기준)
const SWEEP_EVERY_OPS: u64 = 512;

/// Key-value 캐시 계약
///
/// `set_if_absent`는 원자적 check-and-insert입니다: 키가 없었으면
/// 값을 저장하고 `true`를, 이미 있었으면 `false`를 반환합니다.
/// 동일 키에 대한 동시 호출은 정확히 하나만 `true`를 받아야 합니다.
pub trait KeyValueCache: Send + Sync {
    /// 키가 없을 때만 값을 저장합니다. 저장했으면 `true`.
    fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, CacheError>> + Send;

    /// 키를 삭제합니다. 없는 키 삭제는 에러가 아닙니다.
    fn delete(&self, key: &str) -> impl Future<Output = Result<(), CacheError>> + Send;
}

/// dyn-compatible 캐시 trait
///
/// `KeyValueCache`는 RPITIT를 사용하므로 `dyn KeyValueCache`가 불가합니다.
/// `DynKeyValueCache`는 `BoxFuture`를 반환하여 `Arc<dyn DynKeyValueCache>`로
/// 캐시 구현을 주입할 수 있게 합니다. `KeyValueCache` 구현체는 blanket
/// impl으로 자동으로 이 trait도 구현합니다.
pub trait DynKeyValueCache: Send + Sync {
    /// 키가 없을 때만 값을 저장합니다.
    fn set_if_absent<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<bool, CacheError>>;

    /// 키를 삭제합니다.
    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), CacheError>>;
}

impl<T: KeyValueCache> DynKeyValueCache for T {
    fn set_if_absent<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<bool, CacheError>> {
        Box::pin(KeyValueCache::set_if_absent(self, key, value, ttl))
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(KeyValueCache::delete(self, key))
    }
}

/// 캐시 엔트리
#[derive(Debug, Clone)]
struct CacheEntry {
    #[allow(dead_code)] // 계약상 값을 저장하지만 중복 제거 경로는 키만 사용
    value: String,
    expires_at: Instant,
}

/// 인프로세스 key-value 캐시
///
/// TTL이 지난 엔트리는 조회 시점에 무시되고, 일정 작업 횟수마다
/// 일괄 정리됩니다. 단일 뮤텍스가 check-and-insert의 원자성을
/// 보장합니다.
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ops: AtomicU64,
}

impl MemoryCache {
    /// 새 캐시를 생성합니다.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ops: AtomicU64::new(0),
        }
    }

    /// 현재 저장된 엔트리 수를 반환합니다 (만료 포함).
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// 캐시가 비어 있는지 확인합니다.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueCache for MemoryCache {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        if self.ops.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY_OPS == 0 {
            entries.retain(|_, entry| entry.expires_at > now);
        }

        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Ok(false),
            _ => {
                entries.insert(
                    key.to_owned(),
                    CacheEntry {
                        value: value.to_owned(),
                        expires_at: now + ttl,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}
