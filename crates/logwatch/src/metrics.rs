//! 연결별 파싱 메트릭 — 롤링 처리량 윈도우와 지연 시간 EWMA
//!
//! 연결마다 최근 60초의 라인/매칭 라인 수와 라인당 매칭 지연 시간의
//! 지수 가중 이동 평균을 유지합니다. 스냅샷 읽기는 하나의 짧은 락
//! 아래에서 일관된 세 값을 반환합니다.
//!
//! 프로세스 전역 카운터(`metrics` 파사드)는 호출 지점에서 별도로
//! 증가시키며, 여기의 상태는 매니저 stats로 노출되는 연결 단위
//! 뷰입니다.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// 롤링 윈도우 길이
const WINDOW: Duration = Duration::from_secs(60);

/// 지연 시간 EWMA 가중치
const EWMA_ALPHA: f64 = 0.1;

/// 연결 하나의 파싱 메트릭
///
/// `record()`는 워처의 핫 패스에서 호출되므로 락 구간을 짧게
/// 유지합니다.
pub struct ConnectionMetrics {
    epoch: Instant,
    inner: Mutex<MetricsInner>,
}

struct MetricsInner {
    lines: RollingWindow,
    matched: RollingWindow,
    latency_ewma_ms: f64,
    samples: u64,
}

impl ConnectionMetrics {
    /// 새 메트릭을 생성합니다.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            inner: Mutex::new(MetricsInner {
                lines: RollingWindow::new(),
                matched: RollingWindow::new(),
                latency_ewma_ms: 0.0,
                samples: 0,
            }),
        }
    }

    /// 라인 하나의 처리 결과를 기록합니다.
    pub fn record(&self, matched: bool, latency: Duration) {
        let second = self.epoch.elapsed().as_secs();
        let latency_ms = latency.as_secs_f64() * 1000.0;

        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        inner.lines.bump(second);
        if matched {
            inner.matched.bump(second);
        }

        if inner.samples == 0 {
            inner.latency_ewma_ms = latency_ms;
        } else {
            inner.latency_ewma_ms =
                EWMA_ALPHA * latency_ms + (1.0 - EWMA_ALPHA) * inner.latency_ewma_ms;
        }
        inner.samples += 1;
    }

    /// 일관된 메트릭 스냅샷을 반환합니다.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let second = self.epoch.elapsed().as_secs();

        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        MetricsSnapshot {
            lines_per_minute: inner.lines.count_within(second) as f64,
            matching_lines_per_minute: inner.matched.count_within(second) as f64,
            matching_latency_ms: inner.latency_ewma_ms,
        }
    }
}

impl Default for ConnectionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// 초 단위 버킷의 롤링 카운터
#[derive(Debug, Default)]
struct RollingWindow {
    buckets: VecDeque<(u64, u64)>, // (초, 카운트)
}

impl RollingWindow {
    fn new() -> Self {
        Self::default()
    }

    /// 현재 초의 카운트를 증가시킵니다.
    fn bump(&mut self, second: u64) {
        match self.buckets.back_mut() {
            Some((s, count)) if *s == second => *count += 1,
            _ => self.buckets.push_back((second, 1)),
        }
        self.evict(second);
    }

    /// 윈도우 안의 총 카운트를 반환합니다.
    fn count_within(&mut self, second: u64) -> u64 {
        self.evict(second);
        self.buckets.iter().map(|(_, count)| count).sum()
    }

    fn evict(&mut self, second: u64) {
        let horizon = second.saturating_sub(WINDOW.as_secs());
        while let Some((s, _)) = self.buckets.front() {
            if *s >= horizon {
                break;
            }
            self.buckets.pop_front();
        }
    }
}

/// 연결 메트릭 스냅샷
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// 최근 60초 수신 라인 수
    pub lines_per_minute: f64,
    /// 최근 60초 매칭 라인 수
    pub matching_lines_per_minute: f64,
    /// 라인당 매칭 지연 시간 EWMA (밀리초)
    pub matching_latency_ms: f64,
}

/// 전체 연결의 집계 메트릭
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    /// 전체 수신 라인 수 (분당)
    pub total_lines_per_minute: f64,
    /// 전체 매칭 라인 수 (분당)
    pub total_matching_lines_per_minute: f64,
    /// 평균 매칭 지연 시간 (밀리초, 지연 시간이 0이 아닌 연결만)
    pub average_matching_latency_ms: f64,
}

impl AggregateMetrics {
    /// 연결 스냅샷들을 집계합니다.
    ///
    /// 처리량은 합산하고, 지연 시간은 0이 아닌 연결들의 단순 평균을
    /// 사용합니다.
    pub fn from_snapshots<'a>(snapshots: impl IntoIterator<Item = &'a MetricsSnapshot>) -> Self {
        let mut aggregate = Self::default();
        let mut latency_sum = 0.0;
        let mut with_latency = 0u32;

        for snapshot in snapshots {
            aggregate.total_lines_per_minute += snapshot.lines_per_minute;
            aggregate.total_matching_lines_per_minute += snapshot.matching_lines_per_minute;
            if snapshot.matching_latency_ms > 0.0 {
                latency_sum += snapshot.matching_latency_ms;
                with_latency += 1;
            }
        }

        if with_latency > 0 {
            aggregate.average_matching_latency_ms = latency_sum / f64::from(with_latency);
        }
        aggregate
    }
}
