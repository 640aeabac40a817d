//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 서브시스템은 이 상수를 사용하여 `metrics::counter!()`,
//! `metrics::gauge!()`, `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `garrison_`
//! - 서브시스템: `logwatch_`, `probe_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 소스 유형 레이블 키 (local, sftp, ftp)
pub const LABEL_SOURCE_TYPE: &str = "source_type";

/// 이벤트 종류 레이블 키
pub const LABEL_EVENT_KIND: &str = "kind";

// ─── Logwatch 메트릭 ────────────────────────────────────────────────

/// Logwatch: 수신한 전체 로그 라인 수 (counter)
pub const LOGWATCH_LINES_TOTAL: &str = "garrison_logwatch_lines_total";

/// Logwatch: 파서에 매칭된 라인 수 (counter)
pub const LOGWATCH_MATCHED_LINES_TOTAL: &str = "garrison_logwatch_matched_lines_total";

/// Logwatch: 버스로 발행된 이벤트 수 (counter)
pub const LOGWATCH_EVENTS_PUBLISHED_TOTAL: &str = "garrison_logwatch_events_published_total";

/// Logwatch: 중복으로 억제된 이벤트 수 (counter)
pub const LOGWATCH_EVENTS_DEDUPLICATED_TOTAL: &str =
    "garrison_logwatch_events_deduplicated_total";

/// Logwatch: 중복 제거 캐시 에러 수 (counter)
pub const LOGWATCH_DEDUPE_CACHE_ERRORS_TOTAL: &str =
    "garrison_logwatch_dedupe_cache_errors_total";

/// Logwatch: 재연결 시도 수 (counter)
pub const LOGWATCH_RECONNECTS_TOTAL: &str = "garrison_logwatch_reconnects_total";

/// Logwatch: 현재 연결된 로그 소스 수 (gauge)
pub const LOGWATCH_ACTIVE_CONNECTIONS: &str = "garrison_logwatch_active_connections";

/// Logwatch: 라인당 파서 매칭 지연 시간 (histogram, 초)
pub const LOGWATCH_MATCH_DURATION_SECONDS: &str = "garrison_logwatch_match_duration_seconds";

// ─── Probe 메트릭 ───────────────────────────────────────────────────

/// Probe: 로그 전송 프로브 소요 시간 (histogram, 초)
pub const PROBE_DURATION_SECONDS: &str = "garrison_probe_duration_seconds";

/// Probe: 실패한 프로브 수 (counter, label: source_type)
pub const PROBE_FAILURES_TOTAL: &str = "garrison_probe_failures_total";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 파서 매칭 지연 시간 히스토그램 버킷 (초)
///
/// 1us ~ 100ms 범위, 정규식 매칭은 마이크로초 단위 분포
pub const MATCH_DURATION_BUCKETS: [f64; 8] =
    [0.000001, 0.00001, 0.0001, 0.0005, 0.001, 0.01, 0.05, 0.1];

/// 프로브 소요 시간 히스토그램 버킷 (초)
///
/// 1ms ~ 5s 범위 (네트워크 왕복 포함, 5s가 프로브 타임아웃)
pub const PROBE_DURATION_BUCKETS: [f64; 7] = [0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// `metrics::describe_counter!()` 등을 호출하여 Prometheus HELP 텍스트를
/// 설정합니다. 전역 레코더 설치 후 프로세스 시작 시점에서 한 번만
/// 호출해야 합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    describe_counter!(
        LOGWATCH_LINES_TOTAL,
        "Total number of raw log lines received from all sources"
    );
    describe_counter!(
        LOGWATCH_MATCHED_LINES_TOTAL,
        "Total number of log lines matched by a line parser"
    );
    describe_counter!(
        LOGWATCH_EVENTS_PUBLISHED_TOTAL,
        "Total number of admitted events published to the event bus"
    );
    describe_counter!(
        LOGWATCH_EVENTS_DEDUPLICATED_TOTAL,
        "Total number of events suppressed as duplicates"
    );
    describe_counter!(
        LOGWATCH_DEDUPE_CACHE_ERRORS_TOTAL,
        "Total number of dedupe cache failures (events admitted fail-open)"
    );
    describe_counter!(
        LOGWATCH_RECONNECTS_TOTAL,
        "Total number of log source reconnect attempts"
    );
    describe_gauge!(
        LOGWATCH_ACTIVE_CONNECTIONS,
        "Number of currently connected log sources"
    );
    describe_histogram!(
        LOGWATCH_MATCH_DURATION_SECONDS,
        "Parser registry matching latency per line in seconds"
    );

    describe_histogram!(
        PROBE_DURATION_SECONDS,
        "Log transport health probe duration in seconds"
    );
    describe_counter!(
        PROBE_FAILURES_TOTAL,
        "Total number of failed log transport health probes"
    );
}
