//! 에러 타입 — 도메인별 에러 정의

/// Garrison 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum GarrisonError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 로그 수집 관련 에러
    #[error("watch error: {0}")]
    Watch(#[from] WatchError),

    /// 캐시 관련 에러
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 필수 필드 누락
    #[error("missing required field: {field}")]
    MissingField { field: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 로그 수집 관련 에러
///
/// 수집 코어 내부의 세부 에러는 `garrison-logwatch`에서 정의되며,
/// 상위 레이어로 전파될 때 이 분류로 변환됩니다.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// 연결 수립 실패
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// 연결되지 않은 서버에 대한 작업
    #[error("not connected: {0}")]
    NotConnected(String),

    /// 종료 처리 실패
    #[error("shutdown failed: {0}")]
    Shutdown(String),
}

/// 캐시 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// 백엔드 통신 실패
    #[error("cache backend error: {0}")]
    Backend(String),

    /// 작업 시간 초과
    #[error("cache operation timed out")]
    Timeout,
}
