//! 로그 수집 도메인 에러 타입
//!
//! [`LogwatchError`]는 수집 코어 내부에서 발생하는 모든 에러를 표현합니다.
//! `From<LogwatchError> for GarrisonError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.

use std::time::Duration;

use garrison_core::error::{CacheError, GarrisonError, WatchError};
use garrison_core::types::ServerId;

/// 로그 수집 도메인 에러
///
/// 설정 검증, 전송 수립, 런타임 수집, 매니저 생명주기 작업의
/// 모든 에러 상황을 포괄합니다.
#[derive(Debug, thiserror::Error)]
pub enum LogwatchError {
    /// 유효하지 않은 소스 설정
    #[error("invalid log source config: {field}: {reason}")]
    InvalidConfig {
        /// 문제가 된 설정 필드명
        field: String,
        /// 검증 실패 사유
        reason: String,
    },

    /// 전송 수립/유지 실패
    #[error("transport failed: {source_type}: {reason}")]
    TransportFailed {
        /// 소스 유형 (local, sftp, ftp)
        source_type: String,
        /// 실패 사유
        reason: String,
    },

    /// 원격 인증 실패
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// 로그 파일 없음
    #[error("log file not found: {0}")]
    FileNotFound(String),

    /// 권한 거부
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// 작업 시간 초과
    #[error("timed out: {0}")]
    Timeout(String),

    /// 서버 연결 레코드 없음
    #[error("server log connection not found: {0}")]
    NotFound(ServerId),

    /// 이미 끊어진 연결에 대한 작업
    #[error("server log connection already disconnected: {0}")]
    AlreadyDisconnected(ServerId),

    /// 백오프 게이트에 걸린 재연결 시도
    #[error("reconnection delayed, try again in {remaining:?}")]
    ReconnectDelayed {
        /// 다음 시도까지 남은 시간
        remaining: Duration,
    },

    /// watch()가 이미 호출된 소스에 대한 재호출
    #[error("log source is already being watched")]
    AlreadyWatching,

    /// 취소된 컨텍스트에서의 작업
    #[error("operation cancelled")]
    Cancelled,

    /// 중복 제거 캐시 에러
    #[error("dedupe cache error: {0}")]
    Cache(#[from] CacheError),

    /// 파서 패턴 컴파일 에러
    #[error("invalid parser pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LogwatchError> for GarrisonError {
    fn from(err: LogwatchError) -> Self {
        match err {
            LogwatchError::Cache(e) => GarrisonError::Cache(e),
            LogwatchError::Io(e) => GarrisonError::Io(e),
            LogwatchError::NotFound(_) | LogwatchError::AlreadyDisconnected(_) => {
                GarrisonError::Watch(WatchError::NotConnected(err.to_string()))
            }
            other => GarrisonError::Watch(WatchError::ConnectFailed(other.to_string())),
        }
    }
}
