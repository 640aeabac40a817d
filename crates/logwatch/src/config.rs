//! 로그 소스 설정과 매니저 튜닝
//!
//! [`LogSourceConfig`]는 서버 하나의 로그 전송 설정입니다. 설정의
//! 영속화는 플랫폼 레이어의 책임이며, 수집 코어는 `connect` 호출로
//! 전달받은 설정만 사용합니다. [`CatalogEntry`]는 서버 카탈로그 질의
//! 결과 한 행을 설정으로 변환합니다.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use garrison_core::cache::BoxFuture;
use garrison_core::error::GarrisonError;
use garrison_core::types::ServerId;

use crate::error::LogwatchError;

/// SFTP 기본 포트
pub const DEFAULT_SFTP_PORT: u16 = 22;
/// FTP 기본 포트
pub const DEFAULT_FTP_PORT: u16 = 21;
/// 원격 소스 기본 폴링 주기
pub const DEFAULT_POLL_FREQUENCY: Duration = Duration::from_secs(5);
/// 폴링 주기 하한
pub const MIN_POLL_FREQUENCY: Duration = Duration::from_secs(1);
/// 폴링 주기 상한
pub const MAX_POLL_FREQUENCY: Duration = Duration::from_secs(300);

/// 로그 소스 유형
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// 로컬 파일시스템
    Local,
    /// SSH 파일 전송 (SFTP)
    Sftp,
    /// 평문 파일 전송 (FTP)
    Ftp,
}

impl SourceKind {
    /// 소문자 문자열 표현을 반환합니다.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Sftp => "sftp",
            Self::Ftp => "ftp",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = LogwatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "sftp" => Ok(Self::Sftp),
            "ftp" => Ok(Self::Ftp),
            other => Err(LogwatchError::InvalidConfig {
                field: "source_type".to_owned(),
                reason: format!("must be one of local, sftp, ftp (got '{other}')"),
            }),
        }
    }
}

/// 로그 소스 설정
///
/// 세 유형이 공유하는 평면 레코드입니다. 원격 유형에서만 호스트와
/// 자격 증명이 필요하며, `validate()`가 유형별 필수 필드를 검증합니다.
#[derive(Clone, Serialize, Deserialize)]
pub struct LogSourceConfig {
    /// 소스 유형
    pub source_type: SourceKind,
    /// 로그 파일 경로 (모든 유형 필수)
    pub file_path: String,
    /// 원격 호스트
    pub host: Option<String>,
    /// 원격 포트 (없으면 유형별 기본값)
    pub port: Option<u16>,
    /// 원격 사용자명
    pub username: Option<String>,
    /// 원격 비밀번호 (비밀번호 인증만 지원)
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// 원격 폴링 주기 (1-300초)
    pub poll_frequency: Duration,
    /// 파일 처음부터 읽을지 여부
    pub read_from_start: bool,
}

// 비밀번호는 로그에 노출되면 안 된다
impl fmt::Debug for LogSourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSourceConfig")
            .field("source_type", &self.source_type)
            .field("file_path", &self.file_path)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("poll_frequency", &self.poll_frequency)
            .field("read_from_start", &self.read_from_start)
            .finish()
    }
}

impl LogSourceConfig {
    /// 로컬 파일 소스 설정을 생성합니다.
    pub fn local(file_path: impl Into<String>) -> Self {
        Self {
            source_type: SourceKind::Local,
            file_path: file_path.into(),
            host: None,
            port: None,
            username: None,
            password: None,
            poll_frequency: DEFAULT_POLL_FREQUENCY,
            read_from_start: false,
        }
    }

    /// SFTP 소스 설정을 생성합니다.
    pub fn sftp(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        file_path: impl Into<String>,
    ) -> Self {
        Self {
            source_type: SourceKind::Sftp,
            file_path: file_path.into(),
            host: Some(host.into()),
            port: None,
            username: Some(username.into()),
            password: Some(password.into()),
            poll_frequency: DEFAULT_POLL_FREQUENCY,
            read_from_start: false,
        }
    }

    /// FTP 소스 설정을 생성합니다.
    pub fn ftp(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        file_path: impl Into<String>,
    ) -> Self {
        Self {
            source_type: SourceKind::Ftp,
            file_path: file_path.into(),
            host: Some(host.into()),
            port: None,
            username: Some(username.into()),
            password: Some(password.into()),
            poll_frequency: DEFAULT_POLL_FREQUENCY,
            read_from_start: false,
        }
    }

    /// 폴링 주기를 설정합니다.
    pub fn with_poll_frequency(mut self, poll_frequency: Duration) -> Self {
        self.poll_frequency = poll_frequency;
        self
    }

    /// 파일 처음부터 읽기를 설정합니다.
    pub fn with_read_from_start(mut self, read_from_start: bool) -> Self {
        self.read_from_start = read_from_start;
        self
    }

    /// 원격 포트를 설정합니다.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// 유형별 기본값이 적용된 포트를 반환합니다.
    pub fn resolved_port(&self) -> u16 {
        match self.port {
            Some(port) if port > 0 => port,
            _ => match self.source_type {
                SourceKind::Sftp => DEFAULT_SFTP_PORT,
                SourceKind::Ftp => DEFAULT_FTP_PORT,
                SourceKind::Local => 0,
            },
        }
    }

    /// 설정값의 유효성을 검증합니다.
    ///
    /// 파일 경로는 모든 유형에서, 호스트/사용자명/비밀번호는 원격
    /// 유형에서 필수입니다. 폴링 주기는 1-300초 범위를 벗어나면
    /// 거부됩니다.
    pub fn validate(&self) -> Result<(), LogwatchError> {
        if self.file_path.trim().is_empty() {
            return Err(LogwatchError::InvalidConfig {
                field: "file_path".to_owned(),
                reason: "file path is required".to_owned(),
            });
        }

        if self.poll_frequency < MIN_POLL_FREQUENCY || self.poll_frequency > MAX_POLL_FREQUENCY {
            return Err(LogwatchError::InvalidConfig {
                field: "poll_frequency".to_owned(),
                reason: format!(
                    "must be between {}s and {}s",
                    MIN_POLL_FREQUENCY.as_secs(),
                    MAX_POLL_FREQUENCY.as_secs()
                ),
            });
        }

        if self.source_type != SourceKind::Local {
            for (field, value) in [
                ("host", &self.host),
                ("username", &self.username),
                ("password", &self.password),
            ] {
                let missing = match value {
                    Some(v) => v.trim().is_empty(),
                    None => true,
                };
                if missing {
                    return Err(LogwatchError::InvalidConfig {
                        field: field.to_owned(),
                        reason: format!("required for {} sources", self.source_type),
                    });
                }
            }
        }

        Ok(())
    }
}

/// 서버 카탈로그 행
///
/// 카탈로그 질의가 서버별로 반환하는 로그 설정 필드입니다.
/// 모든 필드가 nullable이며, 소스 유형이 없거나 파일 경로가 빈 행은
/// 건너뜁니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// 서버 식별자
    pub server_id: ServerId,
    /// 소스 유형 ("local" | "sftp" | "ftp")
    pub log_source_type: Option<String>,
    /// 로그 파일 경로
    pub log_file_path: Option<String>,
    /// 원격 호스트
    pub log_host: Option<String>,
    /// 원격 포트
    pub log_port: Option<u16>,
    /// 원격 사용자명
    pub log_username: Option<String>,
    /// 원격 비밀번호
    pub log_password: Option<String>,
    /// 폴링 주기 (초)
    pub log_poll_frequency: Option<u64>,
    /// 파일 처음부터 읽을지 여부
    pub log_read_from_start: Option<bool>,
}

impl CatalogEntry {
    /// 카탈로그 행을 소스 설정으로 변환합니다.
    ///
    /// 소스 유형이 없거나 파일 경로가 비어 있으면 `None`을 반환합니다
    /// (해당 서버는 로그 수집을 사용하지 않음). 그 외에는 기본값을
    /// 채우고 검증한 설정을 반환합니다.
    pub fn into_config(self) -> Option<Result<LogSourceConfig, LogwatchError>> {
        let source_type = self.log_source_type?;
        let file_path = self.log_file_path?;
        if source_type.trim().is_empty() || file_path.trim().is_empty() {
            return None;
        }

        let source_type = match source_type.parse::<SourceKind>() {
            Ok(kind) => kind,
            Err(e) => return Some(Err(e)),
        };

        let config = LogSourceConfig {
            source_type,
            file_path,
            host: self.log_host,
            port: self.log_port,
            username: self.log_username,
            password: self.log_password,
            poll_frequency: self
                .log_poll_frequency
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_POLL_FREQUENCY),
            read_from_start: self.log_read_from_start.unwrap_or(false),
        };

        match config.validate() {
            Ok(()) => Some(Ok(config)),
            Err(e) => Some(Err(e)),
        }
    }
}

/// 서버 카탈로그 인터페이스
///
/// 로그 설정을 선언한 서버 목록을 반환하는 질의입니다. 실제 저장소는
/// 플랫폼 레이어가 소유하며, 수집 코어는 `connect_all`에서 이 trait을
/// 통해서만 접근합니다.
pub trait ServerCatalog: Send + Sync {
    /// 로그 설정이 있는 서버들의 카탈로그 행을 반환합니다.
    fn log_configured_servers(&self) -> BoxFuture<'_, Result<Vec<CatalogEntry>, GarrisonError>>;
}

/// 매니저 튜닝 설정
///
/// 서버별 설정이 아닌 수집 코어 전역의 동작 파라미터입니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogwatchSettings {
    /// 라인 채널 깊이 (소비자가 밀리면 소스가 백프레셔를 받음)
    pub line_channel_depth: usize,
    /// 중복 제거 윈도우 (캐시 TTL)
    pub dedupe_ttl: Duration,
    /// 재연결 백오프 기본 지연
    pub backoff_base: Duration,
    /// 재연결 백오프 상한
    pub backoff_cap: Duration,
    /// 종료 시 워처 드레인 한도
    pub shutdown_drain: Duration,
}

impl Default for LogwatchSettings {
    fn default() -> Self {
        Self {
            line_channel_depth: 256,
            dedupe_ttl: Duration::from_secs(300),
            backoff_base: Duration::from_secs(5),
            backoff_cap: Duration::from_secs(60),
            shutdown_drain: Duration::from_secs(2),
        }
    }
}

impl LogwatchSettings {
    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), LogwatchError> {
        if self.line_channel_depth == 0 {
            return Err(LogwatchError::InvalidConfig {
                field: "line_channel_depth".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.dedupe_ttl.is_zero() {
            return Err(LogwatchError::InvalidConfig {
                field: "dedupe_ttl".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.backoff_base.is_zero() || self.backoff_cap < self.backoff_base {
            return Err(LogwatchError::InvalidConfig {
                field: "backoff_base".to_owned(),
                reason: "base must be > 0 and not exceed the cap".to_owned(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_config_is_valid() {
        LogSourceConfig::local("/var/log/squad/SquadGame.log")
            .validate()
            .unwrap();
    }

    #[test]
    fn blank_file_path_is_rejected() {
        let config = LogSourceConfig::local("   ");
        let err = config.validate().unwrap_err();
        assert!(matches!(err, LogwatchError::InvalidConfig { field, .. } if field == "file_path"));
    }

    #[test]
    fn sftp_requires_credentials() {
        let mut config = LogSourceConfig::sftp("game.example.com", "steam", "hunter2", "/logs/s.log");
        config.validate().unwrap();

        config.password = None;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, LogwatchError::InvalidConfig { field, .. } if field == "password"));
    }

    #[test]
    fn ftp_requires_host() {
        let mut config = LogSourceConfig::ftp("game.example.com", "steam", "hunter2", "/logs/s.log");
        config.host = Some("  ".to_owned());
        let err = config.validate().unwrap_err();
        assert!(matches!(err, LogwatchError::InvalidConfig { field, .. } if field == "host"));
    }

    #[test]
    fn poll_frequency_outside_range_is_rejected() {
        let too_fast = LogSourceConfig::local("/l")
            .with_poll_frequency(Duration::from_millis(500));
        assert!(too_fast.validate().is_err());

        let too_slow = LogSourceConfig::local("/l").with_poll_frequency(Duration::from_secs(301));
        assert!(too_slow.validate().is_err());

        let edge = LogSourceConfig::local("/l").with_poll_frequency(Duration::from_secs(300));
        edge.validate().unwrap();
    }

    #[test]
    fn default_ports_per_kind() {
        assert_eq!(
            LogSourceConfig::sftp("h", "u", "p", "/l").resolved_port(),
            22
        );
        assert_eq!(LogSourceConfig::ftp("h", "u", "p", "/l").resolved_port(), 21);
        assert_eq!(
            LogSourceConfig::sftp("h", "u", "p", "/l")
                .with_port(2222)
                .resolved_port(),
            2222
        );
        // 0 포트는 미설정으로 취급
        assert_eq!(
            LogSourceConfig::ftp("h", "u", "p", "/l").with_port(0).resolved_port(),
            21
        );
    }

    #[test]
    fn debug_redacts_password() {
        let config = LogSourceConfig::sftp("h", "u", "secret-password", "/l");
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret-password"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn serialize_skips_password() {
        let config = LogSourceConfig::sftp("h", "u", "secret-password", "/l");
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret-password"));
    }

    #[test]
    fn source_kind_parse() {
        assert_eq!("local".parse::<SourceKind>().unwrap(), SourceKind::Local);
        assert_eq!(" SFTP ".parse::<SourceKind>().unwrap(), SourceKind::Sftp);
        assert!("scp".parse::<SourceKind>().is_err());
    }

    #[test]
    fn catalog_entry_without_source_type_is_skipped() {
        let entry = CatalogEntry {
            server_id: ServerId::new(),
            log_file_path: Some("/logs/s.log".to_owned()),
            ..Default::default()
        };
        assert!(entry.into_config().is_none());
    }

    #[test]
    fn catalog_entry_with_blank_path_is_skipped() {
        let entry = CatalogEntry {
            server_id: ServerId::new(),
            log_source_type: Some("local".to_owned()),
            log_file_path: Some("".to_owned()),
            ..Default::default()
        };
        assert!(entry.into_config().is_none());
    }

    #[test]
    fn catalog_entry_fills_defaults() {
        let entry = CatalogEntry {
            server_id: ServerId::new(),
            log_source_type: Some("sftp".to_owned()),
            log_file_path: Some("/logs/s.log".to_owned()),
            log_host: Some("game.example.com".to_owned()),
            log_username: Some("steam".to_owned()),
            log_password: Some("hunter2".to_owned()),
            ..Default::default()
        };
        let config = entry.into_config().unwrap().unwrap();
        assert_eq!(config.poll_frequency, DEFAULT_POLL_FREQUENCY);
        assert_eq!(config.resolved_port(), 22);
        assert!(!config.read_from_start);
    }

    #[test]
    fn catalog_entry_with_bad_source_type_errors() {
        let entry = CatalogEntry {
            server_id: ServerId::new(),
            log_source_type: Some("rsync".to_owned()),
            log_file_path: Some("/logs/s.log".to_owned()),
            ..Default::default()
        };
        assert!(entry.into_config().unwrap().is_err());
    }

    #[test]
    fn catalog_entry_missing_credentials_errors() {
        let entry = CatalogEntry {
            server_id: ServerId::new(),
            log_source_type: Some("ftp".to_owned()),
            log_file_path: Some("/logs/s.log".to_owned()),
            log_host: Some("game.example.com".to_owned()),
            ..Default::default()
        };
        assert!(entry.into_config().unwrap().is_err());
    }

    #[test]
    fn default_settings_are_valid() {
        LogwatchSettings::default().validate().unwrap();
    }

    #[test]
    fn settings_reject_inverted_backoff() {
        let settings = LogwatchSettings {
            backoff_base: Duration::from_secs(90),
            backoff_cap: Duration::from_secs(60),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
