//! 온디맨드 전송 헬스 프로브와 상태 페이로드 조립
//!
//! 상태 엔드포인트가 요청할 때 서버의 설정된 로그 전송으로 최소한의
//! 왕복 한 번을 수행합니다 (전체 타임아웃 5초). 프로브는 항상 자체
//! 연결을 사용하며 실행 중인 수집 연결의 전송 상태를 건드리지
//! 않습니다.
//!
//! 게임 포트의 UDP 도달성 검사와 상태 페이로드 조립도 여기 있습니다.
//! 원격 콘솔 상태는 별도 협력자가 공급하므로 호출자가 값으로
//! 전달합니다.

use std::fmt;
use std::net::ToSocketAddrs;
use std::path::Path;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use ssh2::Session;
use suppaftp::FtpStream;
use tokio::io::AsyncReadExt;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

use garrison_core::metrics::{
    LABEL_SOURCE_TYPE, PROBE_DURATION_SECONDS, PROBE_FAILURES_TOTAL,
};

use crate::config::{LogSourceConfig, SourceKind};
use crate::manager::ConnectionStatus;

/// 로그 전송 프로브 전체 타임아웃
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
/// 게임 포트 UDP 프로브 타임아웃
const UDP_PROBE_TIMEOUT: Duration = Duration::from_millis(1500);

/// 프로브 실패 사유 (정규화됨)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeReason {
    /// 파일/디렉토리 권한 거부
    PermissionDenied,
    /// 원격 인증 실패
    AuthenticationFailed,
    /// 로그 파일 없음
    LogFileNotFound,
    /// 시간 초과
    Timeout,
    /// 연결 실패 (거부/도달 불가/리셋)
    ConnectionFailed,
    /// 분류되지 않은 프로브 실패
    ProbeFailed,
    /// 원격 자격 증명 누락
    MissingCredentials,
    /// 로그 경로가 디렉토리
    LogPathIsDirectory,
    /// 지원하지 않는 소스 유형
    UnsupportedSourceType,
    /// 로그 전송이 설정되지 않음
    NotConfigured,
    /// 프로브가 요청되지 않음
    ProbeNotRequested,
    /// 수집 연결이 끊어져 있음
    LogwatcherDisconnected,
}

impl ProbeReason {
    /// snake_case 문자열 표현을 반환합니다.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission_denied",
            Self::AuthenticationFailed => "authentication_failed",
            Self::LogFileNotFound => "log_file_not_found",
            Self::Timeout => "timeout",
            Self::ConnectionFailed => "connection_failed",
            Self::ProbeFailed => "probe_failed",
            Self::MissingCredentials => "missing_credentials",
            Self::LogPathIsDirectory => "log_path_is_directory",
            Self::UnsupportedSourceType => "unsupported_source_type",
            Self::NotConfigured => "not_configured",
            Self::ProbeNotRequested => "probe_not_requested",
            Self::LogwatcherDisconnected => "logwatcher_disconnected",
        }
    }
}

impl fmt::Display for ProbeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 프로브 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    /// 전송이 건강한지 여부
    pub healthy: bool,
    /// 비정상일 때의 사유
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ProbeReason>,
}

impl ProbeOutcome {
    /// 정상 결과를 생성합니다.
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            reason: None,
        }
    }

    /// 비정상 결과를 생성합니다.
    pub fn unhealthy(reason: ProbeReason) -> Self {
        Self {
            healthy: false,
            reason: Some(reason),
        }
    }
}

/// 설정된 로그 전송을 프로브합니다.
///
/// 유형별 최소 왕복: 로컬은 stat + 열기 + 1바이트 읽기 (EOF 허용),
/// SFTP는 다이얼 + 인증 + 원격 stat, FTP는 다이얼 + 로그인 + SIZE.
/// 전체가 5초 타임아웃 아래에서 수행됩니다.
pub async fn probe_transport(config: &LogSourceConfig) -> ProbeOutcome {
    let started = Instant::now();
    let source_type = config.source_type.as_str();

    let outcome = match timeout(PROBE_TIMEOUT, probe_inner(config)).await {
        Ok(outcome) => outcome,
        Err(_) => ProbeOutcome::unhealthy(ProbeReason::Timeout),
    };

    histogram!(PROBE_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    if !outcome.healthy {
        counter!(PROBE_FAILURES_TOTAL, LABEL_SOURCE_TYPE => source_type).increment(1);
    }
    debug!(
        source_type,
        healthy = outcome.healthy,
        reason = ?outcome.reason,
        "log transport probe finished"
    );
    outcome
}

async fn probe_inner(config: &LogSourceConfig) -> ProbeOutcome {
    match config.source_type {
        SourceKind::Local => probe_local(Path::new(&config.file_path)).await,
        SourceKind::Sftp => probe_sftp(config).await,
        SourceKind::Ftp => probe_ftp(config).await,
    }
}

/// 로컬 파일 프로브: stat + 열기 + 1바이트 읽기.
async fn probe_local(path: &Path) -> ProbeOutcome {
    let meta = match tokio::fs::metadata(path).await {
        Ok(meta) => meta,
        Err(e) => return ProbeOutcome::unhealthy(classify_io_error(&e)),
    };

    if meta.is_dir() {
        return ProbeOutcome::unhealthy(ProbeReason::LogPathIsDirectory);
    }

    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) => return ProbeOutcome::unhealthy(classify_io_error(&e)),
    };

    // EOF(빈 파일)는 정상이다 — read는 0을 반환할 뿐 에러가 아니다
    let mut buf = [0u8; 1];
    match file.read(&mut buf).await {
        Ok(_) => ProbeOutcome::healthy(),
        Err(e) => ProbeOutcome::unhealthy(classify_io_error(&e)),
    }
}

/// SFTP 프로브: 다이얼 + 비밀번호 인증 + 원격 stat.
async fn probe_sftp(config: &LogSourceConfig) -> ProbeOutcome {
    let (host, username, password) = match remote_credentials(config) {
        Some(creds) => creds,
        None => return ProbeOutcome::unhealthy(ProbeReason::MissingCredentials),
    };
    let port = config.resolved_port();
    let file_path = config.file_path.clone();

    let result = tokio::task::spawn_blocking(move || -> Result<(), ProbeReason> {
        let addr = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| classify_io_error(&e))?
            .next()
            .ok_or(ProbeReason::ConnectionFailed)?;
        let stream = std::net::TcpStream::connect_timeout(&addr, PROBE_TIMEOUT)
            .map_err(|e| classify_io_error(&e))?;

        let mut session = Session::new().map_err(|e| classify_error_text(&e.to_string()))?;
        session.set_tcp_stream(stream);
        session
            .handshake()
            .map_err(|e| classify_error_text(&e.to_string()))?;
        session
            .userauth_password(&username, &password)
            .map_err(|_| ProbeReason::AuthenticationFailed)?;

        let sftp = session
            .sftp()
            .map_err(|e| classify_error_text(&e.to_string()))?;
        sftp.stat(Path::new(&file_path))
            .map_err(|e| classify_error_text(&e.to_string()))?;
        Ok(())
    })
    .await;

    match result {
        Ok(Ok(())) => ProbeOutcome::healthy(),
        Ok(Err(reason)) => ProbeOutcome::unhealthy(reason),
        Err(_) => ProbeOutcome::unhealthy(ProbeReason::ProbeFailed),
    }
}

/// FTP 프로브: 다이얼 + 로그인 + SIZE 질의.
async fn probe_ftp(config: &LogSourceConfig) -> ProbeOutcome {
    let (host, username, password) = match remote_credentials(config) {
        Some(creds) => creds,
        None => return ProbeOutcome::unhealthy(ProbeReason::MissingCredentials),
    };
    let port = config.resolved_port();
    let file_path = config.file_path.clone();

    let result = tokio::task::spawn_blocking(move || -> Result<(), ProbeReason> {
        let addr = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| classify_io_error(&e))?
            .next()
            .ok_or(ProbeReason::ConnectionFailed)?;

        let mut stream = FtpStream::connect_timeout(addr, PROBE_TIMEOUT)
            .map_err(|e| classify_error_text(&e.to_string()))?;
        stream
            .login(&username, &password)
            .map_err(|_| ProbeReason::AuthenticationFailed)?;
        stream
            .size(&file_path)
            .map_err(|e| classify_error_text(&e.to_string()))?;
        let _ = stream.quit();
        Ok(())
    })
    .await;

    match result {
        Ok(Ok(())) => ProbeOutcome::healthy(),
        Ok(Err(reason)) => ProbeOutcome::unhealthy(reason),
        Err(_) => ProbeOutcome::unhealthy(ProbeReason::ProbeFailed),
    }
}

/// 원격 설정에서 공백이 아닌 자격 증명을 꺼냅니다.
fn remote_credentials(config: &LogSourceConfig) -> Option<(String, String, String)> {
    let host = config.host.as_deref()?.trim();
    let username = config.username.as_deref()?.trim();
    let password = config.password.as_deref()?.trim();
    if host.is_empty() || username.is_empty() || password.is_empty() {
        return None;
    }
    Some((host.to_owned(), username.to_owned(), password.to_owned()))
}

/// I/O 에러 종류를 프로브 사유로 분류합니다.
fn classify_io_error(err: &std::io::Error) -> ProbeReason {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::PermissionDenied => ProbeReason::PermissionDenied,
        ErrorKind::NotFound => ProbeReason::LogFileNotFound,
        ErrorKind::TimedOut => ProbeReason::Timeout,
        ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
            ProbeReason::ConnectionFailed
        }
        _ => classify_error_text(&err.to_string()),
    }
}

/// 에러 메시지 텍스트를 프로브 사유로 분류합니다.
///
/// 타입 정보가 없는 원격 클라이언트 에러의 마지막 수단입니다.
fn classify_error_text(text: &str) -> ProbeReason {
    let text = text.to_lowercase();
    if text.contains("permission") || text.contains("denied") {
        ProbeReason::PermissionDenied
    } else if text.contains("auth") || text.contains("login") || text.contains("password") {
        ProbeReason::AuthenticationFailed
    } else if text.contains("no such file") || text.contains("not found") || text.contains("cannot find")
    {
        ProbeReason::LogFileNotFound
    } else if text.contains("timeout") || text.contains("timed out") || text.contains("deadline") {
        ProbeReason::Timeout
    } else if text.contains("refused") || text.contains("unreachable") || text.contains("reset") {
        ProbeReason::ConnectionFailed
    } else {
        ProbeReason::ProbeFailed
    }
}

/// 게임 포트의 UDP 도달성을 검사합니다.
///
/// 데이터그램 하나를 보내고 잠깐 기다립니다. UDP는 무연결이므로 읽기
/// 타임아웃(ICMP 에러 없음)은 도달 가능으로 칩니다.
pub async fn probe_game_port(host: &str, port: u16) -> bool {
    let socket = match UdpSocket::bind("0.0.0.0:0").await {
        Ok(socket) => socket,
        Err(_) => return false,
    };
    if socket.connect((host, port)).await.is_err() {
        return false;
    }
    if socket.send(&[0u8]).await.is_err() {
        return false;
    }

    let mut buf = [0u8; 1];
    match timeout(UDP_PROBE_TIMEOUT, socket.recv(&mut buf)).await {
        Ok(Ok(_)) => true,
        // ICMP 포트 도달 불가가 돌아온 경우
        Ok(Err(_)) => false,
        // 응답 없음 — UDP에서는 정상
        Err(_) => true,
    }
}

/// 로그 전송 상태 페이로드
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogTransportStatus {
    /// 로그 수집이 설정되어 있는지
    pub enabled: bool,
    /// 설정된 소스 유형
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_type: Option<&'static str>,
    /// 전송이 건강한지
    pub healthy: bool,
    /// 비정상일 때의 사유
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ProbeReason>,
}

/// 로그 전송 상태를 조립합니다.
///
/// 수집 연결이 살아 있으면 그 사실만으로 건강으로 보고합니다.
/// 프로브가 요청된 경우에는 실제 전송 프로브 결과가 우선합니다.
/// 프로브 없이 끊어져 있으면 사유는 `logwatcher_disconnected`
/// (수집 상태를 아는 경우) 또는 `probe_not_requested`입니다.
pub async fn log_transport_status(
    config: Option<&LogSourceConfig>,
    supervisor: Option<&ConnectionStatus>,
    include_probe: bool,
) -> LogTransportStatus {
    let config = match config {
        Some(config) if !config.file_path.trim().is_empty() => config,
        _ => {
            return LogTransportStatus {
                enabled: false,
                source_type: None,
                healthy: false,
                reason: Some(ProbeReason::NotConfigured),
            };
        }
    };

    let mut status = LogTransportStatus {
        enabled: true,
        source_type: Some(config.source_type.as_str()),
        healthy: false,
        reason: None,
    };

    if let Some(supervisor) = supervisor {
        status.healthy = supervisor.connected;
        if !status.healthy && !include_probe {
            status.reason = Some(ProbeReason::LogwatcherDisconnected);
        }
    }

    if !include_probe {
        if !status.healthy && status.reason.is_none() {
            status.reason = Some(ProbeReason::ProbeNotRequested);
        }
        return status;
    }

    let outcome = probe_transport(config).await;
    status.healthy = outcome.healthy;
    status.reason = outcome.reason;
    status
}

/// 서버 온라인 상태 페이로드
///
/// `rcon`은 원격 콘솔 협력자가 공급한 값을 그대로 싣습니다.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerOnlineStatus {
    /// 게임 포트 UDP 도달성
    pub game_port: bool,
    /// 원격 콘솔 상태 (협력자 공급)
    pub rcon: bool,
    /// 로그 전송 상태
    pub log_transport: LogTransportStatus,
}

/// 서버 온라인 상태를 조립합니다.
pub async fn server_online_status(
    game_host: &str,
    game_port: u16,
    rcon: bool,
    config: Option<&LogSourceConfig>,
    supervisor: Option<&ConnectionStatus>,
    include_probe: bool,
) -> ServerOnlineStatus {
    ServerOnlineStatus {
        game_port: probe_game_port(game_host, game_port).await,
        rcon,
        log_transport: log_transport_status(config, supervisor, include_probe).await,
    }
}
