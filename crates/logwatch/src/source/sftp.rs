//! SFTP 로그 소스
//!
//! SSH 세션(비밀번호 인증만 지원) 위에서 원격 로그 파일을 폴링합니다.
//! `watch()` 시점에 다이얼/인증/원격 핸들 열기까지 수행하므로 전송과
//! 자격 증명 문제는 호출자에게 동기적으로 반환됩니다. 이후의 세션
//! 에러는 채널 닫힘으로 나타납니다.
//!
//! libssh2 클라이언트는 블로킹이므로 전체 폴링 루프는
//! `spawn_blocking` 워커에서 실행됩니다. 틱마다의 원격 stat이 유휴
//! 세션의 no-op 유지 역할을 겸하고, 프로토콜 수준 keepalive도 함께
//! 설정됩니다.

use std::io::{Read, Seek, SeekFrom};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use ssh2::Session;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use garrison_core::types::LogLine;

use super::{blocking_sleep_cancellable, LineAssembler};
use crate::config::{LogSourceConfig, LogwatchSettings, SourceKind};
use crate::error::LogwatchError;

/// TCP 다이얼 타임아웃
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
/// 세션 수립 전체 타임아웃 (다이얼 + 핸드셰이크 + 인증 + 핸들 열기)
const ESTABLISH_TIMEOUT: Duration = Duration::from_secs(10);
/// 세션 블로킹 작업 타임아웃 (밀리초)
const SESSION_OP_TIMEOUT_MS: u32 = 15_000;
/// 프로토콜 keepalive 간격 (초)
const KEEPALIVE_INTERVAL_SECS: u32 = 30;
/// 읽기 청크 크기 (바이트)
const READ_CHUNK_SIZE: usize = 16 * 1024;

/// SFTP 로그 소스
pub struct SftpSource {
    host: String,
    port: u16,
    username: String,
    password: String,
    file_path: String,
    poll_interval: Duration,
    read_from_start: bool,
    channel_depth: usize,
    started: bool,
    watch_cancel: Option<CancellationToken>,
}

impl SftpSource {
    /// 설정에서 새 SFTP 소스를 생성합니다.
    ///
    /// 필수 필드 검증은 팩토리([`super::build_source`])에서 수행됩니다.
    pub fn new(config: &LogSourceConfig, settings: &LogwatchSettings) -> Self {
        Self {
            host: config.host.clone().unwrap_or_default(),
            port: config.resolved_port(),
            username: config.username.clone().unwrap_or_default(),
            password: config.password.clone().unwrap_or_default(),
            file_path: config.file_path.clone(),
            poll_interval: config.poll_frequency,
            read_from_start: config.read_from_start,
            channel_depth: settings.line_channel_depth,
            started: false,
            watch_cancel: None,
        }
    }
}

impl super::LogSource for SftpSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Sftp
    }

    fn describe(&self) -> String {
        format!("sftp:{}@{}:{}{}", self.username, self.host, self.port, self.file_path)
    }

    async fn watch(
        &mut self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<LogLine>, LogwatchError> {
        if self.started {
            return Err(LogwatchError::AlreadyWatching);
        }
        self.started = true;

        let params = EstablishParams {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            file_path: self.file_path.clone(),
            read_from_start: self.read_from_start,
        };

        let established =
            tokio::time::timeout(ESTABLISH_TIMEOUT, tokio::task::spawn_blocking(move || {
                establish(&params)
            }))
            .await;

        let worker = match established {
            Err(_) => {
                return Err(LogwatchError::Timeout(format!(
                    "sftp session to {}:{}",
                    self.host, self.port
                )));
            }
            Ok(Err(join_err)) => {
                return Err(LogwatchError::TransportFailed {
                    source_type: "sftp".to_owned(),
                    reason: join_err.to_string(),
                });
            }
            Ok(Ok(result)) => result?,
        };

        let token = cancel.child_token();
        self.watch_cancel = Some(token.clone());

        let (tx, rx) = mpsc::channel(self.channel_depth);
        let poll_interval = self.poll_interval;
        info!(
            host = %self.host,
            port = self.port,
            path = %self.file_path,
            "watching sftp log file"
        );
        tokio::task::spawn_blocking(move || worker.run(tx, token, poll_interval));

        Ok(rx)
    }

    async fn close(&mut self) {
        if let Some(token) = self.watch_cancel.take() {
            token.cancel();
        }
    }
}

/// 세션 수립 파라미터 (블로킹 스레드로 이동)
struct EstablishParams {
    host: String,
    port: u16,
    username: String,
    password: String,
    file_path: String,
    read_from_start: bool,
}

/// 블로킹 스레드에서 세션을 수립하고 워커 상태를 구성합니다.
fn establish(params: &EstablishParams) -> Result<SftpWorker, LogwatchError> {
    let addr = (params.host.as_str(), params.port)
        .to_socket_addrs()
        .map_err(|e| transport_failed(e))?
        .next()
        .ok_or_else(|| LogwatchError::TransportFailed {
            source_type: "sftp".to_owned(),
            reason: format!("no address for {}:{}", params.host, params.port),
        })?;

    let stream = TcpStream::connect_timeout(&addr, DIAL_TIMEOUT).map_err(transport_failed)?;

    let mut session = Session::new().map_err(transport_failed)?;
    session.set_tcp_stream(stream);
    session.handshake().map_err(transport_failed)?;
    session
        .userauth_password(&params.username, &params.password)
        .map_err(|e| LogwatchError::AuthenticationFailed(e.to_string()))?;
    session.set_timeout(SESSION_OP_TIMEOUT_MS);
    session.set_keepalive(true, KEEPALIVE_INTERVAL_SECS);

    let sftp = session.sftp().map_err(transport_failed)?;
    let remote_path = Path::new(&params.file_path);
    let stat = sftp
        .stat(remote_path)
        .map_err(|e| map_remote_file_error(&params.file_path, &e))?;
    let size = stat.size.unwrap_or(0);
    let file = sftp
        .open(remote_path)
        .map_err(|e| map_remote_file_error(&params.file_path, &e))?;

    Ok(SftpWorker {
        _session: session,
        sftp,
        file,
        file_path: params.file_path.clone(),
        offset: if params.read_from_start { 0 } else { size },
    })
}

/// 실행 중인 SFTP 폴링 워커
struct SftpWorker {
    // Sftp/File 핸들의 수명 동안 세션은 살아 있어야 한다
    _session: Session,
    sftp: ssh2::Sftp,
    file: ssh2::File,
    file_path: String,
    offset: u64,
}

impl SftpWorker {
    /// 취소되거나 세션이 끊길 때까지 폴링합니다.
    fn run(mut self, tx: mpsc::Sender<LogLine>, cancel: CancellationToken, poll: Duration) {
        let mut assembler = LineAssembler::new();
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let size = match self.sftp.stat(Path::new(&self.file_path)) {
                Ok(stat) => stat.size.unwrap_or(0),
                Err(e) => {
                    warn!(path = %self.file_path, error = %e, "sftp stat failed, closing");
                    break;
                }
            };

            if size < self.offset {
                warn!(
                    path = %self.file_path,
                    size,
                    offset = self.offset,
                    "remote log truncation detected"
                );
                self.offset = 0;
                assembler.reset();
            }

            if size > self.offset && self.read_appended(&tx, &mut assembler).is_err() {
                break;
            }

            if blocking_sleep_cancellable(&cancel, poll) {
                break;
            }
        }
        debug!(path = %self.file_path, "sftp log watch stopped");
    }

    /// 현재 오프셋부터 EOF까지 읽어 완성된 라인을 방출합니다.
    fn read_appended(
        &mut self,
        tx: &mpsc::Sender<LogLine>,
        assembler: &mut LineAssembler,
    ) -> Result<(), ()> {
        if let Err(e) = self.file.seek(SeekFrom::Start(self.offset)) {
            warn!(path = %self.file_path, error = %e, "sftp seek failed");
            return Err(());
        }

        let mut buf = [0u8; READ_CHUNK_SIZE];
        loop {
            let n = match self.file.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!(path = %self.file_path, error = %e, "sftp read failed");
                    return Err(());
                }
            };
            self.offset += n as u64;

            for line in assembler.push(&buf[..n]) {
                if tx.blocking_send(LogLine::new(line)).is_err() {
                    return Err(());
                }
            }
        }
        Ok(())
    }
}

fn transport_failed(err: impl std::fmt::Display) -> LogwatchError {
    LogwatchError::TransportFailed {
        source_type: "sftp".to_owned(),
        reason: err.to_string(),
    }
}

/// 원격 파일 작업 에러를 도메인 에러로 변환합니다.
fn map_remote_file_error(path: &str, err: &ssh2::Error) -> LogwatchError {
    let msg = err.to_string().to_lowercase();
    if msg.contains("no such file") || msg.contains("not found") {
        LogwatchError::FileNotFound(path.to_owned())
    } else if msg.contains("permission") || msg.contains("denied") {
        LogwatchError::PermissionDenied(path.to_owned())
    } else {
        transport_failed(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::LogSource;

    fn refused_config() -> LogSourceConfig {
        // 닫힌 포트로 다이얼하면 즉시 거부된다
        LogSourceConfig::sftp("127.0.0.1", "steam", "hunter2", "/logs/s.log").with_port(1)
    }

    #[test]
    fn describe_contains_endpoint() {
        let source = SftpSource::new(&refused_config(), &LogwatchSettings::default());
        let desc = source.describe();
        assert!(desc.starts_with("sftp:"));
        assert!(desc.contains("127.0.0.1:1"));
    }

    #[tokio::test]
    async fn unreachable_host_fails_watch() {
        let mut source = SftpSource::new(&refused_config(), &LogwatchSettings::default());
        let err = source.watch(CancellationToken::new()).await.unwrap_err();
        assert!(
            matches!(err, LogwatchError::TransportFailed { .. } | LogwatchError::Timeout(_)),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn second_watch_call_fails() {
        let mut source = SftpSource::new(&refused_config(), &LogwatchSettings::default());
        let _ = source.watch(CancellationToken::new()).await;
        let err = source.watch(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, LogwatchError::AlreadyWatching));
    }

    #[test]
    fn remote_error_mapping_recognizes_missing_file() {
        let err = ssh2::Error::new(ssh2::ErrorCode::SFTP(2), "no such file");
        assert!(matches!(
            map_remote_file_error("/logs/s.log", &err),
            LogwatchError::FileNotFound(_)
        ));
    }
}
