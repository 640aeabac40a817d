//! FTP 로그 소스
//!
//! 전송 프로토콜의 SIZE 질의와 REST(부분 조회)로 틱마다 새로 추가된
//! 바이트 범위를 가져옵니다. 서버가 REST를 거부하면 전체 파일을
//! 받아 이전 꼬리와의 차이만 방출하는 방식으로 저하 동작합니다.
//!
//! 클라이언트는 블로킹이므로 폴링 루프는 `spawn_blocking` 워커에서
//! 실행됩니다.

use std::net::ToSocketAddrs;
use std::time::Duration;

use suppaftp::types::FileType;
use suppaftp::FtpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use garrison_core::types::LogLine;

use super::{blocking_sleep_cancellable, LineAssembler};
use crate::config::{LogSourceConfig, LogwatchSettings, SourceKind};
use crate::error::LogwatchError;

/// TCP 다이얼 타임아웃
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
/// 세션 수립 전체 타임아웃
const ESTABLISH_TIMEOUT: Duration = Duration::from_secs(10);

/// FTP 로그 소스
pub struct FtpSource {
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

impl FtpSource {
    /// 설정에서 새 FTP 소스를 생성합니다.
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

impl super::LogSource for FtpSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Ftp
    }

    fn describe(&self) -> String {
        format!("ftp:{}@{}:{}{}", self.username, self.host, self.port, self.file_path)
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
                    "ftp session to {}:{}",
                    self.host, self.port
                )));
            }
            Ok(Err(join_err)) => {
                return Err(LogwatchError::TransportFailed {
                    source_type: "ftp".to_owned(),
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
            "watching ftp log file"
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
fn establish(params: &EstablishParams) -> Result<FtpWorker, LogwatchError> {
    let addr = (params.host.as_str(), params.port)
        .to_socket_addrs()
        .map_err(transport_failed)?
        .next()
        .ok_or_else(|| LogwatchError::TransportFailed {
            source_type: "ftp".to_owned(),
            reason: format!("no address for {}:{}", params.host, params.port),
        })?;

    let mut stream = FtpStream::connect_timeout(addr, DIAL_TIMEOUT).map_err(transport_failed)?;
    stream
        .login(&params.username, &params.password)
        .map_err(|e| LogwatchError::AuthenticationFailed(e.to_string()))?;
    stream
        .transfer_type(FileType::Binary)
        .map_err(transport_failed)?;

    let size = stream
        .size(&params.file_path)
        .map_err(|e| map_remote_file_error(&params.file_path, &e))?;

    Ok(FtpWorker {
        stream,
        file_path: params.file_path.clone(),
        offset: if params.read_from_start { 0 } else { size },
        rest_supported: true,
    })
}

/// 실행 중인 FTP 폴링 워커
struct FtpWorker {
    stream: FtpStream,
    file_path: String,
    offset: usize,
    /// 서버가 REST를 지원하는지 (거부 시 전체 조회로 저하)
    rest_supported: bool,
}

impl FtpWorker {
    /// 취소되거나 세션이 끊길 때까지 폴링합니다.
    fn run(mut self, tx: mpsc::Sender<LogLine>, cancel: CancellationToken, poll: Duration) {
        let mut assembler = LineAssembler::new();
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let size = match self.stream.size(&self.file_path) {
                Ok(size) => size,
                Err(e) => {
                    warn!(path = %self.file_path, error = %e, "ftp size query failed, closing");
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

            if size > self.offset && self.fetch_appended(&tx, &mut assembler).is_err() {
                break;
            }

            if blocking_sleep_cancellable(&cancel, poll) {
                break;
            }
        }
        let _ = self.stream.quit();
        debug!(path = %self.file_path, "ftp log watch stopped");
    }

    /// 오프셋 이후의 바이트를 가져와 완성된 라인을 방출합니다.
    fn fetch_appended(
        &mut self,
        tx: &mpsc::Sender<LogLine>,
        assembler: &mut LineAssembler,
    ) -> Result<(), ()> {
        let appended: Vec<u8> = if self.rest_supported {
            match self.stream.resume_transfer(self.offset) {
                Ok(()) => match self.stream.retr_as_buffer(&self.file_path) {
                    Ok(cursor) => {
                        let data = cursor.into_inner();
                        self.offset += data.len();
                        data
                    }
                    Err(e) => {
                        warn!(path = %self.file_path, error = %e, "ftp partial retrieval failed");
                        return Err(());
                    }
                },
                Err(e) => {
                    info!(
                        path = %self.file_path,
                        error = %e,
                        "server rejected REST, degrading to full-file retrieval"
                    );
                    self.rest_supported = false;
                    return self.fetch_full(tx, assembler);
                }
            }
        } else {
            return self.fetch_full(tx, assembler);
        };

        self.emit(&appended, tx, assembler)
    }

    /// 전체 파일을 받아 이전 꼬리 이후 부분만 방출합니다 (REST 미지원 경로).
    fn fetch_full(
        &mut self,
        tx: &mpsc::Sender<LogLine>,
        assembler: &mut LineAssembler,
    ) -> Result<(), ()> {
        let data = match self.stream.retr_as_buffer(&self.file_path) {
            Ok(cursor) => cursor.into_inner(),
            Err(e) => {
                warn!(path = %self.file_path, error = %e, "ftp retrieval failed");
                return Err(());
            }
        };

        if data.len() < self.offset {
            // SIZE 질의와 실제 내용 사이의 절단
            self.offset = 0;
            assembler.reset();
        }
        let tail = data[self.offset..].to_vec();
        self.offset = data.len();
        self.emit(&tail, tx, assembler)
    }

    fn emit(
        &self,
        data: &[u8],
        tx: &mpsc::Sender<LogLine>,
        assembler: &mut LineAssembler,
    ) -> Result<(), ()> {
        for line in assembler.push(data) {
            if tx.blocking_send(LogLine::new(line)).is_err() {
                return Err(());
            }
        }
        Ok(())
    }
}

fn transport_failed(err: impl std::fmt::Display) -> LogwatchError {
    LogwatchError::TransportFailed {
        source_type: "ftp".to_owned(),
        reason: err.to_string(),
    }
}

/// 원격 파일 작업 에러를 도메인 에러로 변환합니다.
fn map_remote_file_error(path: &str, err: &suppaftp::FtpError) -> LogwatchError {
    let msg = err.to_string().to_lowercase();
    if msg.contains("550") || msg.contains("no such file") || msg.contains("not found") {
        LogwatchError::FileNotFound(path.to_owned())
    } else if msg.contains("530") || msg.contains("login") {
        LogwatchError::AuthenticationFailed(err.to_string())
    } else {
        transport_failed(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::LogSource;

    fn refused_config() -> LogSourceConfig {
        LogSourceConfig::ftp("127.0.0.1", "steam", "hunter2", "/logs/s.log").with_port(1)
    }

    #[test]
    fn describe_contains_endpoint() {
        let source = FtpSource::new(&refused_config(), &LogwatchSettings::default());
        let desc = source.describe();
        assert!(desc.starts_with("ftp:"));
        assert!(desc.contains("127.0.0.1:1"));
    }

    #[tokio::test]
    async fn unreachable_host_fails_watch() {
        let mut source = FtpSource::new(&refused_config(), &LogwatchSettings::default());
        let err = source.watch(CancellationToken::new()).await.unwrap_err();
        assert!(
            matches!(err, LogwatchError::TransportFailed { .. } | LogwatchError::Timeout(_)),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn second_watch_call_fails() {
        let mut source = FtpSource::new(&refused_config(), &LogwatchSettings::default());
        let _ = source.watch(CancellationToken::new()).await;
        let err = source.watch(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, LogwatchError::AlreadyWatching));
    }
}
