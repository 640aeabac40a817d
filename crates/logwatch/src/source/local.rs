//! 로컬 파일 로그 소스
//!
//! 로컬 파일을 감시하며 추가된 라인을 방출합니다. `tail -f`와 유사한
//! 동작을 폴링(≥ 1초)으로 구현합니다.
//!
//! # 로테이션/절단 감지
//! - inode 변경 감지 (logrotate 등) -> 경로 재오픈, 오프셋 0
//! - 파일 크기 축소 감지 (truncation) -> 오프셋 0
//! - 경로 소실 시 제한된 재시도 후 채널 닫힘

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::{metadata, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use garrison_core::types::LogLine;

use super::LineAssembler;
use crate::config::{LogSourceConfig, LogwatchSettings, SourceKind, MIN_POLL_FREQUENCY};
use crate::error::LogwatchError;

/// 경로 소실 시 채널을 닫기 전까지 허용하는 연속 폴링 횟수
const REOPEN_RETRY_POLLS: u32 = 5;

/// 읽기 청크 크기 (바이트)
const READ_CHUNK_SIZE: usize = 16 * 1024;

/// 로컬 파일 로그 소스
///
/// `watch()` 시점에 파일을 열고, `read_from_start`가 아니면 파일 끝에
/// 위치를 잡습니다. 이후 폴링마다 새 바이트를 읽어 라인으로 방출합니다.
pub struct LocalFileSource {
    path: PathBuf,
    read_from_start: bool,
    poll_interval: Duration,
    channel_depth: usize,
    started: bool,
    watch_cancel: Option<CancellationToken>,
}

impl LocalFileSource {
    /// 설정에서 새 로컬 소스를 생성합니다.
    pub fn new(config: &LogSourceConfig, settings: &LogwatchSettings) -> Self {
        Self {
            path: PathBuf::from(&config.file_path),
            read_from_start: config.read_from_start,
            poll_interval: config.poll_frequency.max(MIN_POLL_FREQUENCY),
            channel_depth: settings.line_channel_depth,
            started: false,
            watch_cancel: None,
        }
    }
}

impl super::LogSource for LocalFileSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Local
    }

    fn describe(&self) -> String {
        format!("local:{}", self.path.display())
    }

    async fn watch(
        &mut self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<LogLine>, LogwatchError> {
        if self.started {
            return Err(LogwatchError::AlreadyWatching);
        }
        self.started = true;

        let file = File::open(&self.path)
            .await
            .map_err(|e| map_io_error(&self.path, &e))?;
        let meta = metadata(&self.path)
            .await
            .map_err(|e| map_io_error(&self.path, &e))?;

        let offset = if self.read_from_start { 0 } else { meta.len() };
        #[cfg(unix)]
        let inode = {
            use std::os::unix::fs::MetadataExt;
            meta.ino()
        };

        let token = cancel.child_token();
        self.watch_cancel = Some(token.clone());

        let (tx, rx) = mpsc::channel(self.channel_depth);
        let watch = FileWatch {
            path: self.path.clone(),
            file,
            offset,
            #[cfg(unix)]
            inode,
            assembler: LineAssembler::new(),
            tx,
            cancel: token,
            poll_interval: self.poll_interval,
            missing_polls: 0,
        };

        info!(path = %self.path.display(), offset, "watching local log file");
        tokio::spawn(watch.run());

        Ok(rx)
    }

    async fn close(&mut self) {
        if let Some(token) = self.watch_cancel.take() {
            token.cancel();
        }
    }
}

/// 실행 중인 감시 루프의 상태
struct FileWatch {
    path: PathBuf,
    file: File,
    offset: u64,
    #[cfg(unix)]
    inode: u64,
    assembler: LineAssembler,
    tx: mpsc::Sender<LogLine>,
    cancel: CancellationToken,
    poll_interval: Duration,
    missing_polls: u32,
}

impl FileWatch {
    /// 취소되거나 전송이 끊길 때까지 폴링합니다.
    ///
    /// 루프가 끝나면 송신측이 드롭되어 채널이 닫힙니다.
    async fn run(mut self) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            if self.tick().await.is_err() {
                break;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(self.poll_interval) => {}
            }
        }
        debug!(path = %self.path.display(), "local log watch stopped");
    }

    /// 한 번의 폴링 패스: 로테이션/절단 확인 후 새 바이트를 읽습니다.
    async fn tick(&mut self) -> Result<(), ()> {
        let meta = match metadata(&self.path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // 로테이션 도중일 수 있으므로 제한된 횟수만 기다린다
                self.missing_polls += 1;
                if self.missing_polls > REOPEN_RETRY_POLLS {
                    warn!(path = %self.path.display(), "log file gone, giving up");
                    return Err(());
                }
                return Ok(());
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to stat log file");
                return Err(());
            }
        };
        self.missing_polls = 0;

        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            if meta.ino() != self.inode {
                info!(path = %self.path.display(), "log file rotation detected, reopening");
                match File::open(&self.path).await {
                    Ok(file) => {
                        self.file = file;
                        self.inode = meta.ino();
                        self.offset = 0;
                        self.assembler.reset();
                    }
                    Err(e) => {
                        warn!(path = %self.path.display(), error = %e, "failed to reopen rotated file");
                        self.missing_polls += 1;
                        if self.missing_polls > REOPEN_RETRY_POLLS {
                            return Err(());
                        }
                        return Ok(());
                    }
                }
            }
        }

        if meta.len() < self.offset {
            warn!(
                path = %self.path.display(),
                size = meta.len(),
                offset = self.offset,
                "log file truncation detected"
            );
            self.offset = 0;
            self.assembler.reset();
        }

        if meta.len() == self.offset {
            return Ok(());
        }

        self.read_new_bytes().await
    }

    /// 현재 오프셋부터 EOF까지 읽어 완성된 라인을 방출합니다.
    async fn read_new_bytes(&mut self) -> Result<(), ()> {
        if let Err(e) = self.file.seek(SeekFrom::Start(self.offset)).await {
            warn!(path = %self.path.display(), error = %e, "seek failed");
            return Err(());
        }

        let mut buf = [0u8; READ_CHUNK_SIZE];
        loop {
            let n = match self.file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "read failed");
                    return Err(());
                }
            };
            self.offset += n as u64;

            for line in self.assembler.push(&buf[..n]) {
                // 채널이 가득 차면 여기서 백프레셔가 걸린다
                if self.tx.send(LogLine::new(line)).await.is_err() {
                    return Err(());
                }
            }
        }
        Ok(())
    }
}

/// I/O 에러를 도메인 에러로 변환합니다.
fn map_io_error(path: &Path, err: &std::io::Error) -> LogwatchError {
    match err.kind() {
        std::io::ErrorKind::NotFound => {
            LogwatchError::FileNotFound(path.display().to_string())
        }
        std::io::ErrorKind::PermissionDenied => {
            LogwatchError::PermissionDenied(path.display().to_string())
        }
        _ => LogwatchError::TransportFailed {
            source_type: "local".to_owned(),
            reason: err.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::LogSource;
    use std::io::Write;
    use tokio::time::timeout;

    const RECV_TIMEOUT: Duration = Duration::from_secs(5);

    fn config_for(path: &Path) -> LogSourceConfig {
        LogSourceConfig::local(path.to_string_lossy().to_string())
            .with_poll_frequency(Duration::from_secs(1))
    }

    async fn recv_line(rx: &mut mpsc::Receiver<LogLine>) -> LogLine {
        timeout(RECV_TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for line")
            .expect("channel closed unexpectedly")
    }

    #[tokio::test]
    async fn reads_existing_content_from_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("squad.log");
        std::fs::write(&path, "line one\nline two\n").unwrap();

        let config = config_for(&path).with_read_from_start(true);
        let mut source = LocalFileSource::new(&config, &LogwatchSettings::default());
        let mut rx = source.watch(CancellationToken::new()).await.unwrap();

        assert_eq!(recv_line(&mut rx).await.raw_text, "line one");
        assert_eq!(recv_line(&mut rx).await.raw_text, "line two");
        source.close().await;
    }

    #[tokio::test]
    async fn tails_appended_lines_only_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("squad.log");
        std::fs::write(&path, "old line\n").unwrap();

        let config = config_for(&path);
        let mut source = LocalFileSource::new(&config, &LogwatchSettings::default());
        let mut rx = source.watch(CancellationToken::new()).await.unwrap();

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "new line").unwrap();
        file.flush().unwrap();

        assert_eq!(recv_line(&mut rx).await.raw_text, "new line");
        source.close().await;
    }

    #[tokio::test]
    async fn second_watch_call_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("squad.log");
        std::fs::write(&path, "").unwrap();

        let config = config_for(&path);
        let mut source = LocalFileSource::new(&config, &LogwatchSettings::default());
        let _rx = source.watch(CancellationToken::new()).await.unwrap();

        let err = source.watch(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, LogwatchError::AlreadyWatching));
        source.close().await;
    }

    #[tokio::test]
    async fn missing_file_fails_watch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.log");

        let config = config_for(&path);
        let mut source = LocalFileSource::new(&config, &LogwatchSettings::default());
        let err = source.watch(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, LogwatchError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn close_closes_the_channel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("squad.log");
        std::fs::write(&path, "").unwrap();

        let config = config_for(&path);
        let mut source = LocalFileSource::new(&config, &LogwatchSettings::default());
        let mut rx = source.watch(CancellationToken::new()).await.unwrap();

        source.close().await;
        let closed = timeout(RECV_TIMEOUT, rx.recv()).await.unwrap();
        assert!(closed.is_none());
    }

    #[tokio::test]
    async fn parent_cancellation_closes_the_channel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("squad.log");
        std::fs::write(&path, "").unwrap();

        let cancel = CancellationToken::new();
        let config = config_for(&path);
        let mut source = LocalFileSource::new(&config, &LogwatchSettings::default());
        let mut rx = source.watch(cancel.clone()).await.unwrap();

        cancel.cancel();
        let closed = timeout(RECV_TIMEOUT, rx.recv()).await.unwrap();
        assert!(closed.is_none());
    }

    #[tokio::test]
    async fn truncation_restarts_from_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("squad.log");
        std::fs::write(&path, "a reasonably long line before truncation\n").unwrap();

        let config = config_for(&path).with_read_from_start(true);
        let mut source = LocalFileSource::new(&config, &LogwatchSettings::default());
        let mut rx = source.watch(CancellationToken::new()).await.unwrap();
        assert_eq!(
            recv_line(&mut rx).await.raw_text,
            "a reasonably long line before truncation"
        );

        // 더 짧은 내용으로 덮어쓰면 크기 축소로 절단이 감지된다
        std::fs::write(&path, "after\n").unwrap();
        assert_eq!(recv_line(&mut rx).await.raw_text, "after");
        source.close().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rotation_picks_up_the_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("squad.log");
        std::fs::write(&path, "pre-rotation\n").unwrap();

        let config = config_for(&path).with_read_from_start(true);
        let mut source = LocalFileSource::new(&config, &LogwatchSettings::default());
        let mut rx = source.watch(CancellationToken::new()).await.unwrap();
        assert_eq!(recv_line(&mut rx).await.raw_text, "pre-rotation");

        std::fs::rename(&path, dir.path().join("squad.log.1")).unwrap();
        std::fs::write(&path, "post-rotation\n").unwrap();

        assert_eq!(recv_line(&mut rx).await.raw_text, "post-rotation");
        source.close().await;
    }

    #[tokio::test]
    async fn partial_trailing_line_waits_for_completion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("squad.log");
        std::fs::write(&path, "").unwrap();

        let config = config_for(&path);
        let mut source = LocalFileSource::new(&config, &LogwatchSettings::default());
        let mut rx = source.watch(CancellationToken::new()).await.unwrap();

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "incomplete").unwrap();
        file.flush().unwrap();

        // 완성되지 않은 라인은 방출되지 않아야 한다
        let nothing = timeout(Duration::from_millis(1500), rx.recv()).await;
        assert!(nothing.is_err());

        writeln!(file, " now done").unwrap();
        file.flush().unwrap();
        assert_eq!(recv_line(&mut rx).await.raw_text, "incomplete now done");
        source.close().await;
    }
}
