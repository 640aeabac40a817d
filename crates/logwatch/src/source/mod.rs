//! 로그 소스 — 전송별 로그 라인 스트림
//!
//! # 소스 유형
//! - [`LocalFileSource`]: 로컬 파일 감시 (tail -f 방식 폴링)
//! - [`SftpSource`]: SSH 세션 위의 원격 파일 폴링
//! - [`FtpSource`]: FTP SIZE/REST 기반 증분 조회
//!
//! # 계약
//! `watch()`는 인스턴스당 최대 한 번 호출할 수 있으며, 원격 유형은
//! 이 시점에 전송 수립(다이얼/인증/핸들 열기)까지 수행합니다. 반환된
//! 채널이 닫히는 것이 전송 상실의 유일한 신호입니다. 컨텍스트 취소나
//! `close()` 후에는 제한된 시간 안에 채널이 닫힙니다.
//!
//! 채널은 작은 깊이의 바운디드 채널입니다. 소비자가 밀리면 소스의
//! 읽기 루프가 블로킹되어 백프레셔가 걸리며, 라인은 절대 조용히
//! 버려지지 않습니다.

pub mod ftp;
pub mod local;
pub mod sftp;

pub use ftp::FtpSource;
pub use local::LocalFileSource;
pub use sftp::SftpSource;

use std::future::Future;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use garrison_core::cache::BoxFuture;
use garrison_core::types::LogLine;

use crate::config::{LogSourceConfig, LogwatchSettings, SourceKind};
use crate::error::LogwatchError;

/// 취소 대기 중 한 번에 잠드는 슬라이스 (블로킹 워커용)
pub(crate) const BLOCKING_SLEEP_SLICE_MS: u64 = 200;

/// 로그 소스 계약
///
/// `{watch, close}` 능력만 갖는 단순한 인터페이스입니다. 상속 계층
/// 없이 팩토리에서 설정 유형에 따라 구현체를 선택합니다.
pub trait LogSource: Send + Sync {
    /// 소스 유형을 반환합니다.
    fn kind(&self) -> SourceKind;

    /// 로깅용 소스 설명을 반환합니다 (예: "local:/var/log/x.log").
    fn describe(&self) -> String;

    /// 로그 감시를 시작하고 라인 채널을 반환합니다.
    ///
    /// 인스턴스당 최대 한 번 호출할 수 있으며, 두 번째 호출은
    /// `AlreadyWatching`으로 실패합니다. 원격 유형은 여기서 전송을
    /// 수립하므로 다이얼/인증 실패가 동기적으로 반환됩니다.
    fn watch(
        &mut self,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<mpsc::Receiver<LogLine>, LogwatchError>> + Send;

    /// 소스를 닫습니다. 멱등합니다.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// dyn-compatible 로그 소스 trait
///
/// `LogSource`는 RPITIT를 사용하므로 `dyn LogSource`가 불가합니다.
/// 매니저는 `Box<dyn DynLogSource>`로 소스를 보관합니다.
/// `LogSource` 구현체는 blanket impl으로 자동으로 이 trait도 구현합니다.
pub trait DynLogSource: Send + Sync {
    /// 소스 유형을 반환합니다.
    fn kind(&self) -> SourceKind;

    /// 로깅용 소스 설명을 반환합니다.
    fn describe(&self) -> String;

    /// 로그 감시를 시작하고 라인 채널을 반환합니다.
    fn watch(
        &mut self,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<mpsc::Receiver<LogLine>, LogwatchError>>;

    /// 소스를 닫습니다.
    fn close(&mut self) -> BoxFuture<'_, ()>;
}

impl std::fmt::Debug for dyn DynLogSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.describe())
    }
}

impl<T: LogSource> DynLogSource for T {
    fn kind(&self) -> SourceKind {
        LogSource::kind(self)
    }

    fn describe(&self) -> String {
        LogSource::describe(self)
    }

    fn watch(
        &mut self,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<mpsc::Receiver<LogLine>, LogwatchError>> {
        Box::pin(LogSource::watch(self, cancel))
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(LogSource::close(self))
    }
}

/// 설정에 따라 로그 소스를 생성합니다.
///
/// 설정 검증이 먼저 수행되며, 필수 필드가 없으면 `InvalidConfig`로
/// 실패합니다. 생성 자체는 I/O를 하지 않습니다 — 전송 수립은
/// `watch()`에서 일어납니다.
pub fn build_source(
    config: &LogSourceConfig,
    settings: &LogwatchSettings,
) -> Result<Box<dyn DynLogSource>, LogwatchError> {
    config.validate()?;

    match config.source_type {
        SourceKind::Local => Ok(Box::new(LocalFileSource::new(config, settings))),
        SourceKind::Sftp => Ok(Box::new(SftpSource::new(config, settings))),
        SourceKind::Ftp => Ok(Box::new(FtpSource::new(config, settings))),
    }
}

/// 라인 조립기 — 바이트 청크를 완성된 라인으로 분리
///
/// 모든 전송이 공유합니다. 개행으로 끝나지 않은 꼬리는 다음 청크가
/// 도착할 때까지 버퍼링되고, CR은 제거됩니다. 빈 라인도 방출됩니다
/// (워처가 카운트 후 스킵).
#[derive(Debug, Default)]
pub(crate) struct LineAssembler {
    pending: Vec<u8>,
}

impl LineAssembler {
    /// 새 조립기를 생성합니다.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// 바이트 청크를 추가하고 완성된 라인들을 반환합니다.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(newline_at) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=newline_at).collect();
            line.pop(); // '\n'
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// 버퍼링된 부분 라인을 버립니다 (절단/로테이션 시).
    pub(crate) fn reset(&mut self) {
        self.pending.clear();
    }

    /// 버퍼링된 부분 라인이 있는지 확인합니다.
    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// 블로킹 워커에서 취소를 확인하며 잠듭니다.
///
/// 전체 대기 시간을 작은 슬라이스로 나누어 취소 후 1초 안에 깨어나는
/// 것을 보장합니다. 취소되었으면 `true`를 반환합니다.
pub(crate) fn blocking_sleep_cancellable(
    cancel: &CancellationToken,
    total: std::time::Duration,
) -> bool {
    let slice = std::time::Duration::from_millis(BLOCKING_SLEEP_SLICE_MS);
    let mut remaining = total;
    while !remaining.is_zero() {
        if cancel.is_cancelled() {
            return true;
        }
        let nap = remaining.min(slice);
        std::thread::sleep(nap);
        remaining -= nap;
    }
    cancel.is_cancelled()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn assembler_splits_complete_lines() {
        let mut assembler = LineAssembler::new();
        let lines = assembler.push(b"first\nsecond\n");
        assert_eq!(lines, vec!["first", "second"]);
        assert!(!assembler.has_pending());
    }

    #[test]
    fn assembler_buffers_partial_tail() {
        let mut assembler = LineAssembler::new();
        let lines = assembler.push(b"first\npart");
        assert_eq!(lines, vec!["first"]);
        assert!(assembler.has_pending());

        let lines = assembler.push(b"ial\n");
        assert_eq!(lines, vec!["partial"]);
        assert!(!assembler.has_pending());
    }

    #[test]
    fn assembler_strips_carriage_return() {
        let mut assembler = LineAssembler::new();
        let lines = assembler.push(b"windows line\r\nunix line\n");
        assert_eq!(lines, vec!["windows line", "unix line"]);
    }

    #[test]
    fn assembler_emits_empty_lines() {
        let mut assembler = LineAssembler::new();
        let lines = assembler.push(b"a\n\nb\n");
        assert_eq!(lines, vec!["a", "", "b"]);
    }

    #[test]
    fn assembler_reset_drops_pending() {
        let mut assembler = LineAssembler::new();
        assembler.push(b"no newline yet");
        assembler.reset();
        let lines = assembler.push(b"fresh\n");
        assert_eq!(lines, vec!["fresh"]);
    }

    #[test]
    fn assembler_handles_invalid_utf8() {
        let mut assembler = LineAssembler::new();
        let lines = assembler.push(&[0x68, 0x69, 0xFF, 0x0A]);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("hi"));
    }

    #[test]
    fn cancellable_sleep_wakes_early_on_cancel() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = Instant::now();
        assert!(blocking_sleep_cancellable(&cancel, Duration::from_secs(10)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn factory_rejects_invalid_config() {
        let config = LogSourceConfig::local("");
        let err = build_source(&config, &LogwatchSettings::default()).unwrap_err();
        assert!(matches!(err, LogwatchError::InvalidConfig { .. }));
    }

    #[test]
    fn factory_builds_each_kind() {
        let settings = LogwatchSettings::default();
        let local = build_source(&LogSourceConfig::local("/var/log/x.log"), &settings).unwrap();
        assert_eq!(local.kind(), SourceKind::Local);

        let sftp = build_source(
            &LogSourceConfig::sftp("h", "u", "p", "/var/log/x.log"),
            &settings,
        )
        .unwrap();
        assert_eq!(sftp.kind(), SourceKind::Sftp);

        let ftp = build_source(
            &LogSourceConfig::ftp("h", "u", "p", "/var/log/x.log"),
            &settings,
        )
        .unwrap();
        assert_eq!(ftp.kind(), SourceKind::Ftp);
    }
}
