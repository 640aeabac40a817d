//! 패턴 파서 레지스트리 — 로그 라인에서 게임 이벤트 추출
//!
//! [`ParserRegistry`]는 프로세스 시작 시 컴파일되는 순서 있는
//! [`LineParser`] 목록입니다. 라인마다 순서대로 시도하여 첫 매칭을
//! 반환하며, 패턴이 겹칠 수 있을 때는 앞선 파서가 이깁니다. 라인당
//! 비용은 파서 수에 비례하므로 파서는 적게, 패턴은 앵커링하여
//! 유지합니다.
//!
//! 파서는 순수하고 무상태입니다. 매칭 실패는 에러가 아니라 단지
//! 이벤트가 없는 것입니다.

pub mod game;

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use chrono::NaiveDateTime;
use regex::Regex;

use garrison_core::event::{EventKind, GameEvent};
use garrison_core::types::{LogLine, ServerId};

use crate::error::LogwatchError;

/// 라인 파서 하나 — 컴파일된 패턴, 이벤트 종류, ID
///
/// 페이로드는 패턴의 명명 캡처 그룹에서 추출됩니다. `time` 그룹은
/// 게임 로그의 대괄호 타임스탬프로 예약되어 있으며 페이로드에
/// 포함되지 않습니다.
#[derive(Debug)]
pub struct LineParser {
    id: String,
    kind: EventKind,
    pattern: Regex,
}

impl LineParser {
    /// 새 파서를 생성합니다. 패턴은 여기서 한 번만 컴파일됩니다.
    pub fn new(
        id: impl Into<String>,
        kind: EventKind,
        pattern: &str,
    ) -> Result<Self, LogwatchError> {
        Ok(Self {
            id: id.into(),
            kind,
            pattern: Regex::new(pattern)?,
        })
    }

    /// 파서 ID를 반환합니다.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 이벤트 종류를 반환합니다.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// 라인을 매칭해 이벤트를 추출합니다.
    fn try_match(&self, server_id: ServerId, line: &LogLine) -> Option<GameEvent> {
        let caps = self.pattern.captures(&line.raw_text)?;

        let mut payload = BTreeMap::new();
        for name in self.pattern.capture_names().flatten() {
            if name == "time" {
                continue;
            }
            if let Some(m) = caps.name(name) {
                payload.insert(name.to_owned(), m.as_str().to_owned());
            }
        }

        let timestamp = caps
            .name("time")
            .and_then(|m| parse_log_timestamp(m.as_str()))
            .unwrap_or(line.received_at);

        Some(GameEvent {
            server_id,
            kind: self.kind,
            timestamp,
            payload,
            raw_line: line.raw_text.clone(),
            parser_id: self.id.clone(),
        })
    }
}

/// 파서 레지스트리 — 순서 있는 파서 목록
pub struct ParserRegistry {
    parsers: Vec<LineParser>,
}

impl ParserRegistry {
    /// 빈 레지스트리를 생성합니다.
    pub fn new() -> Self {
        Self {
            parsers: Vec::new(),
        }
    }

    /// 기본 게임 로그 파서 세트로 레지스트리를 생성합니다.
    pub fn with_defaults() -> Result<Self, LogwatchError> {
        Ok(Self {
            parsers: game::default_parsers()?,
        })
    }

    /// 파서를 등록합니다. 등록 순서대로 시도됩니다.
    pub fn register(mut self, parser: LineParser) -> Self {
        self.parsers.push(parser);
        self
    }

    /// 등록된 파서 수를 반환합니다.
    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    /// 레지스트리가 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }

    /// 라인을 파서 순서대로 매칭합니다.
    ///
    /// 첫 번째로 매칭된 파서의 이벤트를 반환하고, 매칭이 없으면
    /// `None`을 반환합니다.
    pub fn match_line(&self, server_id: ServerId, line: &LogLine) -> Option<GameEvent> {
        self.parsers
            .iter()
            .find_map(|parser| parser.try_match(server_id, line))
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// 게임 로그의 대괄호 타임스탬프를 파싱합니다.
///
/// 형식: `2025.08.02-12.34.56:789` (UTC, 마지막 세 자리는 밀리초).
pub(crate) fn parse_log_timestamp(s: &str) -> Option<SystemTime> {
    let (base, millis) = s.split_once(':')?;
    let naive = NaiveDateTime::parse_from_str(base, "%Y.%m.%d-%H.%M.%S").ok()?;
    let millis: u64 = millis.parse().ok()?;
    SystemTime::from(naive.and_utc()).checked_add(Duration::from_millis(millis))
}
