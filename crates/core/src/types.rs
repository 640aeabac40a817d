//! 도메인 타입 — 시스템 전역에서 사용되는 공통 타입
//!
//! 플랫폼의 모든 서브시스템이 공유하는 기본 데이터 구조를 정의합니다.
//! 서버 식별자와 로그 라인은 수집 파이프라인 전체의 파티션 키와
//! 최소 처리 단위입니다.

use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 게임 서버 식별자
///
/// 플랫폼 전역에서 사용되는 불투명한 128비트 식별자입니다.
/// 모든 수집 상태와 이벤트는 이 키로 파티셔닝됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(Uuid);

impl ServerId {
    /// 새 서버 식별자를 생성합니다 (UUID v4).
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// 기존 UUID에서 식별자를 생성합니다.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// 내부 UUID를 반환합니다.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ServerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ServerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// 로그 라인 — 로그 소스가 방출하는 최소 단위
///
/// 개행 문자는 이미 제거된 상태입니다. 소스 방출 순서는 절대
/// 재정렬되지 않으며, 빈 라인도 그대로 전달됩니다 (워처가 카운트 후
/// 스킵합니다).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    /// 원본 텍스트 (개행 제거됨)
    pub raw_text: String,
    /// 수신 시각
    pub received_at: SystemTime,
}

impl LogLine {
    /// 현재 시각을 수신 시각으로 하는 새 로그 라인을 생성합니다.
    pub fn new(raw_text: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            received_at: SystemTime::now(),
        }
    }

    /// 공백만 있는 라인인지 확인합니다.
    pub fn is_blank(&self) -> bool {
        self.raw_text.trim().is_empty()
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw_text)
    }
}
