//! 이벤트 시스템 — 파싱된 게임 이벤트와 프로세스 전역 이벤트 버스
//!
//! 로그 수집 코어가 인식한 게임 이벤트는 [`GameEvent`]로 표현되며,
//! [`EventBus`]를 통해 다운스트림 소비자(플러그인, 분석 저장소,
//! 플레이어 트래커)로 팬아웃됩니다. [`EventFingerprint`]는 중복 제거에
//! 사용되는 안정적인 128비트 해시입니다.

use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::types::ServerId;

/// 핑거프린트 계산에 사용하는 UUID v5 네임스페이스
const FINGERPRINT_NAMESPACE: Uuid = Uuid::from_u128(0x6b1d_4a0e_9c3f_4b82_a1d7_52e0_8f4c_19a6);

/// 이벤트 버스 기본 채널 용량
const DEFAULT_BUS_CAPACITY: usize = 1024;

/// 인식 가능한 게임 이벤트 종류
///
/// 게임 서버 로그에서 추출되는 이벤트의 닫힌 집합입니다.
/// 각 종류는 분석 저장소의 이벤트 테이블 하나에 대응합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// 관리자 방송
    AdminBroadcast,
    /// 설치물 피해
    DeployableDamaged,
    /// 접속 성공 (네트워크 레이어)
    JoinSucceeded,
    /// 플레이어 접속 완료 (컨트롤러 생성)
    PlayerConnected,
    /// 플레이어 피해
    PlayerDamaged,
    /// 플레이어 사망
    PlayerDied,
    /// 플레이어 빙의 (폰 전환)
    PlayerPossess,
    /// 플레이어 소생
    PlayerRevived,
    /// 플레이어 중상
    PlayerWounded,
    /// 서버 틱레이트 보고
    TickRate,
    /// 새 라운드 시작 (맵 로드)
    NewGame,
    /// 라운드 종료
    RoundEnded,
}

impl EventKind {
    /// snake_case 문자열 표현을 반환합니다.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdminBroadcast => "admin_broadcast",
            Self::DeployableDamaged => "deployable_damaged",
            Self::JoinSucceeded => "join_succeeded",
            Self::PlayerConnected => "player_connected",
            Self::PlayerDamaged => "player_damaged",
            Self::PlayerDied => "player_died",
            Self::PlayerPossess => "player_possess",
            Self::PlayerRevived => "player_revived",
            Self::PlayerWounded => "player_wounded",
            Self::TickRate => "tick_rate",
            Self::NewGame => "new_game",
            Self::RoundEnded => "round_ended",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 파싱된 게임 이벤트
///
/// 로그 라인 하나가 패턴 파서에 매칭되어 생성됩니다.
/// `timestamp`는 라인에 포함된 시각이 파싱 가능하면 그 값을,
/// 아니면 라인 수신 시각을 사용합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameEvent {
    /// 이벤트가 발생한 서버
    pub server_id: ServerId,
    /// 이벤트 종류
    pub kind: EventKind,
    /// 이벤트 시각
    pub timestamp: SystemTime,
    /// 파서가 추출한 명명 필드
    pub payload: BTreeMap<String, String>,
    /// 원본 로그 라인
    pub raw_line: String,
    /// 매칭된 파서 ID
    pub parser_id: String,
}

impl GameEvent {
    /// 중복 제거용 핑거프린트를 계산합니다.
    ///
    /// `(server_id, kind, 정규화된 payload)` 위에서 안정적입니다.
    /// payload 키는 정렬 순서로 순회되고 (BTreeMap), 값은 공백이
    /// 정규화됩니다. 타임스탬프와 원본 라인은 포함되지 않습니다.
    pub fn fingerprint(&self) -> EventFingerprint {
        let mut canonical = String::with_capacity(64 + self.raw_line.len());
        canonical.push_str(&self.server_id.to_string());
        canonical.push('\n');
        canonical.push_str(self.kind.as_str());
        for (key, value) in &self.payload {
            canonical.push('\n');
            canonical.push_str(key);
            canonical.push('=');
            push_normalized(&mut canonical, value);
        }
        EventFingerprint(Uuid::new_v5(&FINGERPRINT_NAMESPACE, canonical.as_bytes()))
    }
}

impl fmt::Display for GameEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GameEvent[{}] server={} parser={}",
            self.kind, self.server_id, self.parser_id,
        )
    }
}

/// 연속 공백을 한 칸으로 축약하여 이어 붙입니다.
fn push_normalized(out: &mut String, value: &str) {
    let mut first = true;
    for word in value.split_whitespace() {
        if !first {
            out.push(' ');
        }
        out.push_str(word);
        first = false;
    }
}

/// 이벤트 핑거프린트 — 의미적으로 동일한 이벤트를 식별하는 128비트 해시
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventFingerprint(Uuid);

impl EventFingerprint {
    /// 내부 UUID를 반환합니다.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for EventFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// 프로세스 전역 이벤트 버스
///
/// 승인된 이벤트를 모든 구독자에게 팬아웃합니다. `tokio::sync::broadcast`
/// 기반이므로 발행은 절대 블로킹되지 않으며, 따라가지 못하는 구독자는
/// `Lagged`를 관측하고 이벤트를 잃습니다 — 파이프라인은 영향받지 않습니다.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GameEvent>,
}

impl EventBus {
    /// 지정된 채널 용량으로 새 버스를 생성합니다.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// 이벤트를 발행합니다.
    ///
    /// 구독자가 없으면 이벤트는 조용히 버려집니다.
    pub fn publish(&self, event: GameEvent) {
        // 수신자가 없을 때의 SendError는 정상 상황이다
        let _ = self.tx.send(event);
    }

    /// 새 구독자를 등록합니다.
    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.tx.subscribe()
    }

    /// 현재 구독자 수를 반환합니다.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(kind: EventKind, payload: &[(&str, &str)]) -> GameEvent {
        let server_id = "3f6c0b1a-8d42-4f0e-9a31-5b7de8c90d12".parse().unwrap();
        GameEvent {
            server_id,
            kind,
            timestamp: SystemTime::now(),
            payload: payload
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
            raw_line: "raw".to_owned(),
            parser_id: "test".to_owned(),
        }
    }

    #[test]
    fn event_kind_display_is_snake_case() {
        assert_eq!(EventKind::PlayerWounded.to_string(), "player_wounded");
        assert_eq!(EventKind::TickRate.to_string(), "tick_rate");
    }

    #[test]
    fn event_kind_serde_roundtrip() {
        let json = serde_json::to_string(&EventKind::AdminBroadcast).unwrap();
        assert_eq!(json, "\"admin_broadcast\"");
        let kind: EventKind = serde_json::from_str(&json).unwrap();
        assert_eq!(kind, EventKind::AdminBroadcast);
    }

    #[test]
    fn fingerprint_is_stable() {
        let a = sample_event(EventKind::PlayerDied, &[("victim", "Alpha"), ("weapon", "AK74")]);
        let b = sample_event(EventKind::PlayerDied, &[("victim", "Alpha"), ("weapon", "AK74")]);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_ignores_timestamp_and_raw_line() {
        let mut a = sample_event(EventKind::TickRate, &[("tick_rate", "35.5")]);
        let mut b = sample_event(EventKind::TickRate, &[("tick_rate", "35.5")]);
        a.raw_line = "one".to_owned();
        b.raw_line = "two".to_owned();
        b.timestamp = SystemTime::UNIX_EPOCH;
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_normalizes_whitespace() {
        let a = sample_event(EventKind::AdminBroadcast, &[("message", "hello   world")]);
        let b = sample_event(EventKind::AdminBroadcast, &[("message", " hello world ")]);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_differs_by_kind() {
        let a = sample_event(EventKind::PlayerDied, &[("victim", "Alpha")]);
        let b = sample_event(EventKind::PlayerWounded, &[("victim", "Alpha")]);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_differs_by_payload() {
        let a = sample_event(EventKind::PlayerDied, &[("victim", "Alpha")]);
        let b = sample_event(EventKind::PlayerDied, &[("victim", "Bravo")]);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[tokio::test]
    async fn bus_fans_out_to_all_subscribers() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(sample_event(EventKind::TickRate, &[("tick_rate", "40.0")]));

        assert_eq!(rx1.recv().await.unwrap().kind, EventKind::TickRate);
        assert_eq!(rx2.recv().await.unwrap().kind, EventKind::TickRate);
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new(4);
        bus.publish(sample_event(EventKind::NewGame, &[]));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn slow_subscriber_lags_without_blocking_publisher() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();

        // 채널 용량을 넘겨서 발행해도 publish는 블로킹되지 않는다
        for i in 0..8 {
            bus.publish(sample_event(EventKind::TickRate, &[("tick_rate", &i.to_string())]));
        }

        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(lost)) => assert!(lost > 0),
            other => panic!("expected lagged receiver, got {other:?}"),
        }
    }

    #[test]
    fn events_are_send_sync() {
        fn assert_send_sync<T: Send + Sync + 'static>() {}
        assert_send_sync::<GameEvent>();
        assert_send_sync::<EventBus>();
    }
}
