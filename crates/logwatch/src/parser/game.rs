//! 기본 게임 로그 파서
//!
//! 밀리터리 시뮬레이션 게임 서버 로그의 인식 대상 라인별 패턴입니다.
//! 모든 라인은 `[YYYY.MM.DD-HH.MM.SS:mmm][ chain]` 접두어로 시작하며,
//! 접두어의 타임스탬프가 이벤트 시각이 됩니다.
//!
//! 패턴은 전부 라인 시작에 앵커링되어 있고, 레지스트리는 접두어
//! 필터링을 하지 않으므로 (라인당 O(P)) 파서 수는 작게 유지합니다.

use garrison_core::event::EventKind;

use super::LineParser;
use crate::error::LogwatchError;

/// 공통 로그 라인 접두어: 타임스탬프 + 체인 ID
const LOG_PREFIX: &str = r"^\[(?P<time>\d{4}\.\d{2}\.\d{2}-\d{2}\.\d{2}\.\d{2}:\d{3})\]\[\s*\d+\]";

/// 기본 파서 세트를 컴파일합니다.
///
/// 순서가 곧 매칭 우선순위입니다. 현재 세트의 패턴은 서로 배타적이라
/// 순서가 결과를 바꾸지는 않지만, 겹치는 패턴을 추가한다면 더 구체적인
/// 것을 앞에 두어야 합니다.
pub(crate) fn default_parsers() -> Result<Vec<LineParser>, LogwatchError> {
    let defs: &[(&str, EventKind, &str)] = &[
        (
            "player_connected",
            EventKind::PlayerConnected,
            r"LogSquad: PostLogin: NewPlayer: BP_PlayerController_C .*PersistentLevel\.(?P<controller>[A-Za-z0-9_]+) \(IP: (?P<ip>[0-9.]+) \| Online IDs: EOS: (?P<eos_id>[0-9a-f]+) steam: (?P<steam_id>\d+)\)$",
        ),
        (
            "join_succeeded",
            EventKind::JoinSucceeded,
            r"LogNet: Join succeeded: (?P<player>.+)$",
        ),
        (
            "player_damaged",
            EventKind::PlayerDamaged,
            r"LogSquad: Player:(?P<victim>.+) ActualDamage=(?P<damage>[0-9.]+) from (?P<attacker>.+) \(Online IDs: EOS: (?P<attacker_eos_id>[0-9a-f]+) steam: (?P<attacker_steam_id>\d+) \| Player Controller ID: (?P<attacker_controller>[A-Za-z0-9_]+)\) caused by (?P<weapon>[A-Za-z0-9_-]+)$",
        ),
        (
            "player_wounded",
            EventKind::PlayerWounded,
            r"LogSquadTrace: \[DedicatedServer\]ASQSoldier::Wound\(\): Player:(?P<victim>.+) KillingDamage=(?P<damage>-?[0-9.]+) from (?P<attacker_controller>[A-Za-z0-9_]+) \(Online IDs: EOS: (?P<attacker_eos_id>[0-9a-f]+) steam: (?P<attacker_steam_id>\d+) \| Controller ID: [A-Za-z0-9_]+\) caused by (?P<weapon>[A-Za-z0-9_-]+)$",
        ),
        (
            "player_died",
            EventKind::PlayerDied,
            r"LogSquadTrace: \[DedicatedServer\]ASQSoldier::Die\(\): Player:(?P<victim>.+) KillingDamage=(?P<damage>-?[0-9.]+) from (?P<attacker_controller>[A-Za-z0-9_]+) \(Online IDs: EOS: (?P<attacker_eos_id>[0-9a-f]+) steam: (?P<attacker_steam_id>\d+) \| Controller ID: [A-Za-z0-9_]+\) caused by (?P<weapon>[A-Za-z0-9_-]+)$",
        ),
        (
            "player_revived",
            EventKind::PlayerRevived,
            r"LogSquad: (?P<reviver>.+) \(Online IDs: EOS: (?P<reviver_eos_id>[0-9a-f]+) steam: (?P<reviver_steam_id>\d+)\) has revived (?P<victim>.+) \(Online IDs: EOS: (?P<victim_eos_id>[0-9a-f]+) steam: (?P<victim_steam_id>\d+)\)\.$",
        ),
        (
            "player_possess",
            EventKind::PlayerPossess,
            r"LogSquadTrace: \[DedicatedServer\]ASQPlayerController::OnPossess\(\): PC=(?P<player>.+) \(Online IDs: EOS: (?P<eos_id>[0-9a-f]+) steam: (?P<steam_id>\d+)\) Pawn=(?P<pawn>[A-Za-z0-9_]+) FullPath=.+$",
        ),
        (
            "admin_broadcast",
            EventKind::AdminBroadcast,
            r"LogSquad: ADMIN COMMAND: Message broadcasted <(?P<message>.+)> from (?P<from>.+)$",
        ),
        (
            "deployable_damaged",
            EventKind::DeployableDamaged,
            r"LogSquadTrace: \[DedicatedServer\]ASQDeployable::TakeDamage\(\): (?P<deployable>[A-Za-z0-9_]+)_C_\d+: (?P<damage>[0-9.]+) damage attempt by causer (?P<weapon>[A-Za-z0-9_]+)_C_\d+ instigator (?P<attacker>.+) with damage type (?P<damage_type>[A-Za-z0-9_]+)_C health remaining (?P<health_remaining>-?[0-9.]+)$",
        ),
        (
            "tick_rate",
            EventKind::TickRate,
            r"LogSquad: USQGameState: Server Tick Rate: (?P<tick_rate>[0-9.]+)$",
        ),
        (
            "new_game",
            EventKind::NewGame,
            r"LogWorld: Bringing World /(?P<dlc>[A-Za-z0-9_]+)/Maps/(?P<map>[A-Za-z0-9_]+)/(?P<layer>[A-Za-z0-9_]+) up for play \(max tick rate (?P<max_tick_rate>\d+)\) at .+$",
        ),
        (
            "round_ended",
            EventKind::RoundEnded,
            r"LogSquadGameEvents: Display: Team (?P<team>\d), (?P<subfaction>.+) \( (?P<faction>.+) \) has won the match with (?P<tickets>\d+) Tickets on layer (?P<layer>.+) \(level (?P<level>.+)\)!$",
        ),
    ];

    let mut parsers = Vec::with_capacity(defs.len());
    for (id, kind, body) in defs {
        parsers.push(LineParser::new(
            *id,
            *kind,
            &format!("{LOG_PREFIX}{body}"),
        )?);
    }
    Ok(parsers)
}
