//! Fleetwatch 오케스트레이터
//!
//! 모든 도메인 에이전트의 Finding을 한 곳에서 받아 저장하고,
//! 같은 장비의 같은 문제에 대한 알림이 반복되지 않도록 걸러냅니다.
//!
//! # 모듈 구성
//!
//! - [`orchestrator`]: 생명주기와 이벤트 루프 조립
//! - [`aggregator`]: `active_findings`, `finding_cooldowns`, 보존 기간 정리
//! - [`store`]: Finding 영구 저장 (JSON Lines)
//! - [`registry`]: 에이전트 레지스트리와 생존 판정
//! - [`error`]: 도메인 에러 타입

pub mod aggregator;
pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod store;
mod worker;

pub use aggregator::{CleanupStats, FindingAggregator, NotifyDecision};
pub use error::OrchestratorError;
pub use orchestrator::{Orchestrator, OrchestratorBuilder, OrchestratorStats, StatsSnapshot};
pub use registry::{AgentRecord, AgentRegistry, AgentView, Liveness};
pub use store::{FindingStore, JsonlFindingStore, MemoryFindingStore};
