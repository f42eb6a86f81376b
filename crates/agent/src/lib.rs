//! Fleetwatch 도메인 에이전트
//!
//! 한 도메인의 규칙 테이블로 만든 [`RuleEngine`](fleetwatch_detection::RuleEngine)을
//! 메시지 버스에 연결합니다. 도메인 차이는 코드가 아니라 규칙 테이블로 표현됩니다.
//!
//! # 메시지 흐름
//! ```text
//! logs.<domain> ──> DomainAgent ──> findings.<domain>
//!                      │
//! agent.discovery.broadcast ──> agent.discovery.response
//!                      │
//!                      └──> agent.heartbeat.<domain> (주기적)
//! ```

pub mod agent;
pub mod error;
pub mod state;
mod worker;

pub use agent::{DomainAgent, DomainAgentBuilder};
pub use error::AgentError;
pub use state::{AgentSettings, AgentStats};
