//! Fleetwatch 공통 크레이트
//!
//! 모든 프로세스가 공유하는 타입, 메시지, 버스 추상화, 에러, 설정을 제공합니다.
//!
//! # 메시지 흐름
//! ```text
//! raw line → parser → logs.<domain> → agent → findings.<domain> → orchestrator
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod event;
pub mod health;
pub mod metrics;
pub mod types;

// --- 주요 타입 re-export ---

// 에러
pub use error::{
    BusError, ConfigError, DetectionError, FleetwatchError, LifecycleError, ParseError,
    StorageError,
};

// 설정
pub use config::FleetwatchConfig;

// 이벤트
pub use event::{
    AgentHealth, AgentMetadata, DiscoveryMessage, DiscoveryRequest, Finding, Heartbeat,
    ParsedLogEvent,
};

// 버스
pub use bus::{BusMessage, ConnectionState, InMemoryBus, MessageBus, NatsBus, Subscription};

// 상태
pub use health::{BoxFuture, HealthStatus};

// 도메인 타입
pub use types::{AgentStatus, Domain, Severity};
