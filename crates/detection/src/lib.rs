//! Fleetwatch 탐지 크레이트
//!
//! 장비 로그를 파싱/분류하고, 도메인별 규칙으로 이상 징후를 찾습니다.
//!
//! # 모듈 구성
//!
//! - [`collector`]: 원시 로그 라인 수집 (파일 재생, syslog UDP)
//! - [`parser`]: BSD syslog 헤더 파서와 파싱 + 분류 프런트엔드
//! - [`classify`]: 프로세스 이름 기반 도메인 분류
//! - [`rule`]: 슬라이딩 윈도우 임계치 규칙 엔진과 규칙 테이블 로더
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! Collectors -> LogParser -> classify -> logs.<domain> -> RuleEngine -> findings.<domain>
//!     |             |                                        |
//!  File/UDP     BSD syslog                         windows + cooldowns
//! ```

pub mod classify;
pub mod collector;
pub mod error;
pub mod parser;
pub mod rule;

// --- 주요 타입 re-export ---

// 에러
pub use error::DetectionError;

// 파서
pub use classify::classify;
pub use parser::{LogParser, SyslogParser, infer_year_from_filename, year_for_file};

// 규칙 엔진
pub use rule::{LoadReport, RuleDefinition, RuleEngine, RuleLoader, RuleTable, TimeBasis};

// 수집기
pub use collector::{FileCollector, RawLine, SyslogUdpCollector, SyslogUdpConfig};
