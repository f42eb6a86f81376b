//! 로그 파싱 모듈 -- BSD syslog 헤더 파서와 도메인 분류
//!
//! [`LogParser`]는 [`SyslogParser`]로 한 줄을 파싱한 뒤
//! [`classify`](crate::classify::classify)로 도메인을 결정합니다.
//!
//! # 사용 예시
//! ```ignore
//! use fleetwatch_detection::parser::LogParser;
//!
//! let parser = LogParser::new();
//! let (event, domain) = parser.parse_line("<38>Mar 15 10:00:01 gw-01 sshd[99]: Failed password", 2024)?;
//! assert_eq!(domain, fleetwatch_core::Domain::Security);
//! ```

pub mod syslog;

pub use syslog::SyslogParser;

use std::net::IpAddr;
use std::path::Path;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use fleetwatch_core::config::ParserConfig;
use fleetwatch_core::event::ParsedLogEvent;
use fleetwatch_core::types::Domain;

use crate::classify::classify;
use crate::error::DetectionError;

/// 연도로 인정하는 범위
const MIN_FILENAME_YEAR: i32 = 1970;
const MAX_FILENAME_YEAR: i32 = 2200;

/// 파싱 + 분류
#[derive(Debug, Clone, Default)]
pub struct LogParser {
    syslog: SyslogParser,
}

impl LogParser {
    /// 기본 설정으로 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// `[parser]` 설정 섹션으로 생성합니다.
    pub fn from_config(config: &ParserConfig) -> Self {
        Self {
            syslog: SyslogParser::new()
                .with_max_line_length(config.max_line_length)
                .with_utc_offset_minutes(config.utc_offset_minutes),
        }
    }

    /// 한 줄을 파싱하고 도메인을 결정합니다.
    pub fn parse_line(
        &self,
        line: &str,
        year: i32,
    ) -> Result<(ParsedLogEvent, Domain), DetectionError> {
        let event = self.syslog.parse(line, year)?;
        let domain = classify(&event.process_name);
        Ok((event, domain))
    }

    /// 수신 시각과 송신 IP를 지정하여 한 줄을 파싱합니다 (네트워크 수집용).
    pub fn parse_received(
        &self,
        line: &str,
        year: i32,
        received_at: DateTime<Utc>,
        source_ip: Option<IpAddr>,
    ) -> Result<(ParsedLogEvent, Domain), DetectionError> {
        let mut event = self.syslog.parse_at(line, year, received_at)?;
        event.source_ip = source_ip;
        let domain = classify(&event.process_name);
        Ok((event, domain))
    }
}

/// 파일 이름의 `YYYYMMDD` 토큰에서 연도를 추론합니다.
///
/// 8자리 숫자 구간이 실제 날짜일 때만 인정합니다.
pub fn infer_year_from_filename(path: &Path) -> Option<i32> {
    let name = path.file_name()?.to_str()?;
    let bytes = name.as_bytes();

    let mut start = 0;
    while start < bytes.len() {
        if !bytes[start].is_ascii_digit() {
            start += 1;
            continue;
        }
        let end = bytes[start..]
            .iter()
            .position(|b| !b.is_ascii_digit())
            .map_or(bytes.len(), |n| start + n);

        // 정확히 8자리인 숫자 구간만 검사
        if end - start == 8 {
            let run = &name[start..end];
            if let Ok(date) = NaiveDate::parse_from_str(run, "%Y%m%d") {
                let year = date.year();
                if (MIN_FILENAME_YEAR..=MAX_FILENAME_YEAR).contains(&year) {
                    return Some(year);
                }
            }
        }
        start = end;
    }
    None
}

/// 파일 이름에서 연도를 추론하고, 실패하면 현재 연도를 사용합니다.
pub fn year_for_file(path: &Path) -> i32 {
    infer_year_from_filename(path).unwrap_or_else(|| Utc::now().year())
}
