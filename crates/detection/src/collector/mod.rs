//! 로그 수집 모듈 -- 원시 로그 라인을 수집합니다.
//!
//! # 수집 소스
//! - [`FileCollector`]: 저장된 로그 파일 재생
//! - [`SyslogUdpCollector`]: UDP syslog 수신
//!
//! # 아키텍처
//! 각 수집기는 자체 tokio 태스크에서 실행되며, 수집된 원시 라인을
//! `tokio::mpsc::Sender<RawLine>` 채널로 파서 단계에 넘깁니다.

pub mod file;
pub mod syslog_udp;

pub use file::FileCollector;
pub use syslog_udp::{SyslogUdpCollector, SyslogUdpConfig};

use std::borrow::Cow;
use std::net::IpAddr;

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// 수집된 원시 로그 라인
///
/// 수집기가 생성하고, 파서가 소비하는 중간 데이터 형식입니다.
#[derive(Debug, Clone)]
pub struct RawLine {
    /// 원시 바이트 (줄바꿈 제외)
    pub data: Bytes,
    /// 수집 소스 식별자 (예: "file:/var/log/fleet/gw-01_20240315.log", "syslog_udp:0.0.0.0:514")
    pub source: String,
    /// 송신 장비 IP (네트워크 수집 시)
    pub source_ip: Option<IpAddr>,
    /// 수집 시각
    pub received_at: DateTime<Utc>,
}

impl RawLine {
    /// 새 RawLine을 생성합니다.
    pub fn new(data: Bytes, source: impl Into<String>) -> Self {
        Self {
            data,
            source: source.into(),
            source_ip: None,
            received_at: Utc::now(),
        }
    }

    /// 송신 IP를 설정합니다.
    pub fn with_source_ip(mut self, ip: IpAddr) -> Self {
        self.source_ip = Some(ip);
        self
    }

    /// UTF-8로 해석한 내용 (잘못된 바이트는 대체 문자)
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}

/// 수집기 상태
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectorStatus {
    /// 실행 대기 중
    Idle,
    /// 실행 중
    Running,
    /// 에러로 중단됨
    Error(String),
    /// 정상 종료됨
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_line_creation() {
        let raw = RawLine::new(Bytes::from_static(b"<13>Mar 15 10:00:00 h a: x"), "file:test.log");
        assert_eq!(raw.source, "file:test.log");
        assert!(raw.source_ip.is_none());
        assert_eq!(raw.text(), "<13>Mar 15 10:00:00 h a: x");
    }

    #[test]
    fn raw_line_lossy_text() {
        let raw = RawLine::new(Bytes::from_static(b"ok \xff end"), "t");
        assert_eq!(raw.text(), "ok \u{fffd} end");
    }

    #[test]
    fn raw_line_with_source_ip() {
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let raw = RawLine::new(Bytes::new(), "t").with_source_ip(ip);
        assert_eq!(raw.source_ip, Some(ip));
    }
}
