//! BSD syslog 헤더 파서
//!
//! 장비가 남기는 한 줄 로그를 [`ParsedLogEvent`]로 변환합니다.
//!
//! # 헤더 형식
//! ```text
//! <PRI>Mon DD HH:MM:SS hostname program[pid]: message
//! ```
//! - `PRI`는 0-191 범위의 숫자 (facility * 8 + severity)
//! - 헤더에 연도가 없으므로 호출자가 연도를 넘겨줍니다
//! - `[pid]`는 생략 가능
//!
//! # 사용 예시
//! ```ignore
//! use fleetwatch_detection::parser::SyslogParser;
//!
//! let parser = SyslogParser::new();
//! let event = parser.parse("<38>Mar 15 10:00:01 gw-01 dropbear[1234]: Bad password attempt", 2024)?;
//! assert_eq!(event.process_name, "dropbear");
//! assert_eq!(event.pid, Some(1234));
//! ```

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use fleetwatch_core::event::ParsedLogEvent;

use crate::error::DetectionError;

/// 유효한 최대 PRI 값
/// facility 최댓값 23 * 8 + severity 최댓값 7 = 191
const MAX_SYSLOG_PRI: u8 = 191;

/// 기본 최대 라인 길이 (64KB)
const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// BSD syslog 파서
///
/// 상태가 없고 입력이 같으면 `event_id`/`arrival_ts`를 제외한 결과가 항상 같습니다.
#[derive(Debug, Clone)]
pub struct SyslogParser {
    /// 최대 허용 라인 길이 (바이트)
    max_line_length: usize,
    /// 로그 타임스탬프의 시간대
    offset: FixedOffset,
}

impl SyslogParser {
    /// UTC 기준, 64KB 제한으로 파서를 생성합니다.
    pub fn new() -> Self {
        Self {
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            offset: utc_offset(),
        }
    }

    /// 최대 라인 길이를 설정합니다.
    pub fn with_max_line_length(mut self, size: usize) -> Self {
        self.max_line_length = size;
        self
    }

    /// 로그 타임스탬프의 UTC 오프셋(분)을 설정합니다.
    ///
    /// 범위를 벗어난 값은 UTC로 취급합니다.
    pub fn with_utc_offset_minutes(mut self, minutes: i32) -> Self {
        self.offset = minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(utc_offset);
        self
    }

    /// 한 줄을 파싱합니다. 수집 시각은 현재 시각입니다.
    pub fn parse(&self, line: &str, year: i32) -> Result<ParsedLogEvent, DetectionError> {
        self.parse_at(line, year, Utc::now())
    }

    /// 수집 시각을 지정하여 한 줄을 파싱합니다.
    pub fn parse_at(
        &self,
        line: &str,
        year: i32,
        arrival_ts: DateTime<Utc>,
    ) -> Result<ParsedLogEvent, DetectionError> {
        if line.len() > self.max_line_length {
            return Err(DetectionError::TooLarge {
                size: line.len(),
                max: self.max_line_length,
            });
        }

        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Err(parse_err(0, "empty input"));
        }

        let mut cursor = Cursor::new(line);

        let priority = cursor.priority()?;
        let month = cursor.month()?;
        cursor.skip_spaces();
        let day = cursor.day()?;
        cursor.skip_spaces();
        let time = cursor.time()?;
        cursor.skip_spaces();
        let hostname = cursor.token("hostname")?;
        cursor.skip_spaces();
        let (process_name, pid) = cursor.tag()?;
        let message = cursor.rest();

        let date = NaiveDate::from_ymd_opt(year, month, day)
            .ok_or_else(|| parse_err(0, format!("invalid date: {year}-{month:02}-{day:02}")))?;
        let original_ts = self
            .offset
            .from_local_datetime(&date.and_time(time))
            .single()
            .ok_or_else(|| parse_err(0, "ambiguous local timestamp"))?
            .with_timezone(&Utc);

        let mut event = ParsedLogEvent::new(original_ts, hostname, process_name, message);
        event.arrival_ts = arrival_ts;
        event.pid = pid;
        event.priority = priority;
        Ok(event)
    }
}

impl Default for SyslogParser {
    fn default() -> Self {
        Self::new()
    }
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}

fn parse_err(offset: usize, reason: impl Into<String>) -> DetectionError {
    DetectionError::Parse {
        offset,
        reason: reason.into(),
    }
}

/// 헤더 필드를 앞에서부터 소비하는 커서
struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn skip_spaces(&mut self) {
        let rest = self.remaining();
        let trimmed = rest.trim_start_matches(' ');
        self.pos += rest.len() - trimmed.len();
    }

    /// 다음 공백 전까지의 토큰
    fn token(&mut self, what: &str) -> Result<&'a str, DetectionError> {
        let rest = self.remaining();
        let end = rest.find(' ').unwrap_or(rest.len());
        if end == 0 {
            return Err(parse_err(self.pos, format!("missing {what}")));
        }
        self.pos += end;
        Ok(&rest[..end])
    }

    /// `<PRI>`
    fn priority(&mut self) -> Result<u8, DetectionError> {
        let rest = self.remaining();
        if !rest.starts_with('<') {
            return Err(parse_err(self.pos, "missing PRI field (expected '<')"));
        }
        let close = rest
            .find('>')
            .ok_or_else(|| parse_err(self.pos, "unterminated PRI field"))?;
        let digits = &rest[1..close];
        if digits.is_empty() || digits.len() > 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(parse_err(self.pos + 1, format!("invalid PRI value: '{digits}'")));
        }
        let pri: u16 = digits
            .parse()
            .map_err(|_| parse_err(self.pos + 1, format!("invalid PRI value: '{digits}'")))?;
        if pri > u16::from(MAX_SYSLOG_PRI) {
            return Err(parse_err(
                self.pos + 1,
                format!("PRI value {pri} out of valid range (0-{MAX_SYSLOG_PRI})"),
            ));
        }
        self.pos += close + 1;
        // 범위 검증을 통과했으므로 u8에 들어감
        Ok(pri as u8)
    }

    /// `Mon` (영문 3글자 월 이름)
    fn month(&mut self) -> Result<u32, DetectionError> {
        let start = self.pos;
        let token = self.token("month")?;
        month_number(token).ok_or_else(|| parse_err(start, format!("invalid month: '{token}'")))
    }

    /// `DD` (1-2자리, 공백 패딩 허용)
    fn day(&mut self) -> Result<u32, DetectionError> {
        let start = self.pos;
        let token = self.token("day")?;
        if token.len() > 2 || !token.bytes().all(|b| b.is_ascii_digit()) {
            return Err(parse_err(start, format!("invalid day: '{token}'")));
        }
        token
            .parse()
            .map_err(|_| parse_err(start, format!("invalid day: '{token}'")))
    }

    /// `HH:MM:SS`
    fn time(&mut self) -> Result<NaiveTime, DetectionError> {
        let start = self.pos;
        let token = self.token("time")?;
        NaiveTime::parse_from_str(token, "%H:%M:%S")
            .map_err(|e| parse_err(start, format!("invalid time '{token}': {e}")))
    }

    /// `program[pid]:`
    fn tag(&mut self) -> Result<(&'a str, Option<u32>), DetectionError> {
        let start = self.pos;
        let rest = self.remaining();
        let colon = rest
            .find(':')
            .ok_or_else(|| parse_err(start, "missing ':' after program tag"))?;
        let tag = &rest[..colon];
        if tag.is_empty() || tag.contains(' ') {
            return Err(parse_err(start, format!("invalid program tag: '{tag}'")));
        }

        let (program, pid) = match tag.find('[') {
            Some(open) => {
                let Some(pid_str) = tag[open + 1..].strip_suffix(']') else {
                    return Err(parse_err(start + open, "unterminated pid field"));
                };
                let pid = pid_str
                    .parse::<u32>()
                    .map_err(|_| parse_err(start + open + 1, format!("invalid pid: '{pid_str}'")))?;
                (&tag[..open], Some(pid))
            }
            None => (tag, None),
        };
        if program.is_empty() {
            return Err(parse_err(start, "empty program name"));
        }

        self.pos += colon + 1;
        Ok((program, pid))
    }

    /// 태그 뒤의 메시지 (선행 공백 하나 제거)
    fn rest(&mut self) -> &'a str {
        let rest = self.remaining();
        self.pos = self.input.len();
        rest.strip_prefix(' ').unwrap_or(rest)
    }
}

fn month_number(name: &str) -> Option<u32> {
    let month = match name.to_ascii_lowercase().as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn arrival() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn parse_full_header() {
        let parser = SyslogParser::new();
        let event = parser
            .parse_at(
                "<38>Mar 15 10:00:01 gw-01 dropbear[1234]: Bad password attempt for 'root'",
                2024,
                arrival(),
            )
            .unwrap();

        assert_eq!(event.priority, 38);
        assert_eq!(
            event.original_ts,
            Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 1).unwrap()
        );
        assert_eq!(event.hostname, "gw-01");
        assert_eq!(event.process_name, "dropbear");
        assert_eq!(event.pid, Some(1234));
        assert_eq!(event.message, "Bad password attempt for 'root'");
        assert_eq!(event.arrival_ts, arrival());
        assert_eq!(event.source_ip, None);
        assert!(event.structured_fields.is_empty());
    }

    #[test]
    fn parse_without_pid() {
        let parser = SyslogParser::new();
        let event = parser
            .parse("<4>Mar 15 10:00:01 ap-03 kernel: [12345.678] Out of memory: Kill process 42", 2024)
            .unwrap();
        assert_eq!(event.process_name, "kernel");
        assert_eq!(event.pid, None);
        assert_eq!(event.message, "[12345.678] Out of memory: Kill process 42");
    }

    #[test]
    fn parse_space_padded_day() {
        let parser = SyslogParser::new();
        let event = parser
            .parse("<30>Mar  5 09:15:00 gw-01 netifd: Interface 'wan' is now up", 2024)
            .unwrap();
        assert_eq!(
            event.original_ts,
            Utc.with_ymd_and_hms(2024, 3, 5, 9, 15, 0).unwrap()
        );
        assert_eq!(event.process_name, "netifd");
    }

    #[test]
    fn parse_empty_message() {
        let parser = SyslogParser::new();
        let event = parser.parse("<13>Jan 01 00:00:00 host app:", 2024).unwrap();
        assert_eq!(event.message, "");
    }

    #[test]
    fn parse_strips_trailing_newline() {
        let parser = SyslogParser::new();
        let event = parser
            .parse("<13>Jan 01 00:00:00 host app: hello\r\n", 2024)
            .unwrap();
        assert_eq!(event.message, "hello");
    }

    #[test]
    fn utc_offset_is_applied() {
        let parser = SyslogParser::new().with_utc_offset_minutes(9 * 60);
        let event = parser.parse("<13>Mar 15 09:00:00 host app: x", 2024).unwrap();
        assert_eq!(
            event.original_ts,
            Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn year_rolls_into_timestamp() {
        let parser = SyslogParser::new();
        let event = parser.parse("<13>Feb 29 12:00:00 host app: leap", 2024).unwrap();
        assert_eq!(event.original_ts.format("%Y-%m-%d").to_string(), "2024-02-29");

        let err = parser.parse("<13>Feb 29 12:00:00 host app: leap", 2023).unwrap_err();
        assert!(err.to_string().contains("invalid date"));
    }

    #[test]
    fn parse_empty_input() {
        let parser = SyslogParser::new();
        assert!(parser.parse("", 2024).is_err());
        assert!(parser.parse("   \n", 2024).is_err());
    }

    #[test]
    fn parse_missing_pri() {
        let parser = SyslogParser::new();
        let err = parser.parse("Mar 15 10:00:01 host app: msg", 2024).unwrap_err();
        assert!(err.to_string().contains("PRI"));
    }

    #[test]
    fn parse_priority_overflow() {
        let parser = SyslogParser::new();
        assert!(parser.parse("<192>Mar 15 10:00:01 host app: msg", 2024).is_err());
        assert!(parser.parse("<999>Mar 15 10:00:01 host app: msg", 2024).is_err());
        assert!(parser.parse("<191>Mar 15 10:00:01 host app: msg", 2024).is_ok());
    }

    #[test]
    fn parse_negative_priority() {
        let parser = SyslogParser::new();
        assert!(parser.parse("<-1>Mar 15 10:00:01 host app: msg", 2024).is_err());
    }

    #[test]
    fn parse_invalid_month() {
        let parser = SyslogParser::new();
        let err = parser.parse("<13>Foo 15 10:00:01 host app: msg", 2024).unwrap_err();
        assert!(err.to_string().contains("invalid month"));
    }

    #[test]
    fn parse_invalid_day() {
        let parser = SyslogParser::new();
        assert!(parser.parse("<13>Mar 32 10:00:01 host app: msg", 2024).is_err());
        assert!(parser.parse("<13>Mar 1x 10:00:01 host app: msg", 2024).is_err());
    }

    #[test]
    fn parse_invalid_time() {
        let parser = SyslogParser::new();
        assert!(parser.parse("<13>Mar 15 25:00:01 host app: msg", 2024).is_err());
        assert!(parser.parse("<13>Mar 15 10:00 host app: msg", 2024).is_err());
    }

    #[test]
    fn parse_missing_colon_after_tag() {
        let parser = SyslogParser::new();
        let err = parser
            .parse("<13>Mar 15 10:00:01 host no colon anywhere", 2024)
            .unwrap_err();
        assert!(err.to_string().contains("':'"));
    }

    #[test]
    fn parse_tag_with_space_is_rejected() {
        let parser = SyslogParser::new();
        assert!(parser.parse("<13>Mar 15 10:00:01 host two words: msg", 2024).is_err());
    }

    #[test]
    fn parse_invalid_pid() {
        let parser = SyslogParser::new();
        assert!(parser.parse("<13>Mar 15 10:00:01 host app[abc]: msg", 2024).is_err());
        assert!(parser.parse("<13>Mar 15 10:00:01 host app[12: msg", 2024).is_err());
        assert!(parser.parse("<13>Mar 15 10:00:01 host [12]: msg", 2024).is_err());
    }

    #[test]
    fn parse_too_large() {
        let parser = SyslogParser::new().with_max_line_length(32);
        let line = format!("<13>Mar 15 10:00:01 host app: {}", "x".repeat(64));
        let err = parser.parse(&line, 2024).unwrap_err();
        assert!(matches!(err, DetectionError::TooLarge { .. }));
    }

    #[test]
    fn parse_unicode_message() {
        let parser = SyslogParser::new();
        let event = parser
            .parse("<13>Mar 15 10:00:01 host app: 디스크 오류 발생", 2024)
            .unwrap();
        assert_eq!(event.message, "디스크 오류 발생");
    }

    #[test]
    fn colon_inside_message_is_preserved() {
        let parser = SyslogParser::new();
        let event = parser
            .parse("<13>Mar 15 10:00:01 host hostapd: wlan0: STA aa:bb:cc:dd:ee:ff deauthenticated", 2024)
            .unwrap();
        assert_eq!(event.process_name, "hostapd");
        assert_eq!(event.message, "wlan0: STA aa:bb:cc:dd:ee:ff deauthenticated");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn parse_arbitrary_input_does_not_panic(line in ".{0,300}") {
                let parser = SyslogParser::new();
                let _ = parser.parse(&line, 2024);
            }

            #[test]
            fn parse_valid_priority_range(pri in 0u8..=191) {
                let parser = SyslogParser::new();
                let line = format!("<{pri}>Mar 15 10:00:01 host app: msg");
                let event = parser.parse(&line, 2024);
                prop_assert!(event.is_ok());
                prop_assert_eq!(event.unwrap().priority, pri);
            }

            #[test]
            fn parse_is_deterministic(
                host in "[a-z][a-z0-9-]{0,20}",
                prog in "[a-z_]{1,16}",
                pid in proptest::option::of(0u32..100_000),
                msg in "[ -~]{0,120}",
            ) {
                let parser = SyslogParser::new();
                let tag = match pid {
                    Some(pid) => format!("{prog}[{pid}]"),
                    None => prog.clone(),
                };
                let line = format!("<30>Jul  4 23:59:59 {host} {tag}: {msg}");
                let a = parser.parse_at(&line, 2024, arrival()).unwrap();
                let b = parser.parse_at(&line, 2024, arrival()).unwrap();
                prop_assert_ne!(&a.event_id, &b.event_id);
                prop_assert_eq!(a.original_ts, b.original_ts);
                prop_assert_eq!(&a.hostname, &host);
                prop_assert_eq!(&a.process_name, &prog);
                prop_assert_eq!(a.pid, pid);
                prop_assert_eq!(&a.message, &b.message);
            }
        }
    }
}
