//! (규칙, 상관 키)별 슬라이딩 윈도우 상태

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

/// 윈도우 안의 한 번의 발생
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    /// 발생 시각
    pub at: DateTime<Utc>,
    /// 매칭된 텍스트
    pub matched_text: String,
    /// 근거 이벤트 ID
    pub event_id: String,
}

/// 규칙 런타임 상태
///
/// `occurrences`는 시간순으로 정렬되어 있고, 평가 직후에는
/// 모든 항목이 `time_window_seconds` 이내입니다.
#[derive(Debug, Clone)]
pub struct RuleRuntimeState {
    occurrences: VecDeque<Occurrence>,
    last_finding_at: Option<DateTime<Utc>>,
    last_touched: DateTime<Utc>,
}

impl RuleRuntimeState {
    /// 빈 상태를 생성합니다.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            occurrences: VecDeque::new(),
            last_finding_at: None,
            last_touched: now,
        }
    }

    /// 발생을 추가합니다.
    ///
    /// 처리 시각이 되돌아가도 큐 순서가 깨지지 않도록
    /// 마지막 항목보다 이른 시각은 마지막 시각으로 맞춥니다.
    pub fn record(&mut self, mut occurrence: Occurrence) {
        if let Some(last) = self.occurrences.back() {
            if occurrence.at < last.at {
                occurrence.at = last.at;
            }
        }
        self.last_touched = occurrence.at.max(self.last_touched);
        self.occurrences.push_back(occurrence);
    }

    /// `now - window`보다 오래된 항목을 제거합니다.
    pub fn evict(&mut self, now: DateTime<Utc>, window: Duration) {
        while let Some(front) = self.occurrences.front() {
            if now - front.at > window {
                self.occurrences.pop_front();
            } else {
                break;
            }
        }
    }

    /// 윈도우 안의 발생 수
    pub fn count(&self) -> usize {
        self.occurrences.len()
    }

    /// 윈도우 안의 발생 목록
    pub fn occurrences(&self) -> impl Iterator<Item = &Occurrence> {
        self.occurrences.iter()
    }

    /// 쿨다운이 지났는지 확인합니다.
    ///
    /// 이전 Finding이 없거나 `now - last > cooldown`이면 true입니다.
    pub fn cooldown_elapsed(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        self.last_finding_at
            .is_none_or(|last| now - last > cooldown)
    }

    /// Finding 발행 시각을 기록합니다.
    pub fn mark_finding(&mut self, now: DateTime<Utc>) {
        self.last_finding_at = Some(now);
    }

    /// 마지막 Finding 시각
    pub fn last_finding_at(&self) -> Option<DateTime<Utc>> {
        self.last_finding_at
    }

    /// 마지막으로 갱신된 시각
    pub fn last_touched(&self) -> DateTime<Utc> {
        self.last_touched
    }

    /// 더 이상 보관할 이유가 없는 상태인지 확인합니다.
    ///
    /// 윈도우가 비었고 쿨다운도 끝났으면 유휴 상태입니다.
    pub fn is_idle(&mut self, now: DateTime<Utc>, window: Duration, cooldown: Duration) -> bool {
        self.evict(now, window);
        self.occurrences.is_empty() && self.cooldown_elapsed(now, cooldown)
    }
}
