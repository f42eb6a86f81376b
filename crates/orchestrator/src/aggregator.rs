//! Finding 집계와 알림 중복 제거
//!
//! 모든 Finding은 `active_findings[resource_id]`에 쌓이고, 하위 알림은
//! `finding_key = finding_type:resource_id`별로 `notification_cooldown`에 한 번만 나갑니다.
//! 주기적인 [`FindingAggregator::cleanup_at`]이 보존 기간을 넘긴 항목을 제거합니다.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use fleetwatch_core::event::Finding;

/// 알림 판정 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyDecision {
    /// 하위로 전달
    Notify,
    /// 쿨다운 중이라 억제
    Suppress {
        /// 같은 키로 마지막 알림이 나간 시각
        last_notified: DateTime<Utc>,
    },
}

/// 정리 작업 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    /// 제거된 Finding 수
    pub findings_removed: usize,
    /// 비어서 제거된 자원 항목 수
    pub resources_removed: usize,
    /// 제거된 쿨다운 항목 수
    pub cooldowns_removed: usize,
}

/// Finding 집계기
#[derive(Debug)]
pub struct FindingAggregator {
    notification_cooldown: Duration,
    finding_retention: Duration,
    active_findings: HashMap<String, Vec<Finding>>,
    finding_cooldowns: HashMap<String, DateTime<Utc>>,
}

impl FindingAggregator {
    /// 쿨다운/보존 기간(초)으로 생성합니다.
    pub fn new(notification_cooldown_secs: u64, finding_retention_secs: u64) -> Self {
        Self {
            notification_cooldown: seconds(notification_cooldown_secs),
            finding_retention: seconds(finding_retention_secs),
            active_findings: HashMap::new(),
            finding_cooldowns: HashMap::new(),
        }
    }

    /// Finding을 기록하고 알림 여부를 판정합니다.
    ///
    /// Finding은 항상 저장됩니다. 같은 키의 이전 알림이 `now`로부터
    /// 쿨다운 이내이면 억제하고, 그렇지 않으면 알림 시각을 `now`로 갱신합니다.
    pub fn record_at(&mut self, finding: Finding, now: DateTime<Utc>) -> NotifyDecision {
        let key = finding.finding_key();
        self.active_findings
            .entry(finding.resource_id())
            .or_default()
            .push(finding);

        match self.finding_cooldowns.get(&key) {
            Some(&last) if now - last <= self.notification_cooldown => NotifyDecision::Suppress {
                last_notified: last,
            },
            _ => {
                self.finding_cooldowns.insert(key, now);
                NotifyDecision::Notify
            }
        }
    }

    /// 보존 기간이 지난 Finding과 쿨다운이 끝난 키를 제거합니다.
    pub fn cleanup_at(&mut self, now: DateTime<Utc>) -> CleanupStats {
        let mut stats = CleanupStats::default();
        let retention = self.finding_retention;

        self.active_findings.retain(|_, findings| {
            let before = findings.len();
            findings.retain(|f| now - f.timestamp <= retention);
            stats.findings_removed += before - findings.len();
            if findings.is_empty() {
                stats.resources_removed += 1;
                false
            } else {
                true
            }
        });

        let cooldown = self.notification_cooldown;
        let before = self.finding_cooldowns.len();
        self.finding_cooldowns
            .retain(|_, last| now - *last <= cooldown);
        stats.cooldowns_removed = before - self.finding_cooldowns.len();

        stats
    }

    /// 모든 메모리 상태를 비웁니다.
    pub fn clear(&mut self) {
        self.active_findings.clear();
        self.finding_cooldowns.clear();
    }

    /// 보관 중인 Finding 수
    pub fn active_count(&self) -> usize {
        self.active_findings.values().map(Vec::len).sum()
    }

    /// Finding이 있는 자원 수
    pub fn resource_count(&self) -> usize {
        self.active_findings.len()
    }

    /// 자원별 Finding 목록
    pub fn findings_for(&self, resource_id: &str) -> &[Finding] {
        self.active_findings
            .get(resource_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// 쿨다운 항목 수
    pub fn cooldown_count(&self) -> usize {
        self.finding_cooldowns.len()
    }

    /// 키의 마지막 알림 시각
    pub fn last_notified(&self, finding_key: &str) -> Option<DateTime<Utc>> {
        self.finding_cooldowns.get(finding_key).copied()
    }
}

fn seconds(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}
