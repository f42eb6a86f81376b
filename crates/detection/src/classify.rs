//! 프로세스 이름 기반 도메인 분류
//!
//! 정규화된 프로세스 이름을 고정 테이블에서 찾아 [`Domain`]을 결정합니다.
//! 테이블에 없으면 `-`, `.`, `/` 앞 부분(패밀리 이름)으로 한 번 더 찾고,
//! 그래도 없으면 [`Domain::General`]입니다.

use fleetwatch_core::types::Domain;

/// (프로세스 이름, 도메인) 테이블
const PROCESS_DOMAINS: &[(&str, Domain)] = &[
    // wifi
    ("wpa_supplicant", Domain::Wifi),
    ("hostapd", Domain::Wifi),
    ("iw", Domain::Wifi),
    ("iwinfo", Domain::Wifi),
    ("wifi", Domain::Wifi),
    ("mac80211", Domain::Wifi),
    ("cfg80211", Domain::Wifi),
    ("ath9k", Domain::Wifi),
    ("ath10k", Domain::Wifi),
    ("mt76", Domain::Wifi),
    // security
    ("dropbear", Domain::Security),
    ("sshd", Domain::Security),
    ("sudo", Domain::Security),
    ("su", Domain::Security),
    ("login", Domain::Security),
    ("fw3", Domain::Security),
    ("fw4", Domain::Security),
    ("firewall", Domain::Security),
    ("iptables", Domain::Security),
    ("nftables", Domain::Security),
    ("uhttpd", Domain::Security),
    // connectivity
    ("netifd", Domain::Connectivity),
    ("dnsmasq", Domain::Connectivity),
    ("odhcpd", Domain::Connectivity),
    ("odhcp6c", Domain::Connectivity),
    ("udhcpc", Domain::Connectivity),
    ("dhclient", Domain::Connectivity),
    ("pppd", Domain::Connectivity),
    ("ntpd", Domain::Connectivity),
    ("chronyd", Domain::Connectivity),
    ("openvpn", Domain::Connectivity),
    ("wireguard", Domain::Connectivity),
    ("relayd", Domain::Connectivity),
    ("mwan3", Domain::Connectivity),
    // system
    ("kernel", Domain::System),
    ("procd", Domain::System),
    ("init", Domain::System),
    ("cron", Domain::System),
    ("crond", Domain::System),
    ("systemd", Domain::System),
    ("syslogd", Domain::System),
    ("logd", Domain::System),
    ("ubusd", Domain::System),
    ("rpcd", Domain::System),
    // storage
    ("block", Domain::Storage),
    ("mount", Domain::Storage),
    ("e2fsck", Domain::Storage),
    ("fsck", Domain::Storage),
    ("smartd", Domain::Storage),
    ("blkid", Domain::Storage),
    ("mdadm", Domain::Storage),
    ("lvm", Domain::Storage),
    ("zfs", Domain::Storage),
    // database
    ("mysqld", Domain::Database),
    ("mariadbd", Domain::Database),
    ("postgres", Domain::Database),
    ("postgresql", Domain::Database),
    ("redis-server", Domain::Database),
    ("redis", Domain::Database),
    ("mongod", Domain::Database),
    ("sqlite", Domain::Database),
    // health
    ("watchdog", Domain::Health),
    ("collectd", Domain::Health),
    ("monit", Domain::Health),
    ("sysmon", Domain::Health),
    ("healthcheck", Domain::Health),
    ("zabbix_agentd", Domain::Health),
];

/// 프로세스 이름을 정규화합니다 (공백 제거, 소문자, 경로의 basename).
pub fn normalize_process_name(name: &str) -> String {
    let trimmed = name.trim();
    let base = trimmed.rsplit('/').next().unwrap_or(trimmed);
    base.to_lowercase()
}

/// 프로세스 이름으로 도메인을 결정합니다.
///
/// 순수 함수이며 같은 입력에는 항상 같은 결과를 반환합니다.
pub fn classify(process_name: &str) -> Domain {
    let normalized = normalize_process_name(process_name);
    if let Some(domain) = lookup(&normalized) {
        return domain;
    }

    let family = normalized
        .split(['-', '.'])
        .next()
        .unwrap_or(normalized.as_str());
    lookup(family).unwrap_or(Domain::General)
}

fn lookup(name: &str) -> Option<Domain> {
    PROCESS_DOMAINS
        .iter()
        .find(|(process, _)| *process == name)
        .map(|(_, domain)| *domain)
}
