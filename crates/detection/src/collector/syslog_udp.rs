//! UDP Syslog 수집기
//!
//! 장비가 보내는 BSD syslog 데이터그램을 UDP 소켓으로 수신합니다.
//! 데이터그램 하나에 여러 줄이 있으면 줄마다 나눠 전달합니다.

use std::net::SocketAddr;

use bytes::Bytes;
use chrono::Utc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{CollectorStatus, RawLine};
use crate::error::DetectionError;

/// UDP syslog 수집기 설정
#[derive(Debug, Clone)]
pub struct SyslogUdpConfig {
    /// 바인드 주소 (예: "0.0.0.0:514")
    pub bind_addr: String,
    /// 최대 메시지 크기 (바이트, UDP이므로 일반적으로 65535 이하)
    pub max_message_size: usize,
}

impl Default for SyslogUdpConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:514".to_owned(),
            max_message_size: 65535,
        }
    }
}

/// UDP Syslog 수집기
///
/// 송신 주소의 IP를 [`RawLine::source_ip`]로 기록합니다.
pub struct SyslogUdpCollector {
    /// 수집기 설정
    config: SyslogUdpConfig,
    /// 수집된 라인 전송 채널
    tx: mpsc::Sender<RawLine>,
    /// 현재 상태
    status: CollectorStatus,
    /// 바인드된 실제 주소 (포트 0 바인드 시 확인용)
    local_addr: Option<SocketAddr>,
}

impl SyslogUdpCollector {
    /// 새 UDP syslog 수집기를 생성합니다.
    pub fn new(config: SyslogUdpConfig, tx: mpsc::Sender<RawLine>) -> Self {
        Self {
            config,
            tx,
            status: CollectorStatus::Idle,
            local_addr: None,
        }
    }

    /// 소켓을 바인드합니다.
    pub async fn bind(&mut self) -> Result<UdpSocket, DetectionError> {
        let socket = UdpSocket::bind(&self.config.bind_addr).await.map_err(|e| {
            DetectionError::Collector {
                source_type: "syslog_udp".to_owned(),
                reason: format!("failed to bind {}: {e}", self.config.bind_addr),
            }
        })?;
        self.local_addr = socket.local_addr().ok();
        tracing::info!(bind_addr = %self.config.bind_addr, "syslog UDP collector listening");
        Ok(socket)
    }

    /// 바인드된 소켓에서 취소될 때까지 수신합니다.
    pub async fn run_on(
        &mut self,
        socket: UdpSocket,
        cancel: CancellationToken,
    ) -> Result<(), DetectionError> {
        self.status = CollectorStatus::Running;
        let source = format!("syslog_udp:{}", self.config.bind_addr);
        let mut buf = vec![0u8; self.config.max_message_size.max(1)];

        loop {
            let (len, peer) = tokio::select! {
                _ = cancel.cancelled() => break,
                received = socket.recv_from(&mut buf) => match received {
                    Ok(r) => r,
                    Err(e) => {
                        // ICMP 에러 등 일시적인 실패는 건너뜀
                        tracing::warn!(error = %e, "syslog UDP receive failed");
                        continue;
                    }
                },
            };

            let received_at = Utc::now();
            for line in buf[..len].split(|b| *b == b'\n') {
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                if line.is_empty() {
                    continue;
                }
                let mut raw = RawLine::new(Bytes::copy_from_slice(line), source.clone())
                    .with_source_ip(peer.ip());
                raw.received_at = received_at;

                if self.tx.send(raw).await.is_err() {
                    tracing::debug!("line receiver closed, stopping syslog UDP collector");
                    self.status = CollectorStatus::Stopped;
                    return Ok(());
                }
            }
        }

        self.status = CollectorStatus::Stopped;
        tracing::info!(bind_addr = %self.config.bind_addr, "syslog UDP collector stopped");
        Ok(())
    }

    /// 바인드 후 취소될 때까지 수신합니다.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), DetectionError> {
        let socket = match self.bind().await {
            Ok(socket) => socket,
            Err(e) => {
                self.status = CollectorStatus::Error(e.to_string());
                return Err(e);
            }
        };
        self.run_on(socket, cancel).await
    }

    /// 바인드 주소를 반환합니다.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// 실제 바인드된 주소
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// 현재 상태를 반환합니다.
    pub fn status(&self) -> &CollectorStatus {
        &self.status
    }
}
