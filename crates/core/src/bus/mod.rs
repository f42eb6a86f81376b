//! 메시지 버스 추상화
//!
//! [`MessageBus`]는 에이전트와 오케스트레이터가 사용하는 발행/구독 인터페이스입니다.
//! 구현체:
//! - [`NatsBus`]: NATS 서버 연결 (운영 환경)
//! - [`InMemoryBus`]: 프로세스 내부 라우팅 (테스트, 드라이런)
//!
//! 구독은 [`Subscription`]으로 표현되며, 소비자는 단일 태스크에서
//! `recv()`로 메시지를 순서대로 꺼내 처리합니다. `Subscription`을 drop하면
//! 구독이 해제됩니다.

mod memory;
mod nats;
pub mod subject;

use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{BusError, FleetwatchError};
use crate::health::BoxFuture;

pub use memory::InMemoryBus;
pub use nats::NatsBus;

/// 버스로 수신된 메시지
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// 실제 발행된 주제
    pub subject: String,
    /// 페이로드 (JSON)
    pub payload: Bytes,
}

/// 버스 연결 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// 연결됨
    Connected,
    /// 연결이 끊겨 재연결 시도 중
    Reconnecting,
    /// 재연결 한도 소진 또는 종료됨
    Lost,
}

/// 발행/구독 메시지 버스
pub trait MessageBus: Send + Sync {
    /// 주제에 메시지를 발행합니다.
    fn publish<'a>(&'a self, subject: &'a str, payload: Bytes)
    -> BoxFuture<'a, Result<(), BusError>>;

    /// 주제(와일드카드 허용)를 구독합니다.
    fn subscribe<'a>(&'a self, subject: &'a str) -> BoxFuture<'a, Result<Subscription, BusError>>;

    /// 연결 상태 변화를 관찰하는 수신자를 반환합니다.
    fn connection_state(&self) -> watch::Receiver<ConnectionState>;

    /// 대기 중인 발행을 밀어내고 연결을 닫습니다.
    fn close(&self) -> BoxFuture<'_, Result<(), BusError>>;
}

/// 값을 JSON으로 직렬화하여 발행합니다.
pub async fn publish_json<T: Serialize + ?Sized>(
    bus: &dyn MessageBus,
    subject: &str,
    value: &T,
) -> Result<(), FleetwatchError> {
    let payload = serde_json::to_vec(value)?;
    bus.publish(subject, Bytes::from(payload)).await?;
    Ok(())
}

/// 활성 구독
///
/// 메시지는 버스가 전달한 순서대로 `recv()`에서 반환됩니다.
pub struct Subscription {
    subject: String,
    receiver: mpsc::Receiver<BusMessage>,
    forwarder: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn new(subject: impl Into<String>, receiver: mpsc::Receiver<BusMessage>) -> Self {
        Self {
            subject: subject.into(),
            receiver,
            forwarder: None,
        }
    }

    pub(crate) fn with_forwarder(mut self, forwarder: JoinHandle<()>) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    /// 구독 패턴
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// 다음 메시지를 기다립니다. 구독이 끝나면 `None`입니다.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.receiver.recv().await
    }

    /// 구독을 해제합니다.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(handle) = self.forwarder.take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("subject", &self.subject)
            .finish()
    }
}

/// 재연결 지수 백오프 지연 시간
///
/// `attempt`는 1부터 시작하며, `base * 2^(attempt-1)`을 `max`로 제한합니다.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let factor = 1u32 << exponent;
    base.checked_mul(factor).unwrap_or(max).min(max)
}
