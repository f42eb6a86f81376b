//! 프로세스 내부 메시지 버스
//!
//! 구독 패턴별 mpsc 송신자를 보관하고, 발행 시 매칭되는 모든 구독자에게
//! 메시지를 복제해 전달합니다. 테스트와 `ingest --dry-run`에서 사용합니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::sync::{Mutex, mpsc, watch};

use super::subject::subject_matches;
use super::{BusMessage, ConnectionState, MessageBus, Subscription};
use crate::error::BusError;
use crate::health::BoxFuture;

/// 기본 구독 채널 용량
const DEFAULT_CAPACITY: usize = 1024;

struct Subscriber {
    pattern: String,
    sender: mpsc::Sender<BusMessage>,
}

struct Inner {
    subscribers: Mutex<Vec<Subscriber>>,
    state: watch::Sender<ConnectionState>,
    closed: AtomicBool,
    capacity: usize,
}

/// 프로세스 내부 버스
///
/// `Clone`은 같은 라우팅 테이블을 공유하는 핸들을 만듭니다.
#[derive(Clone)]
pub struct InMemoryBus {
    inner: Arc<Inner>,
}

impl InMemoryBus {
    /// 기본 채널 용량으로 생성합니다.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// 구독별 채널 용량을 지정하여 생성합니다.
    pub fn with_capacity(capacity: usize) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connected);
        Self {
            inner: Arc::new(Inner {
                subscribers: Mutex::new(Vec::new()),
                state,
                closed: AtomicBool::new(false),
                capacity: capacity.max(1),
            }),
        }
    }

    /// 연결 상태를 강제로 바꿉니다 (연결 끊김/재연결 시뮬레이션).
    pub fn set_connection_state(&self, state: ConnectionState) {
        self.inner.state.send_replace(state);
    }

    /// 현재 살아있는 구독 수
    pub async fn subscriber_count(&self) -> usize {
        let mut subscribers = self.inner.subscribers.lock().await;
        subscribers.retain(|s| !s.sender.is_closed());
        subscribers.len()
    }

    async fn publish_inner(&self, subject: &str, payload: Bytes) -> Result<(), BusError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        let connected = *self.inner.state.borrow() == ConnectionState::Connected;
        if !connected {
            return Err(BusError::Publish {
                subject: subject.to_owned(),
                reason: "not connected".to_owned(),
            });
        }

        let targets: Vec<mpsc::Sender<BusMessage>> = {
            let mut subscribers = self.inner.subscribers.lock().await;
            subscribers.retain(|s| !s.sender.is_closed());
            subscribers
                .iter()
                .filter(|s| subject_matches(&s.pattern, subject))
                .map(|s| s.sender.clone())
                .collect()
        };

        let message = BusMessage {
            subject: subject.to_owned(),
            payload,
        };
        for sender in targets {
            // 수신자가 방금 사라졌다면 무시
            let _ = sender.send(message.clone()).await;
        }
        Ok(())
    }

    async fn subscribe_inner(&self, subject: &str) -> Result<Subscription, BusError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        let (sender, receiver) = mpsc::channel(self.inner.capacity);
        self.inner.subscribers.lock().await.push(Subscriber {
            pattern: subject.to_owned(),
            sender,
        });
        Ok(Subscription::new(subject, receiver))
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus for InMemoryBus {
    fn publish<'a>(
        &'a self,
        subject: &'a str,
        payload: Bytes,
    ) -> BoxFuture<'a, Result<(), BusError>> {
        Box::pin(self.publish_inner(subject, payload))
    }

    fn subscribe<'a>(&'a self, subject: &'a str) -> BoxFuture<'a, Result<Subscription, BusError>> {
        Box::pin(self.subscribe_inner(subject))
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    fn close(&self) -> BoxFuture<'_, Result<(), BusError>> {
        Box::pin(async move {
            self.inner.closed.store(true, Ordering::Release);
            self.inner.subscribers.lock().await.clear();
            Ok(())
        })
    }
}
