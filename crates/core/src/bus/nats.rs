//! NATS 메시지 버스
//!
//! 최초 연결은 `max_reconnect_attempts`회까지 지수 백오프로 재시도하고,
//! 이후의 연결 끊김은 클라이언트 라이브러리의 재연결에 맡깁니다.
//! 연결 이벤트는 [`ConnectionState`] watch 채널로 노출됩니다.

use std::sync::Arc;
use std::time::Duration;

use async_nats::{ClientError, ConnectOptions, Event};
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::{BusMessage, ConnectionState, MessageBus, Subscription, backoff_delay};
use crate::config::BusConfig;
use crate::error::BusError;
use crate::health::BoxFuture;

/// NATS 연결
pub struct NatsBus {
    client: async_nats::Client,
    state: watch::Receiver<ConnectionState>,
    channel_capacity: usize,
}

impl NatsBus {
    /// 서버에 연결합니다.
    ///
    /// 재시도 한도를 모두 소진하면 [`BusError::Connect`]를 반환합니다.
    pub async fn connect(config: &BusConfig) -> Result<Self, BusError> {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let state_tx = Arc::new(state_tx);

        let base = Duration::from_millis(config.reconnect_base_delay_ms);
        let max = Duration::from_millis(config.reconnect_max_delay_ms);
        let max_attempts = config.max_reconnect_attempts.max(1);

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let options = Self::options(config, Arc::clone(&state_tx), base, max);
            match options.connect(config.url.as_str()).await {
                Ok(client) => {
                    info!(url = %config.url, attempt, "connected to message bus");
                    state_tx.send_replace(ConnectionState::Connected);
                    return Ok(Self {
                        client,
                        state: state_rx,
                        channel_capacity: config.channel_capacity.max(1),
                    });
                }
                Err(e) if attempt < max_attempts => {
                    let delay = backoff_delay(attempt, base, max);
                    warn!(
                        url = %config.url,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "bus connection failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(url = %config.url, attempt, error = %e, "bus connection failed, giving up");
                    return Err(BusError::Connect {
                        attempts: attempt,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    fn options(
        config: &BusConfig,
        state_tx: Arc<watch::Sender<ConnectionState>>,
        base: Duration,
        max: Duration,
    ) -> ConnectOptions {
        ConnectOptions::new()
            .name(config.client_name.as_str())
            .connection_timeout(Duration::from_secs(config.connect_timeout_secs))
            .max_reconnects(Some(config.max_reconnect_attempts as usize))
            .reconnect_delay_callback(move |attempts| {
                backoff_delay(u32::try_from(attempts).unwrap_or(u32::MAX), base, max)
            })
            .event_callback(move |event| {
                let state_tx = Arc::clone(&state_tx);
                async move {
                    match event {
                        Event::Connected => {
                            info!("bus connection established");
                            state_tx.send_replace(ConnectionState::Connected);
                        }
                        Event::Disconnected => {
                            warn!("bus connection lost, reconnecting");
                            state_tx.send_replace(ConnectionState::Reconnecting);
                        }
                        Event::ClientError(ClientError::MaxReconnects) => {
                            error!("bus reconnect attempts exhausted");
                            state_tx.send_replace(ConnectionState::Lost);
                        }
                        Event::Closed => {
                            state_tx.send_replace(ConnectionState::Lost);
                        }
                        other => debug!(event = ?other, "bus event"),
                    }
                }
            })
    }
}

impl MessageBus for NatsBus {
    fn publish<'a>(
        &'a self,
        subject: &'a str,
        payload: Bytes,
    ) -> BoxFuture<'a, Result<(), BusError>> {
        Box::pin(async move {
            self.client
                .publish(subject.to_owned(), payload)
                .await
                .map_err(|e| BusError::Publish {
                    subject: subject.to_owned(),
                    reason: e.to_string(),
                })
        })
    }

    fn subscribe<'a>(&'a self, subject: &'a str) -> BoxFuture<'a, Result<Subscription, BusError>> {
        Box::pin(async move {
            let mut subscriber = self
                .client
                .subscribe(subject.to_owned())
                .await
                .map_err(|e| BusError::Subscribe {
                    subject: subject.to_owned(),
                    reason: e.to_string(),
                })?;

            let (tx, rx) = mpsc::channel(self.channel_capacity);
            let forwarder = tokio::spawn(async move {
                while let Some(message) = subscriber.next().await {
                    let forwarded = BusMessage {
                        subject: message.subject.to_string(),
                        payload: message.payload,
                    };
                    if tx.send(forwarded).await.is_err() {
                        break;
                    }
                }
            });

            debug!(subject, "subscribed");
            Ok(Subscription::new(subject, rx).with_forwarder(forwarder))
        })
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// 구독을 정리하고 남은 발행을 보낸 뒤 연결을 닫습니다.
    fn close(&self) -> BoxFuture<'_, Result<(), BusError>> {
        Box::pin(async move {
            self.client.drain().await.map_err(|e| BusError::Close {
                reason: e.to_string(),
            })?;
            debug!("bus connection drained and closed");
            Ok(())
        })
    }
}
