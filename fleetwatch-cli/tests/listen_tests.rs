//! Integration tests for `fleetwatch listen`.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::time::timeout;

use fleetwatch_cli::commands::listen::SyslogListener;
use fleetwatch_cli::error::CliError;
use fleetwatch_core::bus::{InMemoryBus, MessageBus};
use fleetwatch_core::event::ParsedLogEvent;
use fleetwatch_detection::LogParser;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_datagrams_are_published_with_sender_ip() {
    // Given: A listener on an ephemeral port
    let bus = Arc::new(InMemoryBus::new());
    let mut logs = bus.subscribe("logs.>").await.unwrap();
    let listener = SyslogListener::bind(
        "127.0.0.1:0",
        LogParser::new(),
        Some(bus.clone() as Arc<dyn MessageBus>),
    )
    .await
    .expect("should bind");
    let addr = listener.local_addr().expect("bound address");

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let run = listener.run_until(
        async {
            let _ = shutdown_rx.await;
        },
        Duration::from_secs(60),
    );

    // When: A device sends one datagram with two lines
    let drive = async {
        let device = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        device
            .send_to(
                b"<30>Jul  4 09:15:02 ap-07 hostapd: wlan0: STA aa:bb:cc:dd:ee:ff disassociated\n\
                  <2>Jul  4 09:15:03 gw-01 kernel: Out of memory: Killed process 4242",
                addr,
            )
            .await
            .unwrap();

        let mut received = Vec::new();
        for _ in 0..2 {
            let msg = timeout(WAIT, logs.recv()).await.unwrap().unwrap();
            received.push(msg);
        }
        let _ = shutdown_tx.send(());
        received
    };
    let (result, received) = tokio::join!(run, drive);

    // Then: Both lines were published with the sender IP attached
    let summary = result.expect("listener should stop cleanly");
    assert_eq!(summary.lines_read, 2);
    assert_eq!(summary.published, 2);
    assert_eq!(received[0].subject, "logs.wifi");
    assert_eq!(received[1].subject, "logs.system");

    let event: ParsedLogEvent = serde_json::from_slice(&received[0].payload).unwrap();
    assert_eq!(event.source_ip, Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    assert_eq!(event.hostname, "ap-07");
}

#[tokio::test]
async fn test_dry_run_listener_counts_only() {
    let listener = SyslogListener::bind("127.0.0.1:0", LogParser::new(), None)
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let run = listener.run_until(
        async {
            let _ = shutdown_rx.await;
        },
        Duration::from_secs(60),
    );

    let drive = async {
        let device = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        device.send_to(b"not syslog at all", addr).await.unwrap();
        // Give the datagram time to land before stopping
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = shutdown_tx.send(());
    };
    let (result, ()) = timeout(WAIT, async { tokio::join!(run, drive) })
        .await
        .expect("listener should stop");

    let summary = result.unwrap();
    assert!(summary.dry_run);
    assert_eq!(summary.lines_read, 1);
    assert_eq!(summary.parse_failures, 1);
}

#[tokio::test]
async fn test_bind_failure_is_collector_error() {
    let result = SyslogListener::bind("not-an-address", LogParser::new(), None).await;

    match result {
        Err(err @ CliError::Collector(_)) => assert_eq!(err.exit_code(), 3),
        Err(other) => panic!("expected collector error, got {other:?}"),
        Ok(_) => panic!("bind should fail"),
    }
}
