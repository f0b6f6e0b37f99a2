//! Relay broker tests

use std::time::Duration;

use pretty_assertions::assert_eq;
use test_case::test_case;
use tokio::net::TcpStream;

use super::*;
use crate::transport::protocol::{write_frame, FrameReader, PROTOCOL_VERSION};
use crate::transport::{InboundEvent, TcpTransport, Transport};

const TOPIC: &str = "VirtualTopic.test";

fn config(role: BrokerRole) -> BrokerConfig {
    BrokerConfig {
        broker_id: "test-broker".to_string(),
        bind: SocketAddr::from(([127, 0, 0, 1], 0)),
        role,
    }
}

async fn started(role: BrokerRole) -> Broker {
    let broker = Broker::new(config(role));
    broker.start().await.unwrap();
    broker
}

async fn eventually<F: Fn() -> bool>(check: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn connected(broker: &Broker, name: &str) -> (TcpTransport, mpsc::Receiver<InboundEvent>) {
    let transport = TcpTransport::new(broker.url().unwrap(), name)
        .with_connect_timeout(Duration::from_secs(2));
    let (tx, rx) = mpsc::channel(16);
    transport.start(TOPIC, tx).await.unwrap();
    eventually(|| transport.is_registered()).await;
    (transport, rx)
}

#[test_case("master", BrokerRole::Master)]
#[test_case("SLAVE", BrokerRole::Slave)]
fn test_role_parsing(input: &str, expected: BrokerRole) {
    assert_eq!(input.parse::<BrokerRole>().unwrap(), expected);
}

#[test]
fn test_unknown_role_is_rejected() {
    assert!(matches!(
        "observer".parse::<BrokerRole>(),
        Err(BrokerError::Invalid(_))
    ));
}

#[test_case("isStarted", ManagementCommand::IsStarted)]
#[test_case("ISSLAVE", ManagementCommand::IsSlave)]
#[test_case("asyncstart", ManagementCommand::AsyncStart)]
#[test_case("asyncStop", ManagementCommand::AsyncStop)]
fn test_command_parsing(input: &str, expected: ManagementCommand) {
    assert_eq!(input.parse::<ManagementCommand>().unwrap(), expected);
}

#[tokio::test]
async fn test_start_and_stop_are_idempotent() {
    let broker = Broker::new(config(BrokerRole::Master));
    assert!(!broker.is_started());
    assert!(broker.url().is_none());

    broker.start().await.unwrap();
    broker.start().await.unwrap();
    assert!(broker.is_started());
    assert!(broker.url().unwrap().starts_with("tcp://127.0.0.1:"));

    broker.stop().await.unwrap();
    broker.stop().await.unwrap();
    assert!(!broker.is_started());
    assert!(broker.local_addr().is_none());
}

#[tokio::test]
async fn test_relay_skips_sender() {
    let broker = started(BrokerRole::Master).await;
    let (a, mut a_rx) = connected(&broker, "a").await;
    let (b, mut b_rx) = connected(&broker, "b").await;
    assert_eq!(broker.subscriber_count(TOPIC), 2);

    let message = ClusterMessage::new("geoserver", b"payload".to_vec())
        .with_property("instanceName", "a");
    a.send(TOPIC, message.clone()).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), b_rx.recv())
        .await
        .unwrap()
        .unwrap();
    match received {
        InboundEvent::Message(m) => assert_eq!(m, message),
        other => panic!("unexpected {:?}", other),
    }
    eventually(|| broker.relayed() == 1).await;
    assert!(a_rx.try_recv().is_err());

    a.stop().await.unwrap();
    b.stop().await.unwrap();
    eventually(|| broker.subscriber_count(TOPIC) == 0).await;
    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_relay_preserves_order() {
    let broker = started(BrokerRole::Master).await;
    let (a, _a_rx) = connected(&broker, "a").await;
    let (_b, mut b_rx) = connected(&broker, "b").await;

    for i in 0..20u8 {
        a.send(TOPIC, ClusterMessage::new("h", vec![i])).await.unwrap();
    }
    for i in 0..20u8 {
        let event = tokio::time::timeout(Duration::from_secs(5), b_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let InboundEvent::Message(m) = event else {
            panic!("expected a message");
        };
        assert_eq!(m.payload, vec![i]);
    }
}

#[tokio::test]
async fn test_slave_rejects_clients() {
    let broker = started(BrokerRole::Slave).await;
    assert!(broker.is_slave());

    let transport = TcpTransport::new(broker.url().unwrap(), "a");
    let (tx, mut rx) = mpsc::channel(16);
    transport.start(TOPIC, tx).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        InboundEvent::ListenerFailure { error, recovered } => {
            assert!(error.contains("slave"), "{}", error);
            assert!(!recovered);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(!transport.is_registered());
    transport.stop().await.unwrap();
}

#[tokio::test]
async fn test_version_mismatch_is_rejected() {
    let broker = started(BrokerRole::Master).await;
    let stream = TcpStream::connect(broker.local_addr().unwrap()).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    write_frame(
        &mut write_half,
        &Frame::Hello {
            client_id: "old".to_string(),
            version: PROTOCOL_VERSION + 1,
        },
    )
    .await
    .unwrap();

    let mut reader = FrameReader::new(read_half);
    let frame = reader.next_frame().await.unwrap();
    assert!(matches!(frame, Some(Frame::Rejected { .. })));
}

#[tokio::test]
async fn test_management_round_trip() {
    let broker = Broker::new(config(BrokerRole::Master));
    let server = ManagementServer::bind(
        SocketAddr::from(([127, 0, 0, 1], 0)),
        Arc::new(broker.clone()),
    )
    .await
    .unwrap();
    let mut client = ManagementClient::connect(
        &server.local_addr().to_string(),
        Duration::from_secs(2),
    )
    .await
    .unwrap();

    assert!(!client.call(ManagementCommand::IsStarted).await.unwrap());
    assert!(!client.call(ManagementCommand::IsSlave).await.unwrap());
    assert!(client.call(ManagementCommand::Start).await.unwrap());
    assert!(client.call(ManagementCommand::IsStarted).await.unwrap());

    assert!(client.call(ManagementCommand::AsyncStop).await.unwrap());
    eventually(|| !broker.is_started()).await;
    assert!(client.call(ManagementCommand::AsyncStart).await.unwrap());
    eventually(|| broker.is_started()).await;

    client.close().await;
    server.shutdown().await;
    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_management_reports_unknown_commands() {
    let broker = Broker::new(config(BrokerRole::Master));
    let server = ManagementServer::bind(
        SocketAddr::from(([127, 0, 0, 1], 0)),
        Arc::new(broker),
    )
    .await
    .unwrap();

    let stream = TcpStream::connect(server.local_addr()).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    write_frame(
        &mut write_half,
        &Frame::Manage {
            command: "reboot".to_string(),
        },
    )
    .await
    .unwrap();
    let mut reader = FrameReader::new(read_half);
    match reader.next_frame().await.unwrap() {
        Some(Frame::ManageReply { value, error }) => {
            assert!(!value);
            assert!(error.unwrap().contains("reboot"));
        }
        other => panic!("unexpected {:?}", other),
    }
    server.shutdown().await;
}
