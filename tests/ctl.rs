//! Integration Tests for the management command line client
//!
//! Runs the `clustersync-ctl` binary against a management socket and
//! checks its exit status contract.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;

use clustersync::broker::{Broker, BrokerConfig, BrokerRole, BrokerService, ManagementServer};

async fn ctl(args: &[&str]) -> i32 {
    let status = Command::new(env!("CARGO_BIN_EXE_clustersync-ctl"))
        .args(args)
        .status()
        .await
        .unwrap();
    status.code().unwrap()
}

fn properties(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("connection.properties");
    std::fs::write(&path, content).unwrap();
    path
}

async fn managed(role: BrokerRole) -> (Broker, ManagementServer) {
    let broker = Broker::new(BrokerConfig {
        broker_id: "ctl-broker".to_string(),
        bind: SocketAddr::from(([127, 0, 0, 1], 0)),
        role,
    });
    let server = ManagementServer::bind(
        SocketAddr::from(([127, 0, 0, 1], 0)),
        Arc::new(broker.clone()),
    )
    .await
    .unwrap();
    (broker, server)
}

#[tokio::test]
async fn test_commands_report_through_exit_status() {
    let (broker, server) = managed(BrokerRole::Master).await;
    let dir = tempfile::tempdir().unwrap();
    let props = properties(
        dir.path(),
        &format!("address={}\ntimeout=2000\n", server.local_addr()),
    );
    let props = props.to_str().unwrap();

    assert_eq!(ctl(&[props, "isStarted"]).await, 1);
    assert_eq!(ctl(&[props, "isSlave"]).await, 1);
    assert_eq!(ctl(&[props, "asyncStart"]).await, 0);

    tokio::time::timeout(Duration::from_secs(5), async {
        while !broker.is_started() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(ctl(&[props, "ISSTARTED"]).await, 0);
    assert_eq!(ctl(&[props, "asyncStop"]).await, 0);

    server.shutdown().await;
    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_slave_reports_true() {
    let (broker, server) = managed(BrokerRole::Slave).await;
    let dir = tempfile::tempdir().unwrap();
    let props = properties(dir.path(), &format!("address={}\n", server.local_addr()));

    assert_eq!(ctl(&[props.to_str().unwrap(), "isSlave"]).await, 0);
    server.shutdown().await;
    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_usage_errors() {
    let dir = tempfile::tempdir().unwrap();
    let props = properties(dir.path(), "address=127.0.0.1:1\n");
    let props = props.to_str().unwrap();

    assert_eq!(ctl(&[]).await, 9);
    assert_eq!(ctl(&["/nonexistent/connection.properties", "isStarted"]).await, 9);
    assert_eq!(ctl(&[props]).await, 3);
    assert_eq!(ctl(&[props, "reboot"]).await, 4);
    assert_eq!(ctl(&[props, "start"]).await, 4);
}

#[tokio::test]
async fn test_properties_without_address() {
    let dir = tempfile::tempdir().unwrap();
    let props = properties(dir.path(), "timeout=100\n");
    assert_eq!(ctl(&[props.to_str().unwrap(), "isStarted"]).await, 9);
}

#[tokio::test]
async fn test_unreachable_address_is_an_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let dir = tempfile::tempdir().unwrap();
    let props = properties(dir.path(), &format!("address={}\ntimeout=500\n", addr));
    assert_eq!(ctl(&[props.to_str().unwrap(), "isStarted"]).await, 2);
}
