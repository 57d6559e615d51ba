//! Wire Integration Tests
//!
//! Socket wires over real transports, dispatching on real schedulers.

use bytes::Bytes;
use codec::{Buffer, RdId};
use network::{
    ChannelTransport, SocketWire, TcpTransport, Wire, WireConfig, WireHandler, WireStatus,
};
use parking_lot::Mutex;
use reactive::{Lifetime, LifetimeDefinition, Scheduler, SchedulerToken, SingleThreadScheduler};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}

fn scheduler(name: &str) -> Arc<dyn Scheduler> {
    Arc::new(SingleThreadScheduler::new(name).unwrap())
}

fn collector() -> (Arc<Mutex<Vec<i64>>>, WireHandler) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let handler: WireHandler = Arc::new(move |token: &SchedulerToken, mut buffer: Buffer| {
        let _ = token;
        sink.lock().push(buffer.read_i64().unwrap());
    });
    (received, handler)
}

fn payload(value: i64) -> Bytes {
    let mut buffer = Buffer::new();
    buffer.write_i64(value);
    buffer.freeze()
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_socket_wires_over_channel_preserve_order() {
    init_tracing();
    let (left, right) = ChannelTransport::pair();
    let config = WireConfig::default();
    let sender = SocketWire::spawn(left, scheduler("left"), &config).unwrap();
    let receiver_scheduler = scheduler("right");
    let receiver = SocketWire::spawn(right, Arc::clone(&receiver_scheduler), &config).unwrap();
    assert_eq!(sender.status().get(), WireStatus::Connected);

    let (received, handler) = collector();
    receiver.advise(&Lifetime::eternal(), RdId::of(42), handler);

    for value in 0..100 {
        sender.send(RdId::of(42), payload(value)).unwrap();
    }

    wait_for(|| received.lock().len() == 100).await;
    receiver_scheduler.flush();
    assert_eq!(*received.lock(), (0..100).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_messages_before_advise_are_replayed() {
    init_tracing();
    let (left, right) = ChannelTransport::pair();
    let config = WireConfig::default();
    let sender = SocketWire::spawn(left, scheduler("left"), &config).unwrap();
    let receiver = SocketWire::spawn(right, scheduler("right"), &config).unwrap();

    for value in [1, 2, 3] {
        sender.send(RdId::of(5), payload(value)).unwrap();
    }
    wait_for(|| receiver.broker().pending_count(RdId::of(5)) == 3).await;

    let (received, handler) = collector();
    let definition = LifetimeDefinition::new();
    receiver.advise(&definition.lifetime(), RdId::of(5), handler);

    wait_for(|| received.lock().len() == 3).await;
    assert_eq!(*received.lock(), vec![1, 2, 3]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tcp_peer_loss_sets_disconnected() {
    init_tracing();
    let config = WireConfig::default();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server_config = config.clone();
    let accept = tokio::spawn(async move { TcpTransport::accept(&listener, &server_config).await });
    let client = TcpTransport::connect(addr, &config).await.unwrap();
    let server = accept.await.unwrap().unwrap();

    let client_wire = SocketWire::spawn(client, scheduler("client"), &config).unwrap();
    let server_wire = SocketWire::spawn(server, scheduler("server"), &config).unwrap();

    let (received, handler) = collector();
    server_wire.advise(&Lifetime::eternal(), RdId::of(1), handler);
    client_wire.send(RdId::of(1), payload(7)).unwrap();
    wait_for(|| received.lock().as_slice() == [7]).await;

    server_wire.shutdown();
    drop(server_wire);

    wait_for(|| !client_wire.is_connected()).await;
    match client_wire.status().get() {
        WireStatus::Disconnected { reason } => assert!(!reason.is_empty()),
        other => panic!("Expected disconnected, got {}", other),
    }
    assert!(client_wire.send(RdId::of(1), payload(8)).is_err());
}
