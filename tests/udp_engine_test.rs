mod common;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time;

use common::{Ack, Chat, Recorder};
use flintnet::network::udp::{UdpClient, UdpServer};
use flintnet::network::{DisconnectReason, Disconnectable, Sendable};
use flintnet::protocol::MessageRegistry;
use flintnet::queue::QueuePoolConfig;
use flintnet::service::{EngineContext, NetworkConfig};
use flintnet::NetError;

fn server_config(spam_limit: u32) -> NetworkConfig {
    NetworkConfig {
        ip: "127.0.0.1".to_string(),
        port: 0,
        message_count_limit_before_spam: spam_limit,
        ..Default::default()
    }
}

fn small_pool() -> QueuePoolConfig {
    QueuePoolConfig {
        num_queues: 2,
        poll_interval: Duration::from_millis(1),
        ..Default::default()
    }
}

async fn echo_server(
    spam_limit: u32,
    recorder: Recorder,
) -> (Arc<UdpServer>, Arc<Mutex<Vec<String>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let received_clone = received.clone();
    let registry = MessageRegistry::builder()
        .register::<Chat>()
        .unwrap()
        .handle::<Chat, _>(move |chat, remote| {
            let seq = {
                let mut seen = received_clone.lock();
                seen.push(chat.body);
                seen.len() as u32
            };
            let _ = remote.send_message(&Ack { seq });
        })
        .unwrap()
        .build();
    let ctx = EngineContext::builder()
        .registry(registry)
        .events(recorder)
        .queue_pool(small_pool())
        .build()
        .unwrap();
    let server = UdpServer::new(ctx, server_config(spam_limit));
    server.start().await.unwrap();
    (server, received)
}

fn ack_client(
    addr: std::net::SocketAddr,
    recorder: Recorder,
) -> (Arc<UdpClient>, Arc<Mutex<Vec<u32>>>) {
    let acks = Arc::new(Mutex::new(Vec::new()));
    let acks_clone = acks.clone();
    let registry = MessageRegistry::builder()
        .register::<Ack>()
        .unwrap()
        .handle::<Ack, _>(move |ack, _remote| {
            acks_clone.lock().push(ack.seq);
        })
        .unwrap()
        .build();
    let ctx = EngineContext::builder()
        .registry(registry)
        .events(recorder)
        .queue_pool(small_pool())
        .build()
        .unwrap();
    (UdpClient::new(ctx, addr), acks)
}

#[tokio::test]
async fn test_round_trip_over_datagrams() {
    let server_events = Recorder::new();
    let (server, received) = echo_server(0, server_events.clone()).await;
    let addr = server.local_addr().unwrap();

    let (client, acks) = ack_client(addr, Recorder::new());
    client.connect().await.unwrap();

    for i in 0..5 {
        client
            .send_message(&Chat {
                body: format!("dgram {}", i),
            })
            .unwrap();
    }
    time::sleep(Duration::from_millis(500)).await;

    let bodies = received.lock().clone();
    assert_eq!(bodies.len(), 5);
    for (i, body) in bodies.iter().enumerate() {
        assert_eq!(body, &format!("dgram {}", i));
    }
    assert_eq!(acks.lock().clone(), vec![1, 2, 3, 4, 5]);
    // five datagrams from one endpoint still mean one connection
    assert_eq!(server_events.added(), 1);
    assert_eq!(server.connection_count(), 1);
}

#[tokio::test]
async fn test_endpoint_connection_is_created_lazily() {
    let server_events = Recorder::new();
    let (server, _) = echo_server(0, server_events.clone()).await;
    let addr = server.local_addr().unwrap();

    // connecting a udp client sends nothing, the server learns about the
    // endpoint only when a datagram shows up
    let (client, _) = ack_client(addr, Recorder::new());
    client.connect().await.unwrap();
    time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server_events.added(), 0);
    assert_eq!(server.connection_count(), 0);

    client
        .send_message(&Chat {
            body: "hello".to_string(),
        })
        .unwrap();
    time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server_events.added(), 1);
    assert_eq!(server.connection_count(), 1);
}

#[tokio::test]
async fn test_oversized_datagram_is_rejected() {
    let (server, received) = echo_server(0, Recorder::new()).await;
    let addr = server.local_addr().unwrap();

    let (client, _) = ack_client(addr, Recorder::new());
    client.connect().await.unwrap();

    // a u16 length prefix allows the body, but the framed whole is larger
    // than one datagram may carry
    let result = client.send_message(&Chat {
        body: "x".repeat(65_530),
    });
    assert!(matches!(result, Err(NetError::DatagramTooLarge(_))));
    time::sleep(Duration::from_millis(200)).await;
    assert!(received.lock().is_empty());
}

#[tokio::test]
async fn test_spam_limit_cuts_off_endpoint() {
    let server_events = Recorder::new();
    let (server, _) = echo_server(3, server_events.clone()).await;
    let addr = server.local_addr().unwrap();

    let (client, _) = ack_client(addr, Recorder::new());
    client.connect().await.unwrap();
    for i in 0..4 {
        client
            .send_message(&Chat {
                body: format!("flood {}", i),
            })
            .unwrap();
    }
    time::sleep(Duration::from_millis(500)).await;

    assert_eq!(server_events.disconnects(), vec![DisconnectReason::Spam]);
    assert_eq!(server.connection_count(), 0);

    // the endpoint table holds no grudge, the next datagram starts a
    // fresh connection with a fresh window
    client
        .send_message(&Chat {
            body: "back again".to_string(),
        })
        .unwrap();
    time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server_events.added(), 2);
    assert_eq!(server.connection_count(), 1);
}

#[tokio::test]
async fn test_server_side_disconnect_removes_endpoint() {
    let server_events = Recorder::new();
    let (server, _) = echo_server(0, server_events.clone()).await;
    let addr = server.local_addr().unwrap();

    let (client, _) = ack_client(addr, Recorder::new());
    client.connect().await.unwrap();
    client
        .send_message(&Chat {
            body: "present".to_string(),
        })
        .unwrap();
    time::sleep(Duration::from_millis(300)).await;

    let peer = server.connection_addrs()[0];
    let conn = server.get_connection(peer).unwrap();
    conn.disconnect(DisconnectReason::Manual);
    conn.disconnect(DisconnectReason::Manual);

    assert_eq!(server_events.disconnects(), vec![DisconnectReason::Manual]);
    assert_eq!(server.connection_count(), 0);
    assert!(matches!(
        conn.send(bytes::Bytes::from_static(b"x")),
        Err(NetError::Disposed)
    ));
}

#[tokio::test]
async fn test_server_close_releases_socket_and_fails_sends() {
    let (server, _) = echo_server(0, Recorder::new()).await;
    let addr = server.local_addr().unwrap();

    let (client, _) = ack_client(addr, Recorder::new());
    client.connect().await.unwrap();
    client
        .send_message(&Chat {
            body: "present".to_string(),
        })
        .unwrap();
    time::sleep(Duration::from_millis(300)).await;
    let peer = server.connection_addrs()[0];
    let conn = server.get_connection(peer).unwrap();

    server.close(DisconnectReason::Manual);
    time::sleep(Duration::from_millis(200)).await;

    // the send pump exits with the channel, so sends through a surviving
    // connection handle fail instead of silently delivering
    assert!(matches!(
        conn.send_message(&Ack { seq: 9 }),
        Err(NetError::ChannelSendError(_))
    ));
    // both socket holders are gone, the port is free again
    std::net::UdpSocket::bind(addr).unwrap();
}

#[tokio::test]
async fn test_client_is_reusable_after_disconnect() {
    let (server, received) = echo_server(0, Recorder::new()).await;
    let addr = server.local_addr().unwrap();

    let (client, _) = ack_client(addr, Recorder::new());
    client.connect().await.unwrap();
    client.disconnect(DisconnectReason::Manual);

    let err = client.send_message(&Chat {
        body: "too late".to_string(),
    });
    assert!(matches!(err, Err(NetError::NotConnected)));

    client.connect().await.unwrap();
    client
        .send_message(&Chat {
            body: "second life".to_string(),
        })
        .unwrap();
    time::sleep(Duration::from_millis(300)).await;
    assert_eq!(received.lock().clone(), vec!["second life".to_string()]);
}
