mod common;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time;

use common::{Ack, Chat, Recorder};
use flintnet::network::tcp::{TcpClient, TcpServer};
use flintnet::network::{DisconnectReason, Disconnectable, NetworkEvents, Remote, Sendable};
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

/// Server that stores every chat body and answers each one with an ack.
async fn echo_server(
    spam_limit: u32,
    recorder: Recorder,
) -> (Arc<TcpServer>, Arc<Mutex<Vec<String>>>) {
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
    let server = TcpServer::new(ctx, server_config(spam_limit));
    server.start().await.unwrap();
    (server, received)
}

/// Client that remembers every ack it gets back.
fn ack_client(
    addr: std::net::SocketAddr,
    recorder: Recorder,
) -> (Arc<TcpClient>, Arc<Mutex<Vec<u32>>>) {
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
    (TcpClient::new(ctx, addr), acks)
}

/// Observer that greets every accepted connection right away.
struct Greeter;

impl NetworkEvents for Greeter {
    fn on_connection_added(&self, remote: &dyn Remote) {
        let _ = remote.send_message(&Ack { seq: 7 });
    }
}

/// Observer that hangs up from inside its own connected callback.
struct DropOnConnect {
    recorder: Recorder,
}

impl NetworkEvents for DropOnConnect {
    fn on_connected(&self, remote: &dyn Remote) {
        self.recorder.on_connected(remote);
        remote.disconnect(DisconnectReason::Manual);
    }

    fn on_disconnected(&self, remote: &dyn Remote, reason: DisconnectReason) {
        self.recorder.on_disconnected(remote, reason);
    }
}

/// Observer that refuses every accepted connection right away.
struct Bouncer {
    recorder: Recorder,
}

impl NetworkEvents for Bouncer {
    fn on_connection_added(&self, remote: &dyn Remote) {
        self.recorder.on_connection_added(remote);
        remote.disconnect(DisconnectReason::Manual);
    }

    fn on_disconnected(&self, remote: &dyn Remote, reason: DisconnectReason) {
        self.recorder.on_disconnected(remote, reason);
    }
}

#[tokio::test]
async fn test_round_trip_preserves_order() {
    let (server, received) = echo_server(0, Recorder::new()).await;
    let addr = server.local_addr().unwrap();

    let (client, acks) = ack_client(addr, Recorder::new());
    client.connect().await.unwrap();

    for i in 0..40 {
        client
            .send_message(&Chat {
                body: format!("chat {}", i),
            })
            .unwrap();
    }
    time::sleep(Duration::from_millis(500)).await;

    let bodies = received.lock().clone();
    assert_eq!(bodies.len(), 40);
    for (i, body) in bodies.iter().enumerate() {
        assert_eq!(body, &format!("chat {}", i));
    }
    // acks come back in the same order they were produced
    let acks = acks.lock().clone();
    assert_eq!(acks, (1..=40).collect::<Vec<u32>>());
}

#[tokio::test]
async fn test_lifecycle_events_fire() {
    let server_events = Recorder::new();
    let client_events = Recorder::new();
    let (server, _) = echo_server(0, server_events.clone()).await;
    let addr = server.local_addr().unwrap();

    assert_eq!(server_events.started(), 1);

    let (client, _) = ack_client(addr, client_events.clone());
    client.connect().await.unwrap();
    time::sleep(Duration::from_millis(200)).await;

    assert_eq!(client_events.connected(), 1);
    assert_eq!(server_events.added(), 1);
    assert_eq!(server.connection_count(), 1);

    client.disconnect(DisconnectReason::Manual);
    time::sleep(Duration::from_millis(300)).await;

    assert_eq!(client_events.disconnects(), vec![DisconnectReason::Manual]);
    // the server notices the peer is gone and drops the connection
    assert_eq!(
        server_events.disconnects(),
        vec![DisconnectReason::ConnectionLost]
    );
    assert_eq!(server.connection_count(), 0);
}

#[tokio::test]
async fn test_spam_limit_cuts_off_flooder() {
    let server_events = Recorder::new();
    let (server, received) = echo_server(5, server_events.clone()).await;
    let addr = server.local_addr().unwrap();

    let (client, _) = ack_client(addr, Recorder::new());
    client.connect().await.unwrap();

    for i in 0..6 {
        client
            .send_message(&Chat {
                body: format!("flood {}", i),
            })
            .unwrap();
    }
    time::sleep(Duration::from_millis(500)).await;

    assert_eq!(server_events.disconnects(), vec![DisconnectReason::Spam]);
    assert_eq!(server.connection_count(), 0);
    // the five messages inside the allowance still got through
    assert_eq!(received.lock().len(), 5);
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let server_events = Recorder::new();
    let (server, _) = echo_server(0, server_events.clone()).await;
    let addr = server.local_addr().unwrap();

    let (client, _) = ack_client(addr, Recorder::new());
    client.connect().await.unwrap();
    time::sleep(Duration::from_millis(200)).await;

    let id = server.connection_ids()[0];
    let conn = server.get_connection(id).unwrap();
    conn.disconnect(DisconnectReason::Manual);
    conn.disconnect(DisconnectReason::Manual);
    time::sleep(Duration::from_millis(200)).await;

    assert_eq!(server_events.disconnects(), vec![DisconnectReason::Manual]);
    assert!(server.get_connection(id).is_none());
    // sending through the dead connection fails fast
    assert!(matches!(
        conn.send_message(&Ack { seq: 1 }),
        Err(NetError::Disposed)
    ));
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

    // same instance, second session
    client.connect().await.unwrap();
    client
        .send_message(&Chat {
            body: "second life".to_string(),
        })
        .unwrap();
    time::sleep(Duration::from_millis(300)).await;

    assert_eq!(received.lock().clone(), vec!["second life".to_string()]);
}

#[tokio::test]
async fn test_connect_refused_notifies_once() {
    // grab a free port and close it again
    let unused = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = unused.local_addr().unwrap();
    drop(unused);

    let client_events = Recorder::new();
    let (client, _) = ack_client(addr, client_events.clone());
    let result = client.connect().await;

    assert!(matches!(result, Err(NetError::ConnectionFailed(_))));
    assert_eq!(
        client_events.disconnects(),
        vec![DisconnectReason::ConnectionFailed]
    );
    assert_eq!(client_events.connected(), 0);
}

#[tokio::test]
async fn test_queue_seats_follow_connections() {
    let registry = MessageRegistry::builder().register::<Chat>().unwrap().build();
    let ctx = EngineContext::builder()
        .registry(registry)
        .queue_pool(small_pool())
        .build()
        .unwrap();
    let server = TcpServer::new(ctx.clone(), server_config(0));
    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();

    let mut clients = Vec::new();
    for _ in 0..3 {
        let (client, _) = ack_client(addr, Recorder::new());
        client.connect().await.unwrap();
        clients.push(client);
    }
    time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.connection_count(), 3);
    let seats: usize = ctx.pool().connection_counts().iter().sum();
    assert_eq!(seats, 3);

    clients[0].disconnect(DisconnectReason::Manual);
    time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.connection_count(), 2);
    // the seat came back with the connection
    let seats: usize = ctx.pool().connection_counts().iter().sum();
    assert_eq!(seats, 2);
}

#[tokio::test]
async fn test_disconnect_inside_on_connected_stops_the_session() {
    // server that answers each accepted connection with an immediate ack
    let ctx = EngineContext::builder()
        .registry(MessageRegistry::builder().build())
        .events(Greeter)
        .queue_pool(small_pool())
        .build()
        .unwrap();
    let server = TcpServer::new(ctx, server_config(0));
    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();

    let client_events = Recorder::new();
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
        .events(DropOnConnect {
            recorder: client_events.clone(),
        })
        .queue_pool(small_pool())
        .build()
        .unwrap();
    let client = TcpClient::new(ctx, addr);
    client.connect().await.unwrap();

    // the callback hung up before connect returned
    assert!(!client.is_connected());
    assert_eq!(client_events.disconnects(), vec![DisconnectReason::Manual]);

    // the greeting may still land on the socket, but a session that ended
    // must never dispatch it
    time::sleep(Duration::from_millis(500)).await;
    assert!(acks.lock().is_empty());
    assert_eq!(client_events.disconnects(), vec![DisconnectReason::Manual]);
}

#[tokio::test]
async fn test_disconnect_inside_on_connection_added_stops_the_session() {
    // server that refuses every connection from the added callback
    let server_events = Recorder::new();
    let received = Arc::new(Mutex::new(Vec::new()));
    let received_clone = received.clone();
    let registry = MessageRegistry::builder()
        .register::<Chat>()
        .unwrap()
        .handle::<Chat, _>(move |chat, _remote| {
            received_clone.lock().push(chat.body);
        })
        .unwrap()
        .build();
    let ctx = EngineContext::builder()
        .registry(registry)
        .events(Bouncer {
            recorder: server_events.clone(),
        })
        .queue_pool(small_pool())
        .build()
        .unwrap();
    let server = TcpServer::new(ctx, server_config(0));
    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();

    let (client, _) = ack_client(addr, Recorder::new());
    client.connect().await.unwrap();
    let _ = client.send_message(&Chat {
        body: "knock".to_string(),
    });
    time::sleep(Duration::from_millis(500)).await;

    assert_eq!(server_events.added(), 1);
    assert_eq!(server_events.disconnects(), vec![DisconnectReason::Manual]);
    assert_eq!(server.connection_count(), 0);
    // bytes that were in flight when the connection was refused never
    // reach a handler
    assert!(received.lock().is_empty());
}
