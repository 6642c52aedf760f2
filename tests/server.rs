// Integration tests for the acceptor + protocol handler, exercising a real
// bound TCP listener end to end rather than calling the handler directly.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use othernet::address::LogicalAddress;
use othernet::config::Config;
use othernet::handler::Delivered;
use othernet::node::Node;
use othernet::server::{self, Surface};

fn test_config(port: u16) -> Config {
    Config {
        bind_port: port,
        node_ip: "127.0.0.1".to_string(),
        realm: 1,
        cluster: 1,
        node_id: 7,
        max_peers: 50,
        bootstrap: Vec::new(),
        peer_addresses: Vec::new(),
        capabilities: othernet::address::Capabilities::HOLDING,
    }
}

struct NoopSurface;

impl Surface for NoopSurface {
    fn on_delivered(&self, _delivered: Delivered) {}
}

struct CapturingSurface(tokio::sync::mpsc::UnboundedSender<Delivered>);

impl Surface for CapturingSurface {
    fn on_delivered(&self, delivered: Delivered) {
        let _ = self.0.send(delivered);
    }
}

async fn start_node(port: u16) -> Arc<Node> {
    let config = test_config(port);
    let node = Arc::new(Node::new(&config));
    let listener = server::bind(&node.ip, node.port).await.unwrap();

    let surface = Arc::new(NoopSurface);
    tokio::spawn(server::run(node.clone(), listener, surface));

    // give the acceptor a moment to start listening
    tokio::time::sleep(Duration::from_millis(20)).await;

    node
}

#[tokio::test]
async fn hello_registers_peer_and_replies() {
    let node = start_node(18080).await;

    // The node replies to a HELLO by opening a fresh outbound connection to
    // the sender's advertised port, so a listener is needed there to
    // observe the reply.
    let reply_listener = tokio::net::TcpListener::bind(("127.0.0.1", 19090))
        .await
        .unwrap();

    let mut stream = TcpStream::connect(("127.0.0.1", 18080)).await.unwrap();

    let hello = "HELLO 2.2.9 127.0.0.1 19090 scope:0.0.8 1700000000 capabilities:3\n";
    stream.write_all(hello.as_bytes()).await.unwrap();

    let (mut reply_stream, _) =
        tokio::time::timeout(Duration::from_secs(2), reply_listener.accept())
            .await
            .unwrap()
            .unwrap();

    let mut buf = vec![0u8; 256];
    let n = tokio::time::timeout(Duration::from_secs(2), reply_stream.read(&mut buf))
        .await
        .unwrap()
        .unwrap();

    let reply = String::from_utf8_lossy(&buf[..n]);
    assert!(reply.starts_with("HELLO"));

    let peer = node
        .peers
        .find_by_address(LogicalAddress::new(2, 2, 9))
        .await
        .unwrap();
    assert!(peer.active);

    node.stop();
}

#[tokio::test]
async fn othernet_message_is_rendered_to_surface() {
    let config = test_config(18081);
    let node = Arc::new(Node::new(&config));
    let listener = server::bind(&node.ip, node.port).await.unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let surface = Arc::new(CapturingSurface(tx));
    tokio::spawn(server::run(node.clone(), listener, surface));
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut stream = TcpStream::connect(("127.0.0.1", 18081)).await.unwrap();
    let line = "OTHERNET_MESSAGE 3.3.3 127.0.0.1 20000 scope:0.0.8 1700000001 hello from a peer\n";
    stream.write_all(line.as_bytes()).await.unwrap();

    let delivered = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(delivered.from, LogicalAddress::new(3, 3, 3));
    assert_eq!(delivered.data, "hello from a peer");

    node.stop();
}

#[tokio::test]
async fn goodbye_marks_peer_inactive_and_redistributes() {
    let node = start_node(18082).await;

    let transport = othernet::address::Transport::new("127.0.0.1".to_string(), 19091);
    node.peers
        .upsert_peer(
            transport.clone(),
            LogicalAddress::new(4, 4, 4),
            othernet::address::Capabilities::HOLDING,
        )
        .await
        .unwrap();

    let mut stream = TcpStream::connect(("127.0.0.1", 18082)).await.unwrap();
    let goodbye = "GOODBYE 4.4.4 127.0.0.1 19091 scope:0.0.8 1700000002 bye\n";
    stream.write_all(goodbye.as_bytes()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;

    let peers = node.peers.list_all().await;
    let peer = peers.iter().find(|p| p.transport == transport).unwrap();
    assert!(!peer.active);

    node.stop();
}
