#[macro_use]
extern crate log;

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use othernet::address::LogicalAddress;
use othernet::config::Config;
use othernet::handler::{self, Delivered};
use othernet::held::Priority;
use othernet::node::Node;
use othernet::{error, maintenance, protocol, server};
use tokio::sync::mpsc;

/// Renders inbound `OTHERNET_MESSAGE`s to stdout, reprinting the REPL
/// prompt after each the way the original's `printf(...); printf("> ")`
/// pairing does.
struct StdoutSurface;

impl server::Surface for StdoutSurface {
    fn on_delivered(&self, delivered: Delivered) {
        println!("\n[MESSAGE from {}] {}", delivered.from, delivered.data);
        print!("> ");
        let _ = io::stdout().flush();
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    match run().await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!("startup failed: {}", e);
            std::process::exit(exit_code_for(&e));
        }
    }
}

fn exit_code_for(e: &error::OthernetError) -> i32 {
    match e {
        error::OthernetError::EnvMissing(_) => 2,
        error::OthernetError::BindFailed(_) => 1,
        _ => 1,
    }
}

async fn run() -> error::OthernetResult<()> {
    let config = Config::load()?;

    let node = Arc::new(Node::new(&config));

    info!("my othernet address: {}", node.address);

    let listener = server::bind(&node.ip, node.port).await?;

    let surface = Arc::new(StdoutSurface);

    let server_task = tokio::spawn(server::run(node.clone(), listener, surface));
    let maintenance_task = tokio::spawn(maintenance::run(node.clone()));

    for (ip, port) in config.bootstrap.iter().chain(config.peer_addresses.iter()) {
        if let Err(e) = node.connect(ip, *port).await {
            warn!("bootstrap connect failed: {}", e);
        }
    }

    print_banner();

    run_repl(&node).await;

    node.stop();

    let goodbye = node.own_message(
        protocol::MessageType::Goodbye,
        "Node shutting down gracefully".to_string(),
    );
    node.broadcast(&goodbye).await;

    let _ = server_task.await;
    let _ = maintenance_task.await;

    let held_count = node.held.list_pending().await.len();
    info!("had {} held message(s) at shutdown", held_count);

    Ok(())
}

fn print_banner() {
    println!("\nOthernet Node Ready! Commands:");
    println!("  connect <ip> <port>               - Connect to a peer");
    println!("  send <realm.cluster.node> <msg>    - Send message to othernet address");
    println!("  broadcast <message>                - Broadcast to all peers");
    println!("  peers                              - Show connected peers");
    println!("  held                               - Show held messages");
    println!("  capabilities                       - Show my capabilities");
    println!("  quit                               - Exit\n");
}

/// Reads commands from stdin (on a dedicated blocking thread, since stdin
/// reads block) until EOF, `quit`, or SIGINT/SIGTERM, translating each line
/// into one core operation. This loop and its stdout rendering are
/// deliberately thin glue over the node's public operations.
async fn run_repl(node: &Arc<Node>) {
    let (tx, mut rx) = mpsc::unbounded_channel();

    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            print!("> ");
            let _ = io::stdout().flush();

            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    print!("> ");
    let _ = io::stdout().flush();

    loop {
        tokio::select! {
            _ = signal_shutdown() => return,
            line = rx.recv() => {
                match line {
                    Some(line) => {
                        if !handle_command(node, line.trim()).await {
                            return;
                        }
                    }
                    None => return,
                }
            }
        }
    }
}

async fn signal_shutdown() {
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

/// Returns `false` when the REPL should stop (the `quit` command or EOF).
async fn handle_command(node: &Arc<Node>, line: &str) -> bool {
    if line.is_empty() {
        return true;
    }

    if line == "quit" {
        return false;
    }

    if line == "peers" {
        for peer in node.peers.list_active().await {
            println!(
                "  {} at {} (capabilities: {:?})",
                peer.address, peer.transport, peer.capabilities
            );
        }
        return true;
    }

    if line == "held" {
        for msg in node.held.list_pending().await {
            let payload = if msg.payload.len() > 50 {
                let mut truncated = msg.payload.clone();
                protocol::truncate_utf8(&mut truncated, 50);
                format!("{}...", truncated)
            } else {
                msg.payload.clone()
            };
            println!(
                "  ID:{} Target:{} Status:{:?} Attempts:{} Priority:{:?}",
                msg.id, msg.target, msg.status, msg.attempt_count, msg.priority
            );
            println!("    Payload: {}", payload);
        }
        return true;
    }

    if line == "capabilities" {
        println!("My capabilities: {:?}", node.capabilities);
        return true;
    }

    if let Some(rest) = line.strip_prefix("connect ") {
        let mut parts = rest.split_whitespace();
        if let (Some(ip), Some(port)) = (parts.next(), parts.next()) {
            match port.parse::<u16>() {
                Ok(port) => {
                    if let Err(e) = node.connect(ip, port).await {
                        warn!("connect failed: {}", e);
                    }
                }
                Err(_) => println!("invalid port: {}", port),
            }
        }
        return true;
    }

    if let Some(rest) = line.strip_prefix("send ") {
        let mut parts = rest.splitn(2, ' ');
        if let (Some(addr_str), Some(message)) = (parts.next(), parts.next()) {
            match addr_str.parse::<LogicalAddress>() {
                Ok(target) => {
                    match handler::enqueue_for_holding(
                        node,
                        target,
                        message.to_string(),
                        Priority::Normal,
                    )
                    .await
                    {
                        Some(id) => println!("message {} queued for delivery to {}", id, target),
                        None => println!("unable to queue message (store full)"),
                    }
                }
                Err(_) => println!("invalid address: {}", addr_str),
            }
        }
        return true;
    }

    if let Some(message) = line.strip_prefix("broadcast ") {
        let msg = node.own_message(protocol::MessageType::OthernetMessage, message.to_string());
        node.broadcast(&msg).await;
        return true;
    }

    println!("unknown command: {}", line);
    true
}
