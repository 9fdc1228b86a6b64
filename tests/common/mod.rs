//! Shared harness for gateway integration tests
//!
//! Starts a real listener on an ephemeral loopback port and drives it with a
//! `tokio-tungstenite` client.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use juiced::gateway::host::Host;
use juiced::gateway::log_tap::LogBus;
use juiced::gateway::storage::MemoryPersistence;
use juiced::gateway::{Gateway, GatewayConfig, Profile, ProfileStore, RemoteMessage};
use parking_lot::Mutex;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const ROOT_PASSWORD: &str = "secret";

const WAIT: Duration = Duration::from_secs(5);

pub struct Harness {
    pub gateway: Gateway,
    pub addr: SocketAddr,
    pub persistence: Arc<MemoryPersistence>,
    pub bus: Arc<LogBus>,
    pub calls: Arc<Mutex<Vec<String>>>,
}

pub fn config(password: &str) -> GatewayConfig {
    GatewayConfig {
        bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        password: password.to_string(),
        ..GatewayConfig::default()
    }
}

pub fn profile(name: &str, password: &str, allowed: &[&str]) -> Profile {
    let mut profile = Profile::new(name);
    profile.enabled = true;
    profile.password = password.to_string();
    profile.allowed_commands = allowed.iter().map(|p| p.to_string()).collect();
    profile
}

/// Gateway around `profiles`, not yet started
pub fn harness(profiles: Vec<Profile>) -> Harness {
    harness_with(ROOT_PASSWORD, profiles, |host| host)
}

/// Gateway with a custom root password and host customization
pub fn harness_with(
    root_password: &str,
    profiles: Vec<Profile>,
    customize: impl FnOnce(Host) -> Host,
) -> Harness {
    harness_on(config(root_password), profiles, customize)
}

/// Gateway built from an explicit configuration
pub fn harness_on(
    config: GatewayConfig,
    profiles: Vec<Profile>,
    customize: impl FnOnce(Host) -> Host,
) -> Harness {
    let store = ProfileStore::from_profiles(profiles).expect("valid profiles");
    let persistence = Arc::new(MemoryPersistence::new(store));
    let bus = Arc::new(LogBus::new());
    let calls: Arc<Mutex<Vec<String>>> = Arc::default();

    let seen = calls.clone();
    let interpreter = move |command: &str, args: &[String]| -> Option<String> {
        seen.lock().push(command.to_string());
        match command {
            "status" => Some("hostname: juiced test\nplayers: 0 (0 max)".to_string()),
            "echo" => Some(format!("[echo] {}", args.join(" "))),
            "say" => Some(args.join(" ")),
            "noop" => None,
            _ => Some(format!("ran {} {}", command, args.join(" ")).trim_end().to_string()),
        }
    };
    let host = customize(Host::new(interpreter, persistence.clone()).with_log(bus.clone()));
    let gateway = Gateway::new(config, host).expect("gateway loads profiles");

    Harness {
        gateway,
        addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        persistence,
        bus,
        calls,
    }
}

/// A loopback port nothing is listening on right now
pub fn free_port() -> u16 {
    std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .and_then(|listener| listener.local_addr())
        .expect("ephemeral port")
        .port()
}

/// Gateway around `profiles`, listening
pub fn started(profiles: Vec<Profile>) -> Harness {
    let mut harness = harness(profiles);
    harness.addr = harness.gateway.start().expect("gateway starts");
    harness
}

pub fn url(addr: SocketAddr, credential: &str) -> String {
    format!("ws://{}/{}", addr, credential)
}

pub async fn connect(harness: &Harness, credential: &str) -> Client {
    let before = harness.gateway.sessions().len();
    let (client, _) = tokio_tungstenite::connect_async(url(harness.addr, credential))
        .await
        .expect("websocket handshake");
    wait_for_sessions(&harness.gateway, before + 1).await;
    client
}

/// Whether the gateway refuses the upgrade for `credential`
pub async fn refused(addr: SocketAddr, credential: &str) -> bool {
    tokio_tungstenite::connect_async(url(addr, credential))
        .await
        .is_err()
}

pub async fn wait_for_sessions(gateway: &Gateway, count: usize) {
    tokio::time::timeout(WAIT, async {
        while gateway.sessions().len() != count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session count settles");
}

pub async fn send(client: &mut Client, line: &str) {
    let frame = serde_json::json!({ "Message": line, "Identifier": 1 }).to_string();
    client.send(Message::Text(frame)).await.expect("send frame");
}

pub async fn send_raw(client: &mut Client, frame: &str) {
    client
        .send(Message::Text(frame.to_string()))
        .await
        .expect("send frame");
}

/// Next envelope, or `None` if the socket closed first
pub async fn next_message(client: &mut Client) -> Option<RemoteMessage> {
    tokio::time::timeout(WAIT, async {
        while let Some(frame) = client.next().await {
            match frame {
                Ok(Message::Text(text)) => return RemoteMessage::decode(&text),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
        None
    })
    .await
    .expect("message within timeout")
}

/// Next envelope whose text satisfies `pred`, skipping unrelated log lines
pub async fn next_matching(
    client: &mut Client,
    pred: impl Fn(&RemoteMessage) -> bool,
) -> RemoteMessage {
    loop {
        let message = next_message(client).await.expect("socket open");
        if pred(&message) {
            return message;
        }
    }
}

/// Assert nothing but unrelated traffic arrives for a short while
pub async fn assert_quiet(client: &mut Client, pred: impl Fn(&RemoteMessage) -> bool) {
    let outcome = tokio::time::timeout(Duration::from_millis(300), async {
        while let Some(Ok(Message::Text(text))) = client.next().await {
            if let Some(message) = RemoteMessage::decode(&text) {
                if pred(&message) {
                    return message;
                }
            }
        }
        futures::future::pending().await
    })
    .await;
    if let Ok(message) = outcome {
        panic!("unexpected message: {:?}", message);
    }
}
