//! Live transport against an in-process STOMP broker served by axum.

#![allow(clippy::panic)]

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio_test::{assert_err, assert_ok};

use teamup_realtime::connection::{ConnectionManager, ManagerConfig, ReconnectPolicy};
use teamup_realtime::domain::{
    Address, ChatMessage, OutboundMessage, RoomId, SendDestination, SessionEvent, UserId,
};
use teamup_realtime::error::RealtimeError;
use teamup_realtime::session::{RoomSession, RoomSpec, SessionState};
use teamup_realtime::transport::stomp::{Command, Frame};
use teamup_realtime::transport::{
    ConnectOptions, LiveConfig, LiveTransport, MessageHandler, Transport,
};

#[derive(Debug, Clone)]
struct Delivery {
    destination: String,
    body: String,
}

#[derive(Clone)]
struct Broker {
    deliveries: broadcast::Sender<Delivery>,
    kill: broadcast::Sender<()>,
    connects: Arc<AtomicUsize>,
    reject: Arc<AtomicBool>,
    last_auth: Arc<Mutex<Option<String>>>,
    next_id: Arc<AtomicI64>,
}

impl Broker {
    fn new() -> Self {
        let (deliveries, _) = broadcast::channel(64);
        let (kill, _) = broadcast::channel(4);
        Self {
            deliveries,
            kill,
            connects: Arc::new(AtomicUsize::new(0)),
            reject: Arc::new(AtomicBool::new(false)),
            last_auth: Arc::new(Mutex::new(None)),
            next_id: Arc::new(AtomicI64::new(1)),
        }
    }

    fn inject(&self, destination: &str, body: &str) {
        let _ = self.deliveries.send(Delivery {
            destination: destination.to_string(),
            body: body.to_string(),
        });
    }

    fn drop_clients(&self) {
        let _ = self.kill.send(());
    }

    fn handle(&self, frame: Frame, subs: &mut Vec<(String, String)>) -> Option<Frame> {
        match frame.command {
            Command::Connect => {
                self.connects.fetch_add(1, Ordering::SeqCst);
                *self.last_auth.lock().unwrap_or_else(PoisonError::into_inner) =
                    frame.get("Authorization").map(str::to_string);
                if self.reject.load(Ordering::SeqCst) {
                    return Some(Frame::new(Command::Error).header("message", "access denied"));
                }
                Some(Frame::new(Command::Connected).header("version", "1.2"))
            }
            Command::Subscribe => {
                if let (Some(id), Some(destination)) = (frame.get("id"), frame.get("destination")) {
                    subs.push((id.to_string(), destination.to_string()));
                }
                None
            }
            Command::Unsubscribe => {
                if let Some(id) = frame.get("id") {
                    subs.retain(|(sub_id, _)| sub_id != id);
                }
                None
            }
            Command::Send => {
                let family = match frame.get("destination") {
                    Some("/app/chat.sendMessage") => "topic",
                    Some("/app/chat.private") => "queue",
                    _ => return None,
                };
                let Ok(payload) = serde_json::from_str::<serde_json::Value>(&frame.body) else {
                    return None;
                };
                let room = payload.get("roomId").and_then(serde_json::Value::as_i64)?;
                let stored = serde_json::json!({
                    "id": self.next_id.fetch_add(1, Ordering::SeqCst),
                    "chatRoomId": room,
                    "senderId": payload.get("senderId"),
                    "message": payload.get("message"),
                    "createdAt": "2024-01-15T10:30:00",
                });
                self.inject(&format!("/{family}/chat/room/{room}"), &stored.to_string());
                None
            }
            _ => None,
        }
    }
}

async fn upgrade(ws: WebSocketUpgrade, State(broker): State<Broker>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_client(socket, broker))
}

async fn serve_client(socket: WebSocket, broker: Broker) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut deliveries = broker.deliveries.subscribe();
    let mut kill = broker.kill.subscribe();
    let mut subs: Vec<(String, String)> = Vec::new();

    loop {
        tokio::select! {
            incoming = ws_rx.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                let Ok(Some(frame)) = Frame::parse(text.as_str()) else {
                    continue;
                };
                if let Some(reply) = broker.handle(frame, &mut subs)
                    && ws_tx.send(Message::text(reply.encode())).await.is_err()
                {
                    break;
                }
            }
            delivery = deliveries.recv() => {
                let Ok(delivery) = delivery else {
                    break;
                };
                for (id, destination) in subs.iter().filter(|(_, d)| *d == delivery.destination) {
                    let frame = Frame::new(Command::Message)
                        .header("subscription", id.as_str())
                        .header("destination", destination.as_str())
                        .header("content-type", "application/json")
                        .body(delivery.body.clone());
                    if ws_tx.send(Message::text(frame.encode())).await.is_err() {
                        return;
                    }
                }
            }
            _ = kill.recv() => break,
        }
    }
}

async fn start_broker() -> (Broker, String) {
    let broker = Broker::new();
    let Ok(listener) = tokio::net::TcpListener::bind("127.0.0.1:0").await else {
        panic!("bind test listener");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("listener address");
    };
    let app = Router::new()
        .route("/ws-chat/websocket", get(upgrade))
        .with_state(broker.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (broker, format!("ws://{addr}/ws-chat/websocket"))
}

fn live(url: &str) -> LiveTransport {
    LiveTransport::new(LiveConfig {
        url: url.to_string(),
        connect_timeout: Duration::from_secs(2),
    })
}

fn manager(url: &str) -> ConnectionManager<LiveTransport> {
    ConnectionManager::new(
        live(url),
        ManagerConfig {
            reconnect: ReconnectPolicy::fixed(Duration::from_millis(50)),
            send_timeout: Duration::from_secs(2),
            ..ManagerConfig::default()
        },
    )
}

fn collector() -> (MessageHandler, mpsc::UnboundedReceiver<ChatMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler: MessageHandler = Arc::new(move |message| {
        let _ = tx.send(message);
    });
    (handler, rx)
}

async fn next(rx: &mut mpsc::UnboundedReceiver<ChatMessage>) -> ChatMessage {
    match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
        Ok(Some(message)) => message,
        _ => panic!("no message within two seconds"),
    }
}

async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn group_send_is_delivered_to_topic_subscriber() {
    let (_broker, url) = start_broker().await;
    let mgr = manager(&url);
    assert_ok!(mgr.connect().await);

    let (handler, mut rx) = collector();
    mgr.subscribe(Address::Broadcast(RoomId::new(101)), handler);
    let msg = OutboundMessage::chat(RoomId::new(101), UserId::new(5), "hi");
    assert_ok!(mgr.send(SendDestination::Group, &msg).await);

    let got = next(&mut rx).await;
    assert_eq!(got.content, "hi");
    assert_eq!(got.sender_id, UserId::new(5));
    assert_eq!(got.room_id, RoomId::new(101));
    assert_eq!(got.id.as_str(), "1");
}

#[tokio::test]
async fn direct_send_is_delivered_to_queue_subscriber() {
    let (_broker, url) = start_broker().await;
    let mgr = manager(&url);
    assert_ok!(mgr.connect().await);

    let (topic, mut topic_rx) = collector();
    let (queue, mut queue_rx) = collector();
    mgr.subscribe(Address::Broadcast(RoomId::new(7)), topic);
    mgr.subscribe(Address::Direct(RoomId::new(7)), queue);
    let msg = OutboundMessage::chat(RoomId::new(7), UserId::new(2), "psst");
    assert_ok!(mgr.send(SendDestination::Direct, &msg).await);

    assert_eq!(next(&mut queue_rx).await.content, "psst");
    assert!(topic_rx.try_recv().is_err());
}

#[tokio::test]
async fn malformed_body_does_not_end_subscription() {
    let (broker, url) = start_broker().await;
    let mgr = manager(&url);
    assert_ok!(mgr.connect().await);

    let (handler, mut rx) = collector();
    mgr.subscribe(Address::Broadcast(RoomId::new(3)), handler);
    // Let the SUBSCRIBE frame reach the broker before injecting.
    let ping = OutboundMessage::chat(RoomId::new(3), UserId::new(1), "first");
    assert_ok!(mgr.send(SendDestination::Group, &ping).await);
    assert_eq!(next(&mut rx).await.content, "first");

    broker.inject("/topic/chat/room/3", "this is not json");
    broker.inject("/topic/chat/room/3", r#"{"message":"no sender"}"#);
    let after = OutboundMessage::chat(RoomId::new(3), UserId::new(1), "after");
    assert_ok!(mgr.send(SendDestination::Group, &after).await);

    assert_eq!(next(&mut rx).await.content, "after");
    assert!(mgr.is_connected());
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let (_broker, url) = start_broker().await;
    let mgr = manager(&url);
    assert_ok!(mgr.connect().await);

    let (keep, mut keep_rx) = collector();
    let (gone, mut gone_rx) = collector();
    mgr.subscribe(Address::Broadcast(RoomId::new(4)), keep);
    let id = mgr.subscribe(Address::Broadcast(RoomId::new(5)), gone);
    assert!(mgr.unsubscribe(id));

    let dropped = OutboundMessage::chat(RoomId::new(5), UserId::new(1), "nobody");
    assert_ok!(mgr.send(SendDestination::Group, &dropped).await);
    let marker = OutboundMessage::chat(RoomId::new(4), UserId::new(1), "marker");
    assert_ok!(mgr.send(SendDestination::Group, &marker).await);

    assert_eq!(next(&mut keep_rx).await.content, "marker");
    assert!(gone_rx.try_recv().is_err());
}

#[tokio::test]
async fn subscription_survives_broker_dropping_the_link() {
    let (broker, url) = start_broker().await;
    let mgr = manager(&url);
    assert_ok!(mgr.connect().await);
    let (handler, mut rx) = collector();
    mgr.subscribe(Address::Broadcast(RoomId::new(101)), handler);

    broker.drop_clients();
    eventually("reconnect", || {
        broker.connects.load(Ordering::SeqCst) >= 2
            && mgr.is_connected()
            && mgr.subscriptions().iter().all(|s| s.active)
    })
    .await;

    let msg = OutboundMessage::chat(RoomId::new(101), UserId::new(5), "still here");
    assert_ok!(mgr.send(SendDestination::Group, &msg).await);
    assert_eq!(next(&mut rx).await.content, "still here");
}

#[tokio::test]
async fn broker_error_on_connect_fails_connect() {
    let (broker, url) = start_broker().await;
    broker.reject.store(true, Ordering::SeqCst);
    let mgr = manager(&url);
    let err = assert_err!(mgr.connect().await);
    assert!(matches!(err, RealtimeError::ConnectionFailed(_)));
    assert!(!mgr.is_connected());
}

#[tokio::test]
async fn bearer_token_is_sent_on_connect() {
    let (broker, url) = start_broker().await;
    let transport = live(&url);
    let mgr = ConnectionManager::new(
        transport,
        ManagerConfig {
            connect: ConnectOptions {
                token: Some("t0k".to_string()),
            },
            ..ManagerConfig::default()
        },
    );
    assert_ok!(mgr.connect().await);
    let auth = broker
        .last_auth
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    assert_eq!(auth.as_deref(), Some("Bearer t0k"));
    assert_ok!(mgr.disconnect().await);
    assert!(!mgr.is_connected());
}

#[tokio::test]
async fn room_session_round_trip_over_live_broker() {
    let (_broker, url) = start_broker().await;
    let mgr = manager(&url);
    let mut session = RoomSession::new(mgr.clone(), RoomSpec::group(RoomId::new(101), UserId::new(5)), 16);
    let mut events = session.events();
    assert_ok!(session.open().await);
    assert_ok!(session.send("hi").await);

    let received = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::MessageReceived { message, .. }) => break message,
                Ok(_) => continue,
                Err(e) => panic!("event bus closed: {e}"),
            }
        }
    })
    .await;
    let Ok(message) = received else {
        panic!("no message event");
    };
    assert_eq!(message.content, "hi");
    assert_eq!(session.message_count(), 1);

    assert_ok!(session.close().await);
    assert!(!mgr.is_connected());
}

/// Accepts TCP connections and never speaks; `hold` keeps them open.
async fn silent_endpoint(hold: bool) -> String {
    let Ok(listener) = tokio::net::TcpListener::bind("127.0.0.1:0").await else {
        panic!("bind silent listener");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("listener address");
    };
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            if hold {
                held.push(stream);
            }
        }
    });
    addr.to_string()
}

#[tokio::test]
async fn abandoned_open_against_silent_broker_releases_everything() {
    let addr = silent_endpoint(true).await;
    let mgr = manager(&format!("ws://{addr}/ws-chat/websocket"));
    let mut session = RoomSession::new(mgr.clone(), RoomSpec::group(RoomId::new(7), UserId::new(5)), 16);

    let abandoned = tokio::time::timeout(Duration::from_millis(100), session.open()).await;
    assert!(abandoned.is_err());
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(mgr.consumer_count(), 0);
    let err = assert_err!(session.send("hello?").await);
    assert!(matches!(err, RealtimeError::NoActiveRoom));

    drop(session);
    assert_eq!(mgr.consumer_count(), 0);
    assert!(!mgr.is_connected());
}

#[tokio::test]
async fn wss_url_goes_through_tls_handshake() {
    let addr = silent_endpoint(false).await;
    let transport = live(&format!("wss://{addr}/ws-chat/websocket"));
    let err = assert_err!(transport.connect(&ConnectOptions::default()).await);
    let RealtimeError::ConnectionFailed(reason) = err else {
        panic!("expected connection failure, got {err:?}");
    };
    assert!(!reason.contains("TLS support not compiled in"), "{reason}");
}
