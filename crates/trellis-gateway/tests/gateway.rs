//! Wire-level behaviour: handshake, presence, reply/broadcast ordering.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;

use trellis_activity::{ActivityRecorder, ActivitySink, MemoryActivitySink};
use trellis_board::TaskService;
use trellis_core::{CredentialVerifier, Limits, Principal, Role, UserDirectory, UserId};
use trellis_events::{Fanout, read_frame, write_frame};
use trellis_gateway::{Gateway, GatewayConfig, RoomRouter, SessionRegistry};
use trellis_storage::{
    MemoryTaskStore, MemoryUserDirectory, StaticCredentialVerifier, TaskStore,
};

struct TestServer {
    addr: std::net::SocketAddr,
    verifier: Arc<StaticCredentialVerifier>,
    _shutdown: broadcast::Sender<()>,
}

async fn start_server() -> TestServer {
    let store = Arc::new(MemoryTaskStore::new());
    let users = Arc::new(MemoryUserDirectory::new());
    let sink = Arc::new(MemoryActivitySink::new());
    let registry = Arc::new(SessionRegistry::new());
    let router = Arc::new(RoomRouter::new(Arc::clone(&registry)));
    let recorder = Arc::new(ActivityRecorder::new(
        sink as Arc<dyn ActivitySink>,
        Arc::clone(&router) as Arc<dyn Fanout>,
        20,
    ));
    let service = Arc::new(TaskService::new(
        store as Arc<dyn TaskStore>,
        users as Arc<dyn UserDirectory>,
        recorder,
        Limits::default(),
    ));
    let verifier = Arc::new(StaticCredentialVerifier::new(3600));

    let gateway = Arc::new(Gateway::new(
        service,
        Arc::clone(&verifier) as Arc<dyn CredentialVerifier>,
        registry,
        router,
        GatewayConfig::default(),
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(gateway.run(listener, shutdown_rx));

    TestServer {
        addr,
        verifier,
        _shutdown: shutdown_tx,
    }
}

struct Client {
    stream: TcpStream,
}

impl Client {
    async fn connect(server: &TestServer) -> Self {
        let stream = TcpStream::connect(server.addr).await.unwrap();
        Self { stream }
    }

    async fn send(&mut self, frame: Value) {
        let bytes = serde_json::to_vec(&frame).unwrap();
        write_frame(&mut self.stream, &bytes).await.unwrap();
    }

    async fn next(&mut self) -> Value {
        let bytes = timeout(Duration::from_secs(2), read_frame(&mut self.stream))
            .await
            .expect("timed out waiting for a frame")
            .unwrap()
            .expect("connection closed");
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Read frames until one of the given kind arrives.
    async fn next_of_type(&mut self, kind: &str) -> Value {
        loop {
            let frame = self.next().await;
            if frame["type"] == kind {
                return frame;
            }
        }
    }

    async fn expect_silence(&mut self) {
        let result = timeout(Duration::from_millis(200), read_frame(&mut self.stream)).await;
        assert!(result.is_err(), "expected no frame, got one");
    }
}

fn issue(server: &TestServer, role: Role) -> (String, UserId) {
    let user_id = UserId::new();
    let token = format!("tok-{user_id}");
    server
        .verifier
        .issue(token.clone(), Principal { user_id, role })
        .unwrap();
    (token, user_id)
}

async fn connect_user(server: &TestServer) -> (Client, UserId) {
    let (token, user_id) = issue(server, Role::Member);
    let mut client = Client::connect(server).await;
    client
        .send(json!({"type": "hello", "id": "h", "data": {"token": token}}))
        .await;
    let hello_ok = client.next_of_type("hello.ok").await;
    assert_eq!(hello_ok["data"]["userId"], user_id.to_string());
    (client, user_id)
}

#[tokio::test]
async fn handshake_succeeds_and_presence_updates() {
    let server = start_server().await;
    let (mut alice, alice_id) = connect_user(&server).await;

    // Alice sees her own presence frame.
    let presence = alice.next_of_type("users.updated").await;
    assert_eq!(presence["data"]["users"], json!([alice_id.to_string()]));

    // A second user joins; Alice is told.
    let (_bob, bob_id) = connect_user(&server).await;
    let presence = alice.next_of_type("users.updated").await;
    let users = presence["data"]["users"].as_array().unwrap();
    assert_eq!(users.len(), 2);
    assert!(users.contains(&json!(bob_id.to_string())));
}

#[tokio::test]
async fn bad_token_is_refused_with_a_close() {
    let server = start_server().await;
    let mut client = Client::connect(&server).await;
    client
        .send(json!({"type": "hello", "data": {"token": "nope"}}))
        .await;

    let error = client.next().await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["data"]["code"], "unauthenticated");

    let close = client.next().await;
    assert_eq!(close["type"], "close");
    assert_eq!(close["data"]["reason"], "unauthenticated");
}

#[tokio::test]
async fn reply_arrives_before_the_matching_broadcast() {
    let server = start_server().await;
    let (mut alice, _) = connect_user(&server).await;
    let (mut bob, _) = connect_user(&server).await;

    alice
        .send(json!({
            "type": "task.create",
            "id": "create-1",
            "data": {"title": "Ship release"}
        }))
        .await;

    // On Alice's FIFO the acknowledgement precedes the broadcast.
    let mut saw_reply = false;
    loop {
        let frame = alice.next().await;
        match frame["type"].as_str() {
            Some("task.create.ok") => {
                assert_eq!(frame["id"], "create-1");
                assert_eq!(frame["data"]["task"]["version"], 1);
                assert_eq!(frame["data"]["task"]["position"], 0);
                saw_reply = true;
            },
            Some("task.created") => {
                assert!(saw_reply, "broadcast overtook the acknowledgement");
                break;
            },
            _ => {},
        }
    }

    // Bob, a plain board-room member, receives the broadcast.
    let created = bob.next_of_type("task.created").await;
    assert_eq!(created["data"]["task"]["title"], "Ship release");
}

#[tokio::test]
async fn stale_update_yields_a_conflict_error_with_descriptor() {
    let server = start_server().await;
    let (mut alice, _) = connect_user(&server).await;

    alice
        .send(json!({
            "type": "task.create",
            "id": "c",
            "data": {"title": "Contested"}
        }))
        .await;
    let created = alice.next_of_type("task.create.ok").await;
    let task_id = created["data"]["task"]["id"].clone();

    alice
        .send(json!({
            "type": "task.update",
            "id": "u1",
            "data": {"taskId": task_id, "patch": {"description": "one"}, "knownVersion": 1}
        }))
        .await;
    alice.next_of_type("task.update.ok").await;

    alice
        .send(json!({
            "type": "task.update",
            "id": "u2",
            "data": {"taskId": task_id, "patch": {"description": "two"}, "knownVersion": 1}
        }))
        .await;
    let error = alice.next_of_type("error").await;
    assert_eq!(error["id"], "u2");
    assert_eq!(error["data"]["code"], "conflict");
    assert_eq!(error["data"]["details"]["clientVersion"], 1);
    assert_eq!(error["data"]["details"]["serverVersion"], 2);

    // Resolving take-theirs answers with current server state.
    let conflict_id = error["data"]["details"]["conflictId"].clone();
    alice
        .send(json!({
            "type": "conflict.resolve",
            "id": "r",
            "data": {"taskId": task_id, "conflictId": conflict_id, "strategy": "take-theirs"}
        }))
        .await;
    let resolved = alice.next_of_type("conflict.resolve.ok").await;
    assert_eq!(resolved["data"]["task"]["description"], "one");
    assert_eq!(resolved["data"]["task"]["version"], 2);
}

#[tokio::test]
async fn typing_relays_to_the_task_room_but_not_the_sender() {
    let server = start_server().await;
    let (mut alice, _) = connect_user(&server).await;
    let (mut bob, _) = connect_user(&server).await;

    alice
        .send(json!({"type": "task.create", "id": "c", "data": {"title": "Watched"}}))
        .await;
    let created = alice.next_of_type("task.create.ok").await;
    let task_id = created["data"]["task"]["id"].clone();

    for client in [&mut alice, &mut bob] {
        client
            .send(json!({
                "type": "room.join",
                "id": "j",
                "data": {"roomKind": "task", "id": task_id}
            }))
            .await;
        client.next_of_type("room.join.ok").await;
    }

    alice
        .send(json!({"type": "typing", "data": {"taskId": task_id, "isTyping": true}}))
        .await;

    let typing = bob.next_of_type("typing").await;
    assert_eq!(typing["data"]["isTyping"], true);
    alice.expect_silence().await;
}

#[tokio::test]
async fn commands_without_a_session_room_still_work_end_to_end() {
    let server = start_server().await;
    let (mut alice, alice_id) = connect_user(&server).await;

    alice
        .send(json!({"type": "presence.list", "id": "p"}))
        .await;
    let presence = alice.next_of_type("presence.list.ok").await;
    assert_eq!(presence["id"], "p");
    assert_eq!(
        presence["data"]["users"],
        json!([alice_id.to_string()])
    );

    alice
        .send(json!({"type": "activity.recent", "id": "a"}))
        .await;
    let recent = alice.next_of_type("activity.recent.ok").await;
    // At least the login activity is in the window.
    assert!(!recent["data"]["records"].as_array().unwrap().is_empty());
}
