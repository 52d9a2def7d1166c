//! End-to-end tests of the JSON-lines command session.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::{io, sync::Arc, time::Duration};

use serde_json::{Value, json};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use vigil_server::{api::Api, bootstrap::bootstrap_with_store, config::Config, session::run_session};
use vigil_store::InMemoryStore;
use vigil_test_utils::{assert_eventually, test_gateway_config, test_notifier_config};

const LINE_TIMEOUT: Duration = Duration::from_secs(5);

struct Client {
    store: Arc<InMemoryStore>,
    input: DuplexStream,
    output: Lines<BufReader<DuplexStream>>,
    shutdown: CancellationToken,
    session: JoinHandle<io::Result<()>>,
}

impl Client {
    fn start() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let config = Config {
            gateway: test_gateway_config(),
            notifier: test_notifier_config(),
            ..Config::default()
        };
        let services = bootstrap_with_store(&config, store.clone()).unwrap();
        let (input, server_input) = tokio::io::duplex(64 * 1024);
        let (server_output, output) = tokio::io::duplex(64 * 1024);
        let shutdown = CancellationToken::new();
        let session = tokio::spawn(run_session(
            Api::new(services),
            BufReader::new(server_input),
            server_output,
            shutdown.clone(),
        ));
        Self { store, input, output: BufReader::new(output).lines(), shutdown, session }
    }

    async fn send_raw(&mut self, line: &str) {
        self.input.write_all(line.as_bytes()).await.unwrap();
        self.input.write_all(b"\n").await.unwrap();
    }

    async fn send(&mut self, request: Value) {
        self.send_raw(&request.to_string()).await;
    }

    async fn recv(&mut self) -> Value {
        let line = tokio::time::timeout(LINE_TIMEOUT, self.output.next_line())
            .await
            .expect("timed out waiting for a response line")
            .unwrap()
            .expect("session closed its output");
        serde_json::from_str(&line).unwrap()
    }

    async fn call(&mut self, request: Value) -> Value {
        self.send(request).await;
        self.recv().await
    }

    async fn new_visitor(&mut self, agent: &str) -> String {
        let response = self
            .call(json!({
                "request_id": 1,
                "command": "resolve",
                "fingerprint": { "user_agent": agent, "screen": "1920x1080" }
            }))
            .await;
        assert_eq!(response["ok"]["resolution"], "created", "{response}");
        response["ok"]["visitor_id"].as_str().unwrap().to_string()
    }

    async fn finish(self) {
        let Self { input, mut output, session, .. } = self;
        drop(input);
        while let Ok(Some(_)) = output.next_line().await {}
        tokio::time::timeout(LINE_TIMEOUT, session).await.unwrap().unwrap().unwrap();
    }
}

#[tokio::test]
async fn watch_streams_flips_with_redirects() {
    let mut client = Client::start();
    let id = client.new_visitor("laptop").await;

    let watching = client.call(json!({ "request_id": 2, "command": "watch", "visitor_id": id })).await;
    assert_eq!(watching["ok"]["kind"], "watching");

    let banned = client
        .call(json!({
            "request_id": 3, "command": "ban", "visitor_id": id,
            "reason": "doxxing", "category": "severe", "admin_id": "admin1"
        }))
        .await;
    assert_eq!(banned["request_id"], 3);
    assert_eq!(banned["ok"]["applied"], true);

    let signal = client.recv().await;
    assert_eq!(signal["request_id"], 2);
    assert_eq!(signal["signal"]["visitor_id"], id.as_str());
    assert_eq!(signal["signal"]["signal"], "status_changed");
    assert_eq!(signal["signal"]["event"]["new_status"], "banned");
    assert_eq!(signal["signal"]["redirect"]["target"]["kind"], "ban_notice");
    assert_eq!(signal["signal"]["redirect"]["target"]["reason"], "doxxing");

    let unbanned = client
        .call(json!({ "request_id": 4, "command": "unban", "visitor_id": id, "admin_id": "admin1" }))
        .await;
    assert_eq!(unbanned["ok"]["visitor"]["status"], "active");
    let signal = client.recv().await;
    assert_eq!(signal["signal"]["redirect"]["target"], json!({ "kind": "entry", "path": "/" }));

    client.finish().await;
}

#[tokio::test]
async fn purge_ends_the_subscription() {
    let mut client = Client::start();
    let id = client.new_visitor("laptop").await;
    client.call(json!({ "request_id": 2, "command": "watch", "visitor_id": id })).await;

    let deleted =
        client.call(json!({ "command": "delete", "visitor_id": id, "admin_id": "admin1" })).await;
    assert_eq!(deleted["ok"]["kind"], "deleted");

    let signal = client.recv().await;
    assert_eq!(signal["signal"]["signal"], "visitor_removed");

    let store = client.store.clone();
    let parsed = id.parse().unwrap();
    assert!(assert_eventually(LINE_TIMEOUT, || store.watcher_count(parsed) == 0).await);
    client.finish().await;
}

#[tokio::test]
async fn malformed_lines_do_not_end_the_session() {
    let mut client = Client::start();

    client.send_raw("{not json").await;
    let error = client.recv().await;
    assert_eq!(error["error"]["status"], 400);
    assert!(error.get("request_id").is_none());

    let unknown = client
        .call(json!({ "request_id": 9, "command": "status_check", "visitor_id": uuid_string() }))
        .await;
    assert_eq!(unknown["request_id"], 9);
    assert_eq!(unknown["ok"], json!({ "kind": "status", "status": "unknown" }));

    let missing = client
        .call(json!({ "request_id": 10, "command": "get_visitor", "visitor_id": uuid_string() }))
        .await;
    assert_eq!(missing["error"]["status"], 404);

    client.finish().await;
}

#[tokio::test]
async fn end_of_input_closes_open_subscriptions() {
    let mut client = Client::start();
    let id = client.new_visitor("laptop").await;
    client.call(json!({ "command": "watch", "visitor_id": id })).await;
    assert_eq!(client.store.watcher_count(id.parse().unwrap()), 1);

    let store = client.store.clone();
    client.finish().await;
    assert!(assert_eventually(LINE_TIMEOUT, || store.watcher_count(id.parse().unwrap()) == 0).await);
}

#[tokio::test]
async fn shutdown_stops_the_session() {
    let mut client = Client::start();
    client.new_visitor("laptop").await;

    client.shutdown.cancel();
    let result = tokio::time::timeout(LINE_TIMEOUT, &mut client.session).await.unwrap();
    result.unwrap().unwrap();
}

fn uuid_string() -> String {
    vigil_types::VisitorId::generate().to_string()
}
