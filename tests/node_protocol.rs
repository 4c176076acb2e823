use axoncast::{AxonError, AxonNode, AxonNodeBuilder, Envelope, ErrorCode, Payload};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// A node served over in-memory pipes
struct Harness {
    node: Arc<AxonNode>,
    input: DuplexStream,
    output: Lines<BufReader<DuplexStream>>,
    task: JoinHandle<Result<(), AxonError>>,
    next_msg_id: u64,
    /// Envelopes read while waiting for a specific reply
    stash: Vec<Envelope>,
}

impl Harness {
    fn start(node: AxonNode) -> Self {
        let node = Arc::new(node);
        let (input, node_in) = duplex(64 * 1024);
        let (node_out, output) = duplex(64 * 1024);
        let task = tokio::spawn(Arc::clone(&node).run(BufReader::new(node_in), node_out));

        Self {
            node,
            input,
            output: BufReader::new(output).lines(),
            task,
            next_msg_id: 0,
            stash: Vec::new(),
        }
    }

    async fn write_line(&mut self, line: &str) {
        self.input.write_all(line.as_bytes()).await.unwrap();
        self.input.write_all(b"\n").await.unwrap();
    }

    /// Send a body from `src`, filling in a fresh msg_id
    async fn send(&mut self, src: &str, mut body: Value) -> u64 {
        self.next_msg_id += 1;
        let msg_id = self.next_msg_id;
        body["msg_id"] = json!(msg_id);
        let line = json!({"src": src, "dest": "n1", "body": body}).to_string();
        self.write_line(&line).await;
        msg_id
    }

    async fn recv(&mut self) -> Envelope {
        let line = timeout(RECV_TIMEOUT, self.output.next_line())
            .await
            .expect("no output from node")
            .unwrap()
            .expect("node output closed");
        serde_json::from_str(&line).unwrap()
    }

    /// Send a request and wait for its reply, stashing anything else
    async fn request(&mut self, src: &str, body: Value) -> Envelope {
        let msg_id = self.send(src, body).await;
        let is_reply = |e: &Envelope| e.dest == src && e.body.in_reply_to == Some(msg_id);

        if let Some(pos) = self.stash.iter().position(is_reply) {
            return self.stash.remove(pos);
        }
        loop {
            let envelope = self.recv().await;
            if is_reply(&envelope) {
                return envelope;
            }
            self.stash.push(envelope);
        }
    }

    async fn init(&mut self) {
        let reply = self
            .request("c0", json!({"type": "init", "node_id": "n1", "node_ids": ["n1", "n2", "n3"]}))
            .await;
        assert_eq!(reply.body.payload, Payload::InitOk);
    }

    /// Close input and wait for the node to stop
    async fn shutdown(self) -> Result<(), AxonError> {
        drop(self.input);
        timeout(Duration::from_secs(5), self.task)
            .await
            .expect("node did not stop after end of input")
            .unwrap()
    }
}

fn error_code(envelope: &Envelope) -> ErrorCode {
    match &envelope.body.payload {
        Payload::Error { code, .. } => *code,
        other => panic!("expected an error reply, got {other:?}"),
    }
}

#[tokio::test]
async fn test_echo_and_generate() {
    let mut harness = Harness::start(AxonNodeBuilder::new().build());
    harness.init().await;

    let reply = harness
        .request("c1", json!({"type": "echo", "echo": {"nested": [1, 2]}}))
        .await;
    assert_eq!(reply.src, "n1");
    assert_eq!(
        reply.body.payload,
        Payload::EchoOk {
            echo: json!({"nested": [1, 2]})
        }
    );

    let mut ids = Vec::new();
    for _ in 0..10 {
        match harness.request("c1", json!({"type": "generate"})).await.body.payload {
            Payload::GenerateOk { id } => ids.push(id),
            other => panic!("unexpected reply {other:?}"),
        }
    }
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 10);

    harness.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_broadcast_fans_out_to_neighbors() {
    let mut harness = Harness::start(AxonNodeBuilder::new().build());
    harness.init().await;

    let reply = harness
        .request(
            "c1",
            json!({"type": "topology", "topology": {"n1": ["n2", "n3"], "n2": ["n1"], "n3": ["n1"]}}),
        )
        .await;
    assert_eq!(reply.body.payload, Payload::TopologyOk);

    let reply = harness
        .request("c1", json!({"type": "broadcast", "message": 5}))
        .await;
    assert_eq!(reply.body.payload, Payload::BroadcastOk);

    // Both neighbors get the value; the sends may be stashed or still queued
    let mut targets = Vec::new();
    while targets.len() < 2 {
        let envelope = match harness.stash.pop() {
            Some(envelope) => envelope,
            None => harness.recv().await,
        };
        if envelope.body.payload == (Payload::Broadcast { message: 5 }) {
            assert!(envelope.body.msg_id.is_some());
            targets.push(envelope.dest);
        }
    }
    targets.sort();
    assert_eq!(targets, vec!["n2", "n3"]);

    let reply = harness.request("c1", json!({"type": "read"})).await;
    assert_eq!(reply.body.payload, Payload::ReadOk { messages: vec![5] });

    // A neighbor relaying the same value back still gets an ack
    let reply = harness
        .request("n2", json!({"type": "broadcast", "message": 5}))
        .await;
    assert_eq!(reply.body.payload, Payload::BroadcastOk);

    let reply = harness.request("c1", json!({"type": "read"})).await;
    assert_eq!(reply.body.payload, Payload::ReadOk { messages: vec![5] });

    harness.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_retries_stop_after_ack() {
    let node = AxonNodeBuilder::new()
        .with_retry_interval(Duration::from_millis(50))
        .build();
    let mut harness = Harness::start(node);
    harness.init().await;
    harness
        .request("c1", json!({"type": "topology", "topology": {"n1": ["n2"]}}))
        .await;
    harness
        .request("c1", json!({"type": "broadcast", "message": 11}))
        .await;

    // Unanswered, the send to n2 keeps repeating
    let mut sends = Vec::new();
    for envelope in std::mem::take(&mut harness.stash) {
        if envelope.dest == "n2" {
            sends.push(envelope);
        }
    }
    while sends.len() < 3 {
        let envelope = harness.recv().await;
        if envelope.dest == "n2" {
            sends.push(envelope);
        }
    }
    assert!(sends
        .iter()
        .all(|e| e.body.payload == Payload::Broadcast { message: 11 }));

    let acked = sends.last().and_then(|e| e.body.msg_id).unwrap();
    harness
        .send("n2", json!({"type": "broadcast_ok", "in_reply_to": acked}))
        .await;

    timeout(RECV_TIMEOUT, async {
        while harness.node.stats().await.pending_pairs > 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("acknowledgment was not applied");

    let stats = harness.node.stats().await;
    assert_eq!(stats.messages_seen, 1);
    assert_eq!(stats.pending_messages, 0);

    harness.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_error_replies() {
    let mut harness = Harness::start(AxonNodeBuilder::new().build());

    let reply = harness.request("c1", json!({"type": "read"})).await;
    assert_eq!(error_code(&reply), ErrorCode::TemporarilyUnavailable);

    harness.init().await;

    // Undecodable lines are dropped without a reply
    harness.write_line("{not json").await;
    let reply = harness.request("c1", json!({"type": "echo", "echo": 1})).await;
    assert_eq!(reply.body.payload, Payload::EchoOk { echo: json!(1) });
    assert!(harness.stash.is_empty());

    let reply = harness
        .request("c1", json!({"type": "broadcast", "message": "seven"}))
        .await;
    assert_eq!(error_code(&reply), ErrorCode::MalformedRequest);
    assert_eq!(reply.src, "n1");

    let reply = harness.request("c1", json!({"type": "cas", "key": 1})).await;
    assert_eq!(error_code(&reply), ErrorCode::NotSupported);

    harness.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_end_of_input_flushes_and_stops() {
    let mut harness = Harness::start(AxonNodeBuilder::new().build());
    harness.init().await;

    harness.send("c1", json!({"type": "echo", "echo": "last"})).await;

    let Harness {
        input,
        mut output,
        task,
        ..
    } = harness;
    drop(input);

    timeout(Duration::from_secs(5), task)
        .await
        .expect("node did not stop after end of input")
        .unwrap()
        .unwrap();

    // The reply queued before end of input is still written
    let line = output.next_line().await.unwrap().expect("reply was not flushed");
    let reply: Envelope = serde_json::from_str(&line).unwrap();
    assert_eq!(reply.body.payload, Payload::EchoOk { echo: json!("last") });
    assert!(output.next_line().await.unwrap().is_none());
}
