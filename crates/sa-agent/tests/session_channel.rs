//! Session channel against a local WebSocket server

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use sa_agent::channel::SessionChannel;
use sa_core::config::AgentConfig;
use sa_core::traits::{DataChannel, HeaderProvider, StaticHeaders, StreamMessageHandler};
use sa_core::CancelFlag;
use sa_protocol::{AgentMessage, MessageType, SCHEMA_VERSION};

const WAIT: Duration = Duration::from_secs(10);

struct ForwardingHandler(mpsc::UnboundedSender<AgentMessage>);

#[async_trait]
impl StreamMessageHandler for ForwardingHandler {
    async fn input_stream_message_handler(&self, message: AgentMessage) -> anyhow::Result<()> {
        self.0.send(message)?;
        Ok(())
    }
}

fn input_frame(payload: &'static [u8]) -> Message {
    let frame = AgentMessage {
        message_type: MessageType::InputStreamData,
        schema_version: SCHEMA_VERSION.to_string(),
        session_id: "it-session".to_string(),
        created_date: 1_700_000_000_000,
        sequence_number: 0,
        payload_length: payload.len() as u32,
        payload: Bytes::from_static(payload),
    };
    Message::Binary(frame.serialize().unwrap().to_vec())
}

/// Next binary frame from the agent, skipping keepalive pings
async fn next_output(ws: &mut WebSocketStream<TcpStream>) -> AgentMessage {
    loop {
        match ws.next().await {
            Some(Ok(Message::Binary(data))) => return AgentMessage::deserialize(&data).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("connection ended: {:?}", other),
        }
    }
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

#[tokio::test]
async fn test_frames_flow_both_ways() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/session?channelId=it-session", listener.local_addr().unwrap());
    let seen_headers = Arc::new(Mutex::new(Vec::new()));

    let headers = seen_headers.clone();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let record = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let mut headers = headers.lock().unwrap();
            for name in ["user-agent", "x-instance-id"] {
                if let Some(value) = request.headers().get(name) {
                    headers.push((name.to_string(), value.to_str().unwrap().to_string()));
                }
            }
            Ok(response)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, record).await.unwrap();

        ws.send(input_frame(b"whoami\n")).await.unwrap();
        let first = next_output(&mut ws).await;
        let second = next_output(&mut ws).await;
        (first, second, ws)
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = CancelFlag::new();
    let provider: Arc<HeaderProvider> = Arc::new(StaticHeaders(vec![(
        "X-Instance-Id".to_string(),
        "i-0001".to_string(),
    )]));
    let channel = SessionChannel::websocket(
        "it-session",
        url,
        &AgentConfig::default(),
        Some(provider),
        Arc::new(ForwardingHandler(tx)),
        cancel.clone(),
    )
    .unwrap();
    channel.open().await.unwrap();
    assert!(channel.is_active());

    let inbound = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(inbound.message_type, MessageType::InputStreamData);
    assert_eq!(inbound.payload, "whoami\n");

    channel.send_stream_data(b"root\n").await.unwrap();
    channel.send_stream_data(b"$ ").await.unwrap();

    let (first, second, _ws) = tokio::time::timeout(WAIT, server).await.unwrap().unwrap();
    assert_eq!(first.message_type, MessageType::OutputStreamData);
    assert_eq!(first.session_id, "it-session");
    assert_eq!(first.sequence_number, 0);
    assert_eq!(first.payload, "root\n");
    assert_eq!(second.sequence_number, 1);

    let headers = seen_headers.lock().unwrap().clone();
    assert!(headers
        .iter()
        .any(|(name, value)| name == "user-agent" && value.starts_with("session-agent/")));
    assert!(headers.contains(&("x-instance-id".to_string(), "i-0001".to_string())));

    channel.close().await.unwrap();
    assert!(!channel.is_active());
    assert!(!cancel.is_set());
}

#[tokio::test]
async fn test_reconnects_after_connection_loss() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/session", listener.local_addr().unwrap());

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        let before = next_output(&mut ws).await;
        drop(ws);

        let mut ws = accept(&listener).await;
        ws.send(input_frame(b"again")).await.unwrap();
        let after = next_output(&mut ws).await;
        (before, after, ws)
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = CancelFlag::new();
    let channel = SessionChannel::websocket(
        "it-session",
        url,
        &AgentConfig::default(),
        None,
        Arc::new(ForwardingHandler(tx)),
        cancel.clone(),
    )
    .unwrap();
    channel.open().await.unwrap();
    channel.send_stream_data(b"before").await.unwrap();

    // the second connection greets us once the agent has reconnected
    let greeting = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(greeting.payload, "again");
    assert!(channel.is_active());

    channel.send_stream_data(b"after").await.unwrap();
    let (before, after, _ws) = tokio::time::timeout(WAIT, server).await.unwrap().unwrap();
    assert_eq!(before.sequence_number, 0);
    assert_eq!(after.sequence_number, 1);
    assert_eq!(after.payload, "after");
    assert!(!cancel.is_set());

    channel.close().await.unwrap();
}
