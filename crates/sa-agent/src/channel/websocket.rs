//! WebSocket duplex channel
//!
//! `open` dials the session service and starts two loops: a read loop that
//! forwards every inbound data frame as a [`ChannelEvent`], and a ping loop
//! that keeps the connection alive. All writes (data and pings) go through
//! one async mutex around the write half of the socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{HeaderName, HeaderValue, USER_AGENT};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use sa_core::config::AgentConfig;
use sa_core::traits::{ChannelEvent, DuplexChannel, HeaderProvider};
use sa_core::ChannelError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Channel capacity for events from the read loop.
///
/// The read loop blocks once this many frames are waiting for dispatch,
/// which pushes back on the socket.
const CHANNEL_EVENT_CAPACITY: usize = 256;

/// Shortest allowed keepalive period
const MIN_PING_INTERVAL: Duration = Duration::from_secs(1);

/// Payload of keepalive pings
const PING_PAYLOAD: &[u8] = b"keepalive";

/// Settings for one WebSocket channel
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Endpoint to dial
    pub url: String,
    /// `User-Agent` header value
    pub user_agent: String,
    /// Interval between keepalive pings
    pub ping_interval: Duration,
    /// Consecutive read failures before the channel reports an error
    pub read_error_limit: u32,
}

impl WebSocketConfig {
    /// Settings for `url` taken from the agent configuration
    pub fn from_agent_config(url: impl Into<String>, config: &AgentConfig) -> Self {
        Self {
            url: url.into(),
            user_agent: config.user_agent.clone(),
            ping_interval: config.channel.ping_interval.max(MIN_PING_INTERVAL),
            read_error_limit: config.channel.read_error_limit.max(1),
        }
    }
}

/// Live half of an open connection
struct Connection {
    sink: WsSink,
    shutdown: CancellationToken,
}

struct Inner {
    config: WebSocketConfig,
    headers: Option<Arc<HeaderProvider>>,
    open: AtomicBool,
    /// The single write lock
    connection: Mutex<Option<Connection>>,
    events: mpsc::Sender<ChannelEvent>,
}

/// Duplex channel over a WebSocket connection
pub struct WebSocketChannel {
    inner: Arc<Inner>,
}

impl WebSocketChannel {
    /// Create a closed channel and the receiver for its events
    ///
    /// Fails if `config.url` is not a valid WebSocket URL.
    pub fn new(
        mut config: WebSocketConfig,
        headers: Option<Arc<HeaderProvider>>,
    ) -> Result<(Self, mpsc::Receiver<ChannelEvent>), ChannelError> {
        // a zero period would panic the ping loop's interval
        config.ping_interval = config.ping_interval.max(MIN_PING_INTERVAL);
        config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| connect_error(&config.url, e))?;

        let (events, rx) = mpsc::channel(CHANNEL_EVENT_CAPACITY);
        let inner = Arc::new(Inner {
            config,
            headers,
            open: AtomicBool::new(false),
            connection: Mutex::new(None),
            events,
        });
        Ok((Self { inner }, rx))
    }

    /// Endpoint this channel dials
    pub fn url(&self) -> &str {
        &self.inner.config.url
    }
}

impl Inner {
    fn build_request(&self) -> Result<Request, ChannelError> {
        let url = &self.config.url;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| connect_error(url, e))?;

        let headers = request.headers_mut();
        let user_agent = HeaderValue::from_str(&self.config.user_agent)
            .map_err(|e| connect_error(url, e))?;
        headers.insert(USER_AGENT, user_agent);

        let extra = self
            .headers
            .as_ref()
            .and_then(|provider| provider.resolve())
            .unwrap_or_default();
        for (name, value) in extra {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| connect_error(url, e))?;
            let value = HeaderValue::from_str(&value).map_err(|e| connect_error(url, e))?;
            headers.insert(name, value);
        }

        Ok(request)
    }

    async fn write(&self, message: Message) -> Result<(), ChannelError> {
        let mut connection = self.connection.lock().await;
        let connection = connection.as_mut().ok_or(ChannelError::Closed)?;
        connection
            .sink
            .send(message)
            .await
            .map_err(|e| ChannelError::Send(e.to_string()))
    }

    async fn close(&self) -> Result<(), ChannelError> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!("Closing websocket channel to {}", self.config.url);

        let connection = self.connection.lock().await.take();
        let Some(mut connection) = connection else {
            return Ok(());
        };
        connection.shutdown.cancel();

        match connection.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(ChannelError::Close(e.to_string())),
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get_mut().take() {
            connection.shutdown.cancel();
        }
    }
}

#[async_trait]
impl DuplexChannel for WebSocketChannel {
    async fn open(&self) -> Result<(), ChannelError> {
        let inner = &self.inner;
        let url = &inner.config.url;
        let request = inner.build_request()?;

        tracing::debug!("Connecting to {}", url);
        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| connect_error(url, e))?;
        tracing::info!("Websocket connected to {}", url);

        let (sink, stream) = stream.split();
        let shutdown = CancellationToken::new();
        {
            let mut connection = inner.connection.lock().await;
            if let Some(stale) = connection.replace(Connection {
                sink,
                shutdown: shutdown.clone(),
            }) {
                stale.shutdown.cancel();
            }
        }
        inner.open.store(true, Ordering::SeqCst);

        tokio::spawn(read_loop(
            stream,
            inner.events.clone(),
            shutdown.clone(),
            inner.config.read_error_limit,
        ));
        tokio::spawn(ping_loop(
            Arc::downgrade(inner),
            inner.config.ping_interval,
            shutdown,
        ));

        Ok(())
    }

    async fn close(&self) -> Result<(), ChannelError> {
        self.inner.close().await
    }

    async fn send_message(&self, data: Bytes) -> Result<(), ChannelError> {
        if !self.is_active() {
            return Err(ChannelError::Closed);
        }
        if data.is_empty() {
            return Err(ChannelError::EmptyInput);
        }

        self.inner.write(Message::Binary(data.to_vec())).await
    }

    fn is_active(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }
}

fn connect_error(url: &str, err: impl std::fmt::Display) -> ChannelError {
    ChannelError::Connect {
        url: url.to_string(),
        reason: err.to_string(),
    }
}

/// Forward inbound frames until the connection fails `limit` times in a row
async fn read_loop(
    mut stream: SplitStream<WsStream>,
    events: mpsc::Sender<ChannelEvent>,
    shutdown: CancellationToken,
    limit: u32,
) {
    let mut failures = 0u32;

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = stream.next() => next,
        };

        let failure = match next {
            Some(Ok(Message::Binary(data))) => {
                failures = 0;
                if events.send(ChannelEvent::Message(Bytes::from(data))).await.is_err() {
                    break;
                }
                continue;
            }
            Some(Ok(Message::Text(text))) => {
                failures = 0;
                if events
                    .send(ChannelEvent::Message(Bytes::from(text.into_bytes())))
                    .await
                    .is_err()
                {
                    break;
                }
                continue;
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {
                continue;
            }
            Some(Ok(Message::Close(frame))) => format!("closed by peer: {:?}", frame),
            Some(Err(e)) => e.to_string(),
            None => "connection closed".to_string(),
        };

        failures += 1;
        tracing::debug!("Websocket read failed ({}/{}): {}", failures, limit, failure);
        if failures >= limit {
            tracing::warn!("Websocket read loop giving up: {}", failure);
            if !shutdown.is_cancelled() {
                let _ = events.send(ChannelEvent::Error(ChannelError::Receive(failure))).await;
            }
            break;
        }
    }

    tracing::debug!("Websocket read loop exiting");
}

/// Ping the peer until the channel closes; a failed ping closes the channel
async fn ping_loop(inner: Weak<Inner>, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(inner) = inner.upgrade() else {
            break;
        };
        if let Err(e) = inner.write(Message::Ping(PING_PAYLOAD.to_vec())).await {
            tracing::warn!("Keepalive ping to {} failed: {}", inner.config.url, e);
            if let Err(e) = inner.close().await {
                tracing::debug!("Close after failed ping: {}", e);
            }
            break;
        }
        tracing::trace!("Sent keepalive ping to {}", inner.config.url);
    }

    tracing::debug!("Websocket ping loop exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> WebSocketConfig {
        WebSocketConfig::from_agent_config(url, &AgentConfig::default())
    }

    #[test]
    fn test_rejects_invalid_url() {
        assert!(matches!(
            WebSocketChannel::new(config("not a url"), None),
            Err(ChannelError::Connect { .. })
        ));
    }

    #[tokio::test]
    async fn test_send_on_closed_channel() {
        let (channel, _rx) = WebSocketChannel::new(config("ws://127.0.0.1:9/session"), None).unwrap();
        assert_eq!(channel.url(), "ws://127.0.0.1:9/session");
        assert!(!channel.is_active());
        assert_eq!(
            channel.send_message(Bytes::from_static(b"x")).await,
            Err(ChannelError::Closed)
        );
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (channel, _rx) = WebSocketChannel::new(config("ws://127.0.0.1:9/session"), None).unwrap();
        assert!(channel.close().await.is_ok());
        assert!(channel.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_open_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let url = format!("ws://127.0.0.1:{}/session", port);
        let (channel, _rx) = WebSocketChannel::new(config(&url), None).unwrap();
        match channel.open().await {
            Err(ChannelError::Connect { url: failed, .. }) => assert_eq!(failed, url),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(!channel.is_active());
    }

    #[test]
    fn test_request_carries_headers() {
        use sa_core::traits::StaticHeaders;

        let provider: Arc<HeaderProvider> = Arc::new(StaticHeaders(vec![(
            "X-Acs-Instance".to_string(),
            "i-123".to_string(),
        )]));
        let (channel, _rx) =
            WebSocketChannel::new(config("wss://example.invalid/session"), Some(provider)).unwrap();

        let request = channel.inner.build_request().unwrap();
        let headers = request.headers();
        assert!(headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("session-agent/")));
        assert_eq!(headers.get("x-acs-instance").unwrap(), "i-123");
    }

    #[tokio::test]
    async fn test_zero_ping_interval_still_pings() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/session", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let first = ws.next().await;
            (first, ws)
        });

        let mut settings = config(&url);
        settings.ping_interval = Duration::ZERO;
        let (channel, _rx) = WebSocketChannel::new(settings, None).unwrap();
        assert_eq!(channel.inner.config.ping_interval, MIN_PING_INTERVAL);

        channel.open().await.unwrap();
        let (first, _ws) = tokio::time::timeout(Duration::from_secs(10), server)
            .await
            .unwrap()
            .unwrap();
        match first {
            Some(Ok(Message::Ping(payload))) => assert_eq!(payload.as_slice(), PING_PAYLOAD),
            other => panic!("expected a keepalive ping, got {:?}", other),
        }
        assert!(channel.is_active());
        channel.close().await.unwrap();
    }
}
