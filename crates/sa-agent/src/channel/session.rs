//! Session channel
//!
//! Wraps a [`DuplexChannel`] with the framing layer: outbound stream data
//! is framed with a monotonically increasing sequence number, inbound
//! frames are decoded and routed to the plugin, transport failures trigger
//! a reconnect, and an idle watchdog cancels the session when the remote
//! side goes quiet.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use sa_core::config::{AgentConfig, BackoffConfig};
use sa_core::time::current_time_millis;
use sa_core::traits::{ChannelEvent, DataChannel, DuplexChannel, HeaderProvider, StreamMessageHandler};
use sa_core::{CancelFlag, CancelState, ChannelError};
use sa_protocol::{AgentMessage, MessageType};

use super::websocket::{WebSocketChannel, WebSocketConfig};
use crate::retry::ExponentialRetryer;

/// Watchdog tick
const IDLE_TICK: Duration = Duration::from_secs(1);

/// Per-session settings of a session channel
#[derive(Debug, Clone)]
pub struct SessionChannelConfig {
    /// Inbound silence after which the session is cancelled
    pub idle_timeout: Duration,
    /// Schema version stamped on outbound frames
    pub schema_version: String,
    /// Backoff used to re-establish a failed transport
    pub reconnect: BackoffConfig,
}

impl SessionChannelConfig {
    pub fn from_agent_config(config: &AgentConfig) -> Self {
        Self {
            idle_timeout: config.session.idle_timeout,
            schema_version: config.session.schema_version.clone(),
            reconnect: config.reconnect.clone(),
        }
    }
}

impl Default for SessionChannelConfig {
    fn default() -> Self {
        Self::from_agent_config(&AgentConfig::default())
    }
}

/// Framed, self-healing channel for one session
pub struct SessionChannel<C: DuplexChannel> {
    channel: C,
    channel_id: String,
    config: SessionChannelConfig,
    retryer: ExponentialRetryer,
    /// Next outbound sequence number; the lock also orders sends
    sequence: Mutex<i64>,
    /// Seconds since the last valid inbound frame
    idle_secs: AtomicU64,
    cancel: CancelFlag,
    handler: Arc<dyn StreamMessageHandler>,
    events: Mutex<Option<mpsc::Receiver<ChannelEvent>>>,
    shutdown: CancellationToken,
    started: AtomicBool,
}

impl SessionChannel<WebSocketChannel> {
    /// Session channel over a WebSocket to `url`
    pub fn websocket(
        channel_id: impl Into<String>,
        url: impl Into<String>,
        agent: &AgentConfig,
        headers: Option<Arc<HeaderProvider>>,
        handler: Arc<dyn StreamMessageHandler>,
        cancel: CancelFlag,
    ) -> Result<Arc<Self>, ChannelError> {
        let (channel, events) =
            WebSocketChannel::new(WebSocketConfig::from_agent_config(url, agent), headers)?;
        Ok(Self::new(
            channel,
            events,
            channel_id,
            SessionChannelConfig::from_agent_config(agent),
            handler,
            cancel,
        ))
    }
}

impl<C: DuplexChannel> SessionChannel<C> {
    /// Wrap `channel`, whose read loop reports on `events`
    pub fn new(
        channel: C,
        events: mpsc::Receiver<ChannelEvent>,
        channel_id: impl Into<String>,
        config: SessionChannelConfig,
        handler: Arc<dyn StreamMessageHandler>,
        cancel: CancelFlag,
    ) -> Arc<Self> {
        let retryer = ExponentialRetryer::from_config(&config.reconnect);
        Arc::new(Self {
            channel,
            channel_id: channel_id.into(),
            config,
            retryer,
            sequence: Mutex::new(0),
            idle_secs: AtomicU64::new(0),
            cancel,
            handler,
            events: Mutex::new(Some(events)),
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
        })
    }

    /// Open the transport; the first successful open starts the watchdog
    /// and the dispatcher
    pub async fn open(self: &Arc<Self>) -> Result<(), ChannelError> {
        self.channel.open().await?;
        tracing::info!("Opened session channel {}", self.channel_id);

        if !self.started.swap(true, Ordering::SeqCst) {
            if let Some(events) = self.events.lock().await.take() {
                tokio::spawn(dispatch_loop(Arc::downgrade(self), events, self.shutdown.clone()));
            }
            tokio::spawn(idle_watchdog(
                Arc::downgrade(self),
                self.cancel.clone(),
                self.shutdown.clone(),
                self.config.idle_timeout.as_secs(),
            ));
        }
        Ok(())
    }

    /// Close the transport and stop the background tasks
    pub async fn close(&self) -> Result<(), ChannelError> {
        tracing::info!("Closing session channel {}", self.channel_id);
        self.shutdown.cancel();
        self.channel.close().await
    }

    /// Close and re-open the same transport; sequence numbers continue
    pub async fn reconnect(&self) -> Result<(), ChannelError> {
        tracing::debug!("Reconnecting session channel {}", self.channel_id);
        if let Err(e) = self.channel.close().await {
            tracing::debug!("Closing session channel {} failed: {}", self.channel_id, e);
        }
        self.channel.open().await?;
        tracing::debug!("Reconnected session channel {}", self.channel_id);
        Ok(())
    }

    /// Sequence number the next outbound frame will carry
    pub async fn sequence_number(&self) -> i64 {
        *self.sequence.lock().await
    }

    /// Decode, validate and route one inbound frame
    async fn dispatch(&self, raw: Bytes) {
        let message = match AgentMessage::deserialize(&raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Cannot deserialize frame on {}: {}", self.channel_id, e);
                return;
            }
        };
        if let Err(e) = message.validate() {
            tracing::warn!("Invalid frame on {}: {}", self.channel_id, e);
            return;
        }

        self.idle_secs.store(0, Ordering::Relaxed);
        tracing::trace!(
            "Inbound frame {:?} seq {} on {}: {:?}",
            message.message_type,
            message.sequence_number,
            self.channel_id,
            message.payload
        );

        match message.message_type {
            MessageType::InputStreamData | MessageType::SetSize | MessageType::Status => {
                if let Err(e) = self.handler.input_stream_message_handler(message).await {
                    tracing::warn!("Handler rejected frame on {}: {:#}", self.channel_id, e);
                }
            }
            MessageType::OutputStreamData | MessageType::CloseChannel => {
                tracing::debug!(
                    "Ignoring {:?} frame on {}",
                    message.message_type,
                    self.channel_id
                );
            }
            MessageType::Unknown(value) => {
                tracing::warn!("Invalid message type received: {}", value);
            }
        }
    }

    /// Re-establish the transport; cancel the session if that fails
    async fn recover(&self, error: ChannelError) {
        tracing::warn!("Session channel {} lost its transport: {}", self.channel_id, error);

        let result = tokio::select! {
            result = self.retryer.call(|| self.reconnect()) => result,
            _ = self.cancel.wait() => return,
            _ = self.shutdown.cancelled() => return,
        };
        if let Err(e) = result {
            tracing::error!("Giving up on session channel {}: {}", self.channel_id, e);
            self.cancel.set(CancelState::Canceled);
        }
    }
}

#[async_trait]
impl<C: DuplexChannel> DataChannel for SessionChannel<C> {
    async fn send_stream_data(&self, data: &[u8]) -> Result<(), ChannelError> {
        if data.is_empty() {
            tracing::debug!("Ignoring empty stream data payload");
            return Ok(());
        }

        let mut sequence = self.sequence.lock().await;
        let message = AgentMessage::output_stream(
            self.config.schema_version.as_str(),
            self.channel_id.as_str(),
            *sequence,
            current_time_millis(),
            Bytes::copy_from_slice(data),
        );
        let frame = message
            .serialize()
            .map_err(|e| ChannelError::Framing(e.to_string()))?;

        if let Err(e) = self.channel.send_message(frame).await {
            tracing::debug!(
                "Error sending stream data seq {} on {}: {}",
                *sequence,
                self.channel_id,
                e
            );
        }
        *sequence += 1;
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.channel.is_active()
    }

    fn channel_id(&self) -> &str {
        &self.channel_id
    }
}

impl<C: DuplexChannel> Drop for SessionChannel<C> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn dispatch_loop<C: DuplexChannel>(
    channel: Weak<SessionChannel<C>>,
    mut events: mpsc::Receiver<ChannelEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            event = events.recv() => event,
        };
        let Some(event) = event else {
            break;
        };
        let Some(channel) = channel.upgrade() else {
            break;
        };

        match event {
            ChannelEvent::Message(raw) => channel.dispatch(raw).await,
            ChannelEvent::Error(error) => channel.recover(error).await,
        }
    }
    tracing::debug!("Session dispatcher exiting");
}

async fn idle_watchdog<C: DuplexChannel>(
    channel: Weak<SessionChannel<C>>,
    cancel: CancelFlag,
    shutdown: CancellationToken,
    limit_secs: u64,
) {
    let mut ticker = interval_at(Instant::now() + IDLE_TICK, IDLE_TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = cancel.wait() => break,
            _ = ticker.tick() => {}
        }
        let Some(channel) = channel.upgrade() else {
            break;
        };

        let idle = channel.idle_secs.fetch_add(1, Ordering::Relaxed) + 1;
        if idle > limit_secs {
            tracing::info!(
                "Session channel {} idle for {}s, cancelling",
                channel.channel_id,
                idle
            );
            cancel.set(CancelState::Canceled);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    use sa_protocol::SCHEMA_VERSION;

    #[derive(Default)]
    struct MockDuplex {
        open: AtomicBool,
        opens: AtomicUsize,
        closes: AtomicUsize,
        /// Opens after the first one fail while set
        refuse_reopen: AtomicBool,
        fail_sends: AtomicBool,
        sent: StdMutex<Vec<Bytes>>,
    }

    #[async_trait]
    impl DuplexChannel for MockDuplex {
        async fn open(&self) -> Result<(), ChannelError> {
            let previous = self.opens.fetch_add(1, Ordering::SeqCst);
            if previous > 0 && self.refuse_reopen.load(Ordering::SeqCst) {
                return Err(ChannelError::Connect {
                    url: "ws://mock".to_string(),
                    reason: "refused".to_string(),
                });
            }
            self.open.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&self) -> Result<(), ChannelError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.open.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn send_message(&self, data: Bytes) -> Result<(), ChannelError> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(ChannelError::Send("broken pipe".to_string()));
            }
            self.sent.lock().unwrap().push(data);
            Ok(())
        }

        fn is_active(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        seen: StdMutex<Vec<MessageType>>,
    }

    #[async_trait]
    impl StreamMessageHandler for RecordingHandler {
        async fn input_stream_message_handler(&self, message: AgentMessage) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(message.message_type);
            Ok(())
        }
    }

    struct Fixture {
        handler: Arc<RecordingHandler>,
        events: mpsc::Sender<ChannelEvent>,
        cancel: CancelFlag,
        channel: Arc<SessionChannel<MockDuplex>>,
    }

    impl Fixture {
        fn duplex(&self) -> &MockDuplex {
            &self.channel.channel
        }
    }

    fn fixture() -> Fixture {
        let handler = Arc::new(RecordingHandler::default());
        let (events, rx) = mpsc::channel(16);
        let cancel = CancelFlag::new();
        let channel = SessionChannel::new(
            MockDuplex::default(),
            rx,
            "session-1",
            SessionChannelConfig::default(),
            handler.clone(),
            cancel.clone(),
        );
        Fixture {
            handler,
            events,
            cancel,
            channel,
        }
    }

    fn inbound(kind: MessageType, created_date: u64) -> Bytes {
        AgentMessage {
            message_type: kind,
            schema_version: SCHEMA_VERSION.to_string(),
            session_id: "session-1".to_string(),
            created_date,
            sequence_number: 0,
            payload_length: 2,
            payload: Bytes::from_static(b"ls"),
        }
        .serialize()
        .unwrap()
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_empty_payload_is_noop() {
        let f = fixture();
        f.channel.open().await.unwrap();
        f.channel.send_stream_data(b"").await.unwrap();
        assert!(f.duplex().sent.lock().unwrap().is_empty());
        assert_eq!(f.channel.sequence_number().await, 0);
    }

    #[tokio::test]
    async fn test_frames_carry_increasing_sequence() {
        let f = fixture();
        f.channel.open().await.unwrap();
        f.channel.send_stream_data(b"one").await.unwrap();
        f.channel.send_stream_data(b"two").await.unwrap();

        let sent = f.duplex().sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 2);
        for (expected, raw) in sent.iter().enumerate() {
            let message = AgentMessage::deserialize(raw).unwrap();
            assert_eq!(message.message_type, MessageType::OutputStreamData);
            assert_eq!(message.schema_version, SCHEMA_VERSION);
            assert_eq!(message.session_id, "session-1");
            assert_eq!(message.sequence_number, expected as i64);
            assert!(message.created_date > 0);
        }
        assert_eq!(AgentMessage::deserialize(&sent[1]).unwrap().payload, "two");
    }

    #[tokio::test]
    async fn test_send_failure_still_consumes_sequence() {
        let f = fixture();
        f.channel.open().await.unwrap();
        f.duplex().fail_sends.store(true, Ordering::SeqCst);
        assert!(f.channel.send_stream_data(b"lost").await.is_ok());
        assert_eq!(f.channel.sequence_number().await, 1);

        f.duplex().fail_sends.store(false, Ordering::SeqCst);
        f.channel.send_stream_data(b"kept").await.unwrap();
        let sent = f.duplex().sent.lock().unwrap().clone();
        assert_eq!(AgentMessage::deserialize(&sent[0]).unwrap().sequence_number, 1);
    }

    #[tokio::test]
    async fn test_framing_failure_does_not_consume_sequence() {
        let (_events, rx) = mpsc::channel(1);
        let channel = SessionChannel::new(
            MockDuplex::default(),
            rx,
            "x".repeat(40),
            SessionChannelConfig::default(),
            Arc::new(RecordingHandler::default()),
            CancelFlag::new(),
        );
        channel.open().await.unwrap();
        assert!(matches!(
            channel.send_stream_data(b"data").await,
            Err(ChannelError::Framing(_))
        ));
        assert_eq!(channel.sequence_number().await, 0);
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_type() {
        let f = fixture();
        f.channel.open().await.unwrap();

        for kind in [
            MessageType::InputStreamData,
            MessageType::OutputStreamData,
            MessageType::SetSize,
            MessageType::CloseChannel,
            MessageType::Status,
            MessageType::Unknown(42),
        ] {
            f.events.send(ChannelEvent::Message(inbound(kind, 7))).await.unwrap();
        }
        // missing created date and garbage are dropped
        f.events
            .send(ChannelEvent::Message(inbound(MessageType::InputStreamData, 0)))
            .await
            .unwrap();
        f.events
            .send(ChannelEvent::Message(Bytes::from_static(b"short")))
            .await
            .unwrap();
        settle().await;

        assert_eq!(
            *f.handler.seen.lock().unwrap(),
            vec![
                MessageType::InputStreamData,
                MessageType::SetSize,
                MessageType::Status
            ]
        );
        assert!(!f.cancel.is_set());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_is_cancelled() {
        let f = fixture();
        f.channel.open().await.unwrap();
        let started = Instant::now();

        let state = f.cancel.wait().await;
        assert_eq!(state, CancelState::Canceled);
        let elapsed = started.elapsed();
        assert!(elapsed > Duration::from_secs(180), "elapsed {:?}", elapsed);
        assert!(elapsed <= Duration::from_secs(182), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_traffic_keeps_session_alive() {
        let f = fixture();
        f.channel.open().await.unwrap();

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_secs(120)).await;
            f.events
                .send(ChannelEvent::Message(inbound(MessageType::InputStreamData, 7)))
                .await
                .unwrap();
            settle().await;
        }
        assert!(!f.cancel.is_set());

        tokio::time::sleep(Duration::from_secs(185)).await;
        assert_eq!(f.cancel.state(), CancelState::Canceled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_reconnects() {
        let f = fixture();
        f.channel.open().await.unwrap();
        f.channel.send_stream_data(b"before").await.unwrap();

        f.events
            .send(ChannelEvent::Error(ChannelError::Receive("reset".to_string())))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(f.duplex().opens.load(Ordering::SeqCst), 2);
        assert_eq!(f.duplex().closes.load(Ordering::SeqCst), 1);
        assert!(f.channel.is_active());
        assert!(!f.cancel.is_set());

        f.channel.send_stream_data(b"after").await.unwrap();
        assert_eq!(f.channel.sequence_number().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_exhaustion_cancels_session() {
        let f = fixture();
        f.channel.open().await.unwrap();
        f.duplex().refuse_reopen.store(true, Ordering::SeqCst);

        f.events
            .send(ChannelEvent::Error(ChannelError::Receive("reset".to_string())))
            .await
            .unwrap();
        let state = tokio::time::timeout(Duration::from_secs(60), f.cancel.wait())
            .await
            .unwrap();

        assert_eq!(state, CancelState::Canceled);
        // the first open plus ten failed attempts
        assert_eq!(f.duplex().opens.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn test_close_stops_background_tasks() {
        let f = fixture();
        f.channel.open().await.unwrap();
        f.channel.close().await.unwrap();
        assert!(!f.channel.is_active());
        settle().await;

        // dispatcher is gone, so the receiver has been dropped
        assert!(f.events.is_closed());
    }
}
