//! Test doubles shared by the plugin tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use sa_core::traits::DataChannel;
use sa_core::ChannelError;
use sa_protocol::{AgentMessage, MessageType, SCHEMA_VERSION};

/// Build an inbound frame of `kind` carrying `payload`
pub(crate) fn frame(kind: MessageType, payload: &[u8]) -> AgentMessage {
    AgentMessage {
        message_type: kind,
        schema_version: SCHEMA_VERSION.to_string(),
        session_id: "test-session".to_string(),
        created_date: 1,
        sequence_number: 0,
        payload_length: payload.len() as u32,
        payload: Bytes::copy_from_slice(payload),
    }
}

/// Data channel that records everything sent through it
#[derive(Default)]
pub(crate) struct RecordingChannel {
    sent: Mutex<Vec<Vec<u8>>>,
    inactive: AtomicBool,
    fail: AtomicBool,
    panic: bool,
}

impl RecordingChannel {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A channel whose sends panic
    pub(crate) fn panicking() -> Arc<Self> {
        Arc::new(Self {
            panic: true,
            ..Self::default()
        })
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.inactive.store(!active, Ordering::SeqCst);
    }

    pub(crate) fn fail_sends(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// All non-empty payloads concatenated
    pub(crate) fn joined(&self) -> Vec<u8> {
        self.sent.lock().unwrap().concat()
    }
}

#[async_trait]
impl DataChannel for RecordingChannel {
    async fn send_stream_data(&self, data: &[u8]) -> Result<(), ChannelError> {
        if data.is_empty() {
            return Ok(());
        }
        if self.panic {
            panic!("send exploded");
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ChannelError::Framing("refused".to_string()));
        }
        self.sent.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    fn is_active(&self) -> bool {
        !self.inactive.load(Ordering::SeqCst)
    }

    fn channel_id(&self) -> &str {
        "test-session"
    }
}
