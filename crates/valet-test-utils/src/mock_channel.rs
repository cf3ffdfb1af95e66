// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock channel adapter for deterministic tests.
//!
//! Inbound messages are injected by tests; everything sent through the
//! adapter is captured for assertions. The adapter is cheaply cloneable so
//! tests can keep a handle after registering it with the channel manager.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use valet_core::types::{IncomingMessage, OutgoingMessage};
use valet_core::{ChannelAdapter, ValetError};

/// A captured outbound message with its chat id.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub chat_id: String,
    pub message: OutgoingMessage,
}

struct MockChannelInner {
    name: String,
    inbound_tx: mpsc::UnboundedSender<IncomingMessage>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<IncomingMessage>>,
    sent: Mutex<Vec<SentMessage>>,
    typing: Mutex<Vec<String>>,
    media: Mutex<Option<(Vec<u8>, String)>>,
}

/// An in-memory channel adapter.
#[derive(Clone)]
pub struct MockChannel {
    inner: Arc<MockChannelInner>,
}

impl MockChannel {
    pub fn new(name: &str) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(MockChannelInner {
                name: name.to_string(),
                inbound_tx,
                inbound_rx: tokio::sync::Mutex::new(inbound_rx),
                sent: Mutex::new(Vec::new()),
                typing: Mutex::new(Vec::new()),
                media: Mutex::new(None),
            }),
        }
    }

    /// Injects a direct message with a generated id.
    pub fn inject_text(&self, chat_id: &str, sender: &str, content: &str) {
        self.inject(IncomingMessage {
            channel: self.inner.name.clone(),
            chat_id: chat_id.to_string(),
            sender: sender.to_string(),
            id: format!("msg-{}", nano_id()),
            content: content.to_string(),
            media: None,
            is_group: false,
            timestamp: Utc::now(),
        });
    }

    /// Injects an arbitrary inbound message.
    pub fn inject(&self, msg: IncomingMessage) {
        let _ = self.inner.inbound_tx.send(msg);
    }

    /// Everything sent through this channel so far.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.inner.sent.lock().clone()
    }

    /// Chats that received a typing indicator.
    pub fn typing_events(&self) -> Vec<String> {
        self.inner.typing.lock().clone()
    }

    /// Sets the payload returned by `download_media`.
    pub fn set_media(&self, bytes: Vec<u8>, mime: &str) {
        *self.inner.media.lock() = Some((bytes, mime.to_string()));
    }
}

fn nano_id() -> u128 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
}

#[async_trait]
impl ChannelAdapter for MockChannel {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn max_message_length(&self) -> usize {
        4000
    }

    async fn connect(&mut self) -> Result<(), ValetError> {
        Ok(())
    }

    async fn receive(&self) -> Result<IncomingMessage, ValetError> {
        let mut rx = self.inner.inbound_rx.lock().await;
        rx.recv().await.ok_or_else(|| ValetError::Channel {
            message: "mock channel closed".to_string(),
            source: None,
        })
    }

    async fn send(&self, chat_id: &str, msg: OutgoingMessage) -> Result<(), ValetError> {
        self.inner.sent.lock().push(SentMessage {
            chat_id: chat_id.to_string(),
            message: msg,
        });
        Ok(())
    }

    async fn send_typing(&self, chat_id: &str) -> Result<(), ValetError> {
        self.inner.typing.lock().push(chat_id.to_string());
        Ok(())
    }

    async fn download_media(
        &self,
        _msg: &IncomingMessage,
    ) -> Result<(Vec<u8>, String), ValetError> {
        self.inner
            .media
            .lock()
            .clone()
            .ok_or_else(|| ValetError::Channel {
                message: "no media configured on mock channel".to_string(),
                source: None,
            })
    }
}
