// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel manager: fans all channel adapters into one inbound stream and
//! routes outbound messages back to the originating channel by name.
//!
//! On `start()`, each adapter is connected and a background receive task is
//! spawned that forwards inbound messages to a shared mpsc channel, tagging
//! each with its source channel name.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use valet_core::types::{IncomingMessage, OutgoingMessage};
use valet_core::{ChannelAdapter, ValetError};

use crate::sender::MAX_MESSAGE_DEFAULT;

/// Aggregates channel adapters behind one inbound stream.
pub struct ChannelManager {
    pending: Mutex<Vec<Box<dyn ChannelAdapter>>>,
    connected: RwLock<Vec<(String, Arc<dyn ChannelAdapter>)>>,
    inbound_tx: mpsc::Sender<IncomingMessage>,
    inbound_rx: tokio::sync::Mutex<mpsc::Receiver<IncomingMessage>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(512);
        Self {
            pending: Mutex::new(Vec::new()),
            connected: RwLock::new(Vec::new()),
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
        }
    }

    /// Adds an adapter. Must be called before `start()`.
    pub fn add_channel(&self, channel: Box<dyn ChannelAdapter>) {
        self.pending.lock().push(channel);
    }

    /// Number of channels registered (pending + connected).
    pub fn channel_count(&self) -> usize {
        self.pending.lock().len() + self.connected.read().len()
    }

    /// Connects every registered adapter and spawns its receive task.
    /// Zero channels is allowed (CLI mode).
    pub async fn start(&self, cancel: CancellationToken) -> Result<(), ValetError> {
        let pending = std::mem::take(&mut *self.pending.lock());
        let mut connected = Vec::with_capacity(pending.len());

        for mut channel in pending {
            channel.connect().await?;
            let name = channel.name().to_string();
            info!(channel = %name, "channel connected");

            let arc_channel: Arc<dyn ChannelAdapter> = Arc::from(channel);
            connected.push((name.clone(), Arc::clone(&arc_channel)));

            let tx = self.inbound_tx.clone();
            let channel_name = name;
            let recv_channel = arc_channel;
            let cancel = cancel.clone();

            tokio::spawn(async move {
                loop {
                    let received = tokio::select! {
                        _ = cancel.cancelled() => return,
                        r = recv_channel.receive() => r,
                    };
                    match received {
                        Ok(mut msg) => {
                            // Tag with the source channel for outbound routing.
                            msg.channel = channel_name.clone();
                            if tx.send(msg).await.is_err() {
                                // Manager was dropped.
                                return;
                            }
                        }
                        Err(e) => {
                            if e.to_string().contains("closed") {
                                info!(channel = %channel_name, "channel closed, stopping receive task");
                                return;
                            }
                            warn!(channel = %channel_name, error = %e, "channel receive error");
                        }
                    }
                }
            });
        }

        let count = connected.len();
        *self.connected.write() = connected;
        info!(channels = count, "channel manager started");
        Ok(())
    }

    /// Receives the next inbound message from any channel.
    pub async fn next_message(&self) -> Option<IncomingMessage> {
        let mut rx = self.inbound_rx.lock().await;
        rx.recv().await
    }

    fn channel(&self, name: &str) -> Option<Arc<dyn ChannelAdapter>> {
        self.connected
            .read()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| Arc::clone(c))
    }

    /// Sends a message on the named channel.
    pub async fn send(
        &self,
        channel: &str,
        chat_id: &str,
        msg: OutgoingMessage,
    ) -> Result<(), ValetError> {
        match self.channel(channel) {
            Some(adapter) => adapter.send(chat_id, msg).await,
            None => Err(ValetError::Channel {
                message: format!("no channel named '{channel}'"),
                source: None,
            }),
        }
    }

    /// Best-effort typing indicator.
    pub async fn send_typing(&self, channel: &str, chat_id: &str) {
        if let Some(adapter) = self.channel(channel) {
            let _ = adapter.send_typing(chat_id).await;
        }
    }

    /// Best-effort read receipt.
    pub async fn mark_read(&self, channel: &str, chat_id: &str, message_ids: &[String]) {
        if let Some(adapter) = self.channel(channel) {
            let _ = adapter.mark_read(chat_id, message_ids).await;
        }
    }

    /// Downloads media through the message's source channel.
    pub async fn download_media(
        &self,
        msg: &IncomingMessage,
    ) -> Result<(Vec<u8>, String), ValetError> {
        match self.channel(&msg.channel) {
            Some(adapter) => adapter.download_media(msg).await,
            None => Err(ValetError::Channel {
                message: format!("no channel named '{}'", msg.channel),
                source: None,
            }),
        }
    }

    /// The outbound length limit for a channel.
    pub fn max_message_length(&self, channel: &str) -> usize {
        self.channel(channel)
            .map(|c| c.max_message_length())
            .unwrap_or(MAX_MESSAGE_DEFAULT)
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use valet_test_utils::MockChannel;

    #[tokio::test]
    async fn fans_in_messages_from_adapters() {
        let manager = ChannelManager::new();
        let channel = MockChannel::new("mock");
        let handle = channel.clone();
        manager.add_channel(Box::new(channel));
        manager.start(CancellationToken::new()).await.unwrap();

        handle.inject(valet_core::IncomingMessage {
            channel: String::new(), // manager tags the source channel
            chat_id: "1".into(),
            sender: "+1".into(),
            id: "m1".into(),
            content: "hi".into(),
            media: None,
            is_group: false,
            timestamp: chrono::Utc::now(),
        });

        let msg = manager.next_message().await.unwrap();
        assert_eq!(msg.channel, "mock");
        assert_eq!(msg.content, "hi");
    }

    #[tokio::test]
    async fn send_routes_by_channel_name() {
        let manager = ChannelManager::new();
        manager.add_channel(Box::new(MockChannel::new("a")));
        manager.start(CancellationToken::new()).await.unwrap();

        let ok = manager
            .send(
                "a",
                "42",
                OutgoingMessage {
                    content: "out".into(),
                    reply_to: None,
                },
            )
            .await;
        assert!(ok.is_ok());

        let missing = manager
            .send(
                "b",
                "42",
                OutgoingMessage {
                    content: "out".into(),
                    reply_to: None,
                },
            )
            .await;
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn unknown_channel_uses_default_max_length() {
        let manager = ChannelManager::new();
        assert_eq!(manager.max_message_length("ghost"), MAX_MESSAGE_DEFAULT);
    }
}
