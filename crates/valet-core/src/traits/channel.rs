// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel adapter trait for messaging transports (Telegram, WhatsApp, etc.).

use async_trait::async_trait;

use crate::error::ValetError;
use crate::types::{IncomingMessage, OutgoingMessage};

/// Adapter for a bidirectional messaging transport.
///
/// Implementations live outside this workspace; the daemon consumes them
/// through the channel manager, which fans all adapters into one inbound
/// stream and routes outbound messages back by channel name.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Channel name used for routing (e.g. "telegram").
    fn name(&self) -> &str;

    /// Maximum outbound message length for this transport.
    fn max_message_length(&self) -> usize {
        4000
    }

    /// Establishes the connection to the transport.
    async fn connect(&mut self) -> Result<(), ValetError>;

    /// Receives the next inbound message. Blocks until one is available.
    async fn receive(&self) -> Result<IncomingMessage, ValetError>;

    /// Sends a message to a chat on this channel.
    async fn send(&self, chat_id: &str, msg: OutgoingMessage) -> Result<(), ValetError>;

    /// Shows a typing indicator. Best-effort; default is a no-op.
    async fn send_typing(&self, _chat_id: &str) -> Result<(), ValetError> {
        Ok(())
    }

    /// Marks messages as read. Best-effort; default is a no-op.
    async fn mark_read(&self, _chat_id: &str, _message_ids: &[String]) -> Result<(), ValetError> {
        Ok(())
    }

    /// Downloads media attached to a message, returning bytes and MIME type.
    ///
    /// Default implementation reports the capability as unsupported.
    async fn download_media(
        &self,
        _msg: &IncomingMessage,
    ) -> Result<(Vec<u8>, String), ValetError> {
        Err(ValetError::Channel {
            message: "media download not supported by this channel".into(),
            source: None,
        })
    }
}
