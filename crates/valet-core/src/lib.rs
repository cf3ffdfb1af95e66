// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Valet assistant daemon.
//!
//! This crate provides the foundational types, the error taxonomy, and the
//! adapter traits used throughout the Valet workspace. Channel transports,
//! model clients, and memory stores implement traits defined here.

pub mod error;
pub mod traits;
pub mod types;

pub use error::ValetError;
pub use traits::{
    ChannelAdapter, CompletionOutcome, CompletionRequest, DeltaCallback, LanguageModel,
    MemoryStore,
};
pub use types::{
    AccessLevel, AccessPolicy, ChatMessage, ConversationEntry, IncomingMessage, MediaKind,
    MediaRef, OutgoingMessage, Role, TokenUsage, ToolCall, ToolDefinition, ToolErrorKind,
    ToolResult,
};
