// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter traits consumed across the Valet workspace.

pub mod channel;
pub mod memory;
pub mod model;

pub use channel::ChannelAdapter;
pub use memory::MemoryStore;
pub use model::{CompletionOutcome, CompletionRequest, DeltaCallback, LanguageModel};
