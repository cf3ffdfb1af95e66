// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test doubles for the Valet workspace: a scripted mock language model and
//! an in-memory mock channel.

pub mod mock_channel;
pub mod mock_model;

pub use mock_channel::{MockChannel, SentMessage};
pub use mock_model::{MockModel, MockTurn};
