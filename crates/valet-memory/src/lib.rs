// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Long-term memory for the Valet assistant daemon: a file-backed fact
//! index plus daily logs, implementing the `MemoryStore` contract.

pub mod store;

pub use store::FileStore;
