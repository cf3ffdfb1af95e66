// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Guardrails for the Valet assistant daemon: input validation (rate limit,
//! length, injection heuristics), output validation (empty reply, prompt
//! leak), and SSRF protection for outbound HTTP.

pub mod input;
pub mod output;
pub mod ssrf;

pub use input::InputGuard;
pub use output::OutputGuard;
pub use ssrf::{SsrfSafeResolver, validate_url_host};
