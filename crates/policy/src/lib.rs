// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! amon-policy: path containment, decision algebra, and hash-only auditing.
//!
//! Everything a run does to the filesystem or through a tool passes this
//! crate: [`PathVault`] enforces workspace containment and atomic writes,
//! [`PolicyGate`] computes allow/ask/deny for each invocation, and every
//! decision is appended to an audit stream that carries hashes, never
//! contents.

pub mod audit;
pub mod gate;
pub mod vault;

pub use audit::{AuditEntry, AuditWriter};
pub use gate::{Caller, Decision, PolicyDecision, PolicyGate};
pub use vault::{PathVault, TrashTicket, VaultError};
