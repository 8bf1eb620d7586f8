//! `ticket-sentinel`: an automated ticket-acquisition client for a
//! live-event ticketing vendor's sale API.
//!
//! Module layout (SPEC_FULL.md §5 "Components"):
//! - [`config`] — process configuration, loaded once from YAML at startup.
//! - [`core_types`] — shared identifiers, integer-fen money, vendor codes.
//! - [`error`] — infra-level errors (`thiserror`), never vendor codes.
//! - [`logging`] — `tracing` subscriber bootstrap.
//! - [`http`] — cookie-aware HTTP client and the unified response envelope.
//! - [`schedule`] — clock helpers and the adaptive retry-pacing ladder.
//! - [`api`] — typed wrappers over the vendor's seven endpoints.
//! - [`challenge`] — pluggable geetest/phone challenge resolution.
//! - [`fsm`] — the acquisition state machine; the algorithmic heart.
//! - [`notify`] — post-success notification fan-out.

pub mod api;
pub mod challenge;
pub mod config;
pub mod core_types;
pub mod error;
pub mod fsm;
pub mod http;
pub mod logging;
pub mod notify;
pub mod schedule;

pub use config::AppConfig;
pub use core_types::{Fen, VendorCode};
pub use fsm::{Fsm, RunResult};
