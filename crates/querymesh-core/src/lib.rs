//! Core types and error definitions for the querymesh orchestration engine.
//!
//! This crate provides the foundational types shared across all querymesh crates:
//! the error enum, the message envelope routed by the hub, and the capability
//! contract every agent implements.
//!
//! # Main types
//!
//! - [`QuerymeshError`] — Unified error enum for all querymesh subsystems.
//! - [`QuerymeshResult`] — Convenience alias for `Result<T, QuerymeshError>`.
//! - [`Message`] — Typed envelope exchanged between agents.
//! - [`Agent`] — The single-method interface the hub dispatches to.
//! - [`Capability`] / [`CapabilityAgent`] — Task-level contract and its message adapter.
//! - [`AgentKind`] — Identity of the four well-known agents.

/// Error types.
pub mod error;
/// Message envelope and priorities.
pub mod message;
/// Agent trait, status, and identity.
pub mod agent;
/// Task/outcome capability contract.
pub mod capability;

pub use agent::{Agent, AgentKind, AgentStatus};
pub use capability::{AgentOutcome, AgentTask, Capability, CapabilityAgent};
pub use error::{QuerymeshError, QuerymeshResult};
pub use message::{Message, MessageType, Priority};
