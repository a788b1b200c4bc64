//! Message routing hub for querymesh.
//!
//! The hub connects agents through bounded per-agent priority queues. Each
//! message is matched against routing rules, passed through the rule's
//! middleware chain, and delivered by one of four strategies. A background
//! loop can drain queues into agents and re-submit their replies.
//!
//! # Main types
//!
//! - [`Hub`] — Registry, queues, routing, stats, and the dispatch loop.
//! - [`PriorityQueue`] — Bounded queue, lowest priority number first.
//! - [`RoutingRule`] / [`RoutingStrategy`] — How messages are matched and delivered.
//! - [`Middleware`] — Async hook run before delivery.
//! - [`HubConfig`] — Concurrency cap, queue capacity, and timing.

/// Hub limits and timing.
pub mod config;
/// The hub: registry, queues, delivery, and the background loop.
pub mod hub;
/// Middleware trait and built-ins.
pub mod middleware;
/// Bounded priority queue.
pub mod queue;
/// Routing rules and strategies.
pub mod routing;
/// Delivery counters and history.
pub mod stats;

pub use config::HubConfig;
pub use hub::Hub;
pub use middleware::{LoggingMiddleware, Middleware, TaggingMiddleware, ValidationMiddleware};
pub use queue::PriorityQueue;
pub use routing::{RoutingRule, RoutingStrategy};
pub use stats::{CommunicationStats, HistoryEntry, StatsSnapshot};
