//! Discrete-event simulator for shared-channel multiple access.
//!
//! Models slotted ALOHA (with and without retransmission) and unslotted
//! contention with collision detection on a single shared channel. A
//! [`Scheduler`] owns simulated time and dispatches events in
//! `(time, insertion order)` order; nodes run their transmission state machine
//! against a [`ContinuousChannel`] or a [`SlotRegistry`]; a [`Statistics`]
//! aggregator collects steady-state figures once the warm-up has elapsed.

use thiserror::Error;

pub mod channel;
pub mod config;
pub mod node;
pub mod scheduler;
pub mod simulation;
pub mod stats;
pub mod traffic;
pub mod variates;

pub use channel::{AttemptId, ContinuousChannel, Frame, SlotOutcome, SlotRegistry};
pub use config::{BackoffPolicy, BusyPolicy, NodeParams, Protocol, SimConfig};
pub use node::{Message, Node, NodeStateType};
pub use scheduler::{Event, EventType, Scheduler};
pub use simulation::{replicate, ReplicationSummary, RunReport, Simulation, TraceEntry};
pub use stats::{NodeSnapshot, Snapshot, Statistics};
pub use traffic::TrafficSource;
pub use variates::{SeededVariates, Variates};

/// Simulated time, in abstract time units.
pub type SimTime = f64;

/// Stable index of a node, `0..num_nodes`.
pub type NodeId = usize;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),
}
