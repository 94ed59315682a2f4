use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{NodeId, SimError, SimTime};

/// Medium access scheme being simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    /// Slotted ALOHA, one Bernoulli draw per node per slot, no retransmission.
    SlottedBernoulli,
    /// Slotted ALOHA with Poisson arrivals and retransmission after backoff.
    SlottedRetransmit,
    /// Unslotted contention with variable frame times and collision detection.
    Continuous,
}

impl Protocol {
    pub fn is_slotted(&self) -> bool {
        !matches!(self, Protocol::Continuous)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::SlottedBernoulli => write!(f, "Slotted ALOHA (no re-xmit)"),
            Protocol::SlottedRetransmit => write!(f, "Slotted ALOHA (re-xmit)"),
            Protocol::Continuous => write!(f, "CSMA/CD"),
        }
    }
}

/// How long a collided message waits before its next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BackoffPolicy {
    /// A whole number of slots, uniform over `[min, max]`.
    UniformSlots { min: u32, max: u32 },
    /// A duration drawn by the variate source over `[min, max]`.
    Uniform { min: SimTime, max: SimTime },
}

/// What a node does with arrivals while it still has a message in service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusyPolicy {
    /// The next inter-arrival is only drawn once the current message completes.
    Defer,
    /// Up to `capacity` arrivals wait behind the current message, the rest are rejected.
    Queue { capacity: usize },
}

/// Per-node override of the traffic parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeParams {
    pub arrival_rate: f64,
    pub mean_frame_time: SimTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    pub protocol: Protocol,
    pub num_nodes: usize,
    pub horizon: SimTime,
    pub slot_time: SimTime,
    /// Poisson rate for arrival-driven protocols, per-slot probability for `SlottedBernoulli`.
    pub arrival_rate: f64,
    /// Frame duration parameter for `Continuous`. Slotted protocols always occupy one slot.
    pub mean_frame_time: SimTime,
    pub backoff: BackoffPolicy,
    pub transient: SimTime,
    pub seed: u64,
    /// `None` retries forever.
    pub max_retries: Option<u32>,
    pub busy_policy: BusyPolicy,
    pub node_params: BTreeMap<NodeId, NodeParams>,
    pub record_trace: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Continuous,
            num_nodes: 4,
            horizon: 10_000.0,
            slot_time: 1.0,
            arrival_rate: 0.1,
            mean_frame_time: 0.25,
            backoff: BackoffPolicy::Uniform { min: 0.0, max: 0.005 },
            transient: 25.0,
            seed: 0,
            max_retries: None,
            busy_policy: BusyPolicy::Queue { capacity: 1 },
            node_params: BTreeMap::new(),
            record_trace: false,
        }
    }
}

impl SimConfig {
    /// Slotted ALOHA without retransmission: 10 nodes, p = 0.01, 100 slots.
    pub fn slotted_aloha() -> Self {
        Self {
            protocol: Protocol::SlottedBernoulli,
            num_nodes: 10,
            horizon: 100.0,
            arrival_rate: 0.01,
            transient: 0.0,
            ..Default::default()
        }
    }

    /// Slotted ALOHA with retransmission: 10 nodes, λ = 0.1, backoff of 1 to 9 slots.
    pub fn slotted_retransmit() -> Self {
        Self {
            protocol: Protocol::SlottedRetransmit,
            num_nodes: 10,
            horizon: 10_000.0,
            arrival_rate: 0.1,
            backoff: BackoffPolicy::UniformSlots { min: 1, max: 9 },
            transient: 0.0,
            busy_policy: BusyPolicy::Defer,
            ..Default::default()
        }
    }

    /// Unslotted CSMA/CD: 4 stations, mean inter-arrival 10, mean frame time 0.25.
    pub fn csma() -> Self {
        Self::default()
    }

    pub fn params_for(&self, node: NodeId) -> NodeParams {
        self.node_params.get(&node).copied().unwrap_or(NodeParams {
            arrival_rate: self.arrival_rate,
            mean_frame_time: self.mean_frame_time,
        })
    }

    pub fn with_node_params(mut self, node: NodeId, params: NodeParams) -> Self {
        self.node_params.insert(node, params);
        self
    }

    /// Length of the steady-state window the snapshot divides by.
    pub fn steady_state_time(&self) -> SimTime {
        self.horizon - self.transient
    }

    pub fn validate(&self) -> Result<(), SimError> {
        if self.num_nodes == 0 {
            return Err(config_error("node count must be at least 1"));
        }
        positive("horizon", self.horizon)?;
        positive("slot_time", self.slot_time)?;
        if !self.transient.is_finite() || self.transient < 0.0 {
            return Err(config_error(format!(
                "transient must be non-negative, got {}",
                self.transient
            )));
        }
        if self.transient >= self.horizon {
            return Err(config_error(format!(
                "transient {} leaves no steady state before horizon {}",
                self.transient, self.horizon
            )));
        }

        match self.backoff {
            BackoffPolicy::UniformSlots { min, max } if min > max => {
                return Err(config_error(format!(
                    "backoff range [{}, {}] slots is empty",
                    min, max
                )));
            }
            BackoffPolicy::Uniform { min, max } => {
                if !min.is_finite() || !max.is_finite() || min < 0.0 || min > max {
                    return Err(config_error(format!(
                        "backoff range [{}, {}] is invalid",
                        min, max
                    )));
                }
            }
            _ => {}
        }

        if let BusyPolicy::Queue { capacity: 0 } = self.busy_policy {
            return Err(config_error("busy queue capacity must be at least 1"));
        }

        if let Some(node) = self.node_params.keys().find(|id| **id >= self.num_nodes) {
            return Err(config_error(format!(
                "parameters given for node {} but only {} nodes exist",
                node, self.num_nodes
            )));
        }

        for node in 0..self.num_nodes {
            let params = self.params_for(node);
            positive("arrival_rate", params.arrival_rate)?;
            positive("mean_frame_time", params.mean_frame_time)?;
            if self.protocol == Protocol::SlottedBernoulli && params.arrival_rate > 1.0 {
                return Err(config_error(format!(
                    "node {} transmit probability {} exceeds 1",
                    node, params.arrival_rate
                )));
            }
        }

        Ok(())
    }
}

fn positive(name: &str, value: f64) -> Result<(), SimError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(config_error(format!("{} must be positive, got {}", name, value)))
    }
}

fn config_error(msg: impl Into<String>) -> SimError {
    SimError::Configuration(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() {
        for config in [
            SimConfig::slotted_aloha(),
            SimConfig::slotted_retransmit(),
            SimConfig::csma(),
        ] {
            assert!(config.validate().is_ok(), "{:?}", config.protocol);
        }
    }

    #[test]
    fn rejects_zero_nodes() {
        let config = SimConfig {
            num_nodes: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SimError::Configuration(_))));
    }

    #[test]
    fn rejects_non_positive_parameters() {
        let bad = [
            SimConfig {
                arrival_rate: 0.0,
                ..Default::default()
            },
            SimConfig {
                mean_frame_time: -1.0,
                ..Default::default()
            },
            SimConfig {
                slot_time: 0.0,
                ..Default::default()
            },
            SimConfig {
                horizon: f64::NAN,
                ..Default::default()
            },
        ];
        for config in bad.iter() {
            assert!(matches!(config.validate(), Err(SimError::Configuration(_))));
        }
    }

    #[test]
    fn rejects_transient_past_horizon() {
        let config = SimConfig {
            horizon: 10.0,
            transient: 10.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_probability_above_one() {
        let config = SimConfig {
            arrival_rate: 1.5,
            ..SimConfig::slotted_aloha()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_backoff_and_empty_queue() {
        let config = SimConfig {
            backoff: BackoffPolicy::UniformSlots { min: 5, max: 2 },
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SimConfig {
            busy_policy: BusyPolicy::Queue { capacity: 0 },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn node_overrides_must_name_existing_nodes() {
        let params = NodeParams {
            arrival_rate: 0.5,
            mean_frame_time: 1.0,
        };
        let config = SimConfig::default().with_node_params(7, params);
        assert!(config.validate().is_err());

        let config = SimConfig::default().with_node_params(1, params);
        assert!(config.validate().is_ok());
        assert_eq!(config.params_for(1), params);
        assert_eq!(config.params_for(0).arrival_rate, 0.1);
    }
}
