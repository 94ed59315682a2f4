use crate::config::{NodeParams, Protocol};
use crate::variates::Variates;
use crate::{NodeId, SimTime};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArrivalProcess {
    /// Exponential inter-arrival times with the given rate.
    Poisson { rate: f64 },
    /// One independent draw per slot.
    Bernoulli { probability: f64, slot_time: SimTime },
}

/// A message handed from a traffic source to its node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Arrival {
    pub node: NodeId,
    pub time: SimTime,
}

/// Per-node message generator. It only decides when the next arrival happens;
/// it never looks at the channel.
#[derive(Debug, Clone)]
pub struct TrafficSource {
    node: NodeId,
    process: ArrivalProcess,
    emitted: u64,
}

impl TrafficSource {
    pub fn new(node: NodeId, process: ArrivalProcess) -> TrafficSource {
        TrafficSource {
            node,
            process,
            emitted: 0,
        }
    }

    pub fn for_protocol(node: NodeId, protocol: Protocol, params: NodeParams, slot_time: SimTime) -> TrafficSource {
        let process = match protocol {
            Protocol::SlottedBernoulli => ArrivalProcess::Bernoulli {
                probability: params.arrival_rate,
                slot_time,
            },
            Protocol::SlottedRetransmit | Protocol::Continuous => ArrivalProcess::Poisson {
                rate: params.arrival_rate,
            },
        };
        TrafficSource::new(node, process)
    }

    pub fn process(&self) -> ArrivalProcess {
        self.process
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Delay before the source first fires. Bernoulli sources fire at the start of the first slot.
    pub fn first_delay<V: Variates>(&self, variates: &mut V) -> SimTime {
        match self.process {
            ArrivalProcess::Poisson { rate } => variates.inter_arrival(rate),
            ArrivalProcess::Bernoulli { .. } => 0.0,
        }
    }

    pub fn next_delay<V: Variates>(&self, variates: &mut V) -> SimTime {
        match self.process {
            ArrivalProcess::Poisson { rate } => variates.inter_arrival(rate),
            ArrivalProcess::Bernoulli { slot_time, .. } => slot_time,
        }
    }

    /// Called when the source's timer fires. Poisson sources always emit;
    /// Bernoulli sources emit with their per-slot probability.
    pub fn fire<V: Variates>(&mut self, time: SimTime, variates: &mut V) -> Option<Arrival> {
        let emits = match self.process {
            ArrivalProcess::Poisson { .. } => true,
            ArrivalProcess::Bernoulli { probability, .. } => variates.transmits(probability),
        };
        if emits {
            self.emitted += 1;
            Some(Arrival {
                node: self.node,
                time,
            })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variates::SeededVariates;

    fn params(rate: f64) -> NodeParams {
        NodeParams {
            arrival_rate: rate,
            mean_frame_time: 1.0,
        }
    }

    #[test]
    fn bernoulli_source_ticks_once_per_slot() {
        let mut v = SeededVariates::new(0);
        let source = TrafficSource::for_protocol(2, Protocol::SlottedBernoulli, params(0.5), 2.0);
        assert_eq!(source.first_delay(&mut v), 0.0);
        assert_eq!(source.next_delay(&mut v), 2.0);
    }

    #[test]
    fn certain_bernoulli_always_emits() {
        let mut v = SeededVariates::new(0);
        let mut source = TrafficSource::for_protocol(1, Protocol::SlottedBernoulli, params(1.0), 1.0);
        for t in 0..10 {
            let arrival = source.fire(t as f64, &mut v).unwrap();
            assert_eq!(arrival.node, 1);
            assert_eq!(arrival.time, t as f64);
        }
        assert_eq!(source.emitted(), 10);
    }

    #[test]
    fn poisson_mean_inter_arrival_matches_rate() {
        let mut v = SeededVariates::new(11);
        let source = TrafficSource::for_protocol(0, Protocol::Continuous, params(0.1), 1.0);
        let n = 20_000;
        let total: f64 = (0..n).map(|_| source.next_delay(&mut v)).sum();
        let mean = total / n as f64;
        assert!((mean - 10.0).abs() < 0.5, "mean inter-arrival {}", mean);
    }
}
