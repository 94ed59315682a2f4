//! Statistics Aggregator.
//!
//! Running sums per node, reset exactly once when simulated time first
//! reaches the transient threshold. Nothing gathered before the reset is ever
//! reported. Derived figures divide by the elapsed steady-state time, and any
//! ratio with an empty denominator is reported as 0.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::channel::SlotOutcome;
use crate::{NodeId, SimTime};

#[derive(Debug, Clone, Default, PartialEq)]
struct Accumulator {
    generated: u64,
    rejected: u64,
    successes: u64,
    total_delay: SimTime,
    retries: u64,
    retry_wait: SimTime,
    initial_transmissions: u64,
    transmissions: u64,
    busy_time: SimTime,
    dropped: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub generated: u64,
    pub successes: u64,
    pub dropped: u64,
    pub rejected: u64,
    pub retries: u64,
    pub initial_transmissions: u64,
    pub transmissions: u64,
    pub mean_delay: SimTime,
    pub mean_retries: f64,
    pub mean_retry_wait: SimTime,
    pub busy_time: SimTime,
    pub utilization: f64,
}

/// Read-only results handed to reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Steady-state time the rates below are computed over.
    pub elapsed: SimTime,
    pub nodes: Vec<NodeSnapshot>,
    pub generated: u64,
    pub successes: u64,
    pub dropped: u64,
    pub rejected: u64,
    pub retries: u64,
    pub transmissions: u64,
    pub throughput: f64,
    pub mean_delay: SimTime,
    pub mean_retries: f64,
    pub mean_retry_wait: SimTime,
    pub utilization: f64,
    /// Successes over generated messages.
    pub success_rate: f64,
    pub slots: u64,
    pub slot_throughput: f64,
    pub aoi: Vec<f64>,
    pub mean_aoi: f64,
}

/// Age of Information, one value per resolved slot, in slots.
#[derive(Debug, Clone, PartialEq)]
pub struct AgeOfInformation {
    values: Vec<f64>,
}

impl Default for AgeOfInformation {
    fn default() -> Self {
        AgeOfInformation { values: vec![0.0] }
    }
}

impl AgeOfInformation {
    pub fn delivered(&mut self, age: f64) {
        self.values.push(age);
    }

    pub fn missed(&mut self) {
        let last = self.values.last().copied().unwrap_or(0.0);
        self.values.push(last + 1.0);
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    fn restart(&mut self) {
        let last = self.values.last().copied().unwrap_or(0.0);
        self.values = vec![last];
    }
}

pub struct Statistics {
    transient: SimTime,
    reset_done: bool,
    steady_since: SimTime,
    per_node: Vec<Accumulator>,
    slots: u64,
    successful_slots: u64,
    aoi: Option<AgeOfInformation>,
}

impl Statistics {
    pub fn new(num_nodes: usize, transient: SimTime, track_aoi: bool) -> Statistics {
        Statistics {
            transient,
            // with no warm-up there is nothing to discard
            reset_done: transient <= 0.0,
            steady_since: transient,
            per_node: vec![Accumulator::default(); num_nodes],
            slots: 0,
            successful_slots: 0,
            aoi: if track_aoi {
                Some(AgeOfInformation::default())
            } else {
                None
            },
        }
    }

    pub fn transient(&self) -> SimTime {
        self.transient
    }

    pub fn in_steady_state(&self) -> bool {
        self.reset_done
    }

    /// Must be called with the clock before each event is handled. Returns
    /// true on the one call that discards the warm-up statistics.
    pub fn observe(&mut self, now: SimTime) -> bool {
        self.observe_from(now, self.transient)
    }

    /// Like [`Statistics::observe`], but the steady state is measured from
    /// `since` rather than from the threshold. Slotted channels reset on the
    /// first slot boundary at or after the threshold and pass that boundary.
    pub fn observe_from(&mut self, now: SimTime, since: SimTime) -> bool {
        if self.reset_done || now < self.transient {
            return false;
        }
        self.reset();
        self.reset_done = true;
        self.steady_since = since;
        debug!("transient over at {}, statistics reset", now);
        true
    }

    fn reset(&mut self) {
        for acc in self.per_node.iter_mut() {
            *acc = Accumulator::default();
        }
        self.slots = 0;
        self.successful_slots = 0;
        if let Some(aoi) = self.aoi.as_mut() {
            aoi.restart();
        }
    }

    pub fn record_generated(&mut self, node: NodeId) {
        if let Some(acc) = self.per_node.get_mut(node) {
            acc.generated += 1;
        }
    }

    pub fn record_rejected(&mut self, node: NodeId) {
        if let Some(acc) = self.per_node.get_mut(node) {
            acc.rejected += 1;
        }
    }

    pub fn record_success(&mut self, node: NodeId, delay: SimTime) {
        if let Some(acc) = self.per_node.get_mut(node) {
            acc.successes += 1;
            acc.total_delay += delay;
        }
    }

    pub fn record_retry(&mut self, node: NodeId, wait_time: SimTime) {
        if let Some(acc) = self.per_node.get_mut(node) {
            acc.retries += 1;
            acc.retry_wait += wait_time;
        }
    }

    pub fn record_busy(&mut self, node: NodeId, duration: SimTime) {
        if let Some(acc) = self.per_node.get_mut(node) {
            acc.busy_time += duration;
        }
    }

    pub fn record_transmission(&mut self, node: NodeId, initial: bool) {
        if let Some(acc) = self.per_node.get_mut(node) {
            acc.transmissions += 1;
            if initial {
                acc.initial_transmissions += 1;
            }
        }
    }

    pub fn record_drop(&mut self, node: NodeId) {
        if let Some(acc) = self.per_node.get_mut(node) {
            acc.dropped += 1;
        }
    }

    /// Counts a resolved slot and, when AoI is tracked, extends the age sequence.
    /// `delivered_age` is the age in slots of the message delivered in a successful slot.
    pub fn record_slot(&mut self, outcome: &SlotOutcome, delivered_age: Option<f64>) {
        self.slots += 1;
        if let SlotOutcome::Success(_) = outcome {
            self.successful_slots += 1;
        }
        if let Some(aoi) = self.aoi.as_mut() {
            match delivered_age {
                Some(age) => aoi.delivered(age),
                None => aoi.missed(),
            }
        }
    }

    pub fn aoi(&self) -> Option<&AgeOfInformation> {
        self.aoi.as_ref()
    }

    /// Figures as of `now`. Before the reset everything reads as zero.
    pub fn snapshot(&self, now: SimTime) -> Snapshot {
        let elapsed = (now - self.steady_since).max(0.0);
        let blank = Accumulator::default();
        let per_node: Vec<&Accumulator> = self
            .per_node
            .iter()
            .map(|acc| if self.reset_done { acc } else { &blank })
            .collect();
        let (slots, successful_slots) = if self.reset_done {
            (self.slots, self.successful_slots)
        } else {
            (0, 0)
        };

        let nodes: Vec<NodeSnapshot> = per_node
            .iter()
            .enumerate()
            .map(|(id, acc)| NodeSnapshot {
                id,
                generated: acc.generated,
                successes: acc.successes,
                dropped: acc.dropped,
                rejected: acc.rejected,
                retries: acc.retries,
                initial_transmissions: acc.initial_transmissions,
                transmissions: acc.transmissions,
                mean_delay: ratio(acc.total_delay, acc.successes as f64),
                mean_retries: ratio(acc.retries as f64, acc.initial_transmissions as f64),
                mean_retry_wait: ratio(acc.retry_wait, acc.retries as f64),
                busy_time: acc.busy_time,
                utilization: ratio(acc.busy_time, elapsed),
            })
            .collect();

        let total = per_node
            .iter()
            .fold(Accumulator::default(), |mut sum, acc| {
                sum.generated += acc.generated;
                sum.rejected += acc.rejected;
                sum.successes += acc.successes;
                sum.total_delay += acc.total_delay;
                sum.retries += acc.retries;
                sum.retry_wait += acc.retry_wait;
                sum.initial_transmissions += acc.initial_transmissions;
                sum.transmissions += acc.transmissions;
                sum.busy_time += acc.busy_time;
                sum.dropped += acc.dropped;
                sum
            });

        let aoi = match self.aoi.as_ref() {
            Some(a) if self.reset_done => a.values().to_vec(),
            Some(a) => a.values().last().copied().into_iter().collect(),
            None => Vec::new(),
        };
        let mean_aoi = ratio(aoi.iter().sum(), aoi.len() as f64);

        Snapshot {
            elapsed,
            nodes,
            generated: total.generated,
            successes: total.successes,
            dropped: total.dropped,
            rejected: total.rejected,
            retries: total.retries,
            transmissions: total.transmissions,
            throughput: ratio(total.successes as f64, elapsed),
            mean_delay: ratio(total.total_delay, total.successes as f64),
            mean_retries: ratio(total.retries as f64, total.initial_transmissions as f64),
            mean_retry_wait: ratio(total.retry_wait, total.retries as f64),
            utilization: ratio(total.busy_time, elapsed),
            success_rate: ratio(total.successes as f64, total.generated as f64),
            slots,
            slot_throughput: ratio(successful_slots as f64, slots as f64),
            aoi,
            mean_aoi,
        }
    }
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_run_reports_zeroes() {
        let stats = Statistics::new(2, 0.0, false);
        let snap = stats.snapshot(100.0);
        assert_eq!(snap.mean_delay, 0.0);
        assert_eq!(snap.mean_retries, 0.0);
        assert_eq!(snap.throughput, 0.0);
        assert_eq!(snap.success_rate, 0.0);
        assert_eq!(snap.nodes.len(), 2);
    }

    #[test]
    fn reset_happens_once_at_threshold() {
        let mut stats = Statistics::new(1, 10.0, false);
        assert!(!stats.observe(5.0));
        stats.record_success(0, 3.0);
        stats.record_retry(0, 1.0);
        stats.record_busy(0, 2.0);

        // an event exactly at the threshold wipes everything gathered before it
        assert!(stats.observe(10.0));
        let snap = stats.snapshot(10.0);
        assert_eq!(snap.successes, 0);
        assert_eq!(snap.retries, 0);
        assert_eq!(snap.nodes[0].busy_time, 0.0);

        stats.record_success(0, 4.0);
        assert!(!stats.observe(20.0));
        let snap = stats.snapshot(20.0);
        assert_eq!(snap.successes, 1);
        assert_eq!(snap.mean_delay, 4.0);
    }

    #[test]
    fn warm_up_figures_are_never_reported() {
        let mut stats = Statistics::new(1, 50.0, false);
        stats.record_generated(0);
        stats.record_transmission(0, true);
        stats.record_success(0, 2.0);
        stats.record_busy(0, 2.0);

        assert!(!stats.in_steady_state());
        let snap = stats.snapshot(3.0);
        assert_eq!(snap.generated, 0);
        assert_eq!(snap.successes, 0);
        assert_eq!(snap.nodes[0].busy_time, 0.0);
        assert_eq!(snap.elapsed, 0.0);

        assert!(stats.observe(100.0));
        assert!(stats.in_steady_state());
        let snap = stats.snapshot(100.0);
        assert_eq!(snap.successes, 0);
        assert_eq!(snap.elapsed, 50.0);
    }

    #[test]
    fn slot_boundary_starts_the_steady_state() {
        let mut stats = Statistics::new(1, 10.5, true);
        stats.record_slot(&SlotOutcome::Idle, None);
        assert!(!stats.observe_from(10.0, 10.0));
        assert!(stats.observe_from(11.0, 11.0));
        stats.record_slot(&SlotOutcome::Success(0), Some(1.0));

        let snap = stats.snapshot(20.0);
        assert_eq!(snap.elapsed, 9.0);
        assert_eq!(snap.slots, 1);
        assert_eq!(snap.aoi, vec![1.0, 1.0]);
    }

    #[test]
    fn rates_use_steady_state_time() {
        let mut stats = Statistics::new(2, 20.0, false);
        stats.observe(20.0);
        stats.record_transmission(0, true);
        stats.record_success(0, 2.0);
        stats.record_busy(0, 8.0);
        stats.record_transmission(1, true);
        stats.record_retry(1, 3.0);
        stats.record_transmission(1, false);
        stats.record_success(1, 6.0);
        stats.record_busy(1, 12.0);

        let snap = stats.snapshot(100.0);
        assert_eq!(snap.elapsed, 80.0);
        assert_eq!(snap.throughput, 2.0 / 80.0);
        assert_eq!(snap.utilization, 20.0 / 80.0);
        assert_eq!(snap.nodes[0].utilization, 0.1);
        assert_eq!(snap.mean_delay, 4.0);
        assert_eq!(snap.mean_retries, 0.5);
        assert_eq!(snap.mean_retry_wait, 3.0);
        assert_eq!(snap.transmissions, 3);
    }

    #[test]
    fn aoi_grows_until_delivery() {
        let mut stats = Statistics::new(1, 0.0, true);
        stats.record_slot(&SlotOutcome::Idle, None);
        stats.record_slot(&SlotOutcome::Collision(vec![0, 1]), None);
        stats.record_slot(&SlotOutcome::Success(0), Some(1.0));
        stats.record_slot(&SlotOutcome::Idle, None);

        let snap = stats.snapshot(4.0);
        assert_eq!(snap.aoi, vec![0.0, 1.0, 2.0, 1.0, 2.0]);
        assert_eq!(snap.slots, 4);
        assert_eq!(snap.slot_throughput, 0.25);
        assert_eq!(snap.mean_aoi, 6.0 / 5.0);
    }
}
