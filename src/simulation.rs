//! The simulation engine.
//!
//! One [`Simulation`] owns the scheduler, the nodes with their traffic
//! sources, the channel registries and the statistics. Every event is handled
//! to completion inside [`Simulation::handle_next_event`], so channel state is
//! only ever touched by one logical owner.

use log::{debug, error, info, trace};
use serde::{Deserialize, Serialize};

use crate::channel::{ContinuousChannel, SlotOutcome, SlotRegistry};
use crate::config::{BackoffPolicy, BusyPolicy, Protocol, SimConfig};
use crate::node::{Admission, CollisionOutcome, Node, NodeStateType};
use crate::scheduler::{EventType, Scheduler};
use crate::stats::{Snapshot, Statistics};
use crate::traffic::TrafficSource;
use crate::variates::{SeededVariates, Variates};
use crate::{NodeId, SimError, SimTime};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub time: SimTime,
    pub event: EventType,
    pub node: Option<NodeId>,
}

/// Snapshot and trace of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub snapshot: Snapshot,
    pub trace: Vec<TraceEntry>,
}

pub struct Simulation<V: Variates = SeededVariates> {
    config: SimConfig,
    scheduler: Scheduler,
    variates: V,
    nodes: Vec<Node>,
    sources: Vec<TrafficSource>,
    channel: ContinuousChannel,
    slots: SlotRegistry,
    slot_open: bool,
    stats: Statistics,
    trace: Vec<TraceEntry>,
}

impl Simulation<SeededVariates> {
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        let variates = SeededVariates::new(config.seed);
        Simulation::with_variates(config, variates)
    }
}

impl<V: Variates> Simulation<V> {
    pub fn with_variates(config: SimConfig, mut variates: V) -> Result<Self, SimError> {
        config.validate()?;

        let mut scheduler = Scheduler::new(config.horizon);
        let nodes: Vec<Node> = (0..config.num_nodes)
            .map(|id| Node::new(id, config.params_for(id)))
            .collect();
        let sources: Vec<TrafficSource> = nodes
            .iter()
            .map(|n| TrafficSource::for_protocol(n.get_id(), config.protocol, n.params(), config.slot_time))
            .collect();

        // the slot process goes first so a boundary is resolved before nodes act on it
        if config.protocol.is_slotted() {
            scheduler.schedule(0.0, EventType::SlotTick, None);
        }
        for (id, source) in sources.iter().enumerate() {
            let delay = source.first_delay(&mut variates);
            scheduler.schedule(delay, EventType::Arrival, Some(id));
        }

        let stats = Statistics::new(
            config.num_nodes,
            config.transient,
            config.protocol == Protocol::SlottedBernoulli,
        );

        Ok(Simulation {
            config,
            scheduler,
            variates,
            nodes,
            sources,
            channel: ContinuousChannel::new(),
            slots: SlotRegistry::new(),
            slot_open: false,
            stats,
            trace: Vec::new(),
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn channel(&self) -> &ContinuousChannel {
        &self.channel
    }

    pub fn stats(&self) -> &Statistics {
        &self.stats
    }

    pub fn trace(&self) -> &[TraceEntry] {
        &self.trace
    }

    /// Statistics as of the current clock.
    pub fn snapshot(&self) -> Snapshot {
        self.stats.snapshot(self.scheduler.now())
    }

    /// Runs to the horizon and reports over the full steady-state window.
    pub fn run(&mut self) -> Snapshot {
        info!(
            "{} with {} nodes until t={}",
            self.config.protocol, self.config.num_nodes, self.config.horizon
        );

        let mut events: u64 = 0;
        while self.handle_next_event() {
            events += 1;
        }

        // a quiet tail may leave no event at or after the threshold
        self.end_warm_up(self.config.horizon, self.config.transient);
        let snapshot = self.stats.snapshot(self.config.horizon);
        info!(
            "finished after {} events: {} delivered, throughput {:.4}, mean delay {:.4}",
            events, snapshot.successes, snapshot.throughput, snapshot.mean_delay
        );
        snapshot
    }

    pub fn into_report(mut self) -> RunReport {
        let snapshot = self.run();
        RunReport {
            snapshot,
            trace: self.trace,
        }
    }

    /// Dispatches the earliest pending event. Returns false once the horizon is reached.
    pub fn handle_next_event(&mut self) -> bool {
        let event = match self.scheduler.next_event() {
            Some(event) => event,
            None => return false,
        };
        let now = event.get_time();
        let event_type = event.get_event_type();
        let node_id = event.get_node_id();

        // slotted channels end the warm-up on a slot boundary, after the slot before it is settled
        if !self.config.protocol.is_slotted() {
            self.end_warm_up(now, self.config.transient);
        }
        trace!("t={:.4} {} node {:?}", now, event_type, node_id);
        if self.config.record_trace {
            self.trace.push(TraceEntry {
                time: now,
                event: event_type,
                node: node_id,
            });
        }

        let result = match (event_type, node_id) {
            (EventType::Arrival, Some(id)) => self.on_arrival(id),
            (EventType::StartTx, Some(id)) => self.start_attempt(id),
            (EventType::EndTx, Some(id)) => self.end_attempt(id),
            (EventType::BackoffExpired, Some(id)) => self.backoff_expired(id),
            (EventType::SlotTick, None) => self.slot_tick(),
            (event_type, node_id) => Err(SimError::InternalInconsistency(format!(
                "{} dispatched to {:?}",
                event_type, node_id
            ))),
        };

        if let Err(e) = result {
            report_inconsistency(e);
        }
        true
    }

    fn on_arrival(&mut self, id: NodeId) -> Result<(), SimError> {
        let now = self.scheduler.now();
        if self.config.protocol == Protocol::SlottedBernoulli {
            return self.slot_draw(id);
        }

        let source = self.sources.get_mut(id).ok_or_else(|| unknown_node(id))?;
        let arrival = match source.fire(now, &mut self.variates) {
            Some(arrival) => arrival,
            None => return Ok(()),
        };
        if self.config.busy_policy != BusyPolicy::Defer {
            self.schedule_arrival(id)?;
        }

        self.stats.record_generated(id);
        let capacity = match self.config.busy_policy {
            BusyPolicy::Defer => 0,
            BusyPolicy::Queue { capacity } => capacity,
        };
        match self.node_mut(id)?.accept_arrival(arrival.time, capacity) {
            Admission::Start => self.ready(id),
            Admission::Queued => Ok(()),
            Admission::Rejected => {
                debug!("node {} busy, arrival at {} rejected", id, arrival.time);
                self.stats.record_rejected(id);
                Ok(())
            }
        }
    }

    /// Bernoulli sources decide at each slot start whether a fresh message is sent.
    fn slot_draw(&mut self, id: NodeId) -> Result<(), SimError> {
        let now = self.scheduler.now();
        if !self.slot_fits(now) {
            return Ok(());
        }
        self.schedule_arrival(id)?;

        let source = self.sources.get_mut(id).ok_or_else(|| unknown_node(id))?;
        if source.fire(now, &mut self.variates).is_none() {
            return Ok(());
        }
        self.stats.record_generated(id);
        if self.node_mut(id)?.accept_arrival(now, 0) != Admission::Start {
            return Err(SimError::InternalInconsistency(format!(
                "node {} still busy when slot at {} opened",
                id, now
            )));
        }
        self.transmit_in_slot(id)
    }

    /// A message is in service and may contend for the channel.
    fn ready(&mut self, id: NodeId) -> Result<(), SimError> {
        match self.config.protocol {
            Protocol::Continuous => {
                self.scheduler.schedule(0.0, EventType::StartTx, Some(id));
                Ok(())
            }
            _ => self.node_mut(id)?.wait_for_slot(),
        }
    }

    fn start_attempt(&mut self, id: NodeId) -> Result<(), SimError> {
        let now = self.scheduler.now();
        let node = self.nodes.get_mut(id).ok_or_else(|| unknown_node(id))?;
        let frame_time = match node.current_message().and_then(|m| m.frame_time) {
            Some(t) => t,
            None => self.variates.frame_time(node.params().mean_frame_time),
        };

        let attempt = node.begin_attempt(now, frame_time)?;
        if self.counts(id) {
            self.stats.record_transmission(id, attempt.initial);
        }
        self.channel.register(attempt.id, attempt.frame)?;
        self.scheduler.schedule(frame_time, EventType::EndTx, Some(id));
        Ok(())
    }

    fn end_attempt(&mut self, id: NodeId) -> Result<(), SimError> {
        let attempt = self
            .node_mut(id)?
            .current_attempt()
            .ok_or_else(|| SimError::InternalInconsistency(format!("node {} has no attempt to end", id)))?;

        let collided = match self.channel.finish(attempt) {
            Ok(collided) => collided,
            Err(e) => {
                // the frame is gone either way; let the node carry on
                report_inconsistency(e);
                false
            }
        };

        if collided {
            self.collided(id)
        } else {
            self.delivered(id).map(|_| ())
        }
    }

    fn backoff_expired(&mut self, id: NodeId) -> Result<(), SimError> {
        match self.config.protocol {
            Protocol::Continuous => self.start_attempt(id),
            _ => self.node_mut(id)?.wait_for_slot(),
        }
    }

    /// Resolves the slot that just ended, then opens the next one if it fits before the horizon.
    fn slot_tick(&mut self) -> Result<(), SimError> {
        let now = self.scheduler.now();

        if self.slot_open {
            let outcome = self.slots.resolve();
            let delivered_age = match &outcome {
                SlotOutcome::Success(id) => {
                    let delay = self.delivered(*id)?;
                    Some(delay / self.config.slot_time)
                }
                SlotOutcome::Collision(ids) => {
                    debug!("slot ending at {}: {} transmitters collided", now, ids.len());
                    for id in ids.iter() {
                        self.collided(*id)?;
                    }
                    None
                }
                SlotOutcome::Idle => None,
            };
            self.stats.record_slot(&outcome, delivered_age);
        }
        self.end_warm_up(now, now);

        self.slot_open = self.slot_fits(now);
        if !self.slot_open {
            return Ok(());
        }
        self.scheduler
            .schedule(self.config.slot_time, EventType::SlotTick, None);

        if self.config.protocol == Protocol::SlottedRetransmit {
            let waiting: Vec<NodeId> = self
                .nodes
                .iter()
                .filter(|n| n.state() == NodeStateType::WaitSlot)
                .map(|n| n.get_id())
                .collect();
            for id in waiting {
                self.transmit_in_slot(id)?;
            }
        }
        Ok(())
    }

    fn transmit_in_slot(&mut self, id: NodeId) -> Result<(), SimError> {
        let now = self.scheduler.now();
        let slot_time = self.config.slot_time;
        let attempt = self.node_mut(id)?.begin_attempt(now, slot_time)?;
        if self.counts(id) {
            self.stats.record_transmission(id, attempt.initial);
        }
        self.slots.register(id)
    }

    /// Records a delivery and moves the node on to its next message. Returns the message delay.
    fn delivered(&mut self, id: NodeId) -> Result<SimTime, SimError> {
        let now = self.scheduler.now();
        let counts = self.counts(id);
        let delivery = self.node_mut(id)?.complete_success(now)?;
        if counts {
            self.stats.record_success(id, delivery.delay);
            self.stats.record_busy(id, delivery.busy);
        }
        trace!("node {} delivered after {:.4}", id, delivery.delay);
        self.release(id)?;
        Ok(delivery.delay)
    }

    fn collided(&mut self, id: NodeId) -> Result<(), SimError> {
        let max_retries = match self.config.protocol {
            Protocol::SlottedBernoulli => Some(0),
            _ => self.config.max_retries,
        };

        let counts = self.counts(id);
        match self.node_mut(id)?.complete_collision(max_retries)? {
            CollisionOutcome::Retry { retries } => {
                let wait = self.draw_backoff();
                if counts {
                    self.stats.record_retry(id, wait);
                }
                trace!("node {} retry {} in {:.4}", id, retries, wait);
                self.scheduler
                    .schedule(wait, EventType::BackoffExpired, Some(id));
                Ok(())
            }
            CollisionOutcome::Dropped { retries } => {
                if self.config.protocol != Protocol::SlottedBernoulli {
                    debug!("node {} dropped message after {} retries", id, retries);
                }
                if counts {
                    self.stats.record_drop(id);
                }
                self.release(id)
            }
        }
    }

    /// The node finished with its message: take the next one waiting, or let
    /// a deferred source draw its next arrival.
    fn release(&mut self, id: NodeId) -> Result<(), SimError> {
        if self.config.protocol == Protocol::SlottedBernoulli {
            return Ok(());
        }
        if self.node_mut(id)?.start_next_queued() {
            return self.ready(id);
        }
        if self.config.busy_policy == BusyPolicy::Defer {
            self.schedule_arrival(id)?;
        }
        Ok(())
    }

    /// Discards the warm-up statistics once `now` reaches the threshold. Messages
    /// still held at that instant are finished off but never counted, so every
    /// steady-state outcome belongs to a steady-state arrival.
    fn end_warm_up(&mut self, now: SimTime, since: SimTime) {
        if self.stats.observe_from(now, since) {
            for node in self.nodes.iter_mut() {
                node.mark_warm_up();
            }
        }
    }

    /// Whether the outcome of `id`'s current message belongs in the statistics.
    fn counts(&self, id: NodeId) -> bool {
        self.nodes
            .get(id)
            .and_then(|n| n.current_message())
            .map_or(true, |m| !m.warm_up)
    }

    fn schedule_arrival(&mut self, id: NodeId) -> Result<(), SimError> {
        let source = self.sources.get(id).ok_or_else(|| unknown_node(id))?;
        let delay = source.next_delay(&mut self.variates);
        self.scheduler.schedule(delay, EventType::Arrival, Some(id));
        Ok(())
    }

    fn draw_backoff(&mut self) -> SimTime {
        match self.config.backoff {
            BackoffPolicy::UniformSlots { min, max } => {
                let (min, max) = (min as f64, max as f64);
                let slots = self.variates.backoff(min, max + 1.0).floor().clamp(min, max);
                slots * self.config.slot_time
            }
            BackoffPolicy::Uniform { min, max } => self.variates.backoff(min, max),
        }
    }

    fn slot_fits(&self, now: SimTime) -> bool {
        // tolerate float drift from summing slot widths
        now + self.config.slot_time <= self.config.horizon + self.config.slot_time * 1e-9
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, SimError> {
        self.nodes.get_mut(id).ok_or_else(|| unknown_node(id))
    }
}

/// Averages over independent replications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationSummary {
    pub replications: usize,
    pub mean_delay: SimTime,
    pub mean_retries: f64,
    pub utilization: f64,
    pub throughput: f64,
    pub snapshots: Vec<Snapshot>,
}

/// Runs `replications` independent copies of `config`, seeded `seed`, `seed + 1`, ...
pub fn replicate(config: &SimConfig, replications: usize) -> Result<ReplicationSummary, SimError> {
    if replications == 0 {
        return Err(SimError::Configuration(
            "at least one replication is required".to_string(),
        ));
    }

    let mut snapshots = Vec::with_capacity(replications);
    for r in 0..replications {
        let config = SimConfig {
            seed: config.seed.wrapping_add(r as u64),
            ..config.clone()
        };
        debug!("replication {} with seed {}", r + 1, config.seed);
        snapshots.push(Simulation::new(config)?.run());
    }

    let n = replications as f64;
    let mean = |f: fn(&Snapshot) -> f64| snapshots.iter().map(f).sum::<f64>() / n;
    Ok(ReplicationSummary {
        replications,
        mean_delay: mean(|s| s.mean_delay),
        mean_retries: mean(|s| s.mean_retries),
        utilization: mean(|s| s.utilization),
        throughput: mean(|s| s.throughput),
        snapshots,
    })
}

fn unknown_node(id: NodeId) -> SimError {
    SimError::InternalInconsistency(format!("no node {}", id))
}

fn report_inconsistency(e: SimError) {
    error!("{}", e);
    debug_assert!(false, "{}", e);
}
