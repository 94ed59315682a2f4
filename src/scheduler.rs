use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;

use log::error;
use serde::{Deserialize, Serialize};

use crate::{NodeId, SimTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Arrival,
    StartTx,
    EndTx,
    BackoffExpired,
    SlotTick,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Arrival => write!(f, "Arrival"),
            EventType::StartTx => write!(f, "Start TX"),
            EventType::EndTx => write!(f, "End TX"),
            EventType::BackoffExpired => write!(f, "Backoff Expired"),
            EventType::SlotTick => write!(f, "Slot Tick"),
        }
    }
}

/// A pending wake-up. `node_id` is `None` for the channel's own slot process.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    event_type: EventType,
    node_id: Option<NodeId>,
    time: SimTime,
    seq: u64,
}

impl Event {
    pub fn get_event_type(&self) -> EventType {
        self.event_type
    }

    pub fn get_node_id(&self) -> Option<NodeId> {
        self.node_id
    }

    pub fn get_time(&self) -> SimTime {
        self.time
    }
}

// Total order over (time, insertion sequence); ties at equal time resolve FIFO.
impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.time.total_cmp(&other.time) {
            Ordering::Equal => self.seq.cmp(&other.seq),
            ord => ord,
        }
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Event {}

/// Owns the simulation clock. Nothing else advances `now`.
pub struct Scheduler {
    now: SimTime,
    horizon: SimTime,
    next_seq: u64,
    event_list: BinaryHeap<Reverse<Event>>,
}

impl Scheduler {
    pub fn new(horizon: SimTime) -> Scheduler {
        Scheduler {
            now: 0.0,
            horizon,
            next_seq: 0,
            event_list: BinaryHeap::new(),
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn horizon(&self) -> SimTime {
        self.horizon
    }

    pub fn pending(&self) -> usize {
        self.event_list.len()
    }

    /// Wakes `event_type` for `node_id` no earlier than `now + delay`.
    pub fn schedule(&mut self, delay: SimTime, event_type: EventType, node_id: Option<NodeId>) {
        let delay = if delay >= 0.0 {
            delay
        } else {
            error!(
                "negative or NaN delay {} for {} (node {:?}), firing immediately",
                delay, event_type, node_id
            );
            debug_assert!(false, "invalid delay {}", delay);
            0.0
        };

        let event = Event {
            event_type,
            node_id,
            time: self.now + delay,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.event_list.push(Reverse(event));
    }

    /// Removes the earliest event and moves the clock to it. Returns `None`
    /// once the next event lies past the horizon; such events are never run.
    pub fn next_event(&mut self) -> Option<Event> {
        let next_time = self.event_list.peek()?.0.time;
        if next_time > self.horizon {
            return None;
        }

        let Reverse(event) = self.event_list.pop()?;
        debug_assert!(event.time >= self.now, "clock moved backwards");
        self.now = event.time;
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatches_in_time_order() {
        let mut s = Scheduler::new(100.0);
        s.schedule(5.0, EventType::EndTx, Some(0));
        s.schedule(1.0, EventType::Arrival, Some(1));
        s.schedule(3.0, EventType::BackoffExpired, Some(2));

        let times: Vec<_> = std::iter::from_fn(|| s.next_event())
            .map(|e| e.get_time())
            .collect();
        assert_eq!(times, vec![1.0, 3.0, 5.0]);
        assert_eq!(s.now(), 5.0);
    }

    #[test]
    fn ties_resolve_in_insertion_order() {
        let mut s = Scheduler::new(10.0);
        for node in 0..5 {
            s.schedule(2.0, EventType::Arrival, Some(node));
        }
        s.schedule(2.0, EventType::SlotTick, None);

        let order: Vec<_> = std::iter::from_fn(|| s.next_event())
            .map(|e| e.get_node_id())
            .collect();
        assert_eq!(order, vec![Some(0), Some(1), Some(2), Some(3), Some(4), None]);
    }

    #[test]
    fn halts_at_horizon() {
        let mut s = Scheduler::new(10.0);
        s.schedule(10.0, EventType::SlotTick, None);
        s.schedule(10.5, EventType::SlotTick, None);

        assert!(s.next_event().is_some());
        assert!(s.next_event().is_none());
        assert_eq!(s.now(), 10.0);
        assert_eq!(s.pending(), 1);
    }

    #[test]
    fn delays_are_relative_to_now() {
        let mut s = Scheduler::new(100.0);
        s.schedule(4.0, EventType::Arrival, Some(0));
        let first = s.next_event().unwrap();
        assert_eq!(first.get_time(), 4.0);

        s.schedule(0.0, EventType::StartTx, Some(0));
        s.schedule(2.5, EventType::EndTx, Some(0));
        assert_eq!(s.next_event().unwrap().get_time(), 4.0);
        assert_eq!(s.next_event().unwrap().get_time(), 6.5);
    }
}
