use std::collections::VecDeque;
use std::fmt;

use crate::channel::{AttemptId, Frame};
use crate::config::NodeParams;
use crate::{NodeId, SimError, SimTime};

#[derive(Debug, Hash, Eq, Clone, Copy, PartialEq)]
pub enum NodeStateType {
    Idle,
    WaitSlot,
    InTx,
    Backoff,
}

impl fmt::Display for NodeStateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStateType::Idle => write!(f, "Idle"),
            NodeStateType::WaitSlot => write!(f, "Wait Slot"),
            NodeStateType::InTx => write!(f, "In Tx"),
            NodeStateType::Backoff => write!(f, "Backoff"),
        }
    }
}

/// The message a node is currently trying to deliver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Message {
    pub arrival_time: SimTime,
    pub retries: u32,
    /// Fixed on the first attempt and reused for every retry.
    pub frame_time: Option<SimTime>,
    /// Arrived before the warm-up ended; its outcome stays out of the statistics.
    pub warm_up: bool,
}

impl Message {
    fn new(arrival_time: SimTime) -> Message {
        Message {
            arrival_time,
            retries: 0,
            frame_time: None,
            warm_up: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Start,
    Queued,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attempt {
    pub id: AttemptId,
    pub frame: Frame,
    /// First attempt of its message.
    pub initial: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Delivery {
    pub delay: SimTime,
    pub busy: SimTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionOutcome {
    Retry { retries: u32 },
    Dropped { retries: u32 },
}

/// A station on the shared channel and the transmission controller for its
/// current message. Only the node's own handlers mutate it.
#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    params: NodeParams,
    state: NodeStateType,
    current: Option<Message>,
    waiting: VecDeque<Message>,
    attempt_seq: u64,
    current_attempt: Option<Attempt>,
    generated: u64,
    delivered: u64,
    dropped: u64,
    rejected: u64,
}

impl Node {
    pub fn new(id: NodeId, params: NodeParams) -> Node {
        Node {
            id,
            params,
            state: NodeStateType::Idle,
            current: None,
            waiting: VecDeque::new(),
            attempt_seq: 0,
            current_attempt: None,
            generated: 0,
            delivered: 0,
            dropped: 0,
            rejected: 0,
        }
    }

    pub fn get_id(&self) -> NodeId {
        self.id
    }

    pub fn params(&self) -> NodeParams {
        self.params
    }

    pub fn state(&self) -> NodeStateType {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        self.current.is_some()
    }

    pub fn current_message(&self) -> Option<&Message> {
        self.current.as_ref()
    }

    /// Retries spent so far on the message in service.
    pub fn current_retries(&self) -> Option<u32> {
        self.current.map(|m| m.retries)
    }

    pub fn current_attempt(&self) -> Option<AttemptId> {
        self.current_attempt.map(|a| a.id)
    }

    pub fn queued(&self) -> usize {
        self.waiting.len()
    }

    /// Lifetime counters: (generated, delivered, dropped, rejected).
    pub fn get_stats(&self) -> (u64, u64, u64, u64) {
        (self.generated, self.delivered, self.dropped, self.rejected)
    }

    /// Takes a new message. An idle node starts on it; a busy one keeps up to
    /// `capacity` messages waiting and rejects the rest.
    pub fn accept_arrival(&mut self, time: SimTime, capacity: usize) -> Admission {
        self.generated += 1;
        if self.current.is_none() {
            self.current = Some(Message::new(time));
            Admission::Start
        } else if self.waiting.len() < capacity {
            self.waiting.push_back(Message::new(time));
            Admission::Queued
        } else {
            self.rejected += 1;
            Admission::Rejected
        }
    }

    /// Parks the current message until the next slot opens.
    pub fn wait_for_slot(&mut self) -> Result<(), SimError> {
        match self.state {
            NodeStateType::Idle | NodeStateType::Backoff if self.current.is_some() => {
                self.state = NodeStateType::WaitSlot;
                Ok(())
            }
            _ => Err(self.bad_state("wait for a slot")),
        }
    }

    pub fn begin_attempt(&mut self, time: SimTime, frame_time: SimTime) -> Result<Attempt, SimError> {
        if self.state == NodeStateType::InTx {
            return Err(self.bad_state("start a second transmission"));
        }
        let message = match self.current.as_mut() {
            Some(message) => message,
            None => return Err(self.bad_state("transmit without a message")),
        };
        let frame_time = *message.frame_time.get_or_insert(frame_time);

        let attempt = Attempt {
            id: AttemptId {
                node: self.id,
                seq: self.attempt_seq,
            },
            frame: Frame::new(time, frame_time),
            initial: message.retries == 0,
        };
        self.attempt_seq += 1;
        self.current_attempt = Some(attempt);
        self.state = NodeStateType::InTx;
        Ok(attempt)
    }

    pub fn complete_success(&mut self, time: SimTime) -> Result<Delivery, SimError> {
        let attempt = self.finish_attempt()?;
        let message = self
            .current
            .take()
            .ok_or_else(|| self.bad_state("deliver without a message"))?;

        self.delivered += 1;
        self.state = NodeStateType::Idle;
        Ok(Delivery {
            delay: time - message.arrival_time,
            busy: attempt.frame.end - attempt.frame.start,
        })
    }

    /// Either schedules the message for another attempt or, once `max_retries`
    /// retries have been spent, drops it.
    pub fn complete_collision(&mut self, max_retries: Option<u32>) -> Result<CollisionOutcome, SimError> {
        self.finish_attempt()?;
        let message = match self.current.as_mut() {
            Some(message) => message,
            None => return Err(self.bad_state("retry without a message")),
        };

        if max_retries.map_or(false, |max| message.retries >= max) {
            let retries = message.retries;
            self.current = None;
            self.dropped += 1;
            self.state = NodeStateType::Idle;
            Ok(CollisionOutcome::Dropped { retries })
        } else {
            message.retries += 1;
            self.state = NodeStateType::Backoff;
            Ok(CollisionOutcome::Retry {
                retries: message.retries,
            })
        }
    }

    /// Moves the oldest waiting arrival into service. Returns false if none is waiting.
    pub fn start_next_queued(&mut self) -> bool {
        if self.current.is_some() {
            return false;
        }
        match self.waiting.pop_front() {
            Some(message) => {
                self.current = Some(message);
                true
            }
            None => false,
        }
    }

    /// Marks every message held right now, in service or waiting, as left over from the warm-up.
    pub fn mark_warm_up(&mut self) {
        for message in self.current.iter_mut().chain(self.waiting.iter_mut()) {
            message.warm_up = true;
        }
    }

    fn finish_attempt(&mut self) -> Result<Attempt, SimError> {
        if self.state != NodeStateType::InTx {
            return Err(self.bad_state("end a transmission"));
        }
        self.current_attempt
            .take()
            .ok_or_else(|| self.bad_state("end a transmission"))
    }

    fn bad_state(&self, action: &str) -> SimError {
        SimError::InternalInconsistency(format!(
            "node {} cannot {} while {}",
            self.id, action, self.state
        ))
    }
}
