//! The shared medium.
//!
//! [`ContinuousChannel`] keeps every in-flight [`Frame`] for exactly its
//! `[start, end)` interval and decides collisions by interval overlap.
//! [`SlotRegistry`] only counts who transmitted in the current slot; the slot
//! process resolves and clears it at each slot boundary.

use std::collections::BTreeMap;
use std::fmt;

use log::debug;

use crate::{NodeId, SimError, SimTime};

/// Identity of one transmission attempt: the node and its attempt counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttemptId {
    pub node: NodeId,
    pub seq: u64,
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {} attempt {}", self.node, self.seq)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    pub start: SimTime,
    pub end: SimTime,
    collided: bool,
}

impl Frame {
    pub fn new(start: SimTime, duration: SimTime) -> Frame {
        Frame {
            start,
            end: start + duration,
            collided: false,
        }
    }

    /// Set only by the channel, once another frame is seen to overlap this one.
    pub fn collided(&self) -> bool {
        self.collided
    }

    /// Half-open interval overlap: a frame ending exactly when another starts does not collide.
    pub fn overlaps(&self, other: &Frame) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Default)]
pub struct ContinuousChannel {
    frames_in_transmit: BTreeMap<AttemptId, Frame>,
}

impl ContinuousChannel {
    pub fn new() -> ContinuousChannel {
        ContinuousChannel::default()
    }

    pub fn register(&mut self, id: AttemptId, frame: Frame) -> Result<(), SimError> {
        if self.frames_in_transmit.contains_key(&id) {
            return Err(SimError::InternalInconsistency(format!(
                "{} registered twice on the channel",
                id
            )));
        }
        self.frames_in_transmit.insert(id, frame);
        Ok(())
    }

    /// Ends an attempt and reports whether it collided. Every other frame still
    /// on the channel that overlaps it is flagged as well, so the peer learns of
    /// the collision when it finishes later.
    pub fn finish(&mut self, id: AttemptId) -> Result<bool, SimError> {
        let mut frame = self.frames_in_transmit.remove(&id).ok_or_else(|| {
            SimError::InternalInconsistency(format!("{} is not on the channel", id))
        })?;

        for (other_id, other) in self.frames_in_transmit.iter_mut() {
            if other.overlaps(&frame) {
                debug!("collision between {} and {}", id, other_id);
                other.collided = true;
                frame.collided = true;
            }
        }

        Ok(frame.collided)
    }

    pub fn is_registered(&self, id: &AttemptId) -> bool {
        self.frames_in_transmit.contains_key(id)
    }

    pub fn frame(&self, id: &AttemptId) -> Option<&Frame> {
        self.frames_in_transmit.get(id)
    }

    pub fn in_flight(&self) -> usize {
        self.frames_in_transmit.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotOutcome {
    Idle,
    Success(NodeId),
    Collision(Vec<NodeId>),
}

/// Transmitters of the slot currently open.
#[derive(Debug, Default)]
pub struct SlotRegistry {
    transmitting: Vec<NodeId>,
}

impl SlotRegistry {
    pub fn new() -> SlotRegistry {
        SlotRegistry::default()
    }

    pub fn register(&mut self, node: NodeId) -> Result<(), SimError> {
        if self.transmitting.contains(&node) {
            return Err(SimError::InternalInconsistency(format!(
                "node {} transmitting twice in one slot",
                node
            )));
        }
        self.transmitting.push(node);
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.transmitting.len()
    }

    /// Closes the slot and empties the registry for the next one.
    pub fn resolve(&mut self) -> SlotOutcome {
        let transmitting = std::mem::take(&mut self.transmitting);
        match transmitting.len() {
            0 => SlotOutcome::Idle,
            1 => SlotOutcome::Success(transmitting[0]),
            _ => SlotOutcome::Collision(transmitting),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(node: NodeId, seq: u64) -> AttemptId {
        AttemptId { node, seq }
    }

    #[test]
    fn lone_frame_is_clean() {
        let mut channel = ContinuousChannel::new();
        channel.register(id(0, 0), Frame::new(0.0, 1.0)).unwrap();
        assert_eq!(channel.finish(id(0, 0)), Ok(false));
        assert_eq!(channel.in_flight(), 0);
    }

    #[test]
    fn collision_is_symmetric() {
        let mut channel = ContinuousChannel::new();
        channel.register(id(0, 0), Frame::new(0.0, 1.0)).unwrap();
        channel.register(id(1, 0), Frame::new(0.5, 2.0)).unwrap();

        assert!(!channel.frame(&id(1, 0)).unwrap().collided());

        // the shorter frame finishes first and flags the longer one
        assert_eq!(channel.finish(id(0, 0)), Ok(true));
        assert!(!channel.is_registered(&id(0, 0)));
        assert!(channel.frame(&id(1, 0)).unwrap().collided());
        assert_eq!(channel.finish(id(1, 0)), Ok(true));
        assert!(!channel.is_registered(&id(1, 0)));
    }

    #[test]
    fn touching_intervals_do_not_collide() {
        let a = Frame::new(0.0, 1.0);
        let b = Frame::new(1.0, 1.0);
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));

        let mut channel = ContinuousChannel::new();
        channel.register(id(0, 0), a).unwrap();
        assert_eq!(channel.finish(id(0, 0)), Ok(false));
        channel.register(id(1, 0), b).unwrap();
        assert_eq!(channel.finish(id(1, 0)), Ok(false));
    }

    #[test]
    fn only_overlapping_peers_are_flagged() {
        let mut channel = ContinuousChannel::new();
        channel.register(id(0, 0), Frame::new(0.0, 2.0)).unwrap();
        channel.register(id(1, 0), Frame::new(1.0, 2.0)).unwrap();
        channel.register(id(2, 0), Frame::new(5.0, 1.0)).unwrap();

        assert_eq!(channel.finish(id(0, 0)), Ok(true));
        assert_eq!(channel.finish(id(1, 0)), Ok(true));
        assert_eq!(channel.finish(id(2, 0)), Ok(false));
    }

    #[test]
    fn double_register_and_remove_are_inconsistencies() {
        let mut channel = ContinuousChannel::new();
        channel.register(id(3, 1), Frame::new(0.0, 1.0)).unwrap();
        assert!(channel.is_registered(&id(3, 1)));
        assert!(matches!(
            channel.register(id(3, 1), Frame::new(0.0, 1.0)),
            Err(SimError::InternalInconsistency(_))
        ));

        assert!(channel.finish(id(3, 1)).is_ok());
        assert!(matches!(
            channel.finish(id(3, 1)),
            Err(SimError::InternalInconsistency(_))
        ));
    }

    #[test]
    fn slot_outcomes_follow_transmitter_count() {
        let mut slots = SlotRegistry::new();
        assert_eq!(slots.resolve(), SlotOutcome::Idle);

        slots.register(4).unwrap();
        assert_eq!(slots.resolve(), SlotOutcome::Success(4));
        assert_eq!(slots.count(), 0);

        slots.register(1).unwrap();
        slots.register(2).unwrap();
        assert_eq!(slots.resolve(), SlotOutcome::Collision(vec![1, 2]));
    }

    #[test]
    fn slot_rejects_repeat_transmitter() {
        let mut slots = SlotRegistry::new();
        slots.register(0).unwrap();
        assert!(slots.register(0).is_err());
    }
}
