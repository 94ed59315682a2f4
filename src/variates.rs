//! Random-variate source consumed by the engine.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp};

use crate::SimTime;

/// The draws the simulator needs. Every duration returned must be finite and non-negative.
pub trait Variates {
    /// Time until the next arrival for a Poisson source of the given rate.
    fn inter_arrival(&mut self, rate: f64) -> SimTime;

    /// Transmission time of a fresh frame.
    fn frame_time(&mut self, mean: SimTime) -> SimTime;

    /// Backoff before a retry, within `[min, max]`.
    fn backoff(&mut self, min: SimTime, max: SimTime) -> SimTime;

    /// Whether a node transmits in the slot that is opening.
    fn transmits(&mut self, probability: f64) -> bool;
}

/// Default source backed by a seeded `StdRng`.
pub struct SeededVariates {
    rng: StdRng,
}

impl SeededVariates {
    pub fn new(seed: u64) -> SeededVariates {
        SeededVariates {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn exponential(&mut self, rate: f64) -> SimTime {
        match Exp::new(rate) {
            Ok(exp) => exp.sample(&mut self.rng),
            Err(_) => 0.0,
        }
    }
}

impl Variates for SeededVariates {
    fn inter_arrival(&mut self, rate: f64) -> SimTime {
        self.exponential(rate)
    }

    fn frame_time(&mut self, mean: SimTime) -> SimTime {
        // zero-length frames are redrawn
        loop {
            let t = self.exponential(1.0 / mean);
            if t > 0.0 {
                return t;
            }
        }
    }

    fn backoff(&mut self, min: SimTime, max: SimTime) -> SimTime {
        if max > min {
            self.rng.gen_range(min..max)
        } else {
            min
        }
    }

    fn transmits(&mut self, probability: f64) -> bool {
        self.rng.gen::<f64>() < probability
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_draws() {
        let mut a = SeededVariates::new(42);
        let mut b = SeededVariates::new(42);
        for _ in 0..100 {
            assert_eq!(a.inter_arrival(0.5), b.inter_arrival(0.5));
            assert_eq!(a.frame_time(0.25), b.frame_time(0.25));
            assert_eq!(a.backoff(1.0, 10.0), b.backoff(1.0, 10.0));
        }
    }

    #[test]
    fn backoff_stays_in_range() {
        let mut v = SeededVariates::new(7);
        for _ in 0..1000 {
            let b = v.backoff(1.0, 10.0);
            assert!((1.0..10.0).contains(&b));
        }
        assert_eq!(v.backoff(3.0, 3.0), 3.0);
    }

    #[test]
    fn frame_times_are_positive() {
        let mut v = SeededVariates::new(1);
        for _ in 0..1000 {
            assert!(v.frame_time(0.25) > 0.0);
        }
    }

    #[test]
    fn certain_and_impossible_transmissions() {
        let mut v = SeededVariates::new(3);
        for _ in 0..100 {
            assert!(v.transmits(1.0));
            assert!(!v.transmits(0.0));
        }
    }
}
