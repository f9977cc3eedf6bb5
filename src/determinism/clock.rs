//! Fixed-rate deadline arithmetic for the tick loop.
//!
//! The next deadline is always the previous deadline plus the interval. When
//! execution overruns, deadlines are advanced until they land in the future:
//! overrun ticks are dropped and the rate is preserved, never compressed.

use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct TickClock {
    interval: Duration,
    next_deadline: Instant,
}

impl TickClock {
    /// A clock whose first deadline is one interval from `start`.
    pub fn new(start: Instant, interval: Duration) -> Self {
        Self {
            interval,
            next_deadline: start + interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn next_deadline(&self) -> Instant {
        self.next_deadline
    }

    /// Advance by exactly one interval after a deadline fires.
    pub fn advance(&mut self) {
        self.next_deadline += self.interval;
    }

    /// Advance past `now`, returning how many whole deadlines were dropped.
    /// Call after a wake that overran one or more intervals; at most one tick
    /// executes per wake regardless of how far behind the clock fell.
    pub fn catch_up(&mut self, now: Instant) -> u32 {
        let mut dropped = 0;
        while self.next_deadline <= now {
            self.next_deadline += self.interval;
            dropped += 1;
        }
        dropped
    }
}
