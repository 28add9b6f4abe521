//! Strictly increasing detector timestamps.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Milliseconds since the clock was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Hands out timestamps that are strictly greater than every previous one,
/// even when two calls land in the same millisecond.
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
    last: Option<Timestamp>,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last: None,
        }
    }

    pub fn next(&mut self) -> Timestamp {
        let elapsed = self.origin.elapsed().as_millis() as u64;
        let ts = match self.last {
            Some(Timestamp(prev)) if elapsed <= prev => Timestamp(prev + 1),
            _ => Timestamp(elapsed),
        };
        self.last = Some(ts);
        ts
    }
}
