//! Send timestamps of requests still awaiting a relay response

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Bounded FIFO of send times, one entry per fully transmitted request
#[derive(Debug)]
pub struct PendingRequests {
    sent_at: VecDeque<Instant>,
    capacity: usize,
}

impl PendingRequests {
    /// Create an empty queue holding at most `capacity` requests
    pub fn new(capacity: usize) -> Self {
        Self {
            sent_at: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Number of requests awaiting a response
    pub fn len(&self) -> usize {
        self.sent_at.len()
    }

    /// Check if no request is outstanding
    pub fn is_empty(&self) -> bool {
        self.sent_at.is_empty()
    }

    /// Whether another request may be put on the wire
    pub fn is_full(&self) -> bool {
        self.sent_at.len() >= self.capacity
    }

    /// Record a transmitted request. Refused once the cap is reached.
    pub fn push(&mut self, sent_at: Instant) -> bool {
        if self.is_full() {
            return false;
        }
        self.sent_at.push_back(sent_at);
        true
    }

    /// Match a response against the oldest outstanding request
    pub fn pop(&mut self) -> Option<Instant> {
        self.sent_at.pop_front()
    }

    /// Give up on requests sent at least `max_age` ago
    ///
    /// Returns how many were dropped. A response that still arrives later is
    /// matched against the next entry.
    pub fn expire(&mut self, now: Instant, max_age: Duration) -> usize {
        let mut expired = 0;
        while let Some(sent) = self.sent_at.front() {
            if now.saturating_duration_since(*sent) < max_age {
                break;
            }
            self.sent_at.pop_front();
            expired += 1;
        }
        expired
    }
}
