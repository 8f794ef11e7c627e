//! The bounded event store behind every recorder.
//!
//! A `TimelineBuffer` keeps two vectors. New events are always appended to
//! `back`; `front` holds older events, of which everything before
//! `front_valid` has expired. Expiring events therefore never shifts any
//! elements: `front_valid` just moves forward, and once all of `front` has
//! expired the two vectors swap roles (the old `front` is cleared and reused
//! as the new `back`).
//!
//! ```ignore
//!   front: [ expired .. | live live live ]   back: [ live live live live ]
//!                       ^ front_valid
//! ```
//!
//! Each `defragment` call swaps at most once, so trimming costs amortized
//! O(1) per appended event, and at most about two retention windows worth of
//! events are ever stored.

use crate::event::Event;

#[derive(Debug, Default)]
pub struct TimelineBuffer {
    front: Vec<Event>,
    back: Vec<Event>,
    front_valid: usize,
}

impl TimelineBuffer {
    pub fn new() -> TimelineBuffer {
        TimelineBuffer::default()
    }

    #[inline]
    pub fn append(&mut self, events: &[Event]) {
        self.back.extend_from_slice(events);
    }

    /// Drops every event that began before `oldest_allowed` from the front.
    pub fn defragment(&mut self, oldest_allowed: f64) {
        self.advance_front(oldest_allowed);

        // After the swap `back` is empty, so this runs at most once per call.
        if self.front_valid == self.front.len() && !self.back.is_empty() {
            self.swap_halves();
            self.advance_front(oldest_allowed);
        }
    }

    /// Drops the oldest live events until at most `max_events` remain.
    /// Returns how many were dropped.
    pub fn enforce_capacity(&mut self, max_events: usize) -> usize {
        let mut dropped = 0;

        while self.len() > max_events {
            let excess = self.len() - max_events;
            let available = self.front.len() - self.front_valid;

            if available == 0 {
                if self.back.is_empty() {
                    break;
                }
                self.swap_halves();
                continue;
            }

            let n = excess.min(available);
            self.front_valid += n;
            dropped += n;
        }

        dropped
    }

    /// Copies all live events, oldest first, into `out`. The buffer itself is
    /// left untouched.
    pub fn capture(&self, out: &mut Vec<Event>) {
        out.reserve(self.len());
        out.extend_from_slice(&self.front[self.front_valid..]);
        out.extend_from_slice(&self.back);
    }

    /// Number of live events.
    pub fn len(&self) -> usize {
        self.front.len() - self.front_valid + self.back.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of events physically held, including expired ones that have not
    /// been reclaimed yet.
    pub fn stored(&self) -> usize {
        self.front.len() + self.back.len()
    }

    pub fn clear(&mut self) {
        self.front.clear();
        self.back.clear();
        self.front_valid = 0;
    }

    fn advance_front(&mut self, oldest_allowed: f64) {
        while self.front_valid < self.front.len()
            && self.front[self.front_valid].begin < oldest_allowed
        {
            self.front_valid += 1;
        }
    }

    fn swap_halves(&mut self) {
        self.front.clear();
        self.front_valid = 0;
        std::mem::swap(&mut self.front, &mut self.back);
    }
}
