//! Rotating time buffer.
//!
//! Carries inter-stage messages across cycles with configurable read
//! offsets. Writers mutate the current slot (offset 0); a reader at offset
//! `d` sees the slot written `d` cycles ago. Strict reader/writer
//! discipline — each stage writes only its own wires — is what lets all
//! stages share one buffer without ordering hazards inside a tick.

use std::collections::VecDeque;

use super::latches::TimeSlot;

#[derive(Debug)]
pub struct TimeBuffer {
    slots: VecDeque<TimeSlot>,
}

impl TimeBuffer {
    /// `depth` must cover the largest configured stage delay.
    pub fn new(depth: usize) -> Self {
        let mut slots = VecDeque::with_capacity(depth + 1);
        for _ in 0..=depth {
            slots.push_back(TimeSlot::default());
        }
        Self { slots }
    }

    /// The slot being written this cycle.
    pub fn now(&mut self) -> &mut TimeSlot {
        self.slots.front_mut().expect("time buffer is never empty")
    }

    /// The slot written `delay` cycles ago.
    pub fn read(&self, delay: usize) -> &TimeSlot {
        &self.slots[delay]
    }

    /// Rotate: the oldest slot is dropped and a fresh slot becomes current.
    pub fn advance(&mut self) {
        self.slots.pop_back();
        self.slots.push_front(TimeSlot::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read_after_delay() {
        let mut buf = TimeBuffer::new(2);
        buf.now().fetch_to_decode.push(42);

        assert_eq!(buf.read(0).fetch_to_decode, vec![42]);
        buf.advance();
        assert!(buf.read(0).fetch_to_decode.is_empty());
        assert_eq!(buf.read(1).fetch_to_decode, vec![42]);
        buf.advance();
        assert_eq!(buf.read(2).fetch_to_decode, vec![42]);
        buf.advance();
        // Rotated out.
        assert!(buf.read(2).fetch_to_decode.is_empty());
    }
}
