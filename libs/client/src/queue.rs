//! Outbound FIFO of serialized payloads awaiting transmission.

use std::collections::VecDeque;

/// Strictly ordered buffer of already-serialized frames.
///
/// Insertion order is delivery order; there is no priority. A frame is only
/// removed after the drainer has confirmed its hand-off to the session, so a
/// failed send leaves it at the head for retry.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    frames: VecDeque<String>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame at the tail. Never blocks, never fails.
    pub fn push(&mut self, frame: String) {
        self.frames.push_back(frame);
    }

    /// Peek the oldest frame without removing it.
    pub fn front(&self) -> Option<&str> {
        self.frames.front().map(String::as_str)
    }

    /// Remove and return the oldest frame.
    pub fn pop_front(&mut self) -> Option<String> {
        self.frames.pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
