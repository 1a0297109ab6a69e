//! Gantt timeline of simulated CPU segments.
//!
//! Only program jobs contribute. Entries are never persisted; the whole
//! sequence is rendered and cleared when the ready queue drains.

use std::fmt::Write;

/// Append-only sequence of `(job_id, duration)` segments.
#[derive(Debug, Default)]
pub struct Timeline {
    segments: Vec<(u32, u32)>,
}

impl Timeline {
    pub fn new() -> Timeline {
        Timeline::default()
    }

    /// Record one executed segment. Zero-duration segments are dropped.
    pub fn append(&mut self, job_id: u32, duration: u32) {
        if duration > 0 {
            self.segments.push((job_id, duration));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Render the recorded segments as a Gantt string with cumulative time
    /// boundaries, e.g. `0)-P1-(3)-P2-(6`, and clear the sequence. `None`
    /// when nothing was recorded.
    pub fn flush(&mut self) -> Option<String> {
        if self.segments.is_empty() {
            return None;
        }
        let mut out = String::from("0");
        let mut elapsed: u64 = 0;
        for (job_id, duration) in self.segments.drain(..) {
            elapsed += u64::from(duration);
            let _ = write!(out, ")-P{job_id}-({elapsed}");
        }
        Some(out)
    }
}
