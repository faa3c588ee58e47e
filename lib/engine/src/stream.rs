// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Serialized device-time resources.
//!
//! A stream models a single consumer of one device (one GPU lane): work
//! placed on it occupies the device back-to-back, so the only state a stream
//! needs is the timestamp its backlog drains at.

use std::collections::HashMap;

/// A named serialized device-time resource.
///
/// `busy_until` is non-decreasing: holds are appended after whatever is
/// already queued on the device, never inserted before it.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stream {
    busy_until: f64,
}

impl Stream {
    /// The virtual time at which the stream's current backlog drains.
    pub fn busy_until(&self) -> f64 {
        self.busy_until
    }
}

/// Lazily populated table of streams, owned by one event loop.
///
/// Streams come into existence on first reference and persist for the
/// lifetime of the run.
#[derive(Debug, Default)]
pub struct StreamTable {
    streams: HashMap<String, Stream>,
}

impl StreamTable {
    /// Append `duration` seconds of work to `name`, returning the new mark.
    ///
    /// The hold starts at `max(busy_until, now)`: an idle device starts
    /// immediately, a busy one queues the work behind its backlog.
    pub(crate) fn advance(&mut self, name: &str, now: f64, duration: f64) -> f64 {
        debug_assert!(duration >= 0.0);
        let stream = self.streams.entry(name.to_string()).or_default();
        stream.busy_until = stream.busy_until.max(now) + duration;
        stream.busy_until
    }

    /// Current mark of `name`; streams never referenced sit at 0.
    pub fn mark(&self, name: &str) -> f64 {
        self.streams.get(name).map_or(0.0, Stream::busy_until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_stream_starts_at_now() {
        let mut table = StreamTable::default();
        assert_eq!(table.advance("gpu0", 3.0, 2.0), 5.0);
        assert_eq!(table.mark("gpu0"), 5.0);
    }

    #[test]
    fn busy_stream_queues_behind_backlog() {
        let mut table = StreamTable::default();
        table.advance("gpu0", 0.0, 10.0);
        // Issued at t=4 while the stream drains at t=10: queued, not overlapped.
        assert_eq!(table.advance("gpu0", 4.0, 2.0), 12.0);
    }

    #[test]
    fn unreferenced_stream_reads_zero() {
        let table = StreamTable::default();
        assert_eq!(table.mark("gpu7"), 0.0);
    }
}
