//! Gapless scheduling of inbound model audio.
//!
//! [`PlaybackQueue`] owns every scheduled source from the moment it is
//! enqueued until the output reports it ended (or an interruption stops it).
//! Sources for one turn are placed back-to-back on the output clock:
//!
//! ```text
//! start(n) = max(next_start_time, output.current_time())
//! next_start_time = start(n) + duration(n)
//! ```
//!
//! On a multi-threaded runtime the queue must be serialized by its owner;
//! the live session keeps it behind its state mutex.

use anyhow::Result;
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::pcm::PlaybackBuffer;

/// Identifier of one scheduled source, unique per queue.
pub type SourceId = u64;

/// A speaker-side clock plus the ability to start and stop sources on it.
///
/// Implementations report natural completion out of band (see
/// [`crate::audio::OutputHandle::ended`]); `stop` must silence a source
/// immediately whether it is playing or still waiting for its start time.
pub trait PlaybackOutput: Send {
    /// Current position of the playback clock in seconds.
    fn current_time(&self) -> f64;

    /// Schedule `buffer` to start at `start_at` seconds on the playback clock.
    fn schedule(&mut self, id: SourceId, buffer: &PlaybackBuffer, start_at: f64) -> Result<()>;

    /// Stop a source immediately.
    fn stop(&mut self, id: SourceId);

    /// Release the underlying device. Further calls are no-ops.
    fn close(&mut self) -> Result<()>;
}

/// Where and when a buffer was placed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSource {
    pub id: SourceId,
    pub start_time: f64,
    pub duration: f64,
}

pub struct PlaybackQueue {
    output: Box<dyn PlaybackOutput>,
    next_start_time: f64,
    active: BTreeMap<SourceId, ScheduledSource>,
    next_id: SourceId,
}

impl PlaybackQueue {
    pub fn new(output: Box<dyn PlaybackOutput>) -> Self {
        Self {
            output,
            next_start_time: 0.0,
            active: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Schedule a decoded buffer right after whatever is already queued.
    ///
    /// Returns `None` for an empty buffer: nothing is scheduled and the
    /// projected end time does not move.
    pub fn enqueue(&mut self, buffer: &PlaybackBuffer) -> Result<Option<ScheduledSource>> {
        if buffer.is_empty() {
            debug!("Skipping empty playback buffer");
            return Ok(None);
        }

        let start_time = self.next_start_time.max(self.output.current_time());
        let id = self.next_id;
        self.next_id += 1;

        self.output.schedule(id, buffer, start_time)?;

        let source = ScheduledSource {
            id,
            start_time,
            duration: buffer.duration(),
        };
        self.active.insert(id, source);
        self.next_start_time = start_time + source.duration;

        Ok(Some(source))
    }

    /// Natural completion reported by the output. Returns `false` for a
    /// source the queue no longer tracks (already interrupted).
    pub fn source_ended(&mut self, id: SourceId) -> bool {
        self.active.remove(&id).is_some()
    }

    /// Barge-in: stop everything scheduled or playing and forget the
    /// projected end time so the next buffer starts "now".
    ///
    /// Returns how many sources were stopped.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.active.len();
        for id in std::mem::take(&mut self.active).into_keys() {
            self.output.stop(id);
        }
        self.next_start_time = 0.0;

        if stopped > 0 {
            info!("Playback interrupted ({} sources stopped)", stopped);
        }

        stopped
    }

    /// Interrupt and release the output device.
    pub fn close(&mut self) -> Result<()> {
        self.interrupt();
        self.output.close()
    }

    /// Projected end of everything queued, on the playback clock.
    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn active_sources(&self) -> usize {
        self.active.len()
    }

    pub fn current_time(&self) -> f64 {
        self.output.current_time()
    }
}
