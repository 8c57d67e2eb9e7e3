//! Microphone to socket pump.
//!
//! Frames are encoded and handed to the outbound sink without waiting for
//! acknowledgement. Anything captured before the connection opened is
//! discarded when the pipeline starts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::backend::AudioFrame;
use super::pcm::{encode, PcmChunk};
use crate::live::OutboundSink;

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    dropped: AtomicU64,
    discarded: AtomicU64,
}

/// Snapshot of what the pipeline has done so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Chunks accepted by the outbound sink
    pub chunks_sent: u64,
    /// Chunks the sink refused (queue full or connection gone)
    pub chunks_dropped: u64,
    /// Frames buffered before the connection opened
    pub backlog_discarded: u64,
}

pub struct CapturePipeline {
    task: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl CapturePipeline {
    pub fn start(mut frames: mpsc::Receiver<AudioFrame>, sink: OutboundSink) -> Self {
        let counters = Arc::new(Counters::default());

        // Drop the backlog so the model never hears pre-connection audio
        let mut discarded = 0u64;
        while frames.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            debug!("Discarded {} frames captured before the connection opened", discarded);
        }
        counters.discarded.store(discarded, Ordering::Relaxed);

        let task_counters = Arc::clone(&counters);
        let task = tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                let chunk = PcmChunk::new(encode(&frame.samples), frame.sample_rate);
                if sink.send_audio(&chunk) {
                    task_counters.sent.fetch_add(1, Ordering::Relaxed);
                } else {
                    task_counters.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            debug!("Capture frame stream ended");
        });

        info!("Capture pipeline started");

        Self {
            task: Some(task),
            counters,
        }
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            chunks_sent: self.counters.sent.load(Ordering::Relaxed),
            chunks_dropped: self.counters.dropped.load(Ordering::Relaxed),
            backlog_discarded: self.counters.discarded.load(Ordering::Relaxed),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Stop forwarding frames. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
            let stats = self.stats();
            info!(
                "Capture pipeline stopped ({} sent, {} dropped)",
                stats.chunks_sent, stats.chunks_dropped
            );
        }
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
