//! cpal device plumbing shared by the microphone and the speaker.
//!
//! `cpal::Stream` is not `Send` on every platform, so each stream is built
//! and kept on its own thread. [`StreamGuard`] owns that thread; stopping or
//! dropping the guard drops the stream, which releases the hardware.

use anyhow::{anyhow, Context, Result};
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use tracing::{debug, info};

use super::backend::{AudioBackend, AudioBackendConfig, AudioDevices, OutputHandle};
use super::microphone::MicrophoneBackend;
use super::speaker::SpeakerOutput;

pub struct StreamGuard {
    name: String,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl StreamGuard {
    /// Build a stream on a dedicated thread and keep it alive until stopped.
    ///
    /// Blocks until `build` has either produced a playing stream or failed.
    /// Opening a device usually takes a few milliseconds; callers on an async
    /// runtime that can afford it should go through `spawn_blocking`.
    pub fn spawn<S, F>(name: &str, build: F) -> Result<Self>
    where
        S: 'static,
        F: FnOnce() -> Result<S> + Send + 'static,
    {
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || match build() {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    // Either an explicit stop or the guard being dropped
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .with_context(|| format!("Failed to spawn {} thread", name))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                debug!("{} stream running", name);
                Ok(Self {
                    name: name.to_string(),
                    stop_tx: Some(stop_tx),
                    thread: Some(thread),
                })
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(anyhow!("{} thread exited before the stream started", name))
            }
        }
    }

    /// Signal the stream thread to drop its stream. Idempotent.
    ///
    /// Inside a tokio runtime the thread is joined on the blocking pool so
    /// async workers never wait on the audio driver; elsewhere it is joined
    /// inline.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let name = self.name.clone();
            let join = move || {
                let _ = thread.join();
                info!("{} stream released", name);
            };
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn_blocking(join);
                }
                Err(_) => join(),
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.stop();
    }
}

/// System default microphone and speaker via cpal
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalDevices;

impl CpalDevices {
    pub fn new() -> Self {
        Self
    }
}

impl AudioDevices for CpalDevices {
    fn open_output(&self, sample_rate: u32) -> Result<OutputHandle> {
        let (output, ended) = SpeakerOutput::open(sample_rate)?;
        Ok(OutputHandle {
            output: Box::new(output),
            ended,
        })
    }

    fn open_input(&self, config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        Ok(Box::new(MicrophoneBackend::new(config)?))
    }
}
