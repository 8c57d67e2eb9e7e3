pub mod backend;
pub mod capture;
pub mod device;
pub mod microphone;
pub mod pcm;
pub mod playback;
pub mod resample;
pub mod speaker;

pub use backend::{AudioBackend, AudioBackendConfig, AudioDevices, AudioFrame, OutputHandle};
pub use capture::{CapturePipeline, CaptureStats};
pub use device::{CpalDevices, StreamGuard};
pub use microphone::MicrophoneBackend;
pub use pcm::{decode, encode, wrap_in_wav, PcmChunk, PlaybackBuffer};
pub use playback::{PlaybackOutput, PlaybackQueue, ScheduledSource, SourceId};
pub use speaker::SpeakerOutput;
