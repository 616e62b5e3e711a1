//! Device seams between the session logic and the host audio system.
//!
//! Implementations live outside this crate; the session only ever sees these
//! traits. None of them are required to be `Send`: the session runs on a
//! single cooperative task alongside the streams it owns.

use crate::{codec::AudioBuffer, error::AudioError};
use tokio::sync::mpsc;

/// Identifies one scheduled playback source on an [`OutputDevice`].
pub type SourceId = u64;

/// Acquires the input and output sides of the audio system.
pub trait AudioBackend {
    /// Requests microphone access, producing mono audio at `sample_rate`.
    fn open_microphone(&mut self, sample_rate: u32) -> Result<Box<dyn Microphone>, AudioError>;

    /// Opens a clocked output context. The device reports each source that
    /// finishes on its own through `ended`; sources stopped explicitly are
    /// not reported.
    fn open_output(
        &mut self,
        sample_rate: u32,
        channels: u16,
        ended: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Box<dyn OutputDevice>, AudioError>;
}

/// A live microphone stream.
pub trait Microphone {
    /// Starts delivering fixed-size blocks to `blocks`. Delivery never
    /// blocks the audio thread; blocks that do not fit are dropped.
    fn attach(&mut self, block_size: usize, blocks: mpsc::Sender<Vec<f32>>)
    -> Result<(), AudioError>;

    /// Disconnects the processing node; the stream stays open.
    fn detach(&mut self);

    /// Stops the underlying tracks. Idempotent.
    fn stop(&mut self);
}

/// A clocked output context that plays buffers at absolute times.
pub trait OutputDevice {
    /// Monotonic output clock in seconds.
    fn current_time(&self) -> f64;

    fn start(&mut self, id: SourceId, buffer: AudioBuffer, at: f64) -> Result<(), AudioError>;

    /// Stops a source whether it is playing or still pending. Unknown ids
    /// are ignored.
    fn stop(&mut self, id: SourceId);
}
