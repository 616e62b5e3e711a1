//! Gapless scheduling of inbound audio chunks on an output clock.

use crate::{
    audio::{OutputDevice, SourceId},
    codec::decode_pcm16,
};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Where and for how long a chunk was scheduled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSource {
    pub id: SourceId,
    pub start: f64,
    pub duration: f64,
}

/// Owns the output device, the playback cursor and the set of sources that
/// have been started but not yet ended.
pub struct PlaybackPipeline {
    device: Box<dyn OutputDevice>,
    sample_rate: u32,
    channels: u16,
    cursor: f64,
    active: HashSet<SourceId>,
    next_id: SourceId,
}

impl PlaybackPipeline {
    pub fn new(device: Box<dyn OutputDevice>, sample_rate: u32, channels: u16) -> Self {
        Self {
            device,
            sample_rate,
            channels,
            cursor: 0.0,
            active: HashSet::new(),
            next_id: 0,
        }
    }

    /// Decodes a PCM16 chunk and schedules it right after everything already
    /// queued, or immediately if the queue has drained.
    ///
    /// Returns `None` for chunks that decode to nothing or that the device
    /// refuses; the cursor is left untouched in both cases.
    pub fn enqueue(&mut self, pcm: &[u8]) -> Option<ScheduledSource> {
        let buffer = decode_pcm16(pcm, self.sample_rate, self.channels);
        if buffer.is_empty() {
            debug!(bytes = pcm.len(), "Skipping empty audio chunk");
            return None;
        }
        let duration = buffer.duration();
        let start = self.cursor.max(self.device.current_time());
        let id = self.next_id;
        self.next_id += 1;

        if let Err(e) = self.device.start(id, buffer, start) {
            warn!(error = %e, "Output device rejected audio chunk");
            return None;
        }
        self.cursor = start + duration;
        self.active.insert(id);
        Some(ScheduledSource {
            id,
            start,
            duration,
        })
    }

    /// Records a source that finished playing. Returns `true` when this was
    /// the last active source.
    pub fn source_ended(&mut self, id: SourceId) -> bool {
        self.active.remove(&id) && self.active.is_empty()
    }

    /// Stops every started source, including ones scheduled in the future,
    /// and rewinds the cursor so the next chunk plays at the current time.
    pub fn interrupt(&mut self) {
        for id in self.active.drain() {
            self.device.stop(id);
        }
        self.cursor = 0.0;
    }

    pub fn is_playing(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }
}

impl Drop for PlaybackPipeline {
    fn drop(&mut self) {
        self.interrupt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::{OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE, encode_pcm16},
        testing::FakeOutput,
    };
    use approx::assert_abs_diff_eq;

    fn chunk(seconds: f64) -> Vec<u8> {
        encode_pcm16(&vec![0.1; (seconds * OUTPUT_SAMPLE_RATE as f64) as usize])
    }

    fn pipeline() -> (PlaybackPipeline, FakeOutput) {
        let output = FakeOutput::default();
        let pipeline = PlaybackPipeline::new(
            Box::new(output.clone()),
            OUTPUT_SAMPLE_RATE,
            OUTPUT_CHANNELS,
        );
        (pipeline, output)
    }

    #[test]
    fn test_cursor_is_monotonic_and_gapless() {
        let (mut playback, output) = pipeline();
        output.set_time(1.0);

        let a = playback.enqueue(&chunk(0.5)).unwrap();
        assert_abs_diff_eq!(a.start, 1.0);
        assert_abs_diff_eq!(playback.cursor(), 1.5);

        // Arrives while `a` is still playing: queued behind it.
        output.set_time(1.2);
        let b = playback.enqueue(&chunk(0.25)).unwrap();
        assert_abs_diff_eq!(b.start, 1.5);
        assert_abs_diff_eq!(playback.cursor(), 1.75);

        // Arrives after the queue drained: starts at the clock, not the cursor.
        output.set_time(3.0);
        let c = playback.enqueue(&chunk(0.5)).unwrap();
        assert_abs_diff_eq!(c.start, 3.0);
        assert_abs_diff_eq!(playback.cursor(), 3.5);

        let starts: Vec<f64> = output.started().iter().map(|s| s.1).collect();
        assert!(starts.windows(2).all(|w| w[1] >= w[0]));
        assert_eq!(playback.active_len(), 3);
    }

    #[test]
    fn test_interrupt_flushes_future_sources() {
        let (mut playback, output) = pipeline();
        let first = playback.enqueue(&chunk(1.0)).unwrap();
        let pending = playback.enqueue(&chunk(1.0)).unwrap();
        assert!(pending.start > output.current_time());

        output.set_time(0.4);
        playback.interrupt();

        let mut stopped = output.stopped();
        stopped.sort();
        assert_eq!(stopped, vec![first.id, pending.id]);
        assert!(!playback.is_playing());
        assert_eq!(playback.cursor(), 0.0);

        let next = playback.enqueue(&chunk(0.5)).unwrap();
        assert_abs_diff_eq!(next.start, 0.4);
    }

    #[test]
    fn test_source_ended_reports_drain() {
        let (mut playback, _output) = pipeline();
        let a = playback.enqueue(&chunk(0.1)).unwrap();
        let b = playback.enqueue(&chunk(0.1)).unwrap();

        assert!(!playback.source_ended(a.id));
        assert!(!playback.source_ended(a.id));
        assert!(playback.source_ended(b.id));
        assert!(!playback.is_playing());
    }

    #[test]
    fn test_bad_chunks_do_not_move_cursor() {
        let (mut playback, output) = pipeline();
        playback.enqueue(&chunk(0.5)).unwrap();
        let before = playback.cursor();

        assert!(playback.enqueue(&[0x01]).is_none());
        assert!(playback.enqueue(&[]).is_none());
        output.fail_next_start();
        assert!(playback.enqueue(&chunk(0.5)).is_none());

        assert_eq!(playback.cursor(), before);
        assert_eq!(playback.active_len(), 1);
    }

    #[test]
    fn test_odd_length_chunk_is_truncated_not_rejected() {
        let (mut playback, _output) = pipeline();
        let mut bytes = chunk(0.5);
        bytes.push(0x7f);
        let scheduled = playback.enqueue(&bytes).unwrap();
        assert_abs_diff_eq!(scheduled.duration, 0.5);
    }

    #[test]
    fn test_drop_stops_sources() {
        let (mut playback, output) = pipeline();
        playback.enqueue(&chunk(0.5)).unwrap();
        drop(playback);
        assert_eq!(output.stopped().len(), 1);
    }
}
