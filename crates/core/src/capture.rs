//! Microphone framing, metering and voice-activity gating.

use crate::codec::EncodedChunk;

/// Samples per processing tick at the input rate.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;
/// RMS level on a [-1, 1] scale above which a block counts as voiced.
pub const VOICE_ACTIVITY_THRESHOLD: f32 = 0.01;

/// Root-mean-square of the block; 0 for an empty block.
pub fn rms(block: &[f32]) -> f32 {
    if block.is_empty() {
        return 0.0;
    }
    let sum: f32 = block.iter().map(|s| s * s).sum();
    (sum / block.len() as f32).sqrt()
}

/// Regroups device callbacks of arbitrary length into fixed-size blocks.
#[derive(Debug)]
pub struct BlockFramer {
    block_size: usize,
    pending: Vec<f32>,
}

impl BlockFramer {
    pub fn new(block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            pending: Vec::with_capacity(block_size),
        }
    }

    /// Appends `samples` and returns every block completed by them.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        let mut blocks = Vec::new();
        let mut rest = samples;
        while !rest.is_empty() {
            let take = (self.block_size - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending.len() == self.block_size {
                blocks.push(std::mem::replace(
                    &mut self.pending,
                    Vec::with_capacity(self.block_size),
                ));
            }
        }
        blocks
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Result of processing one capture block.
#[derive(Debug)]
pub struct CaptureFrame {
    pub volume: f32,
    /// Present only for voiced blocks.
    pub chunk: Option<EncodedChunk>,
}

#[derive(Debug, Clone)]
pub struct CapturePipeline {
    sample_rate: u32,
    threshold: f32,
}

impl CapturePipeline {
    pub fn new(sample_rate: u32, threshold: f32) -> Self {
        Self {
            sample_rate,
            threshold,
        }
    }

    /// Meters the block and encodes it when it clears the threshold.
    pub fn process(&self, block: &[f32]) -> CaptureFrame {
        let volume = rms(block);
        let chunk =
            (volume > self.threshold).then(|| EncodedChunk::pcm16(block, self.sample_rate));
        CaptureFrame { volume, chunk }
    }
}
