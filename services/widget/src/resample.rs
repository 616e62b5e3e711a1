use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::warn;

/// Input chunk used by the streaming resampler on the capture path.
pub const STREAM_CHUNK: usize = 1024;

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1, // mono
    )?;
    Ok(resampler)
}

/// Number of output frames a buffer of `frames` input frames maps to.
pub fn resampled_len(frames: usize, in_rate: u32, out_rate: u32) -> usize {
    (frames as f64 * out_rate as f64 / in_rate as f64).round() as usize
}

/// Resamples a complete mono buffer in one pass. The resampler is flushed
/// and its delay trimmed, so the result lines up with the input and keeps
/// its duration exactly.
pub fn resample_buffer(samples: &[f32], in_rate: u32, out_rate: u32) -> anyhow::Result<Vec<f32>> {
    if in_rate == out_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    let mut resampler = create_resampler(in_rate as f64, out_rate as f64, samples.len())?;
    let delay = resampler.output_delay();
    let expected = resampled_len(samples.len(), in_rate, out_rate);

    let mut output = resampler.process(&[samples], None)?.swap_remove(0);
    for _ in 0..2 {
        if output.len() >= delay + expected {
            break;
        }
        let tail = resampler.process_partial::<&[f32]>(None, None)?;
        output.extend_from_slice(&tail[0]);
    }
    output.drain(..delay.min(output.len()));
    output.resize(expected, 0.0);
    Ok(output)
}

/// Converts an unbounded mono stream between rates, carrying leftovers
/// between calls. Equal rates pass straight through.
pub struct StreamResampler {
    resampler: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
}

impl StreamResampler {
    pub fn new(in_rate: u32, out_rate: u32) -> anyhow::Result<Self> {
        let resampler = if in_rate == out_rate {
            None
        } else {
            Some(create_resampler(
                in_rate as f64,
                out_rate as f64,
                STREAM_CHUNK,
            )?)
        };
        Ok(Self {
            resampler,
            pending: Vec::new(),
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        let Some(resampler) = self.resampler.as_mut() else {
            return input.to_vec();
        };
        self.pending.extend_from_slice(input);

        let mut output = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            match resampler.process(&[chunk], None) {
                Ok(mut frames) => output.append(&mut frames[0]),
                Err(e) => warn!(error = %e, "Dropping audio that failed to resample"),
            }
        }
        output
    }
}
