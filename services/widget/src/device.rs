//! Host audio through cpal.
//!
//! Capture runs at whatever rate the device prefers and is downmixed and
//! resampled to the session rate inside the input callback. Playback goes
//! through a small mixer that owns the output clock: every scheduled
//! source is pinned to an absolute frame so consecutive chunks line up
//! without gaps.

use crate::resample::{StreamResampler, resample_buffer};
use aura_core::{
    audio::{AudioBackend, Microphone, OutputDevice, SourceId},
    capture::BlockFramer,
    codec::AudioBuffer,
    error::AudioError,
};
use cpal::{
    BuildStreamError, DefaultStreamConfigError, FromSample, Sample, SampleFormat, SampleRate,
    SizedSample, SupportedStreamConfig, SupportedStreamConfigRange,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Opens cpal streams on the default host, optionally on named devices.
pub struct CpalBackend {
    host: cpal::Host,
    input_device: Option<String>,
    output_device: Option<String>,
}

impl CpalBackend {
    pub fn new(input_device: Option<String>, output_device: Option<String>) -> Self {
        Self {
            host: cpal::default_host(),
            input_device,
            output_device,
        }
    }

    fn input(&self) -> Result<cpal::Device, AudioError> {
        match &self.input_device {
            Some(name) => find_device(self.host.input_devices(), name, "input"),
            None => self
                .host
                .default_input_device()
                .ok_or(AudioError::DeviceUnavailable("input")),
        }
    }

    fn output(&self) -> Result<cpal::Device, AudioError> {
        match &self.output_device {
            Some(name) => find_device(self.host.output_devices(), name, "output"),
            None => self
                .host
                .default_output_device()
                .ok_or(AudioError::DeviceUnavailable("output")),
        }
    }
}

impl AudioBackend for CpalBackend {
    fn open_microphone(&mut self, sample_rate: u32) -> Result<Box<dyn Microphone>, AudioError> {
        let device = self.input()?;
        let default = device
            .default_input_config()
            .map_err(|e| config_error(e, "input"))?;
        let ranges = device
            .supported_input_configs()
            .map(|configs| configs.collect())
            .unwrap_or_default();
        let config = choose_config(ranges, default, sample_rate);
        let device_rate = config.sample_rate().0;
        let channels = config.channels() as usize;
        let stream_config = config.config();

        let sink = Arc::new(Mutex::new(None));
        let stream = match config.sample_format() {
            SampleFormat::F32 => {
                build_input::<f32>(&device, &stream_config, channels, sink.clone())
            }
            SampleFormat::I16 => {
                build_input::<i16>(&device, &stream_config, channels, sink.clone())
            }
            other => {
                return Err(AudioError::UnsupportedConfig(format!(
                    "input sample format {other:?}"
                )));
            }
        }?;
        stream
            .play()
            .map_err(|e| AudioError::PermissionDenied(e.to_string()))?;

        info!(
            device = %device.name().unwrap_or_default(),
            device_rate,
            channels,
            "Microphone opened"
        );
        Ok(Box::new(CpalMicrophone {
            stream: Some(stream),
            sink,
            device_rate,
            target_rate: sample_rate,
        }))
    }

    fn open_output(
        &mut self,
        sample_rate: u32,
        channels: u16,
        ended: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Box<dyn OutputDevice>, AudioError> {
        let device = self.output()?;
        let default = device
            .default_output_config()
            .map_err(|e| config_error(e, "output"))?;
        let ranges = device
            .supported_output_configs()
            .map(|configs| configs.collect())
            .unwrap_or_default();
        let config = choose_config(ranges, default, sample_rate);
        let device_rate = config.sample_rate().0;
        let stream_config = config.config();

        let mixer = Arc::new(Mutex::new(Mixer::new(ended)));
        let stream = match config.sample_format() {
            SampleFormat::F32 => build_output::<f32>(&device, &stream_config, mixer.clone()),
            SampleFormat::I16 => build_output::<i16>(&device, &stream_config, mixer.clone()),
            other => {
                return Err(AudioError::UnsupportedConfig(format!(
                    "output sample format {other:?}"
                )));
            }
        }?;
        stream
            .play()
            .map_err(|e| AudioError::Stream(e.to_string()))?;

        info!(
            device = %device.name().unwrap_or_default(),
            device_rate,
            device_channels = stream_config.channels,
            source_channels = channels,
            "Output opened"
        );
        Ok(Box::new(CpalOutput {
            _stream: stream,
            mixer,
            device_rate,
        }))
    }
}

/// Lists input and output devices for `--list-devices`.
pub fn list_devices() -> anyhow::Result<Vec<String>> {
    let host = cpal::default_host();
    let default_input = host.default_input_device().and_then(|d| d.name().ok());
    let default_output = host.default_output_device().and_then(|d| d.name().ok());

    let mut lines = vec![format!("Host: {:?}", host.id()), "Input devices:".to_string()];
    for device in host.input_devices()? {
        let name = device.name()?;
        let marker = if Some(&name) == default_input.as_ref() {
            " (default)"
        } else {
            ""
        };
        lines.push(format!("  {name}{marker}"));
    }
    lines.push("Output devices:".to_string());
    for device in host.output_devices()? {
        let name = device.name()?;
        let marker = if Some(&name) == default_output.as_ref() {
            " (default)"
        } else {
            ""
        };
        lines.push(format!("  {name}{marker}"));
    }
    Ok(lines)
}

fn find_device<I>(
    devices: Result<I, cpal::DevicesError>,
    name: &str,
    kind: &'static str,
) -> Result<cpal::Device, AudioError>
where
    I: Iterator<Item = cpal::Device>,
{
    let found = devices
        .map_err(|e| AudioError::Stream(e.to_string()))?
        .find(|device| device.name().map(|n| n == name).unwrap_or(false));
    if found.is_none() {
        warn!(device = name, kind, "Requested audio device was not found");
    }
    found.ok_or(AudioError::DeviceUnavailable(kind))
}

fn config_error(err: DefaultStreamConfigError, kind: &'static str) -> AudioError {
    match err {
        DefaultStreamConfigError::DeviceNotAvailable => AudioError::DeviceUnavailable(kind),
        other => AudioError::UnsupportedConfig(other.to_string()),
    }
}

fn build_error(err: BuildStreamError, kind: &'static str) -> AudioError {
    match err {
        BuildStreamError::DeviceNotAvailable => AudioError::DeviceUnavailable(kind),
        BuildStreamError::StreamConfigNotSupported => {
            AudioError::UnsupportedConfig(format!("{kind} stream configuration"))
        }
        other => AudioError::Stream(other.to_string()),
    }
}

/// Prefers a range that can run at `rate` natively with a sample format we
/// can convert, using as few channels as possible. Falls back to the
/// device default, in which case the streams resample.
fn choose_config(
    ranges: Vec<SupportedStreamConfigRange>,
    default: SupportedStreamConfig,
    rate: u32,
) -> SupportedStreamConfig {
    ranges
        .into_iter()
        .filter(|range| range.min_sample_rate().0 <= rate && rate <= range.max_sample_rate().0)
        .filter(|range| matches!(range.sample_format(), SampleFormat::F32 | SampleFormat::I16))
        .min_by_key(|range| range.channels())
        .map(|range| range.with_sample_rate(SampleRate(rate)))
        .unwrap_or(default)
}

fn downmix<T>(data: &[T], channels: usize) -> Vec<f32>
where
    T: Sample,
    f32: FromSample<T>,
{
    data.chunks(channels.max(1))
        .map(|frame| {
            frame.iter().map(|s| s.to_sample::<f32>()).sum::<f32>() / frame.len() as f32
        })
        .collect()
}

struct MicSink {
    resampler: StreamResampler,
    framer: BlockFramer,
    blocks: mpsc::Sender<Vec<f32>>,
}

impl MicSink {
    fn push(&mut self, mono: &[f32]) {
        let resampled = self.resampler.process(mono);
        for block in self.framer.push(&resampled) {
            // The session drains blocks promptly; a full queue means it is
            // busy and this block is dropped.
            let _ = self.blocks.try_send(block);
        }
    }
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    sink: Arc<Mutex<Option<MicSink>>>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if let Ok(mut guard) = sink.lock() {
                    if let Some(sink) = guard.as_mut() {
                        sink.push(&downmix(data, channels));
                    }
                }
            },
            |err| error!(error = %err, "Microphone stream error"),
            None,
        )
        .map_err(|e| build_error(e, "input"))
}

/// An open capture stream. Samples are discarded until a sink is attached.
pub struct CpalMicrophone {
    stream: Option<cpal::Stream>,
    sink: Arc<Mutex<Option<MicSink>>>,
    device_rate: u32,
    target_rate: u32,
}

impl Microphone for CpalMicrophone {
    fn attach(
        &mut self,
        block_size: usize,
        blocks: mpsc::Sender<Vec<f32>>,
    ) -> Result<(), AudioError> {
        let resampler = StreamResampler::new(self.device_rate, self.target_rate)
            .map_err(|e| AudioError::UnsupportedConfig(e.to_string()))?;
        let mut guard = self
            .sink
            .lock()
            .map_err(|_| AudioError::Stream("capture state poisoned".to_string()))?;
        *guard = Some(MicSink {
            resampler,
            framer: BlockFramer::new(block_size),
            blocks,
        });
        debug!(block_size, "Capture attached");
        Ok(())
    }

    fn detach(&mut self) {
        if let Ok(mut guard) = self.sink.lock() {
            *guard = None;
        }
    }

    fn stop(&mut self) {
        self.detach();
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                debug!(error = %e, "Failed to pause microphone stream");
            }
            info!("Microphone released");
        }
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Voice {
    id: SourceId,
    start_frame: u64,
    samples: Vec<f32>,
    position: usize,
}

/// Sums scheduled voices into the output and advances the frame clock.
struct Mixer {
    frame: u64,
    voices: Vec<Voice>,
    ended: mpsc::UnboundedSender<SourceId>,
}

impl Mixer {
    fn new(ended: mpsc::UnboundedSender<SourceId>) -> Self {
        Self {
            frame: 0,
            voices: Vec::new(),
            ended,
        }
    }

    fn schedule(&mut self, id: SourceId, start_frame: u64, samples: Vec<f32>) {
        self.voices.push(Voice {
            id,
            start_frame,
            samples,
            position: 0,
        });
    }

    fn cancel(&mut self, id: SourceId) {
        self.voices.retain(|voice| voice.id != id);
    }

    fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let window_end = self.frame + out.len() as u64;
        for voice in &mut self.voices {
            if voice.start_frame >= window_end {
                continue;
            }
            // A voice scheduled in the past starts immediately.
            let offset = voice.start_frame.saturating_sub(self.frame) as usize;
            let remaining = &voice.samples[voice.position..];
            let span = remaining.len().min(out.len() - offset);
            for (slot, sample) in out[offset..offset + span].iter_mut().zip(remaining) {
                *slot += sample;
            }
            voice.position += span;
        }
        self.frame = window_end;

        let ended = &self.ended;
        self.voices.retain(|voice| {
            if voice.position < voice.samples.len() {
                return true;
            }
            let _ = ended.send(voice.id);
            false
        });
    }
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mixer: Arc<Mutex<Mixer>>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = (config.channels as usize).max(1);
    let mut scratch = Vec::new();
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len() / channels, 0.0);
                match mixer.lock() {
                    Ok(mut mixer) => mixer.render(&mut scratch),
                    Err(_) => scratch.fill(0.0),
                }
                for (frame, value) in data.chunks_mut(channels).zip(&scratch) {
                    frame.fill(T::from_sample(value.clamp(-1.0, 1.0)));
                }
            },
            |err| error!(error = %err, "Output stream error"),
            None,
        )
        .map_err(|e| build_error(e, "output"))
}

/// An open playback stream driven by a [`Mixer`].
pub struct CpalOutput {
    _stream: cpal::Stream,
    mixer: Arc<Mutex<Mixer>>,
    device_rate: u32,
}

impl OutputDevice for CpalOutput {
    fn current_time(&self) -> f64 {
        self.mixer
            .lock()
            .map(|mixer| mixer.frame as f64 / self.device_rate as f64)
            .unwrap_or(0.0)
    }

    fn start(&mut self, id: SourceId, buffer: AudioBuffer, at: f64) -> Result<(), AudioError> {
        let mono = downmix(&buffer.samples, buffer.channels as usize);
        let samples = resample_buffer(&mono, buffer.sample_rate, self.device_rate)
            .map_err(|e| AudioError::Stream(e.to_string()))?;
        let start_frame = (at.max(0.0) * self.device_rate as f64).round() as u64;
        self.mixer
            .lock()
            .map_err(|_| AudioError::Stream("mixer state poisoned".to_string()))?
            .schedule(id, start_frame, samples);
        Ok(())
    }

    fn stop(&mut self, id: SourceId) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.cancel(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cpal::SupportedBufferSize;

    fn range(
        channels: u16,
        min: u32,
        max: u32,
        format: SampleFormat,
    ) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            channels,
            SampleRate(min),
            SampleRate(max),
            SupportedBufferSize::Unknown,
            format,
        )
    }

    fn default_config() -> SupportedStreamConfig {
        SupportedStreamConfig::new(
            2,
            SampleRate(48000),
            SupportedBufferSize::Unknown,
            SampleFormat::F32,
        )
    }

    #[test]
    fn test_choose_config_prefers_native_rate_and_fewest_channels() {
        let ranges = vec![
            range(2, 8000, 48000, SampleFormat::F32),
            range(1, 8000, 48000, SampleFormat::I16),
            range(1, 8000, 48000, SampleFormat::U8),
        ];
        let chosen = choose_config(ranges, default_config(), 24000);
        assert_eq!(chosen.sample_rate(), SampleRate(24000));
        assert_eq!(chosen.channels(), 1);
        assert_eq!(chosen.sample_format(), SampleFormat::I16);
    }

    #[test]
    fn test_choose_config_falls_back_to_default() {
        let ranges = vec![range(2, 44100, 48000, SampleFormat::F32)];
        let chosen = choose_config(ranges, default_config(), 16000);
        assert_eq!(chosen.sample_rate(), SampleRate(48000));
        assert_eq!(chosen.channels(), 2);
    }

    #[test]
    fn test_downmix_averages_channels() {
        let mono = downmix(&[0.5f32, -0.5, 1.0, 0.0], 2);
        assert_eq!(mono, vec![0.0, 0.5]);

        let converted = downmix(&[i16::MIN, 0], 1);
        assert_relative_eq!(converted[0], -1.0);
        assert_relative_eq!(converted[1], 0.0);
    }

    #[test]
    fn test_mic_sink_frames_and_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut sink = MicSink {
            resampler: StreamResampler::new(16000, 16000).unwrap(),
            framer: BlockFramer::new(4),
            blocks: tx,
        };

        sink.push(&[0.1; 3]);
        assert!(rx.try_recv().is_err());

        sink.push(&[0.1; 9]);
        assert_eq!(rx.try_recv().unwrap().len(), 4);
        // The second full block did not fit in the queue.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_mixer_plays_voices_at_their_start_frame() {
        let (tx, mut ended) = mpsc::unbounded_channel();
        let mut mixer = Mixer::new(tx);
        mixer.schedule(1, 2, vec![1.0, 1.0]);
        mixer.schedule(2, 3, vec![0.5, 0.5, 0.5]);

        let mut out = [0.0f32; 4];
        mixer.render(&mut out);
        assert_eq!(out, [0.0, 0.0, 1.0, 1.5]);
        assert_eq!(mixer.frame, 4);
        assert!(ended.try_recv().is_err());

        mixer.render(&mut out);
        assert_eq!(out, [0.5, 0.5, 0.0, 0.0]);
        assert_eq!(ended.try_recv().unwrap(), 1);
        assert_eq!(ended.try_recv().unwrap(), 2);
        assert!(mixer.voices.is_empty());
    }

    #[test]
    fn test_mixer_late_voice_starts_immediately() {
        let (tx, _ended) = mpsc::unbounded_channel();
        let mut mixer = Mixer::new(tx);
        let mut out = [0.0f32; 4];
        mixer.render(&mut out);

        mixer.schedule(7, 1, vec![0.25]);
        mixer.render(&mut out);
        assert_eq!(out, [0.25, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_mixer_cancel_is_silent_and_unreported() {
        let (tx, mut ended) = mpsc::unbounded_channel();
        let mut mixer = Mixer::new(tx);
        mixer.schedule(3, 0, vec![1.0; 8]);
        mixer.cancel(3);
        mixer.cancel(99);

        let mut out = [0.0f32; 4];
        mixer.render(&mut out);
        assert_eq!(out, [0.0; 4]);
        assert!(ended.try_recv().is_err());
    }
}
