//! In-memory stand-ins for devices and the remote session.

use crate::{
    audio::{AudioBackend, Microphone, OutputDevice, SourceId},
    codec::AudioBuffer,
    error::AudioError,
    live::{LinkEvent, LiveConnector, LiveLink, Outbound},
    protocol::{ServerMessage, Setup},
    tools::{Navigator, Page},
};
use async_trait::async_trait;
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};
use tokio::sync::mpsc;

#[derive(Default)]
struct OutputState {
    time: f64,
    started: Vec<(SourceId, f64, f64)>,
    stopped: Vec<SourceId>,
    fail_next: bool,
}

#[derive(Clone, Default)]
pub struct FakeOutput {
    inner: Arc<Mutex<OutputState>>,
}

impl FakeOutput {
    pub fn set_time(&self, time: f64) {
        self.inner.lock().unwrap().time = time;
    }

    /// `(id, start, duration)` of every started source.
    pub fn started(&self) -> Vec<(SourceId, f64, f64)> {
        self.inner.lock().unwrap().started.clone()
    }

    pub fn stopped(&self) -> Vec<SourceId> {
        self.inner.lock().unwrap().stopped.clone()
    }

    pub fn fail_next_start(&self) {
        self.inner.lock().unwrap().fail_next = true;
    }
}

impl OutputDevice for FakeOutput {
    fn current_time(&self) -> f64 {
        self.inner.lock().unwrap().time
    }

    fn start(&mut self, id: SourceId, buffer: AudioBuffer, at: f64) -> Result<(), AudioError> {
        let mut state = self.inner.lock().unwrap();
        if std::mem::take(&mut state.fail_next) {
            return Err(AudioError::Stream("device lost".into()));
        }
        state.started.push((id, at, buffer.duration()));
        Ok(())
    }

    fn stop(&mut self, id: SourceId) {
        self.inner.lock().unwrap().stopped.push(id);
    }
}

#[derive(Default)]
struct MicState {
    sink: Option<mpsc::Sender<Vec<f32>>>,
    block_size: usize,
    stopped: bool,
}

#[derive(Clone, Default)]
pub struct FakeMicrophone {
    inner: Arc<Mutex<MicState>>,
}

impl FakeMicrophone {
    /// Delivers one block as the audio thread would. Returns whether it was
    /// accepted.
    pub fn deliver(&self, block: Vec<f32>) -> bool {
        let state = self.inner.lock().unwrap();
        state
            .sink
            .as_ref()
            .is_some_and(|sink| sink.try_send(block).is_ok())
    }

    pub fn is_attached(&self) -> bool {
        self.inner.lock().unwrap().sink.is_some()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.lock().unwrap().stopped
    }

    pub fn block_size(&self) -> usize {
        self.inner.lock().unwrap().block_size
    }
}

impl Microphone for FakeMicrophone {
    fn attach(
        &mut self,
        block_size: usize,
        blocks: mpsc::Sender<Vec<f32>>,
    ) -> Result<(), AudioError> {
        let mut state = self.inner.lock().unwrap();
        state.block_size = block_size;
        state.sink = Some(blocks);
        Ok(())
    }

    fn detach(&mut self) {
        self.inner.lock().unwrap().sink = None;
    }

    fn stop(&mut self) {
        self.inner.lock().unwrap().stopped = true;
    }
}

#[derive(Clone, Default)]
pub struct FakeAudio {
    pub output: FakeOutput,
    pub microphone: FakeMicrophone,
    ended: Arc<Mutex<Option<mpsc::UnboundedSender<SourceId>>>>,
    deny_microphone: Arc<Mutex<bool>>,
}

impl FakeAudio {
    pub fn deny_microphone(&self, deny: bool) {
        *self.deny_microphone.lock().unwrap() = deny;
    }

    /// Reports a source as having played to completion.
    pub fn end_source(&self, id: SourceId) {
        if let Some(ended) = self.ended.lock().unwrap().as_ref() {
            let _ = ended.send(id);
        }
    }
}

impl AudioBackend for FakeAudio {
    fn open_microphone(&mut self, _sample_rate: u32) -> Result<Box<dyn Microphone>, AudioError> {
        if *self.deny_microphone.lock().unwrap() {
            return Err(AudioError::PermissionDenied("user dismissed the prompt".into()));
        }
        self.microphone.inner.lock().unwrap().stopped = false;
        Ok(Box::new(self.microphone.clone()))
    }

    fn open_output(
        &mut self,
        _sample_rate: u32,
        _channels: u16,
        ended: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Box<dyn OutputDevice>, AudioError> {
        *self.ended.lock().unwrap() = Some(ended);
        Ok(Box::new(self.output.clone()))
    }
}

/// The far side of a [`LiveLink`].
pub struct RemoteEnd {
    pub outbound: mpsc::Receiver<Outbound>,
    pub inbound: mpsc::Sender<LinkEvent>,
}

impl RemoteEnd {
    pub async fn push(&self, json: serde_json::Value) {
        let msg: ServerMessage = serde_json::from_value(json).unwrap();
        self.inbound.send(LinkEvent::Message(msg)).await.unwrap();
    }

    pub async fn fail(&self, reason: &str) {
        self.inbound
            .send(LinkEvent::Error(reason.to_string()))
            .await
            .unwrap();
    }

    /// Everything the widget has queued so far.
    pub fn sent(&mut self) -> Vec<Outbound> {
        let mut sent = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            sent.push(frame);
        }
        sent
    }
}

pub fn link_pair(capacity: usize) -> (LiveLink, RemoteEnd) {
    let (out_tx, out_rx) = mpsc::channel(capacity);
    let (in_tx, in_rx) = mpsc::channel(capacity.max(8));
    (
        LiveLink::new(out_tx, in_rx),
        RemoteEnd {
            outbound: out_rx,
            inbound: in_tx,
        },
    )
}

/// Hands out queued links; with an empty queue `connect` never resolves.
#[derive(Default)]
pub struct FakeConnector {
    links: Mutex<VecDeque<anyhow::Result<LiveLink>>>,
    setups: Mutex<Vec<Setup>>,
}

impl FakeConnector {
    pub fn push(&self, link: anyhow::Result<LiveLink>) {
        self.links.lock().unwrap().push_back(link);
    }

    pub fn connects(&self) -> usize {
        self.setups.lock().unwrap().len()
    }
}

#[async_trait]
impl LiveConnector for FakeConnector {
    async fn connect(&self, setup: Setup) -> anyhow::Result<LiveLink> {
        self.setups.lock().unwrap().push(setup);
        let next = self.links.lock().unwrap().pop_front();
        match next {
            Some(link) => link,
            None => std::future::pending().await,
        }
    }
}

#[derive(Default)]
pub struct RecordingNavigator {
    pages: Mutex<Vec<Page>>,
}

impl RecordingNavigator {
    pub fn pages(&self) -> Vec<Page> {
        self.pages.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, page: Page) -> anyhow::Result<()> {
        self.pages.lock().unwrap().push(page);
        Ok(())
    }
}
