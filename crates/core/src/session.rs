//! Session lifecycle for the voice widget.
//!
//! A [`SessionManager`] owns at most one [`Session`] at a time and drives the
//! `Idle -> Connecting -> Connected -> {Idle, Error}` state machine. All work
//! happens on the task running [`SessionManager::run`]: capture blocks,
//! transport events, playback completions and timers are handled one at a
//! time, in arrival order.
//!
//! Anything that completes asynchronously (the connect handshake, delayed
//! tool responses, the transcript-clear timer) is tagged with the epoch of
//! the session that started it. Completions for a session that has since
//! been torn down are dropped.

use crate::{
    audio::{AudioBackend, Microphone, SourceId},
    capture::CapturePipeline,
    codec::{INPUT_SAMPLE_RATE, OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE, decode_base64},
    live::{LinkEvent, LiveConnector, LiveLink},
    playback::PlaybackPipeline,
    protocol::{
        ClientMessage, FunctionCall, FunctionResponse, RealtimeInput, ServerContent,
        ServerMessage, ToolResponse,
    },
    settings::SessionSettings,
    state::{SessionStatus, UiState},
    tools::{Navigator, ToolBridge},
};
use anyhow::anyhow;
use std::{future::pending, sync::Arc, time::Duration};
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        watch,
    },
    task::{JoinHandle, JoinSet},
};
use tracing::{debug, error, info, warn};

/// Capture blocks buffered between the audio thread and the session task.
const CAPTURE_QUEUE: usize = 32;

/// Requests from the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Start when idle, tear down otherwise.
    Toggle,
    Stop,
    Shutdown,
}

/// Cloneable access to a running [`SessionManager`].
#[derive(Debug, Clone)]
pub struct WidgetHandle {
    commands: mpsc::Sender<Command>,
    ui: watch::Receiver<UiState>,
}

impl WidgetHandle {
    pub async fn toggle(&self) -> anyhow::Result<()> {
        self.send(Command::Toggle).await
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.send(Command::Stop).await
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.send(Command::Shutdown).await
    }

    pub fn ui(&self) -> watch::Receiver<UiState> {
        self.ui.clone()
    }

    async fn send(&self, command: Command) -> anyhow::Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow!("Voice widget has shut down"))
    }
}

/// Completions of work spawned off the session task.
#[derive(Debug)]
enum Internal {
    Opened {
        epoch: u64,
        result: anyhow::Result<LiveLink>,
    },
    ToolResponse {
        epoch: u64,
        response: FunctionResponse,
    },
    ClearTranscript {
        epoch: u64,
        turn: u64,
    },
}

#[derive(Debug)]
enum Event {
    Internal(Internal),
    Link(LinkEvent),
    Block(Vec<f32>),
    SourceEnded(SourceId),
}

/// Every resource belonging to one conversation. Dropping it releases them.
struct Session {
    epoch: u64,
    connecting: Option<JoinHandle<()>>,
    link: Option<LiveLink>,
    microphone: Box<dyn Microphone>,
    blocks: Option<mpsc::Receiver<Vec<f32>>>,
    playback: PlaybackPipeline,
    ended: mpsc::UnboundedReceiver<SourceId>,
    /// Tool responses waiting for room in the outbound queue.
    responders: JoinSet<()>,
    /// Completed turns so far.
    turns: u64,
    /// Set at turn completion until the next transcription fragment arrives.
    turn_closed: bool,
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(task) = self.connecting.take() {
            task.abort();
        }
        if let Some(link) = self.link.take() {
            link.close();
        }
        self.microphone.detach();
        self.microphone.stop();
        self.blocks = None;
        self.playback.interrupt();
        debug!(epoch = self.epoch, "Session released");
    }
}

pub struct SessionManager {
    settings: SessionSettings,
    connector: Arc<dyn LiveConnector>,
    audio: Box<dyn AudioBackend>,
    tools: ToolBridge,
    capture: CapturePipeline,
    session: Option<Session>,
    epoch: u64,
    ui: watch::Sender<UiState>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
}

impl SessionManager {
    pub fn new(
        settings: SessionSettings,
        connector: Arc<dyn LiveConnector>,
        audio: Box<dyn AudioBackend>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (ui, _) = watch::channel(UiState::default());
        Self {
            tools: ToolBridge::new(navigator, settings.tool_response_delay),
            capture: CapturePipeline::new(INPUT_SAMPLE_RATE, settings.vad_threshold),
            settings,
            connector,
            audio,
            session: None,
            epoch: 0,
            ui,
            internal_tx,
            internal_rx,
        }
    }

    /// Creates the handle/receiver pair used to drive [`Self::run`].
    pub fn command_channel(&self) -> (WidgetHandle, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel(16);
        let handle = WidgetHandle {
            commands: tx,
            ui: self.ui.subscribe(),
        };
        (handle, rx)
    }

    pub fn subscribe(&self) -> watch::Receiver<UiState> {
        self.ui.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        self.ui.borrow().status
    }

    /// Processes commands and session events until shut down.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!("Voice widget ready");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Toggle) => self.start(),
                    Some(Command::Stop) => self.stop(),
                    Some(Command::Shutdown) | None => break,
                },
                event = self.next_event() => self.dispatch(event),
            }
        }
        self.teardown();
        info!("Voice widget stopped");
    }

    /// Opens a new session when idle. From any other state this acts as the
    /// stop button and only tears down; the next start connects again.
    pub fn start(&mut self) {
        if self.status() != SessionStatus::Idle {
            info!(status = ?self.status(), "Stop requested");
            self.teardown();
            return;
        }
        self.session = None;
        self.epoch += 1;
        let epoch = self.epoch;
        self.ui.send_modify(|ui| {
            ui.status = SessionStatus::Connecting;
            ui.error = None;
        });
        info!(epoch, model = %self.settings.model, "Starting voice session");

        let (ended_tx, ended) = mpsc::unbounded_channel();
        let output = match self
            .audio
            .open_output(OUTPUT_SAMPLE_RATE, OUTPUT_CHANNELS, ended_tx)
        {
            Ok(output) => output,
            Err(e) => {
                error!(error = %e, "Failed to open audio output");
                self.fail(format!("Audio output unavailable: {e}"));
                return;
            }
        };
        let microphone = match self.audio.open_microphone(INPUT_SAMPLE_RATE) {
            Ok(microphone) => microphone,
            Err(e) => {
                error!(error = %e, "Failed to open microphone");
                self.fail(format!("Microphone unavailable: {e}"));
                return;
            }
        };

        let connector = self.connector.clone();
        let setup = self.settings.setup();
        let tx = self.internal_tx.clone();
        let connecting = tokio::spawn(async move {
            let result = connector.connect(setup).await;
            let _ = tx.send(Internal::Opened { epoch, result });
        });

        self.session = Some(Session {
            epoch,
            connecting: Some(connecting),
            link: None,
            microphone,
            blocks: None,
            playback: PlaybackPipeline::new(output, OUTPUT_SAMPLE_RATE, OUTPUT_CHANNELS),
            ended,
            responders: JoinSet::new(),
            turns: 0,
            turn_closed: false,
        });
    }

    pub fn stop(&mut self) {
        self.teardown();
    }

    /// Releases every session resource and resets the UI to `Idle`. Safe to
    /// call from any state, any number of times.
    pub fn teardown(&mut self) {
        if self.session.take().is_some() {
            info!("Voice session torn down");
        }
        self.ui.send_modify(|ui| {
            ui.reset();
            ui.status = SessionStatus::Idle;
            ui.error = None;
        });
    }

    /// Releases the session and parks the widget in `Error`.
    fn fail(&mut self, reason: String) {
        self.session = None;
        self.ui.send_modify(|ui| {
            ui.reset();
            ui.status = SessionStatus::Error;
            ui.error = Some(reason);
        });
    }

    fn current_mut(&mut self, epoch: u64) -> Option<&mut Session> {
        self.session.as_mut().filter(|s| s.epoch == epoch)
    }

    async fn next_event(&mut self) -> Event {
        let Some(session) = self.session.as_mut() else {
            return match self.internal_rx.recv().await {
                Some(internal) => Event::Internal(internal),
                None => pending().await,
            };
        };
        tokio::select! {
            Some(internal) = self.internal_rx.recv() => Event::Internal(internal),
            event = recv_link(session.link.as_mut()) => Event::Link(event),
            Some(block) = recv_block(session.blocks.as_mut()) => Event::Block(block),
            Some(id) = session.ended.recv() => Event::SourceEnded(id),
            else => pending().await,
        }
    }

    fn dispatch(&mut self, event: Event) {
        match event {
            Event::Internal(Internal::Opened { epoch, result }) => self.on_opened(epoch, result),
            Event::Internal(Internal::ToolResponse { epoch, response }) => {
                self.on_tool_response(epoch, response)
            }
            Event::Internal(Internal::ClearTranscript { epoch, turn }) => {
                self.on_clear_transcript(epoch, turn)
            }
            Event::Link(event) => self.on_link_event(event),
            Event::Block(block) => self.on_block(&block),
            Event::SourceEnded(id) => self.on_source_ended(id),
        }
    }

    fn on_opened(&mut self, epoch: u64, result: anyhow::Result<LiveLink>) {
        let block_size = self.settings.block_size;
        let Some(session) = self
            .session
            .as_mut()
            .filter(|s| s.epoch == epoch && s.link.is_none())
        else {
            if let Ok(link) = result {
                debug!(epoch, "Closing session that opened after teardown");
                link.close();
            }
            return;
        };
        session.connecting = None;

        let link = match result {
            Ok(link) => link,
            Err(e) => {
                error!(error = ?e, "Failed to open live session");
                self.fail(format!("Connection failed: {e}"));
                return;
            }
        };

        let (blocks_tx, blocks_rx) = mpsc::channel(CAPTURE_QUEUE);
        if let Err(e) = session.microphone.attach(block_size, blocks_tx) {
            error!(error = %e, "Failed to attach capture processing");
            link.close();
            self.fail(format!("Microphone unavailable: {e}"));
            return;
        }
        session.blocks = Some(blocks_rx);
        session.link = Some(link);
        self.ui.send_modify(|ui| ui.status = SessionStatus::Connected);
        info!(epoch, "Voice session connected");
    }

    fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Message(msg) => self.on_server_message(msg),
            LinkEvent::Error(reason) => {
                error!(%reason, "Live session failed");
                self.fail(format!("Connection error: {reason}"));
            }
            LinkEvent::Closed(reason) => {
                info!(?reason, "Live session closed");
                self.teardown();
            }
        }
    }

    fn on_server_message(&mut self, msg: ServerMessage) {
        if msg.setup_complete.is_some() {
            debug!("Ignoring repeated setup acknowledgement");
        }
        if let Some(go_away) = &msg.go_away {
            warn!(time_left = ?go_away.time_left, "Server will close the session soon");
        }
        if let Some(tool_call) = msg.tool_call {
            for call in tool_call.function_calls {
                self.on_function_call(call);
            }
        }
        if let Some(content) = msg.server_content {
            self.on_server_content(content);
        }
    }

    fn on_function_call(&mut self, call: FunctionCall) {
        let epoch = self.epoch;
        let dispatch = self.tools.handle(&call);
        if let Some(notice) = dispatch.notice {
            if let Some(session) = self.current_mut(epoch) {
                session.turn_closed = false;
            }
            self.ui.send_modify(|ui| ui.transcript = notice);
        }
        if dispatch.delay.is_zero() {
            self.on_tool_response(epoch, dispatch.response);
            return;
        }
        let tx = self.internal_tx.clone();
        let (delay, response) = (dispatch.delay, dispatch.response);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Internal::ToolResponse { epoch, response });
        });
    }

    fn on_tool_response(&mut self, epoch: u64, response: FunctionResponse) {
        let Some(session) = self.current_mut(epoch) else {
            debug!(id = %response.id, "Dropping tool response for a closed session");
            return;
        };
        let Some(link) = session.link.as_ref() else {
            debug!(id = %response.id, "Dropping tool response for a closed session");
            return;
        };
        let id = response.id.clone();
        let msg = ClientMessage::ToolResponse(ToolResponse {
            function_responses: vec![response],
        });
        match link.try_send(msg) {
            Ok(()) => debug!(%id, "Tool response queued"),
            Err(TrySendError::Full(frame)) => {
                // Every call is answered exactly once: wait for the writer
                // instead of dropping like capture does.
                debug!(%id, "Outbound queue full, tool response waiting for room");
                let outbound = link.sender();
                while session.responders.try_join_next().is_some() {}
                session.responders.spawn(async move {
                    match outbound.send(frame).await {
                        Ok(()) => debug!(%id, "Tool response queued"),
                        Err(_) => warn!(%id, "Session closed before tool response was sent"),
                    }
                });
            }
            Err(TrySendError::Closed(_)) => {
                error!(%id, "Transport closed before tool response was queued")
            }
        }
    }

    fn on_server_content(&mut self, content: ServerContent) {
        let epoch = self.epoch;
        let Some(session) = self.session.as_mut().filter(|s| s.epoch == epoch) else {
            return;
        };

        if let Some(transcription) = &content.output_transcription {
            let fresh = std::mem::take(&mut session.turn_closed);
            self.ui.send_modify(|ui| {
                if fresh {
                    ui.transcript.clear();
                }
                ui.transcript.push_str(&transcription.text);
            });
        }
        if let Some(transcription) = &content.input_transcription {
            self.ui
                .send_modify(|ui| ui.user_transcript.push_str(&transcription.text));
        }

        for payload in content.audio_payloads() {
            let pcm = match decode_base64(payload) {
                Ok(pcm) => pcm,
                Err(e) => {
                    warn!(error = %e, "Discarding undecodable audio chunk");
                    continue;
                }
            };
            if session.playback.enqueue(&pcm).is_some() {
                self.ui.send_if_modified(|ui| !std::mem::replace(&mut ui.speaking, true));
            }
        }

        if content.interrupted {
            debug!(active = session.playback.active_len(), "Assistant interrupted");
            session.playback.interrupt();
            self.ui.send_modify(|ui| ui.speaking = false);
        }

        if content.turn_complete {
            session.turns += 1;
            session.turn_closed = true;
            let turn = session.turns;
            self.ui.send_modify(UiState::commit_turn);
            self.schedule_transcript_clear(epoch, turn);
        }
    }

    fn schedule_transcript_clear(&self, epoch: u64, turn: u64) {
        let tx = self.internal_tx.clone();
        let delay: Duration = self.settings.transcript_clear_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Internal::ClearTranscript { epoch, turn });
        });
    }

    fn on_clear_transcript(&mut self, epoch: u64, turn: u64) {
        let Some(session) = self.current_mut(epoch) else {
            return;
        };
        // A later turn or a new utterance supersedes this timer.
        if session.turns != turn || !session.turn_closed {
            return;
        }
        self.ui.send_if_modified(|ui| {
            if ui.speaking || ui.transcript.is_empty() {
                return false;
            }
            ui.transcript.clear();
            true
        });
    }

    fn on_block(&mut self, block: &[f32]) {
        let frame = self.capture.process(block);
        self.ui
            .send_modify(|ui| ui.volume = frame.volume.clamp(0.0, 1.0));

        let Some(chunk) = frame.chunk else {
            return;
        };
        let Some(link) = self.session.as_ref().and_then(|s| s.link.as_ref()) else {
            return;
        };
        let msg = ClientMessage::RealtimeInput(RealtimeInput {
            audio: chunk.to_blob(),
        });
        // Capture is best-effort: a frame that cannot be queued is dropped.
        if let Err(e) = link.try_send(msg) {
            warn!(error = %e, "Dropped capture frame");
        }
    }

    fn on_source_ended(&mut self, id: SourceId) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.playback.source_ended(id) {
            self.ui.send_modify(|ui| ui.speaking = false);
        }
    }
}

async fn recv_link(link: Option<&mut LiveLink>) -> LinkEvent {
    match link {
        Some(link) => link.recv().await,
        None => pending().await,
    }
}

async fn recv_block(blocks: Option<&mut mpsc::Receiver<Vec<f32>>>) -> Option<Vec<f32>> {
    match blocks {
        Some(blocks) => blocks.recv().await,
        None => pending().await,
    }
}
