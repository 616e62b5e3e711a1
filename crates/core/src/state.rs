//! State published to the presentation layer.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Connection status shown by the widget.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    Error,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A finished utterance kept in the conversation log.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Maximum number of entries kept in [`UiState::log`].
pub const LOG_CAPACITY: usize = 50;

/// Snapshot observed by the presentation layer. Read-only from its side.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct UiState {
    pub status: SessionStatus,
    /// Instantaneous input level in [0, 1].
    pub volume: f32,
    pub speaking: bool,
    /// Text of the assistant's current utterance.
    pub transcript: String,
    /// Text of the visitor's current utterance, when input transcription is on.
    pub user_transcript: String,
    pub error: Option<String>,
    pub log: Vec<TranscriptEntry>,
}

impl UiState {
    /// Clears the per-session fields, keeping the log.
    pub fn reset(&mut self) {
        self.volume = 0.0;
        self.speaking = false;
        self.transcript.clear();
        self.user_transcript.clear();
    }

    /// Moves the pending utterances into the log.
    pub fn commit_turn(&mut self) {
        let now = Utc::now();
        let pending = [
            (Role::User, self.user_transcript.trim().to_string()),
            (Role::Assistant, self.transcript.trim().to_string()),
        ];
        for (role, text) in pending {
            if !text.is_empty() {
                self.log.push(TranscriptEntry { role, text, at: now });
            }
        }
        self.user_transcript.clear();
        if self.log.len() > LOG_CAPACITY {
            let excess = self.log.len() - LOG_CAPACITY;
            self.log.drain(..excess);
        }
    }
}
