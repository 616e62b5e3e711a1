//! Session defaults and the setup frame sent when a session opens.

use crate::{
    capture::{DEFAULT_BLOCK_SIZE, VOICE_ACTIVITY_THRESHOLD},
    protocol::{
        AudioTranscriptionConfig, Content, GenerationConfig, Part, PrebuiltVoiceConfig,
        ResponseModality, Setup, SpeechConfig, Tool, VoiceConfig,
    },
    tools::navigate_declaration,
};
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";
pub const DEFAULT_VOICE: &str = "Zephyr";
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are Aura, the voice assistant for The Magsman, \
a digital agency. Your tone is elegant, professional and warm. Help visitors find their way \
around the site and answer questions about SEO, marketing, video and design. When a visitor \
asks to go somewhere, call navigateToPage. Keep answers short and conversational.";

/// Per-session behaviour of the widget.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    /// Also request transcription of the visitor's speech.
    pub transcribe_input: bool,
    /// Grace period between turn completion and clearing the bubble.
    pub transcript_clear_delay: Duration,
    /// Delay before a successful navigation is reported back.
    pub tool_response_delay: Duration,
    pub vad_threshold: f32,
    pub block_size: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            transcribe_input: false,
            transcript_clear_delay: Duration::from_secs(4),
            tool_response_delay: Duration::from_millis(500),
            vad_threshold: VOICE_ACTIVITY_THRESHOLD,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl SessionSettings {
    /// Builds the setup frame sent when a session opens.
    pub fn setup(&self) -> Setup {
        Setup {
            model: self.model.clone(),
            generation_config: GenerationConfig {
                response_modalities: vec![ResponseModality::Audio],
                speech_config: Some(SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: self.voice.clone(),
                        },
                    },
                }),
            },
            system_instruction: Content {
                parts: vec![Part {
                    text: self.system_instruction.clone(),
                }],
            },
            tools: vec![Tool {
                function_declarations: vec![navigate_declaration()],
            }],
            output_audio_transcription: Some(AudioTranscriptionConfig::default()),
            input_audio_transcription: self
                .transcribe_input
                .then(AudioTranscriptionConfig::default),
        }
    }
}
