//! Aura voice widget core.
//!
//! Everything between the microphone, the speaker and the remote speech
//! session lives here: the PCM codec, capture framing and voice gating,
//! gapless playback scheduling, the navigation tool bridge and the session
//! lifecycle that ties them together. Devices and the network transport are
//! reached through the traits in [`audio`] and [`live`], implemented by the
//! widget service and the `gemini-live` crate.

pub mod audio;
pub mod capture;
pub mod codec;
pub mod error;
pub mod live;
pub mod playback;
pub mod protocol;
pub mod session;
pub mod settings;
pub mod state;
pub mod tools;

#[cfg(test)]
mod testing;

pub use session::{Command, SessionManager, WidgetHandle};
pub use settings::SessionSettings;
pub use state::{SessionStatus, UiState};
