//! Aura Voice Widget Library Crate
//!
//! Host-side pieces of the voice assistant: configuration, cpal audio
//! devices, the page navigator and the terminal presentation. The `aura`
//! binary wires them into an [`aura_core::SessionManager`].

pub mod config;
pub mod console;
pub mod device;
pub mod navigator;
pub mod resample;
