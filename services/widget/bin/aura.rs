//! Main Entrypoint for the Aura Voice Widget
//!
//! This binary is responsible for:
//! 1. Parsing command-line flags and loading configuration from the environment.
//! 2. Initializing logging.
//! 3. Opening the audio backend and the Gemini Live connector.
//! 4. Running the session manager until the visitor quits or presses Ctrl+C.

use anyhow::Context;
use aura_core::SessionManager;
use aura_widget::{
    config::Config,
    console,
    device::{CpalBackend, list_devices},
    navigator::LoggingNavigator,
};
use clap::Parser;
use gemini_live::GeminiConnector;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(version, about = "Talk to Aura, the voice assistant for The Magsman")]
struct Args {
    /// Name of the input device to capture from (default device otherwise).
    #[arg(long)]
    input_device: Option<String>,

    /// Name of the output device to play through (default device otherwise).
    #[arg(long)]
    output_device: Option<String>,

    /// Print the available audio devices and exit.
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if args.list_devices {
        for line in list_devices().context("Failed to enumerate audio devices")? {
            println!("{line}");
        }
        return Ok(());
    }

    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
    info!(
        model = %config.session.model,
        voice = %config.session.voice,
        "Configuration loaded. Initializing voice widget..."
    );

    // --- 3. Wire the session ---
    let connector = Arc::new(GeminiConnector::new(
        config.gemini_api_key.clone(),
        config.endpoint.clone(),
    ));
    let audio = CpalBackend::new(args.input_device, args.output_device);
    let manager = SessionManager::new(
        config.session.clone(),
        connector,
        Box::new(audio),
        Arc::new(LoggingNavigator::default()),
    );
    let (handle, commands) = manager.command_channel();

    // --- 4. Presentation ---
    tokio::spawn(console::render_loop(handle.ui()));
    tokio::spawn(console::shutdown_on_ctrl_c(handle.clone()));
    console::spawn_input_thread(handle, tokio::runtime::Handle::current())
        .context("Failed to start the input thread")?;

    manager.run(commands).await;
    info!("Goodbye.");
    Ok(())
}
