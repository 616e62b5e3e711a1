//! Terminal presentation: prints state changes and turns key presses into
//! widget commands.

use aura_core::{
    Command, SessionStatus, UiState, WidgetHandle,
    capture::VOICE_ACTIVITY_THRESHOLD,
    state::{Role, TranscriptEntry},
};
use std::io::BufRead;
use tokio::{runtime::Handle, sync::watch};
use tracing::{debug, warn};

pub const HELP: &str = "Press Enter to talk to Aura (again to hang up), s to stop, q to quit.";

/// Maps one line of terminal input to a command.
pub fn parse_input(line: &str) -> Result<Command, String> {
    match line.trim().to_lowercase().as_str() {
        "" | "t" | "talk" => Ok(Command::Toggle),
        "s" | "stop" => Ok(Command::Stop),
        "q" | "quit" | "exit" => Ok(Command::Shutdown),
        other => Err(format!("Unknown input '{other}'. {HELP}")),
    }
}

/// One-line summary of the widget state. Input volume is folded into a
/// listening indicator so the line only changes on meaningful updates.
pub fn render(state: &UiState) -> String {
    let mut line = match state.status {
        SessionStatus::Idle => "[idle] Ask Aura".to_string(),
        SessionStatus::Connecting => "[connecting] ...".to_string(),
        SessionStatus::Connected if state.speaking => "[speaking]".to_string(),
        SessionStatus::Connected if state.volume > VOICE_ACTIVITY_THRESHOLD => {
            "[hearing you]".to_string()
        }
        SessionStatus::Connected => "[listening]".to_string(),
        SessionStatus::Error => format!(
            "[error] {} (Enter to dismiss)",
            state.error.as_deref().unwrap_or("Connection failed")
        ),
    };
    if !state.user_transcript.is_empty() {
        line.push_str(&format!(" you: {}", state.user_transcript.trim()));
    }
    if !state.transcript.is_empty() {
        line.push_str(&format!(" aura: {}", state.transcript.trim()));
    }
    line
}

/// One committed utterance from the conversation log.
pub fn render_entry(entry: &TranscriptEntry) -> String {
    let speaker = match entry.role {
        Role::User => "you",
        Role::Assistant => "aura",
    };
    format!("  {} {speaker}: {}", entry.at.format("%H:%M:%S"), entry.text)
}

/// Entries committed after `last`. The log is bounded and drops from the
/// front, so entries are located by value rather than by index.
pub fn fresh_entries<'a>(
    log: &'a [TranscriptEntry],
    last: Option<&TranscriptEntry>,
) -> &'a [TranscriptEntry] {
    match last.and_then(|last| log.iter().rposition(|entry| entry == last)) {
        Some(position) => &log[position + 1..],
        None if last.is_some() && !log.is_empty() => &log[log.len() - 1..],
        None => log,
    }
}

/// Prints a line whenever the rendered state changes, and every utterance
/// as it is committed to the log.
pub async fn render_loop(mut ui: watch::Receiver<UiState>) {
    let mut last = String::new();
    let mut last_entry: Option<TranscriptEntry> = None;
    println!("{HELP}");
    loop {
        let (line, committed) = {
            let state = ui.borrow_and_update();
            let committed = fresh_entries(&state.log, last_entry.as_ref()).to_vec();
            (render(&state), committed)
        };
        for entry in &committed {
            println!("{}", render_entry(entry));
        }
        if let Some(entry) = committed.last() {
            last_entry = Some(entry.clone());
        }
        if line != last {
            println!("{line}");
            last = line;
        }
        if ui.changed().await.is_err() {
            break;
        }
    }
}

/// Reads commands from stdin on a dedicated thread. Blocking reads would
/// otherwise hold the runtime open at shutdown.
pub fn spawn_input_thread(handle: WidgetHandle, runtime: Handle) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("aura-input".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                let command = match parse_input(&line) {
                    Ok(command) => command,
                    Err(message) => {
                        println!("{message}");
                        continue;
                    }
                };
                let sent = runtime.block_on(async {
                    match command {
                        Command::Toggle => handle.toggle().await,
                        Command::Stop => handle.stop().await,
                        Command::Shutdown => handle.shutdown().await,
                    }
                });
                if let Err(e) = sent {
                    debug!(error = %e, "Widget is gone, closing input");
                    break;
                }
                if command == Command::Shutdown {
                    break;
                }
            }
        })
        .map(|_| ())
}

/// Shuts the widget down on Ctrl+C.
pub async fn shutdown_on_ctrl_c(handle: WidgetHandle) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            println!();
            let _ = handle.shutdown().await;
        }
        Err(e) => warn!(error = %e, "Failed to install Ctrl+C handler"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_parse_input() {
        assert_eq!(parse_input(""), Ok(Command::Toggle));
        assert_eq!(parse_input("  T "), Ok(Command::Toggle));
        assert_eq!(parse_input("stop"), Ok(Command::Stop));
        assert_eq!(parse_input("q"), Ok(Command::Shutdown));
        assert!(parse_input("dance").unwrap_err().contains("dance"));
    }

    #[test]
    fn test_render_status_lines() {
        let mut state = UiState::default();
        assert_eq!(render(&state), "[idle] Ask Aura");

        state.status = SessionStatus::Connected;
        assert_eq!(render(&state), "[listening]");

        state.volume = 0.2;
        assert_eq!(render(&state), "[hearing you]");

        state.speaking = true;
        state.transcript = "Hello there ".to_string();
        assert_eq!(render(&state), "[speaking] aura: Hello there");

        state.status = SessionStatus::Error;
        state.error = Some("Connection lost".to_string());
        state.transcript.clear();
        assert_eq!(render(&state), "[error] Connection lost (Enter to dismiss)");
    }

    fn entry(role: Role, text: &str, second: u32) -> TranscriptEntry {
        TranscriptEntry {
            role,
            text: text.to_string(),
            at: Utc.with_ymd_and_hms(2025, 3, 1, 14, 2, second).unwrap(),
        }
    }

    #[test]
    fn test_render_entry() {
        assert_eq!(
            render_entry(&entry(Role::User, "take me home", 5)),
            "  14:02:05 you: take me home"
        );
        assert_eq!(
            render_entry(&entry(Role::Assistant, "Here you are.", 6)),
            "  14:02:06 aura: Here you are."
        );
    }

    #[test]
    fn test_fresh_entries_follow_the_last_printed() {
        let log = vec![
            entry(Role::User, "hi", 1),
            entry(Role::Assistant, "hello", 2),
            entry(Role::User, "contact", 3),
        ];
        assert_eq!(fresh_entries(&log, None).len(), 3);
        assert_eq!(fresh_entries(&log, Some(&log[1])), &log[2..]);
        assert!(fresh_entries(&log, Some(&log[2])).is_empty());

        // The last printed entry was trimmed away: only show the newest.
        let gone = entry(Role::User, "old", 0);
        assert_eq!(fresh_entries(&log, Some(&gone)), &log[2..]);
        assert!(fresh_entries(&[], Some(&gone)).is_empty());
    }

    #[test]
    fn test_render_includes_user_transcript() {
        let state = UiState {
            status: SessionStatus::Connected,
            user_transcript: "take me to contact".to_string(),
            ..Default::default()
        };
        assert_eq!(render(&state), "[listening] you: take me to contact");
    }
}
