use crate::control::PlayerEvent;
use crate::error::{ControlError, ErrorSeverity, PlayerError};
use crate::logging::{ControlEvent, EventStatistics};
use crate::models::{PlaybackState, PlayerStatus};
use std::time::Duration;

/// Status display formatter for the CLI
pub struct StatusDisplay;

impl StatusDisplay {
    /// Display the full controller snapshot
    pub fn display_full_status(status: &PlayerStatus) {
        println!("┌─ Player Status ─────────────────────────────────────────┐");

        match &status.source {
            Some(source) => println!("│ Source: {}", Self::truncate(&source.uri, 49)),
            None => println!("│ No source loaded"),
        }
        println!("│ State: {}", status.state.as_str());

        if status.state.is_seekable() {
            Self::display_position_info(status);
        }

        println!("│");
        println!("│ Rate: {}", status.rate);
        println!("│ Volume: {}%", (status.volume * 100.0).round() as u8);
        println!("│ Looping: {}", if status.looping { "on" } else { "off" });

        if let Some((kind, code)) = status.last_error {
            println!("│");
            println!("│ Last error: {} (code {})", kind, code);
            if status.state == PlaybackState::Error {
                println!("│ Use 'reset' to recover");
            }
        }
        println!("└─────────────────────────────────────────────────────────┘");
    }

    fn display_position_info(status: &PlayerStatus) {
        let position = Self::format_ms(status.position_ms);
        match status.duration_ms {
            Some(duration_ms) => {
                println!("│ Position: {} / {}", position, Self::format_ms(duration_ms));
                println!(
                    "│ Progress: [{}] {:.1}%",
                    Self::progress_bar(status.progress(), 40),
                    status.progress() * 100.0
                );
            }
            None => println!("│ Position: {}", position),
        }
    }

    /// One-line status
    pub fn format_compact_status(status: &PlayerStatus) -> String {
        let duration = status
            .duration_ms
            .map(Self::format_ms)
            .unwrap_or_else(|| "--:--".to_string());
        format!(
            "{} | {}/{} | {} | vol {}%{}",
            status.state.as_str(),
            Self::format_ms(status.position_ms),
            duration,
            status.rate,
            (status.volume * 100.0).round() as u8,
            if status.looping { " | loop" } else { "" }
        )
    }

    /// Render an observer event as a single line, or None for events too
    /// frequent to print
    pub fn format_event(event: &PlayerEvent) -> Option<String> {
        match event {
            PlayerEvent::StateChanged { previous, current } => {
                Some(format!("[state] {} -> {}", previous, current))
            }
            PlayerEvent::SeekDone { position_ms } => {
                Some(format!("[seek] settled at {}", Self::format_ms(*position_ms)))
            }
            PlayerEvent::EndOfStream { looping: true } => {
                Some("[eos] end of stream, looping".to_string())
            }
            PlayerEvent::EndOfStream { looping: false } => Some("[eos] end of stream".to_string()),
            PlayerEvent::Error { kind, code } => Some(format!("[error] {} (code {})", kind, code)),
            PlayerEvent::RateChanged { rate } => Some(format!("[rate] {}", rate)),
            PlayerEvent::VolumeChanged { volume } => {
                Some(format!("[volume] {}%", (volume * 100.0).round() as u8))
            }
            PlayerEvent::PositionUpdated { .. } => None,
        }
    }

    /// Display recent control events, oldest first
    pub fn display_events(events: &[ControlEvent], statistics: &EventStatistics) {
        println!("┌─ Control Events ────────────────────────────────────────┐");
        if events.is_empty() {
            println!("│ No events recorded");
        }
        for event in events {
            let elapsed = event
                .duration
                .map(|d| format!(" ({:.1} ms)", d.as_secs_f64() * 1000.0))
                .unwrap_or_default();
            println!(
                "│ {} {:<16} {}{}",
                event.timestamp.format("%H:%M:%S%.3f"),
                event.event_type.as_str(),
                Self::truncate(&event.details, 40),
                elapsed
            );
        }
        println!("│");
        println!(
            "│ Total: {} | Issued: {} | Canceled: {} | Timeouts: {}",
            statistics.total_events,
            statistics.commands_issued,
            statistics.cancellations,
            statistics.timeouts
        );
        println!(
            "│ Coalesced seeks: {} | Stale callbacks: {} | Engine errors: {}",
            statistics.coalesced_seeks, statistics.stale_callbacks, statistics.engine_errors
        );
        println!("└─────────────────────────────────────────────────────────┘");
    }

    /// Display error message with formatting and a hint where one helps
    pub fn display_error(error: &PlayerError) {
        let severity = error.severity();
        let severity_icon = match severity {
            ErrorSeverity::Info => "ℹ",
            ErrorSeverity::Warning => "⚠",
            ErrorSeverity::Error => "✗",
            ErrorSeverity::Critical => "🔥",
        };

        eprintln!(
            "┌─ {} {} ─────────────────────────────────────────────────┐",
            severity_icon,
            severity.as_str()
        );
        for line in Self::wrap_text(&error.user_message(), 55) {
            eprintln!("│ {}", line);
        }
        if let Some(hint) = Self::error_hint(error) {
            eprintln!("│");
            eprintln!("│ {}", hint);
        }
        eprintln!("└─────────────────────────────────────────────────────────┘");
    }

    /// Display a simple error message for non-interactive contexts
    pub fn display_simple_error(error: &PlayerError) {
        eprintln!("[{}] {}", error.severity().as_str(), error.user_message());
        if let Some(hint) = Self::error_hint(error) {
            eprintln!("Hint: {}", hint);
        }
    }

    fn error_hint(error: &PlayerError) -> Option<&'static str> {
        match error {
            PlayerError::Control(ControlError::InvalidState { .. }) => {
                Some("Use 'status' to see what the player is doing")
            }
            PlayerError::Control(ControlError::EngineFailure { .. }) => {
                Some("Use 'reset' and reload the source to continue")
            }
            PlayerError::Control(ControlError::UnsupportedRate { .. }) => {
                Some("Speeds: 0.75, 1.0, 1.25, 1.75, 2.0")
            }
            PlayerError::Control(ControlError::Timeout { .. }) => {
                Some("The engine may still confirm; check 'status'")
            }
            PlayerError::Config(_) => Some("Configuration will use default values"),
            _ => None,
        }
    }

    /// Wrap text to fit within specified width
    fn wrap_text(text: &str, width: usize) -> Vec<String> {
        let mut lines = Vec::new();
        let mut current_line = String::new();

        for word in text.split_whitespace() {
            if current_line.is_empty() {
                current_line = word.to_string();
            } else if current_line.len() + word.len() < width {
                current_line.push(' ');
                current_line.push_str(word);
            } else {
                lines.push(current_line);
                current_line = word.to_string();
            }
        }

        if !current_line.is_empty() {
            lines.push(current_line);
        }
        lines
    }

    fn progress_bar(progress: f32, width: usize) -> String {
        let filled = ((progress.clamp(0.0, 1.0) * width as f32) as usize).min(width);
        format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
    }

    /// Format milliseconds as MM:SS or HH:MM:SS
    pub fn format_ms(position_ms: i64) -> String {
        Self::format_duration(Duration::from_millis(position_ms.max(0) as u64))
    }

    /// Format duration as MM:SS or HH:MM:SS for longer media
    pub fn format_duration(duration: Duration) -> String {
        let total_seconds = duration.as_secs();
        let hours = total_seconds / 3600;
        let minutes = (total_seconds % 3600) / 60;
        let seconds = total_seconds % 60;

        if hours > 0 {
            format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
        } else {
            format!("{:02}:{:02}", minutes, seconds)
        }
    }

    /// Truncate string to fit display width
    pub fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len || max_len <= 3 {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len - 3).collect();
            format!("{}...", kept)
        }
    }
}
