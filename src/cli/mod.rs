use crate::error::PlayerError;
use crate::models::{PlaybackRate, PlayerStatus, SeekMode};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

pub mod status;
pub use status::StatusDisplay;

/// Media engine control CLI
#[derive(Parser)]
#[command(name = "mediactl")]
#[command(about = "Drive a media engine through the serialised control core")]
#[command(version = "0.1.0")]
pub struct CliApp {
    /// Alternate configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands
#[derive(Debug, Clone, PartialEq, Subcommand)]
pub enum Commands {
    /// Load a media source (IDLE only)
    #[command(alias = "source")]
    Open {
        /// Media URI, e.g. "sim://track"
        uri: String,
    },
    /// Prepare the loaded source for playback
    Prepare,
    /// Start or resume playback
    Play,
    /// Pause playback while preserving position
    Pause,
    /// Seek to a time position
    Seek {
        /// Time offset (e.g., "1:30", "90", "90s")
        position: String,
        /// Seek mode: prev, next, sync or exact
        mode: Option<String>,
    },
    /// Stop playback; prepare is needed before playing again
    Stop,
    /// Set playback speed (0.75, 1.0, 1.25, 1.75, 2.0)
    Rate {
        speed: String,
    },
    /// Set playback volume (0-100)
    Volume {
        /// Volume level (0-100)
        level: u8,
    },
    /// Enable or disable looping at end of stream
    Loop {
        #[arg(action = ArgAction::Set, value_parser = clap::builder::BoolishValueParser::new())]
        enabled: bool,
    },
    /// Return the controller to IDLE, clearing any error
    Reset,
    /// Display current controller status
    Status,
    /// Show recent control events
    Events {
        #[arg(default_value_t = 10)]
        count: usize,
    },
    /// Run a scripted open/prepare/play/seek/pause/stop cycle
    Demo {
        /// Media URI to play
        #[arg(default_value = "sim://demo")]
        uri: String,
    },
}

impl CliApp {
    /// Parse command line arguments
    pub fn parse() -> Self {
        <Self as clap::Parser>::parse()
    }

    /// Parse command from string (for interactive mode)
    pub fn parse_command(input: &str) -> Result<Commands, ParseError> {
        let args: Vec<&str> = input.split_whitespace().collect();
        if args.is_empty() {
            return Err(ParseError::EmptyCommand);
        }

        match args[0] {
            "open" | "source" => {
                if args.len() > 1 {
                    Ok(Commands::Open {
                        uri: args[1..].join(" "),
                    })
                } else {
                    Err(ParseError::MissingArgument {
                        command: args[0].to_string(),
                        argument: "uri".to_string(),
                    })
                }
            }
            "prepare" => Ok(Commands::Prepare),
            "play" | "resume" => Ok(Commands::Play),
            "pause" => Ok(Commands::Pause),
            "stop" => Ok(Commands::Stop),
            "reset" => Ok(Commands::Reset),
            "status" => Ok(Commands::Status),
            "seek" => {
                if args.len() < 2 {
                    return Err(ParseError::MissingArgument {
                        command: "seek".to_string(),
                        argument: "position".to_string(),
                    });
                }
                // Validate now so typos fail before anything is queued
                Self::parse_time(args[1])?;
                let mode = match args.get(2) {
                    Some(mode) => {
                        Self::parse_seek_mode(mode)?;
                        Some(mode.to_string())
                    }
                    None => None,
                };
                Ok(Commands::Seek {
                    position: args[1].to_string(),
                    mode,
                })
            }
            "rate" | "speed" => {
                if args.len() < 2 {
                    return Err(ParseError::MissingArgument {
                        command: "rate".to_string(),
                        argument: "speed".to_string(),
                    });
                }
                Self::parse_rate(args[1])?;
                Ok(Commands::Rate {
                    speed: args[1].to_string(),
                })
            }
            "volume" => {
                if args.len() > 1 {
                    match args[1].parse::<u8>() {
                        Ok(level) if level <= 100 => Ok(Commands::Volume { level }),
                        Ok(_) => Err(ParseError::InvalidArgument {
                            argument: "volume level".to_string(),
                            value: args[1].to_string(),
                            expected: "0-100".to_string(),
                        }),
                        Err(_) => Err(ParseError::InvalidArgument {
                            argument: "volume level".to_string(),
                            value: args[1].to_string(),
                            expected: "number 0-100".to_string(),
                        }),
                    }
                } else {
                    Err(ParseError::MissingArgument {
                        command: "volume".to_string(),
                        argument: "level".to_string(),
                    })
                }
            }
            "loop" => {
                if args.len() < 2 {
                    return Err(ParseError::MissingArgument {
                        command: "loop".to_string(),
                        argument: "on|off".to_string(),
                    });
                }
                Ok(Commands::Loop {
                    enabled: Self::parse_toggle(args[1])?,
                })
            }
            "events" => {
                let count = match args.get(1) {
                    Some(value) => value.parse::<usize>().map_err(|_| ParseError::InvalidArgument {
                        argument: "count".to_string(),
                        value: value.to_string(),
                        expected: "positive number".to_string(),
                    })?,
                    None => 10,
                };
                Ok(Commands::Events { count })
            }
            "demo" => Ok(Commands::Demo {
                uri: args.get(1).unwrap_or(&"sim://demo").to_string(),
            }),
            "help" => Err(ParseError::HelpRequested),
            _ => Err(ParseError::UnknownCommand {
                command: args[0].to_string(),
            }),
        }
    }

    /// Display player status in a formatted way
    pub fn display_status(status: &PlayerStatus) {
        StatusDisplay::display_full_status(status);
    }

    /// Display error message with formatting
    pub fn display_error(error: &PlayerError) {
        StatusDisplay::display_error(error);
    }

    /// Display help information
    pub fn display_help() {
        println!("mediactl - Available Commands:");
        println!();
        println!("Lifecycle:");
        println!("  open <uri>          - Load a media source");
        println!("  prepare             - Prepare the loaded source");
        println!("  reset               - Return to IDLE (clears errors)");
        println!();
        println!("Playback Control:");
        println!("  play                - Start or resume playback");
        println!("  pause               - Pause playback");
        println!("  stop                - Stop playback");
        println!("  seek <time> [mode]  - Seek (e.g., '1:30', '90s'); mode: prev|next|sync|exact");
        println!("  rate <speed>        - Playback speed: 0.75, 1.0, 1.25, 1.75, 2.0");
        println!("  volume <0-100>      - Set volume level");
        println!("  loop <on|off>       - Loop at end of stream");
        println!();
        println!("Information:");
        println!("  status              - Show current controller status");
        println!("  events [n]          - Show the last n control events");
        println!("  demo [uri]          - Run a scripted playback cycle");
        println!();
        println!("General:");
        println!("  help                - Show this help message");
        println!("  exit, quit          - Release the engine and exit");
    }

    /// Parse time string to Duration
    pub fn parse_time(time_str: &str) -> Result<Duration, ParseError> {
        let trimmed = time_str.trim();

        if trimmed.is_empty() {
            return Err(ParseError::InvalidTimeFormat {
                input: time_str.to_string(),
            });
        }

        // "1:30", "90", "90s", "1:30.5"
        if trimmed.contains(':') {
            let parts: Vec<&str> = trimmed.split(':').collect();
            if parts.len() != 2 {
                return Err(ParseError::InvalidTimeFormat {
                    input: time_str.to_string(),
                });
            }

            let minutes: u64 = parts[0].parse().map_err(|_| ParseError::InvalidTimeFormat {
                input: time_str.to_string(),
            })?;
            let seconds: f64 = parts[1].parse().map_err(|_| ParseError::InvalidTimeFormat {
                input: time_str.to_string(),
            })?;

            if !(0.0..60.0).contains(&seconds) {
                return Err(ParseError::InvalidTimeFormat {
                    input: time_str.to_string(),
                });
            }

            Ok(Duration::from_secs_f64(minutes as f64 * 60.0 + seconds))
        } else {
            let seconds: f64 = trimmed
                .trim_end_matches('s')
                .parse()
                .map_err(|_| ParseError::InvalidTimeFormat {
                    input: time_str.to_string(),
                })?;

            if !seconds.is_finite() || seconds < 0.0 {
                return Err(ParseError::InvalidTimeFormat {
                    input: time_str.to_string(),
                });
            }

            Ok(Duration::from_secs_f64(seconds))
        }
    }

    pub fn parse_seek_mode(input: &str) -> Result<SeekMode, ParseError> {
        SeekMode::parse(input).ok_or_else(|| ParseError::InvalidArgument {
            argument: "seek mode".to_string(),
            value: input.to_string(),
            expected: "prev, next, sync or exact".to_string(),
        })
    }

    pub fn parse_rate(input: &str) -> Result<PlaybackRate, ParseError> {
        input
            .trim_end_matches('x')
            .parse::<f32>()
            .ok()
            .and_then(PlaybackRate::from_f32)
            .ok_or_else(|| ParseError::InvalidArgument {
                argument: "rate".to_string(),
                value: input.to_string(),
                expected: "0.75, 1.0, 1.25, 1.75 or 2.0".to_string(),
            })
    }

    pub fn parse_toggle(input: &str) -> Result<bool, ParseError> {
        match input.to_lowercase().as_str() {
            "on" | "true" | "yes" | "1" => Ok(true),
            "off" | "false" | "no" | "0" => Ok(false),
            _ => Err(ParseError::InvalidArgument {
                argument: "loop".to_string(),
                value: input.to_string(),
                expected: "on or off".to_string(),
            }),
        }
    }

    /// Format duration for display
    pub fn format_duration(duration: Duration) -> String {
        let total_seconds = duration.as_secs();
        let minutes = total_seconds / 60;
        let seconds = total_seconds % 60;
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// Command parsing errors
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Empty command")]
    EmptyCommand,

    #[error("Unknown command: {command}")]
    UnknownCommand { command: String },

    #[error("Missing argument for {command}: {argument}")]
    MissingArgument { command: String, argument: String },

    #[error("Invalid argument {argument}: got '{value}', expected {expected}")]
    InvalidArgument {
        argument: String,
        value: String,
        expected: String,
    },

    #[error("Invalid time format: {input}")]
    InvalidTimeFormat { input: String },

    #[error("Help requested")]
    HelpRequested,
}
