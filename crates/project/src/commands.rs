use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use xsheet::Frame;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command `{0}`")]
    Unknown(String),
    #[error("`{command}` needs {argument}")]
    MissingArgument {
        command: String,
        argument: &'static str,
    },
    #[error("`{command}`: invalid value `{value}`")]
    InvalidArgument { command: String, value: String },
    #[error("`{command}` takes no more arguments, got `{extra}`")]
    TrailingArgument { command: String, extra: String },
}

/// Everything a shell can ask of a session.
///
/// Accepted as JSON (`{"command": "goto_frame", "frame": 12}`) or as one
/// line of text (`goto 12`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum SessionCommand {
    GotoFrame {
        frame: Frame,
    },
    NextFrame {
        #[serde(default)]
        looping: bool,
    },
    PreviousFrame {
        #[serde(default)]
        looping: bool,
    },
    PreviousLayer,
    NextLayer,
    /// Starts or stops playback. `looping` falls back to the configured default.
    TogglePlay {
        #[serde(default)]
        looping: Option<bool>,
    },
    Stop,
    ToggleOnionSkin,
    SetOnionMode {
        by_cels: bool,
    },
    SetOnionLength {
        length: usize,
    },
    SetOnionFalloff {
        falloff: f64,
    },
    AddCel,
    RemoveClear,
    ToggleMetronome,
    /// Moves the session clock forward, firing due playback ticks.
    Advance {
        millis: u64,
    },
    SetCanvasSize {
        width: u32,
        height: u32,
    },
    Save {
        path: PathBuf,
    },
    Load {
        path: PathBuf,
    },
}

struct Args<'a> {
    command: &'a str,
    rest: std::str::SplitWhitespace<'a>,
}

impl<'a> Args<'a> {
    fn required(&mut self, argument: &'static str) -> Result<&'a str, CommandError> {
        self.rest.next().ok_or(CommandError::MissingArgument {
            command: self.command.to_string(),
            argument,
        })
    }

    fn parse<T: FromStr>(&mut self, argument: &'static str) -> Result<T, CommandError> {
        let raw = self.required(argument)?;
        raw.parse().map_err(|_| CommandError::InvalidArgument {
            command: self.command.to_string(),
            value: raw.to_string(),
        })
    }

    fn loop_flag(&mut self) -> Result<Option<bool>, CommandError> {
        match self.rest.next() {
            None => Ok(None),
            Some("loop") => Ok(Some(true)),
            Some("once") => Ok(Some(false)),
            Some(other) => Err(CommandError::InvalidArgument {
                command: self.command.to_string(),
                value: other.to_string(),
            }),
        }
    }

    fn finish(mut self, command: SessionCommand) -> Result<SessionCommand, CommandError> {
        match self.rest.next() {
            None => Ok(command),
            Some(extra) => Err(CommandError::TrailingArgument {
                command: self.command.to_string(),
                extra: extra.to_string(),
            }),
        }
    }
}

impl FromStr for SessionCommand {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let head = words.next().ok_or(CommandError::Empty)?;
        let mut args = Args {
            command: head,
            rest: words,
        };

        let parsed = match head {
            "goto" => SessionCommand::GotoFrame {
                frame: args.parse("a frame number")?,
            },
            "next" => SessionCommand::NextFrame {
                looping: args.loop_flag()?.unwrap_or(false),
            },
            "prev" => SessionCommand::PreviousFrame {
                looping: args.loop_flag()?.unwrap_or(false),
            },
            "up" => SessionCommand::PreviousLayer,
            "down" => SessionCommand::NextLayer,
            "play" => SessionCommand::TogglePlay {
                looping: args.loop_flag()?,
            },
            "stop" => SessionCommand::Stop,
            "onion" => SessionCommand::ToggleOnionSkin,
            "onion-mode" => {
                let by_cels = match args.required("`cels` or `frames`")? {
                    "cels" => true,
                    "frames" => false,
                    other => {
                        return Err(CommandError::InvalidArgument {
                            command: head.to_string(),
                            value: other.to_string(),
                        })
                    }
                };
                SessionCommand::SetOnionMode { by_cels }
            }
            "onion-length" => SessionCommand::SetOnionLength {
                length: args.parse("a depth")?,
            },
            "onion-falloff" => SessionCommand::SetOnionFalloff {
                falloff: args.parse("a value between 0 and 1")?,
            },
            "add" => SessionCommand::AddCel,
            "remove" => SessionCommand::RemoveClear,
            "metronome" => SessionCommand::ToggleMetronome,
            "advance" => SessionCommand::Advance {
                millis: args.parse("milliseconds")?,
            },
            "canvas" => SessionCommand::SetCanvasSize {
                width: args.parse("a width")?,
                height: args.parse("a height")?,
            },
            "save" => SessionCommand::Save {
                path: PathBuf::from(args.required("a path")?),
            },
            "load" => SessionCommand::Load {
                path: PathBuf::from(args.required("a path")?),
            },
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        args.finish(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_navigation() {
        assert_eq!(
            "goto 12".parse::<SessionCommand>().unwrap(),
            SessionCommand::GotoFrame { frame: 12 }
        );
        assert_eq!(
            "next loop".parse::<SessionCommand>().unwrap(),
            SessionCommand::NextFrame { looping: true }
        );
        assert_eq!(
            "  prev ".parse::<SessionCommand>().unwrap(),
            SessionCommand::PreviousFrame { looping: false }
        );
        assert_eq!(
            "down".parse::<SessionCommand>().unwrap(),
            SessionCommand::NextLayer
        );
    }

    #[test]
    fn test_parse_play_flag() {
        assert_eq!(
            "play".parse::<SessionCommand>().unwrap(),
            SessionCommand::TogglePlay { looping: None }
        );
        assert_eq!(
            "play once".parse::<SessionCommand>().unwrap(),
            SessionCommand::TogglePlay {
                looping: Some(false)
            }
        );
    }

    #[test]
    fn test_parse_onion_and_canvas() {
        assert_eq!(
            "onion-mode frames".parse::<SessionCommand>().unwrap(),
            SessionCommand::SetOnionMode { by_cels: false }
        );
        assert_eq!(
            "onion-falloff 0.25".parse::<SessionCommand>().unwrap(),
            SessionCommand::SetOnionFalloff { falloff: 0.25 }
        );
        assert_eq!(
            "canvas 1920 1080".parse::<SessionCommand>().unwrap(),
            SessionCommand::SetCanvasSize {
                width: 1920,
                height: 1080
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<SessionCommand>(), Err(CommandError::Empty));
        assert_eq!(
            "jump 3".parse::<SessionCommand>(),
            Err(CommandError::Unknown("jump".into()))
        );
        assert_eq!(
            "goto".parse::<SessionCommand>(),
            Err(CommandError::MissingArgument {
                command: "goto".into(),
                argument: "a frame number"
            })
        );
        assert_eq!(
            "goto x".parse::<SessionCommand>(),
            Err(CommandError::InvalidArgument {
                command: "goto".into(),
                value: "x".into()
            })
        );
        assert_eq!(
            "stop now".parse::<SessionCommand>(),
            Err(CommandError::TrailingArgument {
                command: "stop".into(),
                extra: "now".into()
            })
        );
        assert!(matches!(
            "onion-mode layers".parse::<SessionCommand>(),
            Err(CommandError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_json_form() {
        let command: SessionCommand =
            serde_json::from_str(r#"{"command": "goto_frame", "frame": 7}"#).unwrap();
        assert_eq!(command, SessionCommand::GotoFrame { frame: 7 });

        let command: SessionCommand = serde_json::from_str(r#"{"command": "next_frame"}"#).unwrap();
        assert_eq!(command, SessionCommand::NextFrame { looping: false });

        let json = serde_json::to_value(SessionCommand::Save {
            path: PathBuf::from("scene.zip"),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"command": "save", "path": "scene.zip"}));
    }
}
