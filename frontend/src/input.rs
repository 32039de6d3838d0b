//! Scripted joypad input for headless runs.
//!
//! A script is a comma-separated list of `frame:buttons` entries, e.g.
//! `0:start,30:right+a,60:-`. Each entry replaces the whole held state from
//! that frame on; `-` releases everything.

use dotmatrix_core::input::{ActionButton, ButtonSet, Direction};

/// Joypad state taking effect at `frame`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub frame: u64,
    pub direction: Option<Direction>,
    pub buttons: ButtonSet,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputScript {
    events: Vec<InputEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// Entry is not `frame:buttons`.
    Syntax(String),
    UnknownButton(String),
    /// The pad cannot hold two directions at once.
    TwoDirections { frame: u64 },
    /// Entries must be in increasing frame order.
    OutOfOrder { frame: u64 },
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Syntax(entry) => write!(f, "expected frame:buttons, got {entry:?}"),
            Self::UnknownButton(name) => write!(
                f,
                "unknown button {name:?} (expected a, b, select, start, up, down, left, right)"
            ),
            Self::TwoDirections { frame } => {
                write!(f, "frame {frame}: only one direction can be held")
            }
            Self::OutOfOrder { frame } => write!(f, "frame {frame} is not after the previous entry"),
        }
    }
}

impl std::error::Error for ScriptError {}

enum Token {
    Action(ActionButton),
    Direction(Direction),
}

fn token(name: &str) -> Option<Token> {
    let token = match name.to_ascii_lowercase().as_str() {
        "a" => Token::Action(ActionButton::A),
        "b" => Token::Action(ActionButton::B),
        "select" => Token::Action(ActionButton::Select),
        "start" => Token::Action(ActionButton::Start),
        "up" => Token::Direction(Direction::Up),
        "down" => Token::Direction(Direction::Down),
        "left" => Token::Direction(Direction::Left),
        "right" => Token::Direction(Direction::Right),
        _ => return None,
    };
    Some(token)
}

fn parse_entry(entry: &str) -> Result<InputEvent, ScriptError> {
    let (frame, held) = entry
        .split_once(':')
        .ok_or_else(|| ScriptError::Syntax(entry.to_string()))?;
    let frame: u64 = frame
        .trim()
        .parse()
        .map_err(|_| ScriptError::Syntax(entry.to_string()))?;

    let mut event = InputEvent {
        frame,
        direction: None,
        buttons: ButtonSet::EMPTY,
    };
    let held = held.trim();
    if held == "-" || held.is_empty() {
        return Ok(event);
    }
    for name in held.split('+').map(str::trim) {
        match token(name).ok_or_else(|| ScriptError::UnknownButton(name.to_string()))? {
            Token::Action(button) => event.buttons.insert(button),
            Token::Direction(direction) => {
                if event.direction.is_some_and(|d| d != direction) {
                    return Err(ScriptError::TwoDirections { frame });
                }
                event.direction = Some(direction);
            }
        }
    }
    Ok(event)
}

impl InputScript {
    pub fn parse(text: &str) -> Result<Self, ScriptError> {
        let mut events: Vec<InputEvent> = Vec::new();
        for entry in text.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let event = parse_entry(entry)?;
            if events.last().is_some_and(|last| last.frame >= event.frame) {
                return Err(ScriptError::OutOfOrder { frame: event.frame });
            }
            events.push(event);
        }
        Ok(Self { events })
    }

    pub fn events(&self) -> &[InputEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Walks a script frame by frame.
#[derive(Debug)]
pub struct ScriptCursor<'a> {
    events: &'a [InputEvent],
}

impl<'a> ScriptCursor<'a> {
    pub fn new(script: &'a InputScript) -> Self {
        Self {
            events: script.events(),
        }
    }

    /// The event taking effect at `frame`, if any. Frames must be visited in
    /// increasing order; events for skipped frames are returned late.
    pub fn advance_to(&mut self, frame: u64) -> Option<InputEvent> {
        let mut latest = None;
        while let Some((first, rest)) = self.events.split_first()
            && first.frame <= frame
        {
            latest = Some(*first);
            self.events = rest;
        }
        latest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_example_script() {
        let script = InputScript::parse("0:start,30:right+a,60:-").unwrap();
        assert_eq!(
            script.events(),
            &[
                InputEvent {
                    frame: 0,
                    direction: None,
                    buttons: ButtonSet::from([ActionButton::Start]),
                },
                InputEvent {
                    frame: 30,
                    direction: Some(Direction::Right),
                    buttons: ButtonSet::from([ActionButton::A]),
                },
                InputEvent {
                    frame: 60,
                    direction: None,
                    buttons: ButtonSet::EMPTY,
                },
            ]
        );
    }

    #[test]
    fn names_are_case_insensitive_and_spaced() {
        let script = InputScript::parse(" 5 : Up + B + SELECT ").unwrap();
        let event = script.events()[0];
        assert_eq!(event.direction, Some(Direction::Up));
        assert_eq!(event.buttons, ButtonSet::from([ActionButton::B, ActionButton::Select]));
    }

    #[test]
    fn rejects_bad_scripts() {
        assert_eq!(
            InputScript::parse("10:up+left"),
            Err(ScriptError::TwoDirections { frame: 10 })
        );
        assert_eq!(
            InputScript::parse("10:a,5:b"),
            Err(ScriptError::OutOfOrder { frame: 5 })
        );
        assert_eq!(
            InputScript::parse("10:turbo"),
            Err(ScriptError::UnknownButton("turbo".into()))
        );
        assert!(matches!(InputScript::parse("start"), Err(ScriptError::Syntax(_))));
    }

    #[test]
    fn empty_script_is_fine() {
        assert!(InputScript::parse("").unwrap().is_empty());
    }

    #[test]
    fn cursor_reports_each_event_once() {
        let script = InputScript::parse("0:a,2:b,3:-").unwrap();
        let mut cursor = ScriptCursor::new(&script);
        let frames: Vec<_> = (0..5)
            .map(|f| cursor.advance_to(f).map(|e| e.frame))
            .collect();
        assert_eq!(frames, vec![Some(0), None, Some(2), Some(3), None]);
    }

    #[test]
    fn cursor_catches_up_on_skipped_frames() {
        let script = InputScript::parse("1:a,2:b,3:start").unwrap();
        let mut cursor = ScriptCursor::new(&script);
        assert_eq!(cursor.advance_to(10).map(|e| e.frame), Some(3));
        assert_eq!(cursor.advance_to(11), None);
    }
}
