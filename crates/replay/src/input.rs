//! Controller input events and their command-line token encoding.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    A,
    B,
    X,
    Y,
    L,
    R,
    Start,
    Select,
    Up,
    Down,
    Left,
    Right,
}

impl Button {
    /// Lower-case name used in `p1_press_*` style tokens.
    pub fn token_name(self) -> &'static str {
        match self {
            Button::A => "a",
            Button::B => "b",
            Button::X => "x",
            Button::Y => "y",
            Button::L => "l",
            Button::R => "r",
            Button::Start => "start",
            Button::Select => "select",
            Button::Up => "up",
            Button::Down => "down",
            Button::Left => "left",
            Button::Right => "right",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "a" => Some(Button::A),
            "b" => Some(Button::B),
            "x" => Some(Button::X),
            "y" => Some(Button::Y),
            "l" => Some(Button::L),
            "r" => Some(Button::R),
            "start" => Some(Button::Start),
            "select" => Some(Button::Select),
            "up" => Some(Button::Up),
            "down" => Some(Button::Down),
            "left" => Some(Button::Left),
            "right" => Some(Button::Right),
            _ => None,
        }
    }
}

impl fmt::Display for Button {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token_name())
    }
}

/// One recorded step of session history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// Let the game run for `frames` frames with no input.
    Wait { frames: u32 },
    /// Press `button` at `at_frame` and keep it down for `frames` frames.
    Press {
        button: Button,
        at_frame: u32,
        frames: u32,
    },
}

impl InputEvent {
    /// Emit the `--input-command` tokens for this event.
    ///
    /// A one-frame press is a single token. A longer hold becomes a hold
    /// span plus an explicit release at its last frame, so no hold is ever
    /// left open.
    pub fn tokens(&self, out: &mut Vec<String>) {
        match *self {
            InputEvent::Wait { .. } => {}
            InputEvent::Press {
                button,
                at_frame,
                frames: 1,
            } => {
                out.push(format!("p1_press_{}@{}", button, at_frame));
            }
            InputEvent::Press {
                button,
                at_frame,
                frames,
            } => {
                let last = at_frame + frames - 1;
                out.push(format!("p1_hold_{}@{}-{}", button, at_frame, last));
                out.push(format!("p1_release_{}@{}", button, last));
            }
        }
    }
}
