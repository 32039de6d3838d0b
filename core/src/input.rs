//! Joypad state as the core sees it: one byte per frame.
//!
//! ```text
//! bit  7     6   5     4      3      2       1   0
//!      Down  Up  Left  Right  Start  Select  B   A
//! ```
//!
//! The low nibble holds the action buttons, which combine freely. The high
//! nibble holds the direction, which is exclusive: at most one bit is ever
//! set because the pad is driven by a single pointer angle.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, TAU};

const ACTION_BITS: u8 = 0b0000_1111;
const DIRECTION_BITS: u8 = 0b1111_0000;

/// Discrete face and system buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionButton {
    A,
    B,
    Select,
    Start,
}

impl ActionButton {
    pub const ALL: [Self; 4] = [Self::A, Self::B, Self::Select, Self::Start];

    pub const fn bit(self) -> u8 {
        match self {
            Self::A => 0x01,
            Self::B => 0x02,
            Self::Select => 0x04,
            Self::Start => 0x08,
        }
    }
}

/// D-pad direction. Diagonals do not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Right,
    Left,
    Up,
    Down,
}

impl Direction {
    pub const ALL: [Self; 4] = [Self::Right, Self::Left, Self::Up, Self::Down];

    pub const fn bit(self) -> u8 {
        match self {
            Self::Right => 0x10,
            Self::Left => 0x20,
            Self::Up => 0x40,
            Self::Down => 0x80,
        }
    }

    /// Map a pointer angle (radians, counter-clockwise from the positive x
    /// axis) to the sector it falls in. Each sector spans 90° centred on an
    /// axis, so right covers [-45°, 45°).
    pub fn from_angle(radians: f64) -> Self {
        let angle = (radians + FRAC_PI_4).rem_euclid(TAU);
        // Truncation is the sector index; the value is in 0.0..4.0.
        match (angle / FRAC_PI_2) as u8 {
            0 => Self::Right,
            1 => Self::Up,
            2 => Self::Left,
            _ => Self::Down,
        }
    }

    /// Direction for a touch at normalized pad coordinates (`0.0..=1.0`,
    /// y growing downward). The exact centre has no direction.
    pub fn from_pad_position(x: f64, y: f64) -> Option<Self> {
        let dx = x - 0.5;
        let dy = 0.5 - y;
        if dx == 0.0 && dy == 0.0 {
            return None;
        }
        Some(Self::from_angle(dy.atan2(dx)))
    }
}

/// Set of held action buttons (low nibble only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ButtonSet(u8);

impl ButtonSet {
    pub const EMPTY: Self = Self(0);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, button: ActionButton) -> bool {
        self.0 & button.bit() != 0
    }

    pub fn insert(&mut self, button: ActionButton) {
        self.0 |= button.bit();
    }

    pub fn remove(&mut self, button: ActionButton) {
        self.0 &= !button.bit();
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl FromIterator<ActionButton> for ButtonSet {
    fn from_iter<I: IntoIterator<Item = ActionButton>>(iter: I) -> Self {
        let mut set = Self::EMPTY;
        for button in iter {
            set.insert(button);
        }
        set
    }
}

impl<const N: usize> From<[ActionButton; N]> for ButtonSet {
    fn from(buttons: [ActionButton; N]) -> Self {
        buttons.into_iter().collect()
    }
}

/// The byte handed to the core on every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InputMask(u8);

impl InputMask {
    pub const NONE: Self = Self(0);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn actions(self) -> ButtonSet {
        ButtonSet(self.0 & ACTION_BITS)
    }

    /// The direction nibble, left in place.
    pub const fn direction_bits(self) -> u8 {
        self.0 & DIRECTION_BITS
    }

    pub fn direction(self) -> Option<Direction> {
        Direction::ALL
            .into_iter()
            .find(|d| self.0 & d.bit() != 0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// What changed between two masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Transition {
    /// Bits set now that were clear before.
    pub pressed: InputMask,
    /// Bits clear now that were set before.
    pub released: InputMask,
}

impl Transition {
    pub const fn between(old: InputMask, new: InputMask) -> Self {
        let changed = old.0 ^ new.0;
        Self {
            pressed: InputMask(changed & new.0),
            released: InputMask(changed & old.0),
        }
    }

    pub const fn is_empty(self) -> bool {
        self.pressed.is_empty() && self.released.is_empty()
    }
}

type TransitionListener = Box<dyn FnMut(Transition) + Send>;

/// Merges d-pad and button gestures into one [`InputMask`].
///
/// Both setters replace their whole nibble rather than toggling bits, so a
/// dropped intermediate UI event can never leave a button stuck.
#[derive(Default)]
pub struct InputAggregator {
    mask: InputMask,
    listener: Option<TransitionListener>,
}

impl InputAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a callback fired for every non-empty transition. The UI uses
    /// it to drive distinct press and release haptics.
    pub fn on_transition(&mut self, listener: impl FnMut(Transition) + Send + 'static) {
        self.listener = Some(Box::new(listener));
    }

    pub const fn current_mask(&self) -> InputMask {
        self.mask
    }

    /// Replace the direction nibble. `None` clears all four directions.
    pub fn set_direction(&mut self, direction: Option<Direction>) -> Transition {
        let bits = direction.map_or(0, Direction::bit);
        self.update(InputMask((self.mask.0 & ACTION_BITS) | bits))
    }

    /// Replace the action nibble with exactly `pressed`.
    pub fn set_action_buttons(&mut self, pressed: ButtonSet) -> Transition {
        self.update(InputMask((self.mask.0 & DIRECTION_BITS) | pressed.bits()))
    }

    /// Release everything.
    pub fn clear(&mut self) -> Transition {
        self.update(InputMask::NONE)
    }

    fn update(&mut self, next: InputMask) -> Transition {
        let transition = Transition::between(self.mask, next);
        self.mask = next;
        if !transition.is_empty() {
            tracing::trace!(
                pressed = transition.pressed.bits(),
                released = transition.released.bits(),
                mask = next.bits(),
                "input transition"
            );
            if let Some(listener) = self.listener.as_mut() {
                listener(transition);
            }
        }
        transition
    }
}

impl std::fmt::Debug for InputAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputAggregator")
            .field("mask", &self.mask)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}
