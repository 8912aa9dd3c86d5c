//! Input channels of the simulation and decoding of the client's action buffer.

use crate::error::EnvError;

/// One input channel, in action-buffer order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Input {
    /// Throttle.
    Accelerate = 0,
    /// Brake or reverse.
    Brake = 1,
    /// Steer left.
    SteerLeft = 2,
    /// Steer right.
    SteerRight = 3,
    /// Machine guns.
    Fire = 4,
    /// Drop an oil slick.
    Oil = 5,
    /// Release a smoke screen.
    Smoke = 6,
    /// Launch missiles.
    Missiles = 7,
}

impl Input {
    /// Every channel in action-buffer order.
    pub const ALL: [Input; 8] = [
        Input::Accelerate,
        Input::Brake,
        Input::SteerLeft,
        Input::SteerRight,
        Input::Fire,
        Input::Oil,
        Input::Smoke,
        Input::Missiles,
    ];

    /// Number of input channels.
    pub const COUNT: usize = Self::ALL.len();

    /// Channel at `index` in the action buffer.
    pub fn from_index(index: usize) -> Result<Self, EnvError> {
        Self::ALL
            .get(index)
            .copied()
            .ok_or(EnvError::UnknownAction(index))
    }

    /// Position in the action buffer.
    pub const fn index(self) -> usize {
        self as usize
    }

    fn flag(self) -> InputSet {
        InputSet::from_bits_retain(1 << self.index())
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    /// Inputs held down for the duration of a step.
    pub struct InputSet: u8 {
        /// Throttle.
        const ACCELERATE = 1 << 0;
        /// Brake.
        const BRAKE = 1 << 1;
        /// Steer towards the left edge.
        const STEER_LEFT = 1 << 2;
        /// Steer towards the right edge.
        const STEER_RIGHT = 1 << 3;
        /// Machine guns.
        const FIRE = 1 << 4;
        /// Drop an oil slick.
        const OIL = 1 << 5;
        /// Release a smoke screen.
        const SMOKE = 1 << 6;
        /// Launch missiles.
        const MISSILES = 1 << 7;
    }
}

impl InputSet {
    /// Decode an action buffer where any non-zero byte means "pressed".
    ///
    /// A pressed byte past the last known channel is an [`EnvError::UnknownAction`].
    pub fn from_action_bytes(actions: &[u8]) -> Result<Self, EnvError> {
        let mut set = InputSet::empty();
        for (index, _) in actions.iter().enumerate().filter(|(_, byte)| **byte != 0) {
            set |= Input::from_index(index)?.flag();
        }
        Ok(set)
    }

    /// Encode into an action buffer of `len` bytes.
    pub fn to_action_bytes(self, len: usize) -> Vec<u8> {
        (0..len)
            .map(|index| {
                Input::ALL
                    .get(index)
                    .map_or(0, |input| u8::from(self.contains(input.flag())))
            })
            .collect()
    }

    /// Whether `input` is held.
    pub fn is_held(self, input: Input) -> bool {
        self.contains(input.flag())
    }

    /// Held inputs in action-buffer order.
    pub fn held(self) -> impl Iterator<Item = Input> {
        Input::ALL.into_iter().filter(move |input| self.is_held(*input))
    }
}

impl From<Input> for InputSet {
    fn from(input: Input) -> Self {
        input.flag()
    }
}

impl FromIterator<Input> for InputSet {
    fn from_iter<I: IntoIterator<Item = Input>>(iter: I) -> Self {
        iter.into_iter()
            .fold(InputSet::empty(), |set, input| set | input.flag())
    }
}
