//! ON/OFF payload encoding used on every state and set topic

use std::fmt;

/// Binary device state as carried on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OnOff {
    On,
    Off,
}

impl OnOff {
    /// Decode a command payload.
    ///
    /// Only a case-insensitive `ON` means on; anything else is treated as off.
    pub fn from_payload(payload: &str) -> Self {
        if payload.eq_ignore_ascii_case("ON") {
            OnOff::On
        } else {
            OnOff::Off
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OnOff::On => "ON",
            OnOff::Off => "OFF",
        }
    }

    pub fn is_on(&self) -> bool {
        matches!(self, OnOff::On)
    }
}

impl From<bool> for OnOff {
    fn from(state: bool) -> Self {
        if state {
            OnOff::On
        } else {
            OnOff::Off
        }
    }
}

impl From<OnOff> for bool {
    fn from(state: OnOff) -> bool {
        state.is_on()
    }
}

impl fmt::Display for OnOff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
