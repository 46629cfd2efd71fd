//! Breaker states and their compact encoding.

use std::fmt;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

/// Current state of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CircuitState {
    /// Normal operating mode; calls pass through.
    #[default]
    Closed,
    /// Monitored calls are short-circuited until the half-open timeout elapses.
    Open,
    /// Probationary pass-through after the cooldown; a success closes the breaker,
    /// enough classified failures reopen it.
    HalfOpen,
}

impl CircuitState {
    /// Whether monitored calls are currently being rejected.
    pub fn is_open(self) -> bool {
        matches!(self, CircuitState::Open)
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            CircuitState::Closed => STATE_CLOSED,
            CircuitState::Open => STATE_OPEN,
            CircuitState::HalfOpen => STATE_HALF_OPEN,
        }
    }

    /// Decode a value written by [`CircuitState::to_u8`]. Unknown values read as `Open`
    /// so a corrupted mirror fails safe.
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            STATE_CLOSED => CircuitState::Closed,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Open,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_survives_round_trip() {
        for state in [CircuitState::Closed, CircuitState::Open, CircuitState::HalfOpen] {
            assert_eq!(CircuitState::from_u8(state.to_u8()), state);
        }
    }

    #[test]
    fn unknown_encoding_reads_as_open() {
        assert_eq!(CircuitState::from_u8(42), CircuitState::Open);
    }

    #[test]
    fn display_uses_upper_snake_case() {
        assert_eq!(CircuitState::HalfOpen.to_string(), "HALF_OPEN");
        assert_eq!(CircuitState::default().to_string(), "CLOSED");
    }
}
