use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

use crate::common::error::{WmError, WmResult};
use crate::model::session::SessionId;

/// Lifecycle of a session.
///
/// `Active` is `Foreground` plus eligibility for input focus. `End` and
/// `Destroyed` are terminal; `Destroyed` is reachable from every other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumIter)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Foreground,
    Active,
    Background,
    End,
    Destroyed,
}

impl SessionState {
    pub fn is_visible(self) -> bool { matches!(self, SessionState::Foreground | SessionState::Active) }

    pub fn is_terminal(self) -> bool { matches!(self, SessionState::End | SessionState::Destroyed) }

    /// States in which geometry may still change.
    pub fn accepts_layout(self) -> bool { !self.is_terminal() }

    pub fn can_transition_to(self, to: SessionState) -> bool {
        use SessionState::*;
        match (self, to) {
            (Destroyed, _) => false,
            (_, Destroyed) => true,
            (Disconnected, Connecting)
            | (Connecting, Connected)
            | (Connecting, Disconnected)
            | (Connected, Foreground)
            | (Connected, End)
            | (Foreground, Active)
            | (Active, Foreground)
            | (Foreground, Background)
            | (Active, Background)
            | (Background, Foreground)
            | (Background, End) => true,
            _ => false,
        }
    }

    /// Validates `self -> to`. Returns whether the state actually changes;
    /// asking for the current state is a successful no-op.
    pub fn check_transition(self, id: SessionId, to: SessionState) -> WmResult<bool> {
        if self == to {
            return Ok(false);
        }
        if !self.can_transition_to(to) {
            return Err(WmError::invalid_session(
                id,
                format!("illegal transition {self} -> {to}"),
            ));
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::SessionState::*;
    use super::*;

    #[test]
    fn background_cannot_reconnect() {
        let res = Background.check_transition(SessionId::new(1), Connecting);
        assert!(matches!(res, Err(WmError::InvalidSession { .. })));
    }

    #[test]
    fn every_live_state_can_be_destroyed() {
        for s in SessionState::iter().filter(|s| *s != Destroyed) {
            assert!(s.can_transition_to(Destroyed), "{s}");
        }
        for s in SessionState::iter() {
            assert!(!Destroyed.can_transition_to(s) || s == Destroyed);
        }
    }

    #[test]
    fn same_state_is_noop() {
        assert_eq!(Background.check_transition(SessionId::new(1), Background), Ok(false));
        assert_eq!(Destroyed.check_transition(SessionId::new(1), Destroyed), Ok(false));
    }

    #[test]
    fn happy_path_is_legal() {
        let path = [Disconnected, Connecting, Connected, Foreground, Active, Background, End];
        for pair in path.windows(2) {
            assert_eq!(pair[0].check_transition(SessionId::new(1), pair[1]), Ok(true));
        }
    }

    #[test]
    fn end_is_terminal() {
        for s in SessionState::iter().filter(|s| *s != Destroyed && *s != End) {
            assert!(!End.can_transition_to(s), "{s}");
        }
    }
}
