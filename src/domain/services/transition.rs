//! Reconciliation State Machine
//!
//! Decides which directory side effect a status change calls for.

use crate::domain::value_objects::ServerStatus;

/// Directory side effect implied by a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The server came online: add its backend
    Register,
    /// The server left ONLINE: remove its backend
    Unregister,
    /// Nothing to do
    None,
}

impl Transition {
    /// Only edges into and out of ONLINE have side effects.
    pub fn between(previous: ServerStatus, current: ServerStatus) -> Self {
        match (previous == ServerStatus::Online, current == ServerStatus::Online) {
            (false, true) => Self::Register,
            (true, false) => Self::Unregister,
            _ => Self::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_online_registers() {
        for status in ServerStatus::ALL {
            if status != ServerStatus::Online {
                assert_eq!(
                    Transition::between(status, ServerStatus::Online),
                    Transition::Register
                );
            }
        }
    }

    #[test]
    fn test_out_of_online_unregisters() {
        assert_eq!(
            Transition::between(ServerStatus::Online, ServerStatus::Stopping),
            Transition::Unregister
        );
        assert_eq!(
            Transition::between(ServerStatus::Online, ServerStatus::Crashed),
            Transition::Unregister
        );
    }

    #[test]
    fn test_other_edges_are_noops() {
        assert_eq!(
            Transition::between(ServerStatus::Online, ServerStatus::Online),
            Transition::None
        );
        assert_eq!(
            Transition::between(ServerStatus::Offline, ServerStatus::Starting),
            Transition::None
        );
        assert_eq!(
            Transition::between(ServerStatus::Saving, ServerStatus::Offline),
            Transition::None
        );
    }
}
