//! Session State Machine
//!
//! Defines the valid lifecycle transitions of a product session.

use std::fmt;

/// Whether a product is attached while the session is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProductPresence {
    NoProduct,
    ProductConnected,
}

/// Lifecycle state of a product session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Starting,
    Active(ProductPresence),
    Stopping,
}

impl SessionState {
    pub fn is_idle(&self) -> bool {
        matches!(self, SessionState::Idle)
    }

    pub fn is_product_connected(&self) -> bool {
        matches!(self, SessionState::Active(ProductPresence::ProductConnected))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Starting => write!(f, "Starting"),
            SessionState::Active(ProductPresence::NoProduct) => write!(f, "Active/NoProduct"),
            SessionState::Active(ProductPresence::ProductConnected) => {
                write!(f, "Active/ProductConnected")
            }
            SessionState::Stopping => write!(f, "Stopping"),
        }
    }
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Application (or foreground policy) asked to connect
    StartRequested,
    /// Transport reported a device
    ProductAppeared,
    /// Transport reported the device gone
    ProductLost,
    /// Application (or background policy) asked to disconnect
    StopRequested,
    /// Teardown finished
    StopCompleted,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was valid; carries the new state (which may equal the old one)
    Success(SessionState),
    /// Transition was invalid from the current state
    Invalid { from: SessionState, event: SessionEvent },
}

#[derive(Debug)]
pub struct SessionStateMachine {
    current_state: SessionState,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            current_state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.current_state
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: SessionEvent) -> TransitionResult {
        match self.next_state(event) {
            Some(state) => {
                self.current_state = state;
                TransitionResult::Success(state)
            }
            None => TransitionResult::Invalid {
                from: self.current_state,
                event,
            },
        }
    }

    fn next_state(&self, event: SessionEvent) -> Option<SessionState> {
        use ProductPresence::*;
        use SessionEvent::*;
        use SessionState::*;

        match (self.current_state, event) {
            (Idle, StartRequested) => Some(Starting),

            (Starting, ProductAppeared) => Some(Active(ProductConnected)),
            // No device yet, nothing to lose
            (Starting, ProductLost) => Some(Starting),

            (Active(_), ProductAppeared) => Some(Active(ProductConnected)),
            (Active(_), ProductLost) => Some(Active(NoProduct)),

            // Stop is accepted everywhere; from Idle it is a formality
            (Idle, StopRequested) => Some(Stopping),
            (Starting | Active(_), StopRequested) => Some(Stopping),
            (Stopping, StopRequested) => Some(Stopping),
            (Stopping, StopCompleted) => Some(Idle),

            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProductPresence::*;

    #[test]
    fn test_initial_state() {
        let fsm = SessionStateMachine::new();
        assert_eq!(fsm.state(), SessionState::Idle);
    }

    #[test]
    fn test_connect_lose_reappear_stop() {
        let mut fsm = SessionStateMachine::new();

        let result = fsm.process_event(SessionEvent::StartRequested);
        assert_eq!(result, TransitionResult::Success(SessionState::Starting));

        let result = fsm.process_event(SessionEvent::ProductAppeared);
        assert_eq!(result, TransitionResult::Success(SessionState::Active(ProductConnected)));

        let result = fsm.process_event(SessionEvent::ProductLost);
        assert_eq!(result, TransitionResult::Success(SessionState::Active(NoProduct)));

        let result = fsm.process_event(SessionEvent::ProductAppeared);
        assert_eq!(result, TransitionResult::Success(SessionState::Active(ProductConnected)));

        fsm.process_event(SessionEvent::StopRequested);
        assert_eq!(fsm.state(), SessionState::Stopping);
        fsm.process_event(SessionEvent::StopCompleted);
        assert_eq!(fsm.state(), SessionState::Idle);
    }

    #[test]
    fn test_second_start_is_invalid() {
        let mut fsm = SessionStateMachine::new();
        fsm.process_event(SessionEvent::StartRequested);

        let result = fsm.process_event(SessionEvent::StartRequested);
        assert!(matches!(result, TransitionResult::Invalid { from: SessionState::Starting, .. }));
        assert_eq!(fsm.state(), SessionState::Starting);
    }

    #[test]
    fn test_presence_ignored_when_idle() {
        let mut fsm = SessionStateMachine::new();
        let result = fsm.process_event(SessionEvent::ProductAppeared);
        assert!(matches!(result, TransitionResult::Invalid { .. }));
        assert_eq!(fsm.state(), SessionState::Idle);
    }

    #[test]
    fn test_start_rejected_while_stopping() {
        let mut fsm = SessionStateMachine::new();
        fsm.process_event(SessionEvent::StartRequested);
        fsm.process_event(SessionEvent::StopRequested);

        let result = fsm.process_event(SessionEvent::StartRequested);
        assert!(matches!(result, TransitionResult::Invalid { from: SessionState::Stopping, .. }));
        assert_eq!(fsm.state(), SessionState::Stopping);
    }

    #[test]
    fn test_loss_while_starting_keeps_waiting() {
        let mut fsm = SessionStateMachine::new();
        fsm.process_event(SessionEvent::StartRequested);
        fsm.process_event(SessionEvent::ProductLost);
        assert_eq!(fsm.state(), SessionState::Starting);
    }

    #[test]
    fn test_stop_from_any_state() {
        for setup in [
            vec![],
            vec![SessionEvent::StartRequested],
            vec![SessionEvent::StartRequested, SessionEvent::ProductAppeared],
        ] {
            let mut fsm = SessionStateMachine::new();
            for event in setup {
                fsm.process_event(event);
            }
            fsm.process_event(SessionEvent::StopRequested);
            fsm.process_event(SessionEvent::StopCompleted);
            assert_eq!(fsm.state(), SessionState::Idle);
        }
    }
}
