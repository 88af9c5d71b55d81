//! Task lifecycle: `idle -> planning -> searching -> analyzing -> {complete | error}`.
//!
//! The client never advances status on its own. It only judges the
//! transitions the server reports, plus the client-side cancel back to
//! `idle`.

use crate::progress::model::TaskStatus;

/// How a reported status relates to the current one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Same status reported again
    Stay,
    /// Forward move, including skipped intermediate states
    Advance,
    /// Backward move between the working states; applied but flagged
    Regress,
    /// Leaves a terminal state or returns to `idle`; rejected
    Illegal,
}

impl TaskStatus {
    /// `complete` and `error` end the task id
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Error)
    }

    /// Server is actively working; drives the spinner
    pub fn is_busy(self) -> bool {
        matches!(self, TaskStatus::Searching | TaskStatus::Analyzing)
    }

    /// Cancel is offered for anything but `idle`
    pub fn can_cancel(self) -> bool {
        self != TaskStatus::Idle
    }

    /// Dashboard counter of running searches
    pub fn active_searches(self) -> u32 {
        u32::from(self != TaskStatus::Idle)
    }

    fn rank(self) -> u8 {
        match self {
            TaskStatus::Idle => 0,
            TaskStatus::Planning => 1,
            TaskStatus::Searching => 2,
            TaskStatus::Analyzing => 3,
            TaskStatus::Complete | TaskStatus::Error => 4,
        }
    }
}

/// Classify a server-reported move from `from` to `to`
pub fn classify_transition(from: TaskStatus, to: TaskStatus) -> Transition {
    if from == to {
        return Transition::Stay;
    }
    if to == TaskStatus::Idle || from.is_terminal() {
        return Transition::Illegal;
    }
    if to.rank() > from.rank() {
        Transition::Advance
    } else {
        Transition::Regress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskStatus::*;

    #[test]
    fn forward_moves_advance() {
        assert_eq!(classify_transition(Idle, Planning), Transition::Advance);
        assert_eq!(classify_transition(Planning, Searching), Transition::Advance);
        assert_eq!(classify_transition(Searching, Analyzing), Transition::Advance);
        assert_eq!(classify_transition(Analyzing, Complete), Transition::Advance);
        // Snapshots lost in a reconnect gap can skip states
        assert_eq!(classify_transition(Idle, Analyzing), Transition::Advance);
        assert_eq!(classify_transition(Planning, Error), Transition::Advance);
    }

    #[test]
    fn terminal_states_are_final() {
        for terminal in [Complete, Error] {
            for next in [Idle, Planning, Searching, Analyzing] {
                assert_eq!(classify_transition(terminal, next), Transition::Illegal);
            }
        }
        assert_eq!(classify_transition(Complete, Error), Transition::Illegal);
        assert_eq!(classify_transition(Error, Complete), Transition::Illegal);
        assert_eq!(classify_transition(Complete, Complete), Transition::Stay);
    }

    #[test]
    fn working_states_may_regress() {
        assert_eq!(classify_transition(Analyzing, Searching), Transition::Regress);
        assert_eq!(classify_transition(Searching, Planning), Transition::Regress);
        assert_eq!(classify_transition(Searching, Idle), Transition::Illegal);
    }

    #[test]
    fn affordances_per_status() {
        assert!(!Idle.can_cancel());
        assert_eq!(Idle.active_searches(), 0);

        assert!(!Planning.is_busy());
        assert!(Planning.can_cancel());
        assert!(Searching.is_busy());
        assert!(Analyzing.is_busy());

        assert!(Complete.can_cancel());
        assert!(!Complete.is_busy());
        assert_eq!(Error.active_searches(), 1);
    }
}
