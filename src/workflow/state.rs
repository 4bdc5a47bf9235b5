use std::fmt;

use serde::{Deserialize, Serialize};

/// Position of a session in the issue-to-PR pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    Pending,
    Validating,
    Validated,
    WorktreeCreating,
    Implementing,
    Implemented,
    Reviewing,
    NeedsFixes,
    ReviewPassed,
    Finalizing,
    Completed,
    Merged,
    ReadyForHuman,
    ValidationFailed,
    ImplementationFailed,
    ReviewFailed,
    MaxIterationsReached,
    NeedsHumanIntervention,
}

use WorkflowState::*;

/// Allowed `(from, to)` pairs. Anything else is a wiring bug.
const TRANSITIONS: &[(WorkflowState, &[WorkflowState])] = &[
    (Pending, &[Validating, Validated, ValidationFailed, NeedsHumanIntervention]),
    (Validating, &[Validated, ValidationFailed, NeedsHumanIntervention]),
    (Validated, &[WorktreeCreating, Implementing]),
    (WorktreeCreating, &[Implementing]),
    (
        Implementing,
        &[
            Implemented,
            ImplementationFailed,
            MaxIterationsReached,
            NeedsHumanIntervention,
        ],
    ),
    (Implemented, &[Reviewing, ReviewPassed, NeedsFixes, ReviewFailed]),
    (Reviewing, &[ReviewPassed, NeedsFixes, ReviewFailed]),
    (NeedsFixes, &[Implementing, MaxIterationsReached]),
    (ReviewPassed, &[Finalizing, ReadyForHuman]),
    (Finalizing, &[ReadyForHuman]),
    (ReadyForHuman, &[Completed, Merged]),
];

impl WorkflowState {
    pub fn as_str(self) -> &'static str {
        match self {
            Pending => "PENDING",
            Validating => "VALIDATING",
            Validated => "VALIDATED",
            WorktreeCreating => "WORKTREE_CREATING",
            Implementing => "IMPLEMENTING",
            Implemented => "IMPLEMENTED",
            Reviewing => "REVIEWING",
            NeedsFixes => "NEEDS_FIXES",
            ReviewPassed => "REVIEW_PASSED",
            Finalizing => "FINALIZING",
            Completed => "COMPLETED",
            Merged => "MERGED",
            ReadyForHuman => "READY_FOR_HUMAN",
            ValidationFailed => "VALIDATION_FAILED",
            ImplementationFailed => "IMPLEMENTATION_FAILED",
            ReviewFailed => "REVIEW_FAILED",
            MaxIterationsReached => "MAX_ITERATIONS_REACHED",
            NeedsHumanIntervention => "NEEDS_HUMAN_INTERVENTION",
        }
    }

    /// The engine never runs a handler from a terminal state.
    pub fn is_terminal(self) -> bool {
        self.is_success_terminal() || self.is_failure_terminal()
    }

    /// Terminal states that count as a good outcome (including hand-off to a human).
    pub fn is_success_terminal(self) -> bool {
        matches!(self, Completed | Merged | ReadyForHuman)
    }

    pub fn is_failure_terminal(self) -> bool {
        matches!(
            self,
            ValidationFailed
                | ImplementationFailed
                | ReviewFailed
                | MaxIterationsReached
                | NeedsHumanIntervention
        )
    }

    pub fn can_transition_to(self, next: WorkflowState) -> bool {
        TRANSITIONS
            .iter()
            .find(|(from, _)| *from == self)
            .is_some_and(|(_, targets)| targets.contains(&next))
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named step of the pipeline; one handler per stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Validation,
    WorktreeCreation,
    Implementation,
    Review,
    FixImplementation,
    Finalization,
}

impl Stage {
    /// Handler owning `state`, or `None` for terminal states.
    ///
    /// Transient `*ing` states map to the stage that was interrupted while
    /// in them, so a session persisted mid-stage re-runs that stage.
    pub fn for_state(state: WorkflowState) -> Option<Stage> {
        match state {
            Pending | Validating => Some(Stage::Validation),
            Validated | WorktreeCreating => Some(Stage::WorktreeCreation),
            Implementing => Some(Stage::Implementation),
            Implemented | Reviewing => Some(Stage::Review),
            NeedsFixes => Some(Stage::FixImplementation),
            ReviewPassed | Finalizing => Some(Stage::Finalization),
            Completed | Merged | ReadyForHuman | ValidationFailed | ImplementationFailed
            | ReviewFailed | MaxIterationsReached | NeedsHumanIntervention => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Validation => "validation",
            Stage::WorktreeCreation => "worktree_creation",
            Stage::Implementation => "implementation",
            Stage::Review => "review",
            Stage::FixImplementation => "fix_implementation",
            Stage::Finalization => "finalization",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [WorkflowState; 18] = [
        Pending,
        Validating,
        Validated,
        WorktreeCreating,
        Implementing,
        Implemented,
        Reviewing,
        NeedsFixes,
        ReviewPassed,
        Finalizing,
        Completed,
        Merged,
        ReadyForHuman,
        ValidationFailed,
        ImplementationFailed,
        ReviewFailed,
        MaxIterationsReached,
        NeedsHumanIntervention,
    ];

    #[test]
    fn test_every_state_has_a_handler_or_is_terminal() {
        for state in ALL {
            assert_eq!(
                Stage::for_state(state).is_none(),
                state.is_terminal(),
                "{state}"
            );
        }
    }

    #[test]
    fn test_terminal_states_have_no_outgoing_transitions_except_hand_off() {
        for from in ALL.iter().filter(|s| s.is_failure_terminal()) {
            assert!(ALL.iter().all(|to| !from.can_transition_to(*to)), "{from}");
        }
        assert!(ReadyForHuman.can_transition_to(Merged));
    }

    #[test]
    fn test_core_path_is_allowed() {
        let path = [
            Pending,
            Validated,
            Implementing,
            Implemented,
            NeedsFixes,
            Implementing,
            Implemented,
            ReviewPassed,
            ReadyForHuman,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(!Pending.can_transition_to(Implementing));
        assert!(!Implemented.can_transition_to(ReadyForHuman));
    }

    #[test]
    fn test_serde_uses_wire_names() {
        assert_eq!(
            serde_json::to_string(&MaxIterationsReached).unwrap(),
            "\"MAX_ITERATIONS_REACHED\""
        );
        let parsed: WorkflowState = serde_json::from_str("\"READY_FOR_HUMAN\"").unwrap();
        assert_eq!(parsed, ReadyForHuman);
        assert_eq!(NeedsFixes.to_string(), "NEEDS_FIXES");
    }
}
