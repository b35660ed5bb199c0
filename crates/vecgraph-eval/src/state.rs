//! Run state machine with validated transitions.
//!
//! Idle -> Indexing -> Ready -> Querying -> Reported
//! Indexing/Querying -> Failed
//! Indexing/Querying -> Cancelled -> Reported (partial)

use std::fmt;

use serde::{Deserialize, Serialize};

/// Adapter operation a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Connect,
    CreateIndex,
    Upsert,
    Query,
    Clear,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Connect => "connect",
            Operation::CreateIndex => "create_index",
            Operation::Upsert => "upsert",
            Operation::Query => "query",
            Operation::Clear => "clear",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase a run was in when it was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Indexing,
    Querying,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Indexing => f.write_str("indexing"),
            Stage::Querying => f.write_str("querying"),
        }
    }
}

/// Where a single backend run currently stands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Indexing {
        chunks_done: usize,
        chunks_total: usize,
    },
    Ready,
    Querying {
        answered: usize,
        total: usize,
    },
    Reported,
    Failed {
        operation: Operation,
        error: String,
    },
    Cancelled {
        stage: Stage,
    },
}

impl RunState {
    pub fn name(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Indexing { .. } => "indexing",
            RunState::Ready => "ready",
            RunState::Querying { .. } => "querying",
            RunState::Reported => "reported",
            RunState::Failed { .. } => "failed",
            RunState::Cancelled { .. } => "cancelled",
        }
    }

    /// True once no further work can happen on the run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Reported | RunState::Failed { .. } | RunState::Cancelled { .. }
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Indexing {
                chunks_done,
                chunks_total,
            } => write!(f, "indexing ({}/{} chunks)", chunks_done, chunks_total),
            RunState::Querying { answered, total } => {
                write!(f, "querying ({}/{} queries)", answered, total)
            }
            RunState::Failed { operation, error } => write!(f, "failed during {}: {}", operation, error),
            RunState::Cancelled { stage } => write!(f, "cancelled during {}", stage),
            other => f.write_str(other.name()),
        }
    }
}

/// Whether a run may move from `from` to `to`.
///
/// Progress updates within Indexing and Querying are transitions to the
/// same variant.
pub fn is_valid_transition(from: &RunState, to: &RunState) -> bool {
    matches!(
        (from, to),
        (RunState::Idle, RunState::Indexing { .. })
            | (RunState::Indexing { .. }, RunState::Indexing { .. })
            | (RunState::Indexing { .. }, RunState::Ready)
            | (RunState::Indexing { .. }, RunState::Failed { .. })
            | (RunState::Indexing { .. }, RunState::Cancelled { .. })
            | (RunState::Ready, RunState::Querying { .. })
            | (RunState::Querying { .. }, RunState::Querying { .. })
            | (RunState::Querying { .. }, RunState::Reported)
            | (RunState::Querying { .. }, RunState::Failed { .. })
            | (RunState::Querying { .. }, RunState::Cancelled { .. })
            | (RunState::Cancelled { .. }, RunState::Reported)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indexing() -> RunState {
        RunState::Indexing {
            chunks_done: 0,
            chunks_total: 2,
        }
    }

    fn querying() -> RunState {
        RunState::Querying {
            answered: 0,
            total: 3,
        }
    }

    fn failed() -> RunState {
        RunState::Failed {
            operation: Operation::Upsert,
            error: "boom".to_string(),
        }
    }

    fn cancelled() -> RunState {
        RunState::Cancelled {
            stage: Stage::Indexing,
        }
    }

    // =====================================================================
    // Valid transitions
    // =====================================================================

    #[test]
    fn test_happy_path() {
        assert!(is_valid_transition(&RunState::Idle, &indexing()));
        assert!(is_valid_transition(&indexing(), &indexing()));
        assert!(is_valid_transition(&indexing(), &RunState::Ready));
        assert!(is_valid_transition(&RunState::Ready, &querying()));
        assert!(is_valid_transition(&querying(), &querying()));
        assert!(is_valid_transition(&querying(), &RunState::Reported));
    }

    #[test]
    fn test_failure_and_cancellation() {
        assert!(is_valid_transition(&indexing(), &failed()));
        assert!(is_valid_transition(&querying(), &failed()));
        assert!(is_valid_transition(&indexing(), &cancelled()));
        assert!(is_valid_transition(&querying(), &cancelled()));
        assert!(is_valid_transition(&cancelled(), &RunState::Reported));
    }

    // =====================================================================
    // Invalid transitions
    // =====================================================================

    #[test]
    fn test_cannot_skip_phases() {
        assert!(!is_valid_transition(&RunState::Idle, &querying()));
        assert!(!is_valid_transition(&RunState::Idle, &RunState::Reported));
        assert!(!is_valid_transition(&RunState::Ready, &RunState::Reported));
        assert!(!is_valid_transition(&indexing(), &querying()));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [RunState::Reported, failed()] {
            assert!(terminal.is_terminal());
            assert!(!is_valid_transition(&terminal, &RunState::Idle));
            assert!(!is_valid_transition(&terminal, &indexing()));
            assert!(!is_valid_transition(&terminal, &querying()));
        }
        assert!(!is_valid_transition(&failed(), &RunState::Reported));
        assert!(!is_valid_transition(&cancelled(), &indexing()));
    }

    #[test]
    fn test_idle_and_ready_cannot_fail() {
        assert!(!is_valid_transition(&RunState::Idle, &failed()));
        assert!(!is_valid_transition(&RunState::Ready, &failed()));
        assert!(!is_valid_transition(&RunState::Ready, &cancelled()));
    }

    #[test]
    fn test_display() {
        assert_eq!(indexing().to_string(), "indexing (0/2 chunks)");
        assert_eq!(failed().to_string(), "failed during upsert: boom");
        assert_eq!(RunState::Ready.to_string(), "ready");
        assert_eq!(Operation::CreateIndex.to_string(), "create_index");
    }

    #[test]
    fn test_serializes_tagged() {
        let json = serde_json::to_value(failed()).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["operation"], "upsert");
    }
}
